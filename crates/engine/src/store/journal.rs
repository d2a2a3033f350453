//! Sync event journal.
//!
//! One append-only table holds both per-event rows (with an `event_type`)
//! and denormalized summary rows written at sync completion (legacy shape,
//! `event_type` NULL). Rows are never mutated.

use chrono::Utc;
use serde_json::Value;

use super::VulnStore;
use crate::types::{BatchStats, StoreError};

/// Ceiling applied to history query limits.
pub const HISTORY_LIMIT_MAX: i64 = 100_000;

/// One journal row. Event rows carry `event_type`/`message`; summary rows
/// carry the counters instead. Consumers must tolerate both shapes.
#[derive(Debug, Clone)]
pub struct SyncHistoryEntry {
    pub id: i64,
    pub sync_date: String,
    pub event_type: Option<String>,
    pub message: Option<String>,
    pub details: Option<String>,
    pub vulnerabilities_count: Option<i64>,
    pub vulnerabilities_new: Option<i64>,
    pub vulnerabilities_updated: Option<i64>,
    pub vulnerabilities_remediated: Option<i64>,
    pub remediations_count: Option<i64>,
    pub remediations_new: Option<i64>,
    pub remediations_updated: Option<i64>,
    pub new_count: Option<i64>,
    pub updated_count: Option<i64>,
    pub remediated_count: Option<i64>,
}

impl VulnStore {
    /// Append one event row to the journal.
    pub async fn log_sync_event(
        &self,
        event_type: &str,
        message: &str,
        details: Option<&Value>,
    ) -> Result<i64, StoreError> {
        let sync_date = Utc::now().to_rfc3339();
        let details = details.map(Value::to_string);
        let event_type = event_type.to_string();
        let message = message.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO sync_history (sync_date, event_type, message, details)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![sync_date, event_type, message, details],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    /// Append the denormalized completion summary. Counters land in both
    /// the semantic columns and the legacy alias columns of the same row;
    /// the aliases mirror the vulnerability counters.
    pub async fn record_sync_history(
        &self,
        vuln_stats: &BatchStats,
        rem_stats: &BatchStats,
    ) -> Result<i64, StoreError> {
        let sync_date = Utc::now().to_rfc3339();
        let vuln = *vuln_stats;
        let rem = *rem_stats;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO sync_history (
                    sync_date,
                    vulnerabilities_count, vulnerabilities_new,
                    vulnerabilities_updated, vulnerabilities_remediated,
                    remediations_count, remediations_new, remediations_updated,
                    new_count, updated_count, remediated_count
                ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
                rusqlite::params![
                    sync_date,
                    vuln.total as i64,
                    vuln.new as i64,
                    vuln.updated as i64,
                    vuln.remediated as i64,
                    rem.total as i64,
                    rem.new as i64,
                    rem.updated as i64,
                    vuln.new as i64,
                    vuln.updated as i64,
                    vuln.remediated as i64,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    /// Journal rows, newest first. `limit` is clamped into
    /// `[1, HISTORY_LIMIT_MAX]`; `None` means the maximum.
    pub async fn get_sync_history(
        &self,
        limit: Option<i64>,
    ) -> Result<Vec<SyncHistoryEntry>, StoreError> {
        let limit = limit.unwrap_or(HISTORY_LIMIT_MAX).clamp(1, HISTORY_LIMIT_MAX);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, sync_date, event_type, message, details,
                        vulnerabilities_count, vulnerabilities_new,
                        vulnerabilities_updated, vulnerabilities_remediated,
                        remediations_count, remediations_new, remediations_updated,
                        new_count, updated_count, remediated_count
                 FROM sync_history
                 ORDER BY sync_date DESC, id DESC
                 LIMIT ?1",
            )?;
            let rows = stmt.query_map([limit], row_to_entry)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
        .await
    }

    /// `sync_date` of the most recent `complete` event, if any.
    pub async fn get_last_successful_sync_date(&self) -> Result<Option<String>, StoreError> {
        self.with_conn(|conn| {
            let result = conn.query_row(
                "SELECT sync_date FROM sync_history
                 WHERE event_type = 'complete'
                 ORDER BY sync_date DESC, id DESC
                 LIMIT 1",
                [],
                |row| row.get(0),
            );
            match result {
                Ok(date) => Ok(Some(date)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncHistoryEntry> {
    Ok(SyncHistoryEntry {
        id: row.get(0)?,
        sync_date: row.get(1)?,
        event_type: row.get(2)?,
        message: row.get(3)?,
        details: row.get(4)?,
        vulnerabilities_count: row.get(5)?,
        vulnerabilities_new: row.get(6)?,
        vulnerabilities_updated: row.get(7)?,
        vulnerabilities_remediated: row.get(8)?,
        remediations_count: row.get(9)?,
        remediations_new: row.get(10)?,
        remediations_updated: row.get(11)?,
        new_count: row.get(12)?,
        updated_count: row.get(13)?,
        remediated_count: row.get(14)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn events_append_and_read_newest_first() {
        let store = VulnStore::open_in_memory().unwrap();
        store
            .log_sync_event("start", "Sync started", Some(&json!({"mode": "full"})))
            .await
            .unwrap();
        store
            .log_sync_event("complete", "Sync completed", None)
            .await
            .unwrap();

        let history = store.get_sync_history(None).await.unwrap();
        assert_eq!(history.len(), 2);
        // Same-timestamp rows tie-break on id, newest insert first.
        assert_eq!(history[0].event_type.as_deref(), Some("complete"));
        assert_eq!(history[1].event_type.as_deref(), Some("start"));
        assert!(history[1].details.as_deref().unwrap().contains("full"));
    }

    #[tokio::test]
    async fn summary_row_fills_semantic_and_legacy_columns() {
        let store = VulnStore::open_in_memory().unwrap();
        let vuln = BatchStats {
            new: 3,
            updated: 2,
            remediated: 1,
            total: 6,
        };
        let rem = BatchStats {
            new: 4,
            updated: 1,
            remediated: 0,
            total: 5,
        };
        store.record_sync_history(&vuln, &rem).await.unwrap();

        let history = store.get_sync_history(Some(10)).await.unwrap();
        let row = &history[0];
        assert_eq!(row.event_type, None);
        assert_eq!(row.vulnerabilities_count, Some(6));
        assert_eq!(row.vulnerabilities_new, Some(3));
        assert_eq!(row.vulnerabilities_remediated, Some(1));
        assert_eq!(row.remediations_count, Some(5));
        assert_eq!(row.remediations_new, Some(4));
        assert_eq!(row.new_count, Some(3));
        assert_eq!(row.updated_count, Some(2));
        assert_eq!(row.remediated_count, Some(1));
    }

    #[tokio::test]
    async fn history_limit_is_clamped() {
        let store = VulnStore::open_in_memory().unwrap();
        for i in 0..5 {
            store
                .log_sync_event("batch", &format!("batch {i}"), None)
                .await
                .unwrap();
        }

        assert_eq!(store.get_sync_history(Some(2)).await.unwrap().len(), 2);
        // Zero and negative limits clamp up to one row.
        assert_eq!(store.get_sync_history(Some(0)).await.unwrap().len(), 1);
        assert_eq!(store.get_sync_history(Some(-5)).await.unwrap().len(), 1);
        // Oversized limits clamp down but still return everything present.
        assert_eq!(
            store
                .get_sync_history(Some(HISTORY_LIMIT_MAX + 1))
                .await
                .unwrap()
                .len(),
            5
        );
    }

    #[tokio::test]
    async fn last_successful_sync_date_tracks_complete_events() {
        let store = VulnStore::open_in_memory().unwrap();
        assert!(store
            .get_last_successful_sync_date()
            .await
            .unwrap()
            .is_none());

        store
            .log_sync_event("error", "Sync failed", None)
            .await
            .unwrap();
        assert!(store
            .get_last_successful_sync_date()
            .await
            .unwrap()
            .is_none());

        store
            .log_sync_event("complete", "Sync completed", None)
            .await
            .unwrap();
        let date = store.get_last_successful_sync_date().await.unwrap();
        assert!(date.is_some());
    }
}
