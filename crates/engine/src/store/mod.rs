//! Embedded SQLite storage engine.
//!
//! Owns all persistent state: the three entity tables, their indices, and
//! the sync event journal. All multi-row writes run inside explicit
//! transactions; classification reads and the corresponding upserts share
//! one transaction so concurrent readers never observe a torn batch.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::Connection;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::types::{BatchStats, StoreError};

mod journal;
mod query;
mod records;
mod stats;

pub use journal::{SyncHistoryEntry, HISTORY_LIMIT_MAX};
pub use query::{FilterMap, QueryOptions, SortDirection, StoredVulnerability};
pub use stats::{
    AssetAggregates, AssetVulnerabilityCount, RemediationAggregates, VulnerabilityStatistics,
};

use records::{
    project_asset, project_remediation, project_vulnerability, raw_has_deactivation,
};

/// Ids per `IN (...)` chunk, kept under SQLite's bound-variable ceiling.
const LOOKUP_CHUNK: usize = 500;

/// SQLite-backed store for vulnerability data.
pub struct VulnStore {
    conn: Mutex<Connection>,
}

impl VulnStore {
    /// Open (or create) the store at the given path.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::InvalidPath(format!("{}: {e}", parent.display())))?;
        }
        let conn = Connection::open(path)?;
        Self::configure(&conn)?;
        Self::init_schema(&conn)?;
        Self::repair_history_columns(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory store (used by tests).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Self::repair_history_columns(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Default database path: `<user-data>/vantasync/storage/vanta_vulnerabilities.db`.
    pub fn default_path() -> PathBuf {
        let base = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        base.join("vantasync")
            .join("storage")
            .join("vanta_vulnerabilities.db")
    }

    fn configure(conn: &Connection) -> Result<(), StoreError> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        // Negative cache_size is KiB: 64 MiB page cache.
        conn.pragma_update(None, "cache_size", -65536)?;
        conn.pragma_update(None, "temp_store", "MEMORY")?;
        // 256 MiB of memory-mapped reads.
        conn.pragma_update(None, "mmap_size", 268_435_456i64)?;
        Ok(())
    }

    fn init_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS vulnerabilities (
                id                 TEXT PRIMARY KEY,
                name               TEXT,
                description        TEXT,
                vulnerability_type TEXT,
                integration_id     TEXT,
                target_id          TEXT,
                package_identifier TEXT,
                severity           TEXT,
                cvss_score         REAL,
                scanner_score      REAL,
                is_fixable         INTEGER,
                first_detected     TEXT,
                last_detected      TEXT,
                remediate_by       TEXT,
                deactivated_on     TEXT,
                related_vulns      TEXT NOT NULL DEFAULT '[]',
                related_urls       TEXT NOT NULL DEFAULT '[]',
                raw_data           TEXT NOT NULL,
                updated_at         TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_vulnerabilities_severity
                ON vulnerabilities(severity);
            CREATE INDEX IF NOT EXISTS idx_vulnerabilities_target_id
                ON vulnerabilities(target_id);
            CREATE INDEX IF NOT EXISTS idx_vulnerabilities_deactivated_on
                ON vulnerabilities(deactivated_on);
            CREATE INDEX IF NOT EXISTS idx_vulnerabilities_is_fixable
                ON vulnerabilities(is_fixable);
            CREATE INDEX IF NOT EXISTS idx_vulnerabilities_integration_id
                ON vulnerabilities(integration_id);

            CREATE TABLE IF NOT EXISTS remediations (
                id                  TEXT PRIMARY KEY,
                vulnerability_id    TEXT,
                vulnerable_asset_id TEXT,
                severity            TEXT,
                detected_date       TEXT,
                sla_deadline_date   TEXT,
                remediation_date    TEXT,
                remediated_on_time  INTEGER,
                integration_id      TEXT,
                integration_type    TEXT,
                status              TEXT,
                raw_data            TEXT NOT NULL,
                updated_at          TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS assets (
                id                  TEXT PRIMARY KEY,
                name                TEXT,
                asset_type          TEXT,
                integration_id      TEXT,
                environment         TEXT,
                platform            TEXT,
                owner               TEXT,
                external_identifier TEXT,
                ip_addresses        TEXT NOT NULL DEFAULT '[]',
                hostnames           TEXT NOT NULL DEFAULT '[]',
                raw_data            TEXT NOT NULL,
                updated_at          TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sync_history (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                sync_date  TEXT NOT NULL,
                event_type TEXT,
                message    TEXT,
                details    TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_sync_history_sync_date
                ON sync_history(sync_date);",
        )?;
        Ok(())
    }

    /// Counter columns the journal is expected to carry. Older database
    /// files may predate some of them; repair only ever adds.
    const HISTORY_COLUMNS: [&'static str; 10] = [
        "vulnerabilities_count",
        "vulnerabilities_new",
        "vulnerabilities_updated",
        "vulnerabilities_remediated",
        "remediations_count",
        "remediations_new",
        "remediations_updated",
        "new_count",
        "updated_count",
        "remediated_count",
    ];

    fn repair_history_columns(conn: &Connection) -> Result<(), StoreError> {
        let mut stmt = conn.prepare("PRAGMA table_info(sync_history)")?;
        let present: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<_, _>>()?;

        for column in Self::HISTORY_COLUMNS {
            if !present.iter().any(|c| c == column) {
                tracing::info!(column, "adding missing sync_history column");
                conn.execute_batch(&format!(
                    "ALTER TABLE sync_history ADD COLUMN {column} INTEGER"
                ))?;
            }
        }
        Ok(())
    }

    /// Upsert a batch of wire vulnerabilities inside one transaction,
    /// classifying each row as new, updated, or newly remediated against a
    /// single bulk lookup of the pre-batch state.
    pub async fn store_vulnerabilities_batch(
        &self,
        rows: &[Value],
    ) -> Result<BatchStats, StoreError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();

        let ids: Vec<&str> = rows
            .iter()
            .filter_map(|v| v.get("id").and_then(Value::as_str))
            .filter(|s| !s.is_empty())
            .collect();
        let existing = existing_payloads(&tx, "vulnerabilities", &ids)?;

        let mut stats = BatchStats {
            total: rows.len() as u64,
            ..BatchStats::default()
        };

        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO vulnerabilities (
                    id, name, description, vulnerability_type, integration_id,
                    target_id, package_identifier, severity, cvss_score,
                    scanner_score, is_fixable, first_detected, last_detected,
                    remediate_by, deactivated_on, related_vulns, related_urls,
                    raw_data, updated_at
                ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19)
                ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    description = excluded.description,
                    vulnerability_type = excluded.vulnerability_type,
                    integration_id = excluded.integration_id,
                    target_id = excluded.target_id,
                    package_identifier = excluded.package_identifier,
                    severity = excluded.severity,
                    cvss_score = excluded.cvss_score,
                    scanner_score = excluded.scanner_score,
                    is_fixable = excluded.is_fixable,
                    first_detected = excluded.first_detected,
                    last_detected = excluded.last_detected,
                    remediate_by = excluded.remediate_by,
                    deactivated_on = excluded.deactivated_on,
                    related_vulns = excluded.related_vulns,
                    related_urls = excluded.related_urls,
                    raw_data = excluded.raw_data,
                    updated_at = excluded.updated_at",
            )?;

            for value in rows {
                let Some(rec) = project_vulnerability(value) else {
                    continue;
                };

                match existing.get(&rec.id) {
                    None => {
                        stats.new += 1;
                        if rec.deactivated_on.is_some() {
                            stats.remediated += 1;
                        }
                    }
                    Some(old_raw) if old_raw != &rec.raw => {
                        stats.updated += 1;
                        if !raw_has_deactivation(old_raw) && rec.deactivated_on.is_some() {
                            stats.remediated += 1;
                        }
                    }
                    Some(_) => {}
                }

                stmt.execute(rusqlite::params![
                    rec.id,
                    rec.name,
                    rec.description,
                    rec.vulnerability_type,
                    rec.integration_id,
                    rec.target_id,
                    rec.package_identifier,
                    rec.severity,
                    rec.cvss_score,
                    rec.scanner_score,
                    rec.is_fixable.map(|b| b as i32),
                    rec.first_detected,
                    rec.last_detected,
                    rec.remediate_by,
                    rec.deactivated_on,
                    rec.related_vulns,
                    rec.related_urls,
                    rec.raw,
                    now,
                ])?;
            }
        }

        tx.commit()?;
        Ok(stats)
    }

    /// Upsert a batch of wire remediation records. Remediations have no
    /// deactivation concept, so only new/updated are classified.
    pub async fn store_remediations_batch(&self, rows: &[Value]) -> Result<BatchStats, StoreError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();

        let ids: Vec<&str> = rows
            .iter()
            .filter_map(|v| v.get("id").and_then(Value::as_str))
            .filter(|s| !s.is_empty())
            .collect();
        let existing = existing_payloads(&tx, "remediations", &ids)?;

        let mut stats = BatchStats {
            total: rows.len() as u64,
            ..BatchStats::default()
        };

        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO remediations (
                    id, vulnerability_id, vulnerable_asset_id, severity,
                    detected_date, sla_deadline_date, remediation_date,
                    remediated_on_time, integration_id, integration_type,
                    status, raw_data, updated_at
                ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)
                ON CONFLICT(id) DO UPDATE SET
                    vulnerability_id = excluded.vulnerability_id,
                    vulnerable_asset_id = excluded.vulnerable_asset_id,
                    severity = excluded.severity,
                    detected_date = excluded.detected_date,
                    sla_deadline_date = excluded.sla_deadline_date,
                    remediation_date = excluded.remediation_date,
                    remediated_on_time = excluded.remediated_on_time,
                    integration_id = excluded.integration_id,
                    integration_type = excluded.integration_type,
                    status = excluded.status,
                    raw_data = excluded.raw_data,
                    updated_at = excluded.updated_at",
            )?;

            for value in rows {
                let Some(rec) = project_remediation(value) else {
                    continue;
                };

                match existing.get(&rec.id) {
                    None => stats.new += 1,
                    Some(old_raw) if old_raw != &rec.raw => stats.updated += 1,
                    Some(_) => {}
                }

                stmt.execute(rusqlite::params![
                    rec.id,
                    rec.vulnerability_id,
                    rec.vulnerable_asset_id,
                    rec.severity,
                    rec.detected_date,
                    rec.sla_deadline_date,
                    rec.remediation_date,
                    rec.remediated_on_time.map(|b| b as i32),
                    rec.integration_id,
                    rec.integration_type,
                    rec.status,
                    rec.raw,
                    now,
                ])?;
            }
        }

        tx.commit()?;
        Ok(stats)
    }

    /// Upsert a batch of wire asset records.
    pub async fn store_assets_batch(&self, rows: &[Value]) -> Result<BatchStats, StoreError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();

        let ids: Vec<&str> = rows
            .iter()
            .filter_map(|v| v.get("id").and_then(Value::as_str))
            .filter(|s| !s.is_empty())
            .collect();
        let existing = existing_payloads(&tx, "assets", &ids)?;

        let mut stats = BatchStats {
            total: rows.len() as u64,
            ..BatchStats::default()
        };

        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO assets (
                    id, name, asset_type, integration_id, environment,
                    platform, owner, external_identifier, ip_addresses,
                    hostnames, raw_data, updated_at
                ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)
                ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    asset_type = excluded.asset_type,
                    integration_id = excluded.integration_id,
                    environment = excluded.environment,
                    platform = excluded.platform,
                    owner = excluded.owner,
                    external_identifier = excluded.external_identifier,
                    ip_addresses = excluded.ip_addresses,
                    hostnames = excluded.hostnames,
                    raw_data = excluded.raw_data,
                    updated_at = excluded.updated_at",
            )?;

            for value in rows {
                let Some(rec) = project_asset(value) else {
                    continue;
                };

                match existing.get(&rec.id) {
                    None => stats.new += 1,
                    Some(old_raw) if old_raw != &rec.raw => stats.updated += 1,
                    Some(_) => {}
                }

                stmt.execute(rusqlite::params![
                    rec.id,
                    rec.name,
                    rec.asset_type,
                    rec.integration_id,
                    rec.environment,
                    rec.platform,
                    rec.owner,
                    rec.external_identifier,
                    rec.ip_addresses,
                    rec.hostnames,
                    rec.raw,
                    now,
                ])?;
            }
        }

        tx.commit()?;
        Ok(stats)
    }

    pub(crate) async fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let conn = self.conn.lock().await;
        f(&conn)
    }
}

/// One bulk lookup of `{id, raw_data}` for every id in the batch, chunked
/// to stay under SQLite's bound-variable limit.
fn existing_payloads(
    conn: &Connection,
    table: &str,
    ids: &[&str],
) -> Result<HashMap<String, String>, StoreError> {
    let mut map = HashMap::with_capacity(ids.len());
    for chunk in ids.chunks(LOOKUP_CHUNK) {
        let placeholders = vec!["?"; chunk.len()].join(",");
        let sql = format!("SELECT id, raw_data FROM {table} WHERE id IN ({placeholders})");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(chunk.iter()), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (id, raw) = row?;
            map.insert(id, raw);
        }
    }
    Ok(map)
}
