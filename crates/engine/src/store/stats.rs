//! Aggregate statistics over the stored data.

use std::collections::HashMap;

use rusqlite::Connection;

use super::query::{compile_filters, CompiledFilter, FilterMap};
use super::VulnStore;
use crate::types::StoreError;

/// Asset-table sub-aggregates.
#[derive(Debug, Clone, Default)]
pub struct AssetAggregates {
    pub total: i64,
    pub by_type: HashMap<String, i64>,
    pub by_environment: HashMap<String, i64>,
}

/// Remediation-table sub-aggregates.
#[derive(Debug, Clone, Default)]
pub struct RemediationAggregates {
    pub total: i64,
    pub on_time: i64,
    pub late: i64,
    pub by_status: HashMap<String, i64>,
}

/// Aggregate counts computed under one compiled filter.
#[derive(Debug, Clone, Default)]
pub struct VulnerabilityStatistics {
    pub total_count: i64,
    pub by_severity: HashMap<String, i64>,
    pub by_integration: HashMap<String, i64>,
    pub fixable: i64,
    pub not_fixable: i64,
    pub active: i64,
    pub deactivated: i64,
    pub unique_assets: i64,
    pub unique_cves: i64,
    /// Keyed by lowercased severity; only rows with a CVSS score contribute.
    pub average_cvss_by_severity: HashMap<String, f64>,
    pub last_sync: Option<String>,
    pub assets: AssetAggregates,
    pub remediations: RemediationAggregates,
}

/// One asset's vulnerability tally, used for top-N lists.
#[derive(Debug, Clone)]
pub struct AssetVulnerabilityCount {
    pub target_id: String,
    pub name: Option<String>,
    pub asset_type: Option<String>,
    pub total: i64,
    pub critical: i64,
    pub high: i64,
}

impl VulnStore {
    /// Compute the full aggregate set under the given filters. All counts
    /// share the same compiled WHERE clause.
    pub async fn get_statistics(
        &self,
        filters: &FilterMap,
    ) -> Result<VulnerabilityStatistics, StoreError> {
        let compiled = compile_filters(filters, "");
        self.with_conn(move |conn| {
            let mut stats = VulnerabilityStatistics {
                total_count: count_where(conn, &compiled, &[])?,
                fixable: count_where(conn, &compiled, &["is_fixable = 1"])?,
                not_fixable: count_where(conn, &compiled, &["is_fixable = 0"])?,
                active: count_where(conn, &compiled, &["deactivated_on IS NULL"])?,
                deactivated: count_where(conn, &compiled, &["deactivated_on IS NOT NULL"])?,
                ..VulnerabilityStatistics::default()
            };

            stats.by_severity = grouped_counts(
                conn,
                &compiled,
                "COALESCE(NULLIF(UPPER(severity),''),'UNKNOWN')",
            )?;
            stats.by_integration = grouped_counts(
                conn,
                &compiled,
                "COALESCE(NULLIF(integration_id,''),'UNKNOWN')",
            )?;

            stats.unique_assets = scalar_where(
                conn,
                "COUNT(DISTINCT target_id)",
                &compiled,
                &[],
            )?;
            stats.unique_cves = scalar_where(conn, "COUNT(DISTINCT name)", &compiled, &[])?;

            stats.average_cvss_by_severity = average_cvss(conn, &compiled)?;

            stats.last_sync = conn
                .query_row(
                    "SELECT sync_date FROM sync_history ORDER BY sync_date DESC, id DESC LIMIT 1",
                    [],
                    |row| row.get(0),
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(other),
                })?;

            stats.assets = asset_aggregates(conn)?;
            stats.remediations = remediation_aggregates(conn)?;
            Ok(stats)
        })
        .await
    }

    /// Assets carrying the most vulnerabilities under the given filters.
    pub async fn top_assets(
        &self,
        filters: &FilterMap,
        limit: i64,
    ) -> Result<Vec<AssetVulnerabilityCount>, StoreError> {
        let compiled = compile_filters(filters, "v.");
        let sql = format!(
            "SELECT v.target_id, a.name, a.asset_type, COUNT(*) AS total,
                    SUM(CASE WHEN UPPER(v.severity) = 'CRITICAL' THEN 1 ELSE 0 END),
                    SUM(CASE WHEN UPPER(v.severity) = 'HIGH' THEN 1 ELSE 0 END)
             FROM vulnerabilities v
             LEFT JOIN assets a ON a.id = v.target_id{}
             GROUP BY v.target_id, a.name, a.asset_type
             ORDER BY total DESC
             LIMIT ?",
            compiled.where_with(&["v.target_id IS NOT NULL"])
        );

        self.with_conn(move |conn| {
            let mut params = compiled.params;
            params.push(rusqlite::types::Value::Integer(limit.max(0)));
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(params), |row| {
                Ok(AssetVulnerabilityCount {
                    target_id: row.get(0)?,
                    name: row.get(1)?,
                    asset_type: row.get(2)?,
                    total: row.get(3)?,
                    critical: row.get(4)?,
                    high: row.get(5)?,
                })
            })?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
        .await
    }
}

fn count_where(
    conn: &Connection,
    compiled: &CompiledFilter,
    extra: &[&str],
) -> Result<i64, StoreError> {
    scalar_where(conn, "COUNT(*)", compiled, extra)
}

fn scalar_where(
    conn: &Connection,
    expr: &str,
    compiled: &CompiledFilter,
    extra: &[&str],
) -> Result<i64, StoreError> {
    let sql = format!(
        "SELECT {expr} FROM vulnerabilities{}",
        compiled.where_with(extra)
    );
    let value = conn.query_row(
        &sql,
        rusqlite::params_from_iter(compiled.params.iter()),
        |row| row.get(0),
    )?;
    Ok(value)
}

fn grouped_counts(
    conn: &Connection,
    compiled: &CompiledFilter,
    key_expr: &str,
) -> Result<HashMap<String, i64>, StoreError> {
    let sql = format!(
        "SELECT {key_expr}, COUNT(*) FROM vulnerabilities{} GROUP BY 1",
        compiled.where_clause()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(compiled.params.iter()), |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;
    let mut map = HashMap::new();
    for row in rows {
        let (key, count) = row?;
        map.insert(key, count);
    }
    Ok(map)
}

fn average_cvss(
    conn: &Connection,
    compiled: &CompiledFilter,
) -> Result<HashMap<String, f64>, StoreError> {
    let sql = format!(
        "SELECT LOWER(COALESCE(NULLIF(severity,''),'UNKNOWN')), AVG(cvss_score)
         FROM vulnerabilities{}
         GROUP BY 1",
        compiled.where_with(&["cvss_score IS NOT NULL"])
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(compiled.params.iter()), |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
    })?;
    let mut map = HashMap::new();
    for row in rows {
        let (key, avg) = row?;
        map.insert(key, avg);
    }
    Ok(map)
}

fn asset_aggregates(conn: &Connection) -> Result<AssetAggregates, StoreError> {
    let total = conn.query_row("SELECT COUNT(*) FROM assets", [], |row| row.get(0))?;
    Ok(AssetAggregates {
        total,
        by_type: simple_group(conn, "assets", "COALESCE(NULLIF(asset_type,''),'Unknown')")?,
        by_environment: simple_group(
            conn,
            "assets",
            "COALESCE(NULLIF(environment,''),'Unknown')",
        )?,
    })
}

fn remediation_aggregates(conn: &Connection) -> Result<RemediationAggregates, StoreError> {
    let total = conn.query_row("SELECT COUNT(*) FROM remediations", [], |row| row.get(0))?;
    let on_time = conn.query_row(
        "SELECT COUNT(*) FROM remediations WHERE remediated_on_time = 1",
        [],
        |row| row.get(0),
    )?;
    let late = conn.query_row(
        "SELECT COUNT(*) FROM remediations WHERE remediated_on_time = 0",
        [],
        |row| row.get(0),
    )?;
    Ok(RemediationAggregates {
        total,
        on_time,
        late,
        by_status: simple_group(conn, "remediations", "COALESCE(NULLIF(status,''),'Unknown')")?,
    })
}

fn simple_group(
    conn: &Connection,
    table: &str,
    key_expr: &str,
) -> Result<HashMap<String, i64>, StoreError> {
    let sql = format!("SELECT {key_expr}, COUNT(*) FROM {table} GROUP BY 1");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;
    let mut map = HashMap::new();
    for row in rows {
        let (key, count) = row?;
        map.insert(key, count);
    }
    Ok(map)
}
