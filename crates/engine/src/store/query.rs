//! Filtered query layer over the vulnerabilities table.
//!
//! Filters arrive as a JSON map from the presentation layer. Only a closed
//! set of keys is recognized; unknown keys are ignored. Every recognized
//! value is bound as a parameter, never interpolated.

use rusqlite::types::Value as SqlValue;
use serde_json::Value;

use super::VulnStore;
use crate::types::StoreError;

/// Filter map as supplied by the presentation layer.
pub type FilterMap = serde_json::Map<String, Value>;

/// Sort direction; descending when unspecified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

fn non_empty_str(value: &Value) -> Option<&str> {
    value.as_str().filter(|s| !s.is_empty())
}

impl SortDirection {
    fn sql(self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }

    /// Parse a direction string; anything but "asc" means descending.
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("asc") {
            SortDirection::Asc
        } else {
            SortDirection::Desc
        }
    }
}

/// Sorting and paging options for vulnerability queries.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub sort_by: Option<String>,
    pub direction: SortDirection,
    pub limit: i64,
    pub offset: i64,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            sort_by: None,
            direction: SortDirection::Desc,
            limit: 100,
            offset: 0,
        }
    }
}

/// A vulnerability row as stored.
#[derive(Debug, Clone)]
pub struct StoredVulnerability {
    pub id: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub vulnerability_type: Option<String>,
    pub integration_id: Option<String>,
    pub target_id: Option<String>,
    pub package_identifier: Option<String>,
    pub severity: Option<String>,
    pub cvss_score: Option<f64>,
    pub scanner_score: Option<f64>,
    pub is_fixable: Option<bool>,
    pub first_detected: Option<String>,
    pub last_detected: Option<String>,
    pub remediate_by: Option<String>,
    pub deactivated_on: Option<String>,
    pub related_vulns: String,
    pub related_urls: String,
    pub raw_data: String,
    pub updated_at: String,
}

/// Compiled WHERE fragment: conditions joined with AND plus their bound
/// parameters, in order.
pub(crate) struct CompiledFilter {
    pub conditions: Vec<String>,
    pub params: Vec<SqlValue>,
}

impl CompiledFilter {
    pub fn where_clause(&self) -> String {
        build_where(&self.conditions, &[])
    }

    /// WHERE clause with extra fixed conditions appended.
    pub fn where_with(&self, extra: &[&str]) -> String {
        build_where(&self.conditions, extra)
    }
}

fn build_where(conditions: &[String], extra: &[&str]) -> String {
    let mut all: Vec<&str> = conditions.iter().map(String::as_str).collect();
    all.extend_from_slice(extra);
    if all.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", all.join(" AND "))
    }
}

/// Compile a filter map into SQL conditions. `prefix` qualifies column
/// references when the query joins other tables (e.g. `"v."`).
pub(crate) fn compile_filters(filters: &FilterMap, prefix: &str) -> CompiledFilter {
    let mut conditions = Vec::new();
    let mut params: Vec<SqlValue> = Vec::new();
    let col = |name: &str| format!("{prefix}{name}");

    for (key, value) in filters {
        match key.as_str() {
            "severity" => {
                let severities: Vec<String> = match value {
                    Value::Array(items) => items
                        .iter()
                        .filter_map(Value::as_str)
                        .filter(|s| !s.is_empty())
                        .map(str::to_owned)
                        .collect(),
                    Value::String(s) if !s.is_empty() => vec![s.clone()],
                    _ => Vec::new(),
                };
                if !severities.is_empty() {
                    let placeholders = vec!["?"; severities.len()].join(",");
                    conditions.push(format!("{} IN ({placeholders})", col("severity")));
                    params.extend(severities.into_iter().map(SqlValue::Text));
                }
            }
            "status" => match value.as_str() {
                Some("active") => conditions.push(format!("{} IS NULL", col("deactivated_on"))),
                Some("deactivated") => {
                    conditions.push(format!("{} IS NOT NULL", col("deactivated_on")))
                }
                _ => {}
            },
            "fixable" => match value.as_str() {
                Some("fixable") => conditions.push(format!("{} = 1", col("is_fixable"))),
                Some("not_fixable") => conditions.push(format!("{} = 0", col("is_fixable"))),
                _ => {}
            },
            "integration" => {
                if let Some(v) = non_empty_str(value) {
                    conditions.push(format!("{} LIKE ?", col("integration_id")));
                    params.push(SqlValue::Text(format!("%{v}%")));
                }
            }
            "asset_id" => {
                if let Some(v) = non_empty_str(value) {
                    conditions.push(format!("{} = ?", col("target_id")));
                    params.push(SqlValue::Text(v.to_string()));
                }
            }
            "cve" => {
                if let Some(v) = non_empty_str(value) {
                    conditions.push(format!(
                        "({} LIKE ? OR {} LIKE ?)",
                        col("name"),
                        col("related_vulns")
                    ));
                    let like = format!("%{v}%");
                    params.push(SqlValue::Text(like.clone()));
                    params.push(SqlValue::Text(like));
                }
            }
            "search" => {
                if let Some(v) = non_empty_str(value) {
                    conditions.push(format!(
                        "({} LIKE ? OR {} LIKE ? OR {} LIKE ?)",
                        col("name"),
                        col("description"),
                        col("id")
                    ));
                    let like = format!("%{v}%");
                    params.push(SqlValue::Text(like.clone()));
                    params.push(SqlValue::Text(like.clone()));
                    params.push(SqlValue::Text(like));
                }
            }
            "date_identified_start" => {
                if let Some(v) = non_empty_str(value) {
                    conditions.push(format!("{} >= ?", col("first_detected")));
                    params.push(SqlValue::Text(v.to_string()));
                }
            }
            "date_identified_end" => {
                if let Some(v) = non_empty_str(value) {
                    conditions.push(format!("{} <= ?", col("first_detected")));
                    params.push(SqlValue::Text(v.to_string()));
                }
            }
            "date_remediated_start" => {
                if let Some(v) = non_empty_str(value) {
                    conditions.push(format!("{} >= ?", col("deactivated_on")));
                    params.push(SqlValue::Text(v.to_string()));
                }
            }
            "date_remediated_end" => {
                if let Some(v) = non_empty_str(value) {
                    conditions.push(format!("{} <= ?", col("deactivated_on")));
                    params.push(SqlValue::Text(v.to_string()));
                }
            }
            // Unrecognized keys are ignored.
            _ => {}
        }
    }

    CompiledFilter { conditions, params }
}

/// Columns callers may sort on; anything else falls back to `first_detected`.
const SORT_WHITELIST: [&str; 7] = [
    "id",
    "name",
    "severity",
    "integration_id",
    "target_id",
    "first_detected",
    "status",
];

pub(crate) fn order_clause(sort_by: Option<&str>, direction: SortDirection) -> String {
    let dir = direction.sql();
    let column = sort_by
        .filter(|c| SORT_WHITELIST.contains(c))
        .unwrap_or("first_detected");

    match column {
        "status" => format!("ORDER BY (deactivated_on IS NULL) {dir}, name ASC"),
        "severity" => format!(
            "ORDER BY CASE UPPER(severity) \
             WHEN 'CRITICAL' THEN 1 WHEN 'HIGH' THEN 2 WHEN 'MEDIUM' THEN 3 \
             WHEN 'LOW' THEN 4 WHEN 'INFO' THEN 5 ELSE 6 END {dir}, name ASC"
        ),
        _ => format!("ORDER BY ({column} IS NULL), {column} {dir}, name ASC"),
    }
}

impl VulnStore {
    /// Query vulnerabilities under a compiled filter map with whitelisted
    /// sorting and LIMIT/OFFSET paging.
    pub async fn query_vulnerabilities(
        &self,
        filters: &FilterMap,
        options: &QueryOptions,
    ) -> Result<Vec<StoredVulnerability>, StoreError> {
        let compiled = compile_filters(filters, "");
        let order = order_clause(options.sort_by.as_deref(), options.direction);
        let sql = format!(
            "SELECT id, name, description, vulnerability_type, integration_id,
                    target_id, package_identifier, severity, cvss_score,
                    scanner_score, is_fixable, first_detected, last_detected,
                    remediate_by, deactivated_on, related_vulns, related_urls,
                    raw_data, updated_at
             FROM vulnerabilities{} {} LIMIT ? OFFSET ?",
            compiled.where_clause(),
            order
        );

        let mut params = compiled.params;
        params.push(SqlValue::Integer(options.limit.max(0)));
        params.push(SqlValue::Integer(options.offset.max(0)));

        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(params), row_to_vulnerability)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
        .await
    }
}

fn row_to_vulnerability(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredVulnerability> {
    Ok(StoredVulnerability {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        vulnerability_type: row.get(3)?,
        integration_id: row.get(4)?,
        target_id: row.get(5)?,
        package_identifier: row.get(6)?,
        severity: row.get(7)?,
        cvss_score: row.get(8)?,
        scanner_score: row.get(9)?,
        is_fixable: row.get::<_, Option<i64>>(10)?.map(|v| v != 0),
        first_detected: row.get(11)?,
        last_detected: row.get(12)?,
        remediate_by: row.get(13)?,
        deactivated_on: row.get(14)?,
        related_vulns: row.get(15)?,
        related_urls: row.get(16)?,
        raw_data: row.get(17)?,
        updated_at: row.get(18)?,
    })
}
