use clap::ArgMatches;
use serde_json::Value;
use vantasync_engine::{FilterMap, QueryOptions, SortDirection};

pub async fn run(matches: &ArgMatches) {
    let engine = super::engine();

    let mut filters = FilterMap::new();
    if let Some(raw) = matches.get_one::<String>("severity") {
        filters.insert("severity".to_string(), super::severity_filter(raw));
    }
    for (flag, key) in [
        ("status", "status"),
        ("fixable", "fixable"),
        ("integration", "integration"),
        ("asset-id", "asset_id"),
        ("cve", "cve"),
        ("search", "search"),
    ] {
        if let Some(value) = matches.get_one::<String>(flag) {
            filters.insert(key.to_string(), Value::String(value.clone()));
        }
    }

    let options = QueryOptions {
        sort_by: matches.get_one::<String>("sort").cloned(),
        direction: matches
            .get_one::<String>("dir")
            .map(|d| SortDirection::parse(d))
            .unwrap_or_default(),
        limit: parse_i64(matches, "limit", 100),
        offset: parse_i64(matches, "offset", 0),
    };

    let rows = match engine.store().query_vulnerabilities(&filters, &options).await {
        Ok(rows) => rows,
        Err(e) => {
            eprintln!("✗ Query failed: {e}");
            std::process::exit(1);
        }
    };

    if rows.is_empty() {
        println!("(no vulnerabilities match)");
        return;
    }

    println!(
        "{:<28} {:<10} {:<9} {:<20} {:<12} {}",
        "ID", "SEVERITY", "STATUS", "INTEGRATION", "DETECTED", "NAME"
    );
    for row in rows {
        let status = if row.deactivated_on.is_some() {
            "fixed"
        } else {
            "active"
        };
        println!(
            "{:<28} {:<10} {:<9} {:<20} {:<12} {}",
            truncate(&row.id, 28),
            row.severity.as_deref().unwrap_or("UNKNOWN"),
            status,
            truncate(row.integration_id.as_deref().unwrap_or("-"), 20),
            truncate(row.first_detected.as_deref().unwrap_or("-"), 12),
            row.name.as_deref().unwrap_or("-"),
        );
    }
}

fn parse_i64(matches: &ArgMatches, name: &str, default: i64) -> i64 {
    matches
        .get_one::<String>(name)
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

fn truncate(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        value.to_string()
    } else {
        let cut: String = value.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}
