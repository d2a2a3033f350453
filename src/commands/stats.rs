use clap::ArgMatches;
use vantasync_engine::stats::{average_per_asset, share_breakdown, top_asset_list};
use vantasync_engine::FilterMap;

pub async fn run(matches: &ArgMatches) {
    let engine = super::engine();

    let mut filters = FilterMap::new();
    if let Some(raw) = matches.get_one::<String>("severity") {
        filters.insert("severity".to_string(), super::severity_filter(raw));
    }
    if let Some(status) = matches.get_one::<String>("status") {
        filters.insert(
            "status".to_string(),
            serde_json::Value::String(status.clone()),
        );
    }

    let stats = match engine.store().get_statistics(&filters).await {
        Ok(stats) => stats,
        Err(e) => {
            eprintln!("✗ Failed to compute statistics: {e}");
            std::process::exit(1);
        }
    };

    println!("📊 Vulnerability Statistics\n");
    println!("Total: {}", stats.total_count);
    println!(
        "Active: {}   Deactivated: {}   Fixable: {}   Not fixable: {}",
        stats.active, stats.deactivated, stats.fixable, stats.not_fixable
    );
    println!(
        "Unique assets: {}   Unique CVEs: {}   Avg per asset: {}",
        stats.unique_assets,
        stats.unique_cves,
        average_per_asset(stats.total_count, stats.unique_assets)
    );

    println!("\nBy severity:");
    for slice in share_breakdown(&stats.by_severity, stats.total_count, "UNKNOWN") {
        let avg = stats
            .average_cvss_by_severity
            .get(&slice.label.to_lowercase())
            .map(|avg| format!("  avg CVSS {avg:.1}"))
            .unwrap_or_default();
        println!("  {:<10} {:>6}  {:>7}{avg}", slice.label, slice.value, slice.percentage);
    }

    println!("\nBy integration:");
    for slice in share_breakdown(&stats.by_integration, stats.total_count, "UNKNOWN") {
        println!("  {:<24} {:>6}  {:>7}", slice.label, slice.value, slice.percentage);
    }

    match engine.store().top_assets(&filters, 10).await {
        Ok(rows) if !rows.is_empty() => {
            println!("\nTop assets:");
            for entry in top_asset_list(&rows) {
                println!(
                    "  {:<40} {:>5}  ({} critical/high)",
                    entry.label, entry.value, entry.critical_and_high
                );
            }
        }
        Ok(_) => {}
        Err(e) => eprintln!("✗ Failed to rank assets: {e}"),
    }

    if stats.remediations.total > 0 {
        println!(
            "\nRemediations: {} total, {} on time, {} late",
            stats.remediations.total, stats.remediations.on_time, stats.remediations.late
        );
    }
    if let Some(last_sync) = &stats.last_sync {
        println!("\nLast sync: {last_sync}");
    }
}
