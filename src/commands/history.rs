use clap::ArgMatches;

pub async fn run(matches: &ArgMatches) {
    let engine = super::engine();

    let limit = matches
        .get_one::<String>("limit")
        .and_then(|raw| raw.parse::<i64>().ok());

    let entries = match engine.store().get_sync_history(limit).await {
        Ok(entries) => entries,
        Err(e) => {
            eprintln!("✗ Failed to read sync history: {e}");
            std::process::exit(1);
        }
    };

    if entries.is_empty() {
        println!("(no sync history)");
        return;
    }

    println!("🕒 Sync History\n");
    for entry in entries {
        match entry.event_type.as_deref() {
            Some(event) => {
                println!(
                    "{}  {:<9} {}",
                    entry.sync_date,
                    event,
                    entry.message.as_deref().unwrap_or("")
                );
            }
            // Legacy summary rows carry counters instead of an event type.
            None => {
                println!(
                    "{}  summary   vulns {} ({} new, {} updated, {} remediated), remediations {} ({} new, {} updated)",
                    entry.sync_date,
                    entry.vulnerabilities_count.unwrap_or(0),
                    entry.vulnerabilities_new.unwrap_or(0),
                    entry.vulnerabilities_updated.unwrap_or(0),
                    entry.vulnerabilities_remediated.unwrap_or(0),
                    entry.remediations_count.unwrap_or(0),
                    entry.remediations_new.unwrap_or(0),
                    entry.remediations_updated.unwrap_or(0),
                );
            }
        }
    }
}
