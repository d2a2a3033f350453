use clap::ArgMatches;
use vantasync_engine::{SyncOptions, SyncState};

pub async fn run(matches: &ArgMatches) {
    let engine = super::engine();

    let mut options = SyncOptions {
        incremental: matches.get_flag("incremental"),
        ..SyncOptions::default()
    };
    if let Some(raw) = matches.get_one::<String>("batch-size") {
        match raw.parse::<usize>() {
            Ok(size) if size > 0 => options.batch_size = size,
            _ => {
                eprintln!("✗ Invalid batch size: {raw}");
                std::process::exit(1);
            }
        }
    }

    let orchestrator = engine.orchestrator();
    let mut progress = orchestrator.events().subscribe_progress();
    let mut states = orchestrator.events().subscribe_state();

    let reporter = tokio::spawn(async move {
        loop {
            tokio::select! {
                update = progress.recv() => match update {
                    Ok(update) => {
                        println!("  … {} {}", update.count, update.stream);
                    }
                    Err(_) => break,
                },
                state = states.recv() => match state {
                    Ok(SyncState::Idle) => break,
                    Ok(state) => println!("  [{state}]"),
                    Err(_) => break,
                },
            }
        }
    });

    let mode = if options.incremental { "incremental" } else { "full" };
    println!("⟳ Starting {mode} sync…");

    match orchestrator.sync(options).await {
        Ok(outcome) => {
            let _ = reporter.await;
            println!("✓ Sync complete");
            let v = outcome.vulnerabilities;
            println!(
                "  Vulnerabilities: {} total ({} new, {} updated, {} remediated)",
                v.total, v.new, v.updated, v.remediated
            );
            let r = outcome.remediations;
            println!(
                "  Remediations:    {} total ({} new, {} updated)",
                r.total, r.new, r.updated
            );
            let a = outcome.assets;
            println!(
                "  Assets:          {} total ({} new, {} updated)",
                a.total, a.new, a.updated
            );
        }
        Err(e) => {
            reporter.abort();
            eprintln!("✗ Sync failed: {e}");
            std::process::exit(1);
        }
    }
}
