use clap::{Arg, ArgAction, Command};

mod commands;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let matches = Command::new("vantasync")
        .version(VERSION)
        .about("Vantasync - local Vanta vulnerability sync and statistics")
        .subcommand(
            Command::new("configure")
                .about("Store API credentials")
                .arg(
                    Arg::new("client-id")
                        .long("client-id")
                        .value_name("CLIENT_ID")
                        .help("OAuth client ID")
                        .required(true),
                )
                .arg(
                    Arg::new("client-secret")
                        .long("client-secret")
                        .value_name("CLIENT_SECRET")
                        .help("OAuth client secret")
                        .required(true),
                ),
        )
        .subcommand(
            Command::new("sync")
                .about("Pull vulnerabilities, remediations, and assets into the local store")
                .arg(
                    Arg::new("incremental")
                        .long("incremental")
                        .action(ArgAction::SetTrue)
                        .help("Only fetch remediations newer than the last successful sync"),
                )
                .arg(
                    Arg::new("batch-size")
                        .long("batch-size")
                        .value_name("N")
                        .help("Records buffered per stream before flushing to storage"),
                ),
        )
        .subcommand(
            Command::new("stats")
                .about("Show aggregate statistics for the stored data")
                .arg(
                    Arg::new("severity")
                        .long("severity")
                        .value_name("LIST")
                        .help("Comma-separated severity filter (e.g. CRITICAL,HIGH)"),
                )
                .arg(
                    Arg::new("status")
                        .long("status")
                        .value_name("STATUS")
                        .help("Filter by status: active or deactivated"),
                ),
        )
        .subcommand(
            Command::new("query")
                .about("List stored vulnerabilities")
                .arg(Arg::new("severity").long("severity").value_name("LIST")
                    .help("Comma-separated severity filter"))
                .arg(Arg::new("status").long("status").value_name("STATUS")
                    .help("active or deactivated"))
                .arg(Arg::new("fixable").long("fixable").value_name("FIXABLE")
                    .help("fixable or not_fixable"))
                .arg(Arg::new("integration").long("integration").value_name("SUBSTRING")
                    .help("Filter by scanner integration id"))
                .arg(Arg::new("asset-id").long("asset-id").value_name("ID")
                    .help("Filter by affected asset id"))
                .arg(Arg::new("cve").long("cve").value_name("SUBSTRING")
                    .help("Filter by CVE identifier"))
                .arg(Arg::new("search").long("search").value_name("SUBSTRING")
                    .help("Free-text search over name, description, and id"))
                .arg(Arg::new("sort").long("sort").value_name("COLUMN")
                    .help("Sort column (id, name, severity, integration_id, target_id, first_detected, status)"))
                .arg(Arg::new("dir").long("dir").value_name("DIR")
                    .help("Sort direction: asc or desc").default_value("desc"))
                .arg(Arg::new("limit").long("limit").value_name("N").default_value("100"))
                .arg(Arg::new("offset").long("offset").value_name("N").default_value("0")),
        )
        .subcommand(
            Command::new("history")
                .about("Show the sync event journal")
                .arg(
                    Arg::new("limit")
                        .long("limit")
                        .value_name("N")
                        .help("Number of journal rows to show")
                        .default_value("50"),
                ),
        )
        .get_matches();

    match matches.subcommand() {
        Some(("configure", sub)) => commands::configure::run(sub).await,
        Some(("sync", sub)) => commands::sync::run(sub).await,
        Some(("stats", sub)) => commands::stats::run(sub).await,
        Some(("query", sub)) => commands::query::run(sub).await,
        Some(("history", sub)) => commands::history::run(sub).await,
        _ => {
            eprintln!("No subcommand given. Try `vantasync --help`.");
            std::process::exit(2);
        }
    }
}
