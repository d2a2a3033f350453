pub mod configure;
pub mod history;
pub mod query;
pub mod stats;
pub mod sync;

use vantasync_engine::{EngineConfig, SyncEngine};

/// Build the engine from environment-aware configuration, exiting with a
/// message when the database cannot be opened.
pub(crate) fn engine() -> SyncEngine {
    let config = EngineConfig::from_env();
    match SyncEngine::new(&config) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("✗ Failed to open the local store: {e}");
            std::process::exit(1);
        }
    }
}

/// Parse a comma-separated severity list into a JSON filter value.
pub(crate) fn severity_filter(raw: &str) -> serde_json::Value {
    let severities: Vec<serde_json::Value> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| serde_json::Value::String(s.to_ascii_uppercase()))
        .collect();
    serde_json::Value::Array(severities)
}
