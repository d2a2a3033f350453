//! Engine configuration.
//!
//! Defaults resolve against the user's data/config directories; individual
//! fields can be overridden through environment variables.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::settings::FileSettingsStore;
use crate::store::VulnStore;
use crate::sync::DEFAULT_BATCH_SIZE;

/// Environment variable overriding the database path.
pub const ENV_DB_PATH: &str = "VANTASYNC_DB_PATH";
/// Environment variable overriding the per-stream flush threshold.
pub const ENV_BATCH_SIZE: &str = "VANTASYNC_BATCH_SIZE";
/// Environment variable overriding the rate-limit safety margin.
pub const ENV_SAFETY_MARGIN: &str = "VANTASYNC_SAFETY_MARGIN";

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// SQLite database file location.
    pub db_path: PathBuf,
    /// Credentials settings file location.
    pub settings_path: PathBuf,
    /// Per-stream buffer flush threshold.
    pub batch_size: usize,
    /// Fraction of the remote rate limits actually used, in (0, 1].
    pub safety_margin: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: VulnStore::default_path(),
            settings_path: FileSettingsStore::default_path(),
            batch_size: DEFAULT_BATCH_SIZE,
            safety_margin: 0.8,
        }
    }
}

impl EngineConfig {
    /// Defaults with environment overrides applied. Unparseable values are
    /// logged and ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = std::env::var(ENV_DB_PATH) {
            if !path.is_empty() {
                config.db_path = PathBuf::from(path);
            }
        }
        if let Ok(raw) = std::env::var(ENV_BATCH_SIZE) {
            match raw.parse::<usize>() {
                Ok(size) if size > 0 => config.batch_size = size,
                _ => tracing::warn!(value = %raw, "ignoring invalid {ENV_BATCH_SIZE}"),
            }
        }
        if let Ok(raw) = std::env::var(ENV_SAFETY_MARGIN) {
            match raw.parse::<f64>() {
                Ok(margin) if margin > 0.0 && margin <= 1.0 => config.safety_margin = margin,
                _ => tracing::warn!(value = %raw, "ignoring invalid {ENV_SAFETY_MARGIN}"),
            }
        }

        config
    }
}
