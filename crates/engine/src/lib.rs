//! Vantasync Engine
//!
//! Local synchronization engine for Vanta vulnerability data: pulls
//! paginated vulnerability, remediation, and asset records from the remote
//! API, persists them into an embedded SQLite store with per-record
//! new/updated/remediated classification, and exposes filtered queries,
//! aggregate statistics, and a sync event journal.

pub mod client;
pub mod config;
pub mod ratelimit;
pub mod settings;
pub mod stats;
pub mod store;
pub mod sync;
pub mod types;

// Re-export commonly used types
pub use client::{
    FeedProvider, RetryPolicy, VantaClient, VantaFeedProvider, VulnerabilityFeed,
};
pub use config::EngineConfig;
pub use ratelimit::{EndpointLimits, RateLimitConfig, TokenBucket};
pub use settings::{ApiCredentials, FileSettingsStore, MemorySettingsStore, SettingsStore};
pub use store::{
    FilterMap, QueryOptions, SortDirection, StoredVulnerability, SyncHistoryEntry, VulnStore,
    VulnerabilityStatistics,
};
pub use sync::{
    IncrementalUpdate, ProgressUpdate, SyncEventChannels, SyncOptions, SyncOrchestrator,
    SyncStateInfo,
};
pub use types::{
    ApiClientError, BatchStats, SettingsError, Severity, StoreError, StreamKind, SyncError,
    SyncOutcome, SyncState,
};

use std::sync::Arc;

/// Wired-together engine: storage, settings, and the sync orchestrator.
#[derive(Clone)]
pub struct SyncEngine {
    store: Arc<VulnStore>,
    settings: Arc<dyn SettingsStore>,
    orchestrator: Arc<SyncOrchestrator>,
}

impl SyncEngine {
    /// Build the engine from configuration, opening (or creating) the
    /// database and pointing at the production API.
    pub fn new(config: &EngineConfig) -> Result<Self, SyncError> {
        let store = Arc::new(VulnStore::open(&config.db_path)?);
        let settings: Arc<dyn SettingsStore> =
            Arc::new(FileSettingsStore::new(config.settings_path.clone()));
        let feeds: Arc<dyn FeedProvider> = Arc::new(VantaFeedProvider::default());
        Ok(Self::with_parts(store, settings, feeds))
    }

    /// Assemble the engine from injected collaborators (used by tests and
    /// embedders that substitute their own backends).
    pub fn with_parts(
        store: Arc<VulnStore>,
        settings: Arc<dyn SettingsStore>,
        feeds: Arc<dyn FeedProvider>,
    ) -> Self {
        let orchestrator = Arc::new(SyncOrchestrator::new(
            Arc::clone(&store),
            Arc::clone(&settings),
            feeds,
        ));
        Self {
            store,
            settings,
            orchestrator,
        }
    }

    pub fn store(&self) -> &Arc<VulnStore> {
        &self.store
    }

    pub fn settings(&self) -> &Arc<dyn SettingsStore> {
        &self.settings
    }

    pub fn orchestrator(&self) -> &Arc<SyncOrchestrator> {
        &self.orchestrator
    }
}
