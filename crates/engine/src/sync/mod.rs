//! Sync orchestrator.
//!
//! Coordinates one process-wide sync session: three concurrent paginated
//! fetches feed per-stream buffers that flush incrementally into storage.
//! The session honors pause/resume/stop at every batch boundary and always
//! unwinds back to idle, journaling an error event on failure.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex as StateMutex;
use serde_json::Value;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

use crate::client::{BatchSink, FeedProvider};
use crate::settings::{ApiCredentials, SettingsStore};
use crate::store::VulnStore;
use crate::types::{ApiClientError, BatchStats, StreamKind, SyncError, SyncOutcome, SyncState};

pub mod events;

pub use events::{IncrementalUpdate, ProgressUpdate, SyncEventChannels};

/// Flush threshold applied per stream when the caller does not override it.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Per-session options.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Filter remediations to those remediated after the last successful
    /// sync. Vulnerabilities and assets are always fetched in full: the
    /// remote API has no changed-since filter for them.
    pub incremental: bool,
    /// Per-stream buffer flush threshold.
    pub batch_size: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            incremental: false,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Snapshot of the orchestrator's lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncStateInfo {
    pub state: SyncState,
    pub has_active_session: bool,
}

/// Cancellation and pause handles owned by one session.
struct SessionControl {
    cancel: CancellationToken,
    pause: watch::Sender<bool>,
}

impl SessionControl {
    fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            pause: watch::channel(false).0,
        }
    }
}

/// Orchestrates sync sessions against the storage engine.
pub struct SyncOrchestrator {
    store: Arc<VulnStore>,
    settings: Arc<dyn SettingsStore>,
    feeds: Arc<dyn FeedProvider>,
    events: SyncEventChannels,
    state: Arc<StateMutex<SyncState>>,
    session: Mutex<Option<Arc<SessionControl>>>,
}

impl SyncOrchestrator {
    pub fn new(
        store: Arc<VulnStore>,
        settings: Arc<dyn SettingsStore>,
        feeds: Arc<dyn FeedProvider>,
    ) -> Self {
        Self {
            store,
            settings,
            feeds,
            events: SyncEventChannels::new(),
            state: Arc::new(StateMutex::new(SyncState::Idle)),
            session: Mutex::new(None),
        }
    }

    /// Event channels for presentation-layer subscribers.
    pub fn events(&self) -> &SyncEventChannels {
        &self.events
    }

    /// Current lifecycle state.
    pub fn current_state(&self) -> SyncState {
        *self.state.lock()
    }

    /// State plus whether a session is active.
    pub async fn sync_state(&self) -> SyncStateInfo {
        SyncStateInfo {
            state: self.current_state(),
            has_active_session: self.session.lock().await.is_some(),
        }
    }

    /// Run one sync session. Fails fast when a session is already active
    /// or credentials are missing; otherwise fetches all three streams
    /// concurrently and returns the accumulated per-stream counters.
    pub async fn sync(&self, options: SyncOptions) -> Result<SyncOutcome, SyncError> {
        let control = {
            let mut slot = self.session.lock().await;
            if slot.is_some() {
                return Err(SyncError::AlreadyInProgress);
            }
            let control = Arc::new(SessionControl::new());
            *slot = Some(Arc::clone(&control));
            control
        };

        let result = self.run_session(&control, options).await;

        if let Err(e) = &result {
            match e {
                SyncError::StoppedByUser => tracing::info!("sync stopped by user"),
                other => tracing::error!(error = %other, "sync session failed"),
            }
            if let Err(journal_err) = self.store.log_sync_event("error", &e.to_string(), None).await
            {
                tracing::warn!(error = %journal_err, "failed to journal sync error");
            }
            self.events.emit_error(e.to_string());
        }

        *self.session.lock().await = None;
        transition(&self.state, &self.events, SyncState::Idle);

        result
    }

    async fn run_session(
        &self,
        control: &Arc<SessionControl>,
        options: SyncOptions,
    ) -> Result<SyncOutcome, SyncError> {
        let credentials: ApiCredentials = self
            .settings
            .get()
            .await?
            .filter(ApiCredentials::is_complete)
            .ok_or(SyncError::CredentialsMissing)?;
        let feed = self.feeds.connect(&credentials)?;

        transition(&self.state, &self.events, SyncState::Running);

        let mode = if options.incremental { "incremental" } else { "full" };
        let mut remediation_filters: Vec<(String, String)> = Vec::new();
        if options.incremental {
            if let Some(date) = self.store.get_last_successful_sync_date().await? {
                tracing::info!(since = %date, "incremental sync: filtering remediations");
                remediation_filters.push(("remediatedAfterDate".to_string(), date));
            }
        }

        self.store
            .log_sync_event(
                "start",
                &format!("Sync started ({mode} mode)"),
                Some(&serde_json::json!({
                    "mode": mode,
                    "batch_size": options.batch_size,
                })),
            )
            .await?;

        let vulns = self.stream_ingest(StreamKind::Vulnerabilities, control, options.batch_size);
        let rems = self.stream_ingest(StreamKind::Remediations, control, options.batch_size);
        let assets = self.stream_ingest(StreamKind::Assets, control, options.batch_size);

        let fetched = tokio::try_join!(
            feed.fetch(
                StreamKind::Vulnerabilities,
                Vec::new(),
                control.cancel.clone(),
                StreamIngest::sink(&vulns),
            ),
            feed.fetch(
                StreamKind::Remediations,
                remediation_filters,
                control.cancel.clone(),
                StreamIngest::sink(&rems),
            ),
            feed.fetch(
                StreamKind::Assets,
                Vec::new(),
                control.cancel.clone(),
                StreamIngest::sink(&assets),
            ),
        );

        match fetched {
            Ok(_) => {}
            Err(e) if control.cancel.is_cancelled() && is_cancellation(&e) => {
                return Err(SyncError::StoppedByUser);
            }
            Err(e) => return Err(e),
        }

        // Residual buffer contents below the flush threshold.
        vulns.flush().await?;
        rems.flush().await?;
        assets.flush().await?;

        let vuln_stats = vulns.totals().await;
        let rem_stats = rems.totals().await;
        let asset_stats = assets.totals().await;

        self.store.record_sync_history(&vuln_stats, &rem_stats).await?;
        self.store
            .log_sync_event(
                "complete",
                "Sync completed",
                Some(&serde_json::json!({
                    "vulnerabilities": vuln_stats,
                    "remediations": rem_stats,
                    "assets": asset_stats,
                })),
            )
            .await?;

        let outcome = SyncOutcome {
            vulnerabilities: vuln_stats,
            remediations: rem_stats,
            assets: asset_stats,
        };
        self.events.emit_completed(outcome);
        tracing::info!(
            vulnerabilities = vuln_stats.total,
            remediations = rem_stats.total,
            assets = asset_stats.total,
            "sync completed"
        );
        Ok(outcome)
    }

    fn stream_ingest(
        &self,
        kind: StreamKind,
        control: &Arc<SessionControl>,
        batch_size: usize,
    ) -> Arc<StreamIngest> {
        Arc::new(StreamIngest {
            kind,
            batch_size: batch_size.max(1),
            buffer: Mutex::new(Vec::new()),
            observed: AtomicU64::new(0),
            stats: Mutex::new(BatchStats::default()),
            store: Arc::clone(&self.store),
            events: self.events.clone(),
            control: Arc::clone(control),
            state: Arc::clone(&self.state),
        })
    }

    /// Pause the active session. Permitted only while running; the state
    /// flips to paused once a stream reaches its next batch boundary.
    pub async fn pause(&self) -> Result<(), SyncError> {
        let control = self
            .session
            .lock()
            .await
            .as_ref()
            .cloned()
            .ok_or(SyncError::NoActiveSync)?;
        if self.current_state() != SyncState::Running {
            return Err(SyncError::NoActiveSync);
        }
        control.pause.send_replace(true);
        self.store.log_sync_event("pause", "Sync paused", None).await?;
        Ok(())
    }

    /// Resume a paused session.
    pub async fn resume(&self) -> Result<(), SyncError> {
        let control = self
            .session
            .lock()
            .await
            .as_ref()
            .cloned()
            .ok_or(SyncError::NoActiveSync)?;
        if self.current_state() != SyncState::Paused {
            return Err(SyncError::NoActiveSync);
        }
        control.pause.send_replace(false);
        self.store.log_sync_event("resume", "Sync resumed", None).await?;
        Ok(())
    }

    /// Stop the active session. Idempotent after the first call within a
    /// session. Any pause wait is released and in-flight requests abort.
    pub async fn stop(&self) -> Result<(), SyncError> {
        let control = self
            .session
            .lock()
            .await
            .as_ref()
            .cloned()
            .ok_or(SyncError::NoActiveSync)?;
        if control.cancel.is_cancelled() {
            return Ok(());
        }
        transition(&self.state, &self.events, SyncState::Stopping);
        // Release any pause wait first so the waiter runs into the
        // cancellation at its next boundary check.
        control.pause.send_replace(false);
        control.cancel.cancel();
        self.store.log_sync_event("stop", "Stop requested", None).await?;
        Ok(())
    }
}

/// Buffered ingestion state for one stream.
struct StreamIngest {
    kind: StreamKind,
    batch_size: usize,
    buffer: Mutex<Vec<Value>>,
    observed: AtomicU64,
    stats: Mutex<BatchStats>,
    store: Arc<VulnStore>,
    events: SyncEventChannels,
    control: Arc<SessionControl>,
    state: Arc<StateMutex<SyncState>>,
}

impl StreamIngest {
    /// Batch callback handed to the feed for this stream.
    fn sink(ingest: &Arc<StreamIngest>) -> BatchSink {
        let ingest = Arc::clone(ingest);
        Box::new(move |page| {
            let ingest = Arc::clone(&ingest);
            Box::pin(async move { ingest.on_batch(page).await })
        })
    }

    async fn on_batch(&self, page: Vec<Value>) -> Result<(), SyncError> {
        self.check_pause_or_stop().await?;

        let received = page.len();
        let buffered = {
            let mut buffer = self.buffer.lock().await;
            buffer.extend(page);
            buffer.len()
        };
        let count = self.observed.fetch_add(received as u64, Ordering::Relaxed) + received as u64;

        self.events.emit_progress(ProgressUpdate {
            stream: self.kind,
            count,
        });
        self.store
            .log_sync_event(
                "batch",
                &format!("Received {received} {} records", self.kind.singular()),
                Some(&serde_json::json!({
                    "stream": self.kind.as_str(),
                    "received": received,
                    "count": count,
                })),
            )
            .await?;

        if buffered >= self.batch_size {
            self.flush().await?;
        }
        Ok(())
    }

    /// Drain the buffer through the batch upsert and publish the result.
    async fn flush(&self) -> Result<(), SyncError> {
        let drained: Vec<Value> = {
            let mut buffer = self.buffer.lock().await;
            std::mem::take(&mut *buffer)
        };
        if drained.is_empty() {
            return Ok(());
        }
        let flushed = drained.len();

        let batch = match self.kind {
            StreamKind::Vulnerabilities => self.store.store_vulnerabilities_batch(&drained).await,
            StreamKind::Remediations => self.store.store_remediations_batch(&drained).await,
            StreamKind::Assets => self.store.store_assets_batch(&drained).await,
        }
        .map_err(|source| SyncError::FlushFailed {
            stream: self.kind.singular(),
            source,
        })?;

        let running = {
            let mut stats = self.stats.lock().await;
            stats.absorb(batch);
            *stats
        };

        self.events.emit_incremental(IncrementalUpdate {
            stream: self.kind,
            stats: running,
            flushed,
        });
        self.store
            .log_sync_event(
                "flush",
                &format!("Flushed {flushed} {} records", self.kind.singular()),
                Some(&serde_json::json!({
                    "stream": self.kind.as_str(),
                    "flushed": flushed,
                    "new": batch.new,
                    "updated": batch.updated,
                    "remediated": batch.remediated,
                })),
            )
            .await?;
        tracing::debug!(stream = self.kind.as_str(), flushed, "buffer flushed");
        Ok(())
    }

    async fn totals(&self) -> BatchStats {
        *self.stats.lock().await
    }

    /// Called at every batch boundary: fail on cancellation, or block on
    /// the pause handle until resumed or stopped.
    async fn check_pause_or_stop(&self) -> Result<(), SyncError> {
        if self.control.cancel.is_cancelled() {
            return Err(SyncError::StoppedByUser);
        }

        let mut pause_rx = self.control.pause.subscribe();
        if !*pause_rx.borrow() {
            return Ok(());
        }

        transition(&self.state, &self.events, SyncState::Paused);
        loop {
            tokio::select! {
                _ = self.control.cancel.cancelled() => return Err(SyncError::StoppedByUser),
                changed = pause_rx.changed() => {
                    if changed.is_err() || !*pause_rx.borrow() {
                        break;
                    }
                }
            }
        }
        // A stop releases the pause handle before signalling cancellation;
        // the stopping state is already set by then, so a released waiter
        // observes the abort here even if the token lags an instant.
        if self.control.cancel.is_cancelled() || *self.state.lock() == SyncState::Stopping {
            return Err(SyncError::StoppedByUser);
        }
        transition(&self.state, &self.events, SyncState::Running);
        Ok(())
    }
}

/// Move to `to`, emitting a state event only on an actual change.
fn transition(state: &StateMutex<SyncState>, events: &SyncEventChannels, to: SyncState) {
    let changed = {
        let mut current = state.lock();
        if *current != to {
            *current = to;
            true
        } else {
            false
        }
    };
    if changed {
        events.emit_state(to);
    }
}

fn is_cancellation(error: &SyncError) -> bool {
    matches!(
        error,
        SyncError::StoppedByUser | SyncError::Api(ApiClientError::Cancelled)
    )
}
