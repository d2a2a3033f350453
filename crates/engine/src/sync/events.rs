//! Event channels published by the sync orchestrator.
//!
//! Each concern gets its own independently-subscribable broadcast channel.
//! Emission never blocks and never fails: events published with no live
//! subscriber are simply dropped.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::types::{BatchStats, StreamKind, SyncOutcome, SyncState};

/// Running total of records observed for one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressUpdate {
    #[serde(rename = "type")]
    pub stream: StreamKind,
    pub count: u64,
}

/// A buffer flush reached storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IncrementalUpdate {
    #[serde(rename = "type")]
    pub stream: StreamKind,
    /// Running per-stream stats after this flush.
    pub stats: BatchStats,
    /// Records written by this flush.
    pub flushed: usize,
}

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast channels for every orchestrator event kind.
#[derive(Debug, Clone)]
pub struct SyncEventChannels {
    progress: broadcast::Sender<ProgressUpdate>,
    incremental: broadcast::Sender<IncrementalUpdate>,
    state: broadcast::Sender<SyncState>,
    completed: broadcast::Sender<SyncOutcome>,
    error: broadcast::Sender<String>,
}

impl SyncEventChannels {
    pub fn new() -> Self {
        Self {
            progress: broadcast::channel(CHANNEL_CAPACITY).0,
            incremental: broadcast::channel(CHANNEL_CAPACITY).0,
            state: broadcast::channel(CHANNEL_CAPACITY).0,
            completed: broadcast::channel(CHANNEL_CAPACITY).0,
            error: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    pub fn subscribe_progress(&self) -> broadcast::Receiver<ProgressUpdate> {
        self.progress.subscribe()
    }

    pub fn subscribe_incremental(&self) -> broadcast::Receiver<IncrementalUpdate> {
        self.incremental.subscribe()
    }

    pub fn subscribe_state(&self) -> broadcast::Receiver<SyncState> {
        self.state.subscribe()
    }

    pub fn subscribe_completed(&self) -> broadcast::Receiver<SyncOutcome> {
        self.completed.subscribe()
    }

    pub fn subscribe_error(&self) -> broadcast::Receiver<String> {
        self.error.subscribe()
    }

    pub(crate) fn emit_progress(&self, update: ProgressUpdate) {
        let _ = self.progress.send(update);
    }

    pub(crate) fn emit_incremental(&self, update: IncrementalUpdate) {
        let _ = self.incremental.send(update);
    }

    pub(crate) fn emit_state(&self, state: SyncState) {
        let _ = self.state.send(state);
    }

    pub(crate) fn emit_completed(&self, outcome: SyncOutcome) {
        let _ = self.completed.send(outcome);
    }

    pub(crate) fn emit_error(&self, message: String) {
        let _ = self.error.send(message);
    }
}

impl Default for SyncEventChannels {
    fn default() -> Self {
        Self::new()
    }
}
