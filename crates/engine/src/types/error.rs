//! Error types for the synchronization engine.

use thiserror::Error;

/// Errors produced by the API client.
#[derive(Debug, Error, Clone)]
pub enum ApiClientError {
    /// Token acquisition failed (bad credentials, auth endpoint rejection).
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The request was cancelled before completing.
    #[error("Request cancelled")]
    Cancelled,

    /// Terminal client error (non-retryable 4xx).
    #[error("HTTP {status}: {body}")]
    Status {
        status: u16,
        body: String,
        request_id: Option<String>,
    },

    /// Network or protocol failure talking to the remote API.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The remote kept answering 429 until the retry budget ran out.
    #[error("Rate limited by remote API after {attempts} attempts")]
    RateLimited {
        attempts: u32,
        request_id: Option<String>,
    },

    /// Retry budget exhausted on server errors or transport failures.
    #[error("Request retries exhausted after {attempts} attempts (last status: {last_status:?})")]
    Exhausted {
        attempts: u32,
        last_status: Option<u16>,
        request_id: Option<String>,
    },

    /// Terminal pagination failure, annotated with where the walk stopped.
    #[error(
        "Pagination of {endpoint} failed (page_size={page_size}, cursor={cursor:?}, request_id={request_id:?}): {source}"
    )]
    Pagination {
        endpoint: String,
        page_size: u32,
        cursor: Option<String>,
        request_id: Option<String>,
        #[source]
        source: Box<ApiClientError>,
    },
}

impl ApiClientError {
    /// Request id attached to the terminal response, if the remote sent one.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            ApiClientError::Status { request_id, .. }
            | ApiClientError::RateLimited { request_id, .. }
            | ApiClientError::Exhausted { request_id, .. }
            | ApiClientError::Pagination { request_id, .. } => request_id.as_deref(),
            _ => None,
        }
    }
}

/// Errors produced by the storage engine.
#[derive(Debug, Error, Clone)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid storage path: {0}")]
    InvalidPath(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Sqlite(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Errors produced by the settings/credentials store.
#[derive(Debug, Error, Clone)]
pub enum SettingsError {
    #[error("Settings IO error: {0}")]
    Io(String),

    #[error("Settings serialization error: {0}")]
    Serialization(String),
}

/// Top-level error surface of the engine.
#[derive(Debug, Error, Clone)]
pub enum SyncError {
    #[error("Client ID and Client Secret must be configured before syncing.")]
    CredentialsMissing,

    #[error("A sync is already in progress")]
    AlreadyInProgress,

    #[error("No active sync session")]
    NoActiveSync,

    #[error("Sync stopped by user")]
    StoppedByUser,

    #[error("Failed to flush {stream} buffer: {source}")]
    FlushFailed {
        stream: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("API error: {0}")]
    Api(#[from] ApiClientError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),
}
