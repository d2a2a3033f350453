//! Credential settings storage.
//!
//! The engine reads API credentials through the [`SettingsStore`] trait so
//! tests and embedders can substitute their own backend. The default
//! backend persists a single JSON document in the user's config directory.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::types::SettingsError;

pub mod file_backend;

pub use file_backend::FileSettingsStore;

/// OAuth client credentials for the remote API.
///
/// The secret is redacted from `Debug` output and must never be logged.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl ApiCredentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    /// Both fields present and non-empty.
    pub fn is_complete(&self) -> bool {
        !self.client_id.trim().is_empty() && !self.client_secret.trim().is_empty()
    }
}

impl std::fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Abstract credentials store.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Read the stored credentials, if any.
    async fn get(&self) -> Result<Option<ApiCredentials>, SettingsError>;

    /// Persist credentials, replacing any previous value.
    async fn set(&self, credentials: ApiCredentials) -> Result<(), SettingsError>;
}

/// In-memory store used by tests and ephemeral embedders.
#[derive(Default)]
pub struct MemorySettingsStore {
    inner: RwLock<Option<ApiCredentials>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credentials(credentials: ApiCredentials) -> Self {
        Self {
            inner: RwLock::new(Some(credentials)),
        }
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn get(&self) -> Result<Option<ApiCredentials>, SettingsError> {
        Ok(self.inner.read().await.clone())
    }

    async fn set(&self, credentials: ApiCredentials) -> Result<(), SettingsError> {
        *self.inner.write().await = Some(credentials);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_redacts_the_secret() {
        let creds = ApiCredentials::new("client-1", "super-secret");
        let text = format!("{:?}", creds);
        assert!(text.contains("client-1"));
        assert!(!text.contains("super-secret"));
        assert!(text.contains("<redacted>"));
    }

    #[test]
    fn completeness_requires_both_fields() {
        assert!(ApiCredentials::new("id", "secret").is_complete());
        assert!(!ApiCredentials::new("", "secret").is_complete());
        assert!(!ApiCredentials::new("id", "  ").is_complete());
    }

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = MemorySettingsStore::new();
        assert!(store.get().await.unwrap().is_none());

        store
            .set(ApiCredentials::new("id", "secret"))
            .await
            .unwrap();
        let loaded = store.get().await.unwrap().unwrap();
        assert_eq!(loaded.client_id, "id");
    }
}
