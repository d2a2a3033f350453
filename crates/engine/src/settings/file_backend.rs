//! JSON-file credentials backend.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{ApiCredentials, SettingsStore};
use crate::types::SettingsError;

/// Stores credentials as a JSON document on disk.
///
/// Reads and writes go through `spawn_blocking` so the async runtime is
/// never blocked on filesystem latency. On unix the file is created with
/// mode 0600.
pub struct FileSettingsStore {
    path: PathBuf,
}

impl FileSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Default settings path: `<user-config>/vantasync/settings.json`.
    pub fn default_path() -> PathBuf {
        let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        base.join("vantasync").join("settings.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_file(path: &Path) -> Result<Option<ApiCredentials>, SettingsError> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SettingsError::Io(e.to_string())),
        };
        let creds = serde_json::from_slice(&bytes)
            .map_err(|e| SettingsError::Serialization(e.to_string()))?;
        Ok(Some(creds))
    }

    fn write_file(path: &Path, credentials: &ApiCredentials) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SettingsError::Io(e.to_string()))?;
        }
        let body = serde_json::to_vec_pretty(credentials)
            .map_err(|e| SettingsError::Serialization(e.to_string()))?;
        std::fs::write(path, body).map_err(|e| SettingsError::Io(e.to_string()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                .map_err(|e| SettingsError::Io(e.to_string()))?;
        }
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for FileSettingsStore {
    async fn get(&self) -> Result<Option<ApiCredentials>, SettingsError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || Self::read_file(&path))
            .await
            .map_err(|e| SettingsError::Io(e.to_string()))?
    }

    async fn set(&self, credentials: ApiCredentials) -> Result<(), SettingsError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || Self::write_file(&path, &credentials))
            .await
            .map_err(|e| SettingsError::Io(e.to_string()))?
    }
}
