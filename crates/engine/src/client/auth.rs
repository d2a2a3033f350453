//! OAuth2 client-credentials token management.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::ratelimit::EndpointLimits;
use crate::settings::ApiCredentials;
use crate::types::ApiClientError;

/// Scope requested for every token.
const TOKEN_SCOPE: &str = "vanta-api.all:read";

/// Token lifetime assumed when the auth response omits `expires_in`.
const DEFAULT_TOKEN_TTL_SECS: u64 = 3300;

/// Refresh the token once it expires within this buffer.
const EXPIRY_BUFFER: Duration = Duration::from_secs(60);

/// A forced refresh that finds a token minted within this window reuses it:
/// the caller queued behind a concurrent refresh and the fresh token already
/// reflects it.
const SHARED_REFRESH_WINDOW: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<u64>,
}

struct CachedToken {
    access_token: String,
    acquired_at: Instant,
    expires_at: Instant,
}

/// Acquires and caches bearer tokens for the remote API.
///
/// The cache mutex doubles as the authentication lock: concurrent callers
/// queue behind an in-flight token request instead of issuing their own.
pub(crate) struct TokenManager {
    http: reqwest::Client,
    auth_url: String,
    credentials: ApiCredentials,
    limits: Arc<EndpointLimits>,
    cache: Mutex<Option<CachedToken>>,
}

impl TokenManager {
    pub(crate) fn new(
        http: reqwest::Client,
        auth_url: impl Into<String>,
        credentials: ApiCredentials,
        limits: Arc<EndpointLimits>,
    ) -> Self {
        Self {
            http,
            auth_url: auth_url.into(),
            credentials,
            limits,
            cache: Mutex::new(None),
        }
    }

    /// Return a bearer token, requesting a new one when the cache is empty,
    /// near expiry, or `force` is set (after a 401).
    pub(crate) async fn bearer(
        &self,
        force: bool,
        cancel: &CancellationToken,
    ) -> Result<String, ApiClientError> {
        let mut cache = self.cache.lock().await;

        if let Some(cached) = cache.as_ref() {
            let now = Instant::now();
            if !force && cached.expires_at > now + EXPIRY_BUFFER {
                return Ok(cached.access_token.clone());
            }
            if force && now.duration_since(cached.acquired_at) < SHARED_REFRESH_WINDOW {
                return Ok(cached.access_token.clone());
            }
        }

        self.limits.auth.acquire().await;
        tracing::debug!("requesting access token");

        let send = self
            .http
            .post(&self.auth_url)
            .json(&serde_json::json!({
                "client_id": self.credentials.client_id,
                "client_secret": self.credentials.client_secret,
                "scope": TOKEN_SCOPE,
                "grant_type": "client_credentials",
            }))
            .send();
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(ApiClientError::Cancelled),
            r = send => r.map_err(|e| ApiClientError::Auth(format!("token request failed: {e}")))?,
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiClientError::Auth(format!(
                "token request rejected ({status}): {body}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ApiClientError::Auth(format!("token response parse error: {e}")))?;

        let ttl = Duration::from_secs(token.expires_in.unwrap_or(DEFAULT_TOKEN_TTL_SECS));
        let now = Instant::now();
        let access = token.access_token.clone();
        *cache = Some(CachedToken {
            access_token: token.access_token,
            acquired_at: now,
            expires_at: now + ttl,
        });

        Ok(access)
    }
}
