//! Authenticated, rate-limited, paginated client for the Vanta API.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::ratelimit::EndpointLimits;
use crate::settings::ApiCredentials;
use crate::types::{ApiClientError, StreamKind, SyncError};

mod auth;

use auth::TokenManager;

/// Production API base URL.
pub const API_BASE_URL: &str = "https://api.vanta.com/v1";

/// Production OAuth token endpoint.
pub const AUTH_TOKEN_URL: &str = "https://api.vanta.com/oauth/token";

/// Largest page size the remote accepts; pagination starts here.
pub const MAX_PAGE_SIZE: u32 = 100;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Response headers checked, in order, for a request id.
const REQUEST_ID_HEADERS: [&str; 3] = ["x-amzn-requestid", "x-amz-cf-id", "x-request-id"];

/// One page of records as received from the wire.
pub type PageBatch = Vec<Value>;

/// Object-safe per-page callback handed to a feed. Each invocation is
/// awaited before the next page is requested.
pub type BatchSink = Box<dyn FnMut(PageBatch) -> BoxFuture<'static, Result<(), SyncError>> + Send>;

/// Retry/backoff tuning. Defaults match the remote API's documented
/// behavior; tests shrink the delays.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    /// Base for the exponential server-error backoff (`base * 2^attempt`).
    pub backoff_base: Duration,
    /// Wait applied on 429 when the response carries no `Retry-After`.
    pub rate_limit_fallback: Duration,
    /// Padding added on top of `Retry-After`.
    pub rate_limit_padding: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_base: Duration::from_secs(1),
            rate_limit_fallback: Duration::from_secs(60),
            rate_limit_padding: Duration::from_secs(1),
        }
    }
}

/// Paginated record source, one method per consumer need so the
/// orchestrator can be tested against a stub.
#[async_trait]
pub trait VulnerabilityFeed: Send + Sync {
    /// Walk every page of the given stream, feeding each non-empty page to
    /// `on_batch`. Filters pass through to the wire untouched.
    async fn fetch(
        &self,
        stream: StreamKind,
        filters: Vec<(String, String)>,
        cancel: CancellationToken,
        on_batch: BatchSink,
    ) -> Result<(), SyncError>;
}

/// Builds a feed from credentials at session start.
pub trait FeedProvider: Send + Sync {
    fn connect(&self, credentials: &ApiCredentials)
        -> Result<Arc<dyn VulnerabilityFeed>, SyncError>;
}

/// Default provider pointing at the production endpoints.
#[derive(Debug, Clone)]
pub struct VantaFeedProvider {
    base_url: String,
    auth_url: String,
    retry: RetryPolicy,
}

impl VantaFeedProvider {
    /// Provider against alternate endpoints (test servers).
    pub fn new(base_url: impl Into<String>, auth_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            auth_url: auth_url.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for VantaFeedProvider {
    fn default() -> Self {
        Self::new(API_BASE_URL, AUTH_TOKEN_URL)
    }
}

impl FeedProvider for VantaFeedProvider {
    fn connect(
        &self,
        credentials: &ApiCredentials,
    ) -> Result<Arc<dyn VulnerabilityFeed>, SyncError> {
        let client = VantaClient::with_urls(credentials.clone(), &self.base_url, &self.auth_url)?
            .with_retry_policy(self.retry.clone());
        Ok(Arc::new(client))
    }
}

/// HTTP client for the remote security API.
pub struct VantaClient {
    http: reqwest::Client,
    base_url: String,
    limits: Arc<EndpointLimits>,
    token: TokenManager,
    retry: RetryPolicy,
}

impl VantaClient {
    pub fn new(credentials: ApiCredentials) -> Result<Self, ApiClientError> {
        Self::with_urls(credentials, API_BASE_URL, AUTH_TOKEN_URL)
    }

    /// Client against alternate endpoints (test servers).
    pub fn with_urls(
        credentials: ApiCredentials,
        base_url: &str,
        auth_url: &str,
    ) -> Result<Self, ApiClientError> {
        if !credentials.is_complete() {
            return Err(ApiClientError::Auth(
                "client_id and client_secret cannot be empty".to_string(),
            ));
        }
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ApiClientError::Transport(format!("HTTP client init: {e}")))?;
        let limits = Arc::new(EndpointLimits::default());
        Ok(Self {
            token: TokenManager::new(http.clone(), auth_url, credentials, Arc::clone(&limits)),
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            limits,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Issue one GET with the full retry policy applied: 401 forces a
    /// re-authentication, 429 honors `Retry-After`, 5xx and transport
    /// failures back off exponentially, other 4xx fail immediately.
    async fn get_json(
        &self,
        url: &str,
        query: &[(String, String)],
        cancel: &CancellationToken,
    ) -> Result<Value, ApiClientError> {
        let max = self.retry.max_retries;
        let mut force_auth = false;
        let mut last_status: Option<u16> = None;
        let mut last_request_id: Option<String> = None;
        let mut saw_rate_limit = false;

        for attempt in 0..=max {
            if cancel.is_cancelled() {
                return Err(ApiClientError::Cancelled);
            }

            let bearer = self.token.bearer(force_auth, cancel).await?;
            force_auth = false;
            self.limits.api.acquire().await;

            let send = self.http.get(url).bearer_auth(&bearer).query(query).send();
            let response = tokio::select! {
                _ = cancel.cancelled() => return Err(ApiClientError::Cancelled),
                r = send => r,
            };

            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    saw_rate_limit = false;
                    last_status = None;
                    tracing::warn!(attempt, error = %e, "transport error; retrying");
                    if attempt < max {
                        self.backoff_sleep(attempt, cancel).await?;
                    }
                    continue;
                }
            };

            let status = response.status();
            if let Some(id) = harvest_request_id(response.headers()) {
                last_request_id = Some(id);
            }

            if status == StatusCode::UNAUTHORIZED {
                saw_rate_limit = false;
                last_status = Some(status.as_u16());
                tracing::debug!(attempt, "401 from API; forcing re-authentication");
                force_auth = true;
                continue;
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                saw_rate_limit = true;
                last_status = Some(status.as_u16());
                let wait = retry_after_seconds(response.headers())
                    .map(Duration::from_secs)
                    .unwrap_or(self.retry.rate_limit_fallback)
                    + self.retry.rate_limit_padding;
                tracing::warn!(attempt, wait_secs = wait.as_secs(), "remote rate limit hit");
                if attempt < max {
                    sleep_cancellable(wait, cancel).await?;
                }
                continue;
            }

            if status.is_server_error() {
                saw_rate_limit = false;
                last_status = Some(status.as_u16());
                tracing::warn!(attempt, status = status.as_u16(), "server error; retrying");
                if attempt < max {
                    self.backoff_sleep(attempt, cancel).await?;
                }
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ApiClientError::Status {
                    status: status.as_u16(),
                    body,
                    request_id: last_request_id,
                });
            }

            return response
                .json()
                .await
                .map_err(|e| ApiClientError::Transport(format!("response body: {e}")));
        }

        if saw_rate_limit {
            Err(ApiClientError::RateLimited {
                attempts: max + 1,
                request_id: last_request_id,
            })
        } else if last_status == Some(401) {
            Err(ApiClientError::Auth(format!(
                "still unauthorized after {} attempts",
                max + 1
            )))
        } else {
            Err(ApiClientError::Exhausted {
                attempts: max + 1,
                last_status,
                request_id: last_request_id,
            })
        }
    }

    async fn backoff_sleep(
        &self,
        attempt: u32,
        cancel: &CancellationToken,
    ) -> Result<(), ApiClientError> {
        let delay = self
            .retry
            .backoff_base
            .checked_mul(2u32.saturating_pow(attempt))
            .unwrap_or(Duration::from_secs(u64::MAX));
        sleep_cancellable(delay, cancel).await
    }

    /// Walk every page of `endpoint`, feeding non-empty pages to `on_batch`.
    ///
    /// Starts at the maximum page size. When the retry budget for a page is
    /// exhausted on server errors, the page size is halved (minimum 1) and
    /// the same cursor retried; later pages keep the degraded size.
    pub async fn paginate<F, Fut>(
        &self,
        endpoint: &str,
        filters: &[(String, String)],
        cancel: &CancellationToken,
        mut on_batch: F,
    ) -> Result<(), SyncError>
    where
        F: FnMut(PageBatch) -> Fut + Send,
        Fut: Future<Output = Result<(), SyncError>> + Send,
    {
        let url = format!("{}/{}", self.base_url, endpoint);
        let mut page_size = MAX_PAGE_SIZE;
        let mut cursor: Option<String> = None;

        loop {
            let page = loop {
                let mut query: Vec<(String, String)> = Vec::with_capacity(filters.len() + 2);
                query.push(("pageSize".to_string(), page_size.to_string()));
                if let Some(c) = &cursor {
                    query.push(("pageCursor".to_string(), c.clone()));
                }
                query.extend(filters.iter().cloned());

                match self.get_json(&url, &query, cancel).await {
                    Ok(value) => break value,
                    // Cancellation and authentication failures keep their
                    // own error kinds.
                    Err(err @ (ApiClientError::Cancelled | ApiClientError::Auth(_))) => {
                        return Err(err.into());
                    }
                    Err(ApiClientError::Exhausted { .. }) if page_size > 1 => {
                        page_size = (page_size / 2).max(1);
                        tracing::warn!(
                            endpoint,
                            page_size,
                            cursor = cursor.as_deref(),
                            "server errors persisted; degrading page size"
                        );
                    }
                    Err(source) => {
                        let request_id = source.request_id().map(str::to_owned);
                        return Err(ApiClientError::Pagination {
                            endpoint: endpoint.to_string(),
                            page_size,
                            cursor: cursor.clone(),
                            request_id,
                            source: Box::new(source),
                        }
                        .into());
                    }
                }
            };

            let data: PageBatch = page
                .pointer("/results/data")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let info = page.pointer("/results/pageInfo");
            let has_next = info
                .and_then(|i| i.get("hasNextPage"))
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let end_cursor = info
                .and_then(|i| i.get("endCursor"))
                .and_then(Value::as_str)
                .map(str::to_owned);

            // An empty page is valid; only non-empty pages reach the callback.
            if !data.is_empty() {
                on_batch(data).await?;
            }

            if !has_next {
                return Ok(());
            }
            match end_cursor {
                Some(c) => cursor = Some(c),
                None => {
                    tracing::warn!(endpoint, "hasNextPage set without endCursor; ending walk");
                    return Ok(());
                }
            }
        }
    }
}

#[async_trait]
impl VulnerabilityFeed for VantaClient {
    async fn fetch(
        &self,
        stream: StreamKind,
        filters: Vec<(String, String)>,
        cancel: CancellationToken,
        mut on_batch: BatchSink,
    ) -> Result<(), SyncError> {
        let endpoint = match stream {
            StreamKind::Vulnerabilities => "vulnerabilities",
            StreamKind::Remediations => "vulnerability-remediations",
            // The older /assets endpoint is deprecated and answers 404.
            StreamKind::Assets => "vulnerable-assets",
        };
        self.paginate(endpoint, &filters, &cancel, move |page| on_batch(page))
            .await
    }
}

fn harvest_request_id(headers: &HeaderMap) -> Option<String> {
    REQUEST_ID_HEADERS
        .iter()
        .find_map(|name| headers.get(*name))
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

fn retry_after_seconds(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

async fn sleep_cancellable(
    delay: Duration,
    cancel: &CancellationToken,
) -> Result<(), ApiClientError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(ApiClientError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}
