//! Per-endpoint-class token-bucket rate limiting.
//!
//! Each remote endpoint class gets its own bucket. Buckets refill
//! continuously at `effective_limit / window` and never hold more than the
//! margin-adjusted capacity, so a burst right after startup cannot exceed
//! what the remote allows inside one window.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Token bucket configuration.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Requests the remote permits per window.
    pub max_requests: u32,
    /// Length of the remote's rate window.
    pub window: Duration,
    /// Fraction of the remote limit this client actually uses, in (0, 1].
    pub safety_margin: f64,
}

impl RateLimitConfig {
    pub fn new(max_requests: u32, window: Duration, safety_margin: f64) -> Self {
        Self {
            max_requests,
            window,
            safety_margin,
        }
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// An async token bucket. `acquire` blocks until a token is available and
/// cannot fail. Waiters queue on a fair mutex, so grants are FIFO relative
/// to arrival.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_ms: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(config: RateLimitConfig) -> Self {
        let margin = config.safety_margin.clamp(f64::EPSILON, 1.0);
        // Margin-adjusted cap, floored; at least one token so refill stays live.
        let capacity = (f64::from(config.max_requests) * margin).floor().max(1.0);
        let window_ms = config.window.as_millis().max(1) as f64;
        Self {
            capacity,
            refill_per_ms: capacity / window_ms,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Number of tokens the bucket can hold.
    pub fn capacity(&self) -> u32 {
        self.capacity as u32
    }

    /// Take one token, sleeping until the bucket refills if necessary.
    ///
    /// The bucket lock is held across the refill sleep: later callers wait
    /// behind the current one, which serializes token grants.
    pub async fn acquire(&self) {
        let mut state = self.state.lock().await;
        loop {
            let now = Instant::now();
            let elapsed_ms = now.duration_since(state.last_refill).as_secs_f64() * 1000.0;
            state.tokens = (state.tokens + elapsed_ms * self.refill_per_ms).min(self.capacity);
            state.last_refill = now;

            if state.tokens >= 1.0 {
                state.tokens -= 1.0;
                return;
            }

            let missing = 1.0 - state.tokens;
            let wait_ms = missing / self.refill_per_ms;
            tokio::time::sleep(Duration::from_secs_f64(wait_ms / 1000.0)).await;
        }
    }
}

/// Pre-configured buckets for every remote endpoint class.
///
/// All classes share a 60 second window; the per-class request budgets
/// mirror the remote API's published limits.
#[derive(Debug)]
pub struct EndpointLimits {
    pub auth: TokenBucket,
    pub api: TokenBucket,
    pub management: TokenBucket,
    pub auditor: TokenBucket,
    pub auditor_write: TokenBucket,
    pub auditor_evidence: TokenBucket,
}

const RATE_WINDOW: Duration = Duration::from_secs(60);

impl EndpointLimits {
    /// Build the standard bucket set with the given safety margin.
    pub fn standard(safety_margin: f64) -> Self {
        let bucket =
            |max| TokenBucket::new(RateLimitConfig::new(max, RATE_WINDOW, safety_margin));
        Self {
            auth: bucket(5),
            api: bucket(20),
            management: bucket(50),
            auditor: bucket(250),
            auditor_write: bucket(10),
            auditor_evidence: bucket(600),
        }
    }
}

impl Default for EndpointLimits {
    fn default() -> Self {
        Self::standard(0.8)
    }
}
