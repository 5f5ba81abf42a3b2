//! Token bucket.

use std::time::Duration;
use tracing::trace;

use crate::error::Result;
use crate::ratelimit::decision::{ceil_secs, Decision};
use crate::ratelimit::descriptor::RateLimitKey;
use crate::ratelimit::store::{BucketState, RateLimitStore};

/// Refills `max_requests` tokens per `window_seconds`, holding at most
/// `burst_limit` tokens. Each request consumes one token.
///
/// The bucket is read and written as two store calls, so concurrent requests
/// for the same key may both observe the same token count.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenBucketLimiter {
    max_requests: u64,
    window_seconds: u64,
    burst_limit: u64,
}

impl TokenBucketLimiter {
    pub fn new(max_requests: u64, window_seconds: u64, burst_limit: Option<u64>) -> Self {
        Self {
            max_requests,
            window_seconds: window_seconds.max(1),
            burst_limit: burst_limit.unwrap_or(max_requests),
        }
    }

    pub fn burst_limit(&self) -> u64 {
        self.burst_limit
    }

    /// Tokens added per second.
    pub fn refill_rate(&self) -> f64 {
        self.max_requests as f64 / self.window_seconds as f64
    }

    /// Milliseconds until `tokens` have accumulated, starting from `current`.
    fn millis_until(&self, current: f64, tokens: f64) -> u64 {
        let missing = (tokens - current).max(0.0);
        let window_ms = (self.window_seconds * 1000) as f64;
        (missing * window_ms / self.max_requests as f64).ceil() as u64
    }

    pub async fn is_allowed(
        &self,
        key: &RateLimitKey,
        store: &dyn RateLimitStore,
        now_ms: u64,
    ) -> Result<Decision> {
        let burst = self.burst_limit as f64;
        let storage_key = key.storage_key("tb");
        let state = store.load_bucket(&storage_key).await?.unwrap_or(BucketState {
            tokens: burst,
            last_refill: now_ms,
        });

        // Refill in integer milliseconds to avoid accumulating rate rounding.
        let elapsed_ms = now_ms.saturating_sub(state.last_refill);
        let refilled = elapsed_ms as f64 * self.max_requests as f64
            / (self.window_seconds * 1000) as f64;
        let tokens = (state.tokens + refilled).clamp(0.0, burst);

        trace!(key = %storage_key, tokens, burst, "Token bucket level");

        if tokens < 1.0 {
            let wait_ms = self.millis_until(tokens, 1.0);
            let reset_at = ceil_secs(now_ms + self.millis_until(tokens, burst));
            return Ok(Decision::deny(self.max_requests, reset_at, ceil_secs(wait_ms)));
        }

        let tokens = tokens - 1.0;
        store
            .save_bucket(
                &storage_key,
                BucketState {
                    tokens,
                    // A caller whose clock lags must not move the refill point
                    // back, or the lagging interval is refilled twice.
                    last_refill: now_ms.max(state.last_refill),
                },
                Duration::from_secs(self.window_seconds * 2),
            )
            .await?;

        let reset_at = ceil_secs(now_ms + self.millis_until(tokens, burst));
        Ok(Decision::allow(
            self.max_requests,
            tokens.floor() as u64,
            reset_at,
        ))
    }
}
