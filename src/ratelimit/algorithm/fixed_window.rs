//! Fixed window counter.

use std::time::Duration;
use tracing::trace;

use crate::error::Result;
use crate::ratelimit::decision::{ceil_secs, Decision};
use crate::ratelimit::descriptor::RateLimitKey;
use crate::ratelimit::store::RateLimitStore;

/// Counts requests per aligned window `[i * W, (i + 1) * W)`.
///
/// The counter is incremented first and compared second, so admission is
/// decided on the value the store returned for this request alone. A request
/// that pushes the counter past the limit is denied and its increment is
/// rolled back, which keeps admitted requests at exactly `max_requests` per
/// window even under concurrent access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedWindowLimiter {
    max_requests: u64,
    window_seconds: u64,
}

impl FixedWindowLimiter {
    pub fn new(max_requests: u64, window_seconds: u64) -> Self {
        Self {
            max_requests,
            window_seconds: window_seconds.max(1),
        }
    }

    pub async fn is_allowed(
        &self,
        key: &RateLimitKey,
        store: &dyn RateLimitStore,
        now_ms: u64,
    ) -> Result<Decision> {
        let window_ms = self.window_seconds * 1000;
        let window_index = now_ms / window_ms;
        let reset_at = (window_index + 1) * self.window_seconds;
        let storage_key = key.storage_key(&format!("fw:{}", window_index));

        let count = store
            .increment(&storage_key, Duration::from_secs(self.window_seconds))
            .await?;

        trace!(key = %storage_key, count, limit = self.max_requests, "Fixed window count");

        if count > self.max_requests {
            if let Err(e) = store.decrement(&storage_key).await {
                // The request is denied either way; an unrolled increment only
                // makes the rest of this window stricter.
                trace!(key = %storage_key, error = %e, "Failed to roll back window increment");
            }
            let retry_after = ceil_secs(reset_at * 1000 - now_ms);
            return Ok(Decision::deny(self.max_requests, reset_at, retry_after));
        }

        Ok(Decision::allow(
            self.max_requests,
            self.max_requests - count,
            reset_at,
        ))
    }
}
