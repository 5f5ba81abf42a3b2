//! Sliding window log.

use std::time::Duration;
use tracing::trace;

use crate::error::Result;
use crate::ratelimit::decision::{ceil_secs, Decision};
use crate::ratelimit::descriptor::RateLimitKey;
use crate::ratelimit::store::RateLimitStore;

/// Admits at most `max_requests` events in any trailing window of
/// `window_seconds`, using one atomic trim/count/insert step per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlidingWindowLimiter {
    max_requests: u64,
    window_seconds: u64,
}

impl SlidingWindowLimiter {
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
        let storage_key = key.storage_key("sw");
        let snapshot = store
            .record_event(
                &storage_key,
                now_ms,
                Duration::from_secs(self.window_seconds),
                self.max_requests,
            )
            .await?;

        trace!(key = %storage_key, count = snapshot.count, admitted = snapshot.admitted, "Sliding window count");

        // The window frees a slot once its oldest event ages out.
        let frees_at = snapshot.oldest.unwrap_or(now_ms) + window_ms;
        let reset_at = ceil_secs(frees_at);

        if !snapshot.admitted {
            let retry_after = ceil_secs(frees_at.saturating_sub(now_ms));
            return Ok(Decision::deny(self.max_requests, reset_at, retry_after));
        }

        Ok(Decision::allow(
            self.max_requests,
            self.max_requests.saturating_sub(snapshot.count + 1),
            reset_at,
        ))
    }
}
