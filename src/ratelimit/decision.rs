//! Admission decisions and the response headers derived from them.

use serde::Serialize;
use std::collections::HashMap;

pub const HEADER_LIMIT: &str = "X-RateLimit-Limit";
pub const HEADER_REMAINING: &str = "X-RateLimit-Remaining";
pub const HEADER_RESET: &str = "X-RateLimit-Reset";
pub const HEADER_RETRY_AFTER: &str = "Retry-After";

/// The outcome of one rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub allowed: bool,
    /// Quota of the rule that was applied
    pub limit: u64,
    /// Requests left in the current window (tokens, for token buckets)
    pub remaining: u64,
    /// Unix timestamp (seconds) at which the quota is fully available again
    pub reset_at: u64,
    /// Seconds the client should wait before retrying; 0 when allowed
    pub retry_after: u64,
}

impl Decision {
    pub fn allow(limit: u64, remaining: u64, reset_at: u64) -> Self {
        Self {
            allowed: true,
            limit,
            remaining,
            reset_at,
            retry_after: 0,
        }
    }

    /// A denial always asks the client to wait at least one second.
    pub fn deny(limit: u64, reset_at: u64, retry_after: u64) -> Self {
        Self {
            allowed: false,
            limit,
            remaining: 0,
            reset_at,
            retry_after: retry_after.max(1),
        }
    }

    /// Response headers describing this decision.
    ///
    /// `Retry-After` is only present on denials.
    pub fn headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::with_capacity(4);
        headers.insert(HEADER_LIMIT.to_string(), self.limit.to_string());
        headers.insert(HEADER_REMAINING.to_string(), self.remaining.to_string());
        headers.insert(HEADER_RESET.to_string(), self.reset_at.to_string());
        if !self.allowed {
            headers.insert(HEADER_RETRY_AFTER.to_string(), self.retry_after.to_string());
        }
        headers
    }
}

/// Round milliseconds up to whole seconds.
pub(crate) fn ceil_secs(millis: u64) -> u64 {
    millis.div_ceil(1000)
}
