//! Throttling algorithms.
//!
//! Each algorithm is a small value built from a rule's parameters and a pure
//! function of `(key, store, now)`. [`Limiter`] selects one of the three by the
//! rule's [`Algorithm`].

mod fixed_window;
mod sliding_window;
mod token_bucket;

pub use fixed_window::FixedWindowLimiter;
pub use sliding_window::SlidingWindowLimiter;
pub use token_bucket::TokenBucketLimiter;

use super::decision::Decision;
use super::descriptor::RateLimitKey;
use super::rules::{Algorithm, RateLimitRule};
use super::store::RateLimitStore;
use crate::error::Result;

/// One of the three throttling algorithms, parameterized by a rule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Limiter {
    FixedWindow(FixedWindowLimiter),
    SlidingWindow(SlidingWindowLimiter),
    TokenBucket(TokenBucketLimiter),
}

impl Limiter {
    pub fn for_rule(rule: &RateLimitRule) -> Self {
        match rule.algorithm {
            Algorithm::FixedWindow => Limiter::FixedWindow(FixedWindowLimiter::new(
                rule.max_requests,
                rule.window_seconds,
            )),
            Algorithm::SlidingWindow => Limiter::SlidingWindow(SlidingWindowLimiter::new(
                rule.max_requests,
                rule.window_seconds,
            )),
            Algorithm::TokenBucket => Limiter::TokenBucket(TokenBucketLimiter::new(
                rule.max_requests,
                rule.window_seconds,
                rule.burst_limit,
            )),
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        match self {
            Limiter::FixedWindow(_) => Algorithm::FixedWindow,
            Limiter::SlidingWindow(_) => Algorithm::SlidingWindow,
            Limiter::TokenBucket(_) => Algorithm::TokenBucket,
        }
    }

    /// Decide one request for `key` at `now_ms`.
    pub async fn is_allowed(
        &self,
        key: &RateLimitKey,
        store: &dyn RateLimitStore,
        now_ms: u64,
    ) -> Result<Decision> {
        match self {
            Limiter::FixedWindow(limiter) => limiter.is_allowed(key, store, now_ms).await,
            Limiter::SlidingWindow(limiter) => limiter.is_allowed(key, store, now_ms).await,
            Limiter::TokenBucket(limiter) => limiter.is_allowed(key, store, now_ms).await,
        }
    }
}

impl From<&RateLimitRule> for Limiter {
    fn from(rule: &RateLimitRule) -> Self {
        Limiter::for_rule(rule)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::rules::Scope;

    #[test]
    fn test_for_rule_selects_algorithm() {
        for algorithm in [
            Algorithm::FixedWindow,
            Algorithm::SlidingWindow,
            Algorithm::TokenBucket,
        ] {
            let rule = RateLimitRule::new(algorithm, 10, 60, Scope::Ip);
            assert_eq!(Limiter::for_rule(&rule).algorithm(), algorithm);
        }
    }

    #[test]
    fn test_token_bucket_burst_defaults_to_quota() {
        let rule = RateLimitRule::new(Algorithm::TokenBucket, 10, 60, Scope::Ip);
        match Limiter::from(&rule) {
            Limiter::TokenBucket(bucket) => assert_eq!(bucket.burst_limit(), 10),
            other => panic!("unexpected limiter {:?}", other),
        }
    }
}
