//! Backing stores for rate limit state.
//!
//! Every algorithm is written against [`RateLimitStore`], which exposes only
//! primitives a shared key/value server can execute atomically. Two
//! implementations exist: [`RedisStore`] for state shared across processes and
//! [`LocalStore`] for single-node deployments and tests.

mod local;
mod redis;

pub use self::local::LocalStore;
pub use self::redis::RedisStore;

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Persisted token bucket state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketState {
    pub tokens: f64,
    /// Epoch milliseconds of the last refill
    pub last_refill: u64,
}

/// Result of one atomic sliding-window step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSnapshot {
    /// Whether the event was recorded
    pub admitted: bool,
    /// Events in the window after trimming, before this one was added
    pub count: u64,
    /// Oldest surviving event (epoch ms), including the new one if admitted
    pub oldest: Option<u64>,
}

/// Primitives a rate limit backend must provide.
///
/// Each method is a single atomic unit against the store.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Increment the counter at `key`, returning the new value. `ttl` is applied
    /// only when the counter is created.
    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64>;

    /// Undo one increment at `key`.
    async fn decrement(&self, key: &str) -> Result<()>;

    /// Drop events older than `now - window`, count the rest and, if the count
    /// is below `limit`, record an event at `now` and refresh the key's TTL to
    /// `window`.
    async fn record_event(
        &self,
        key: &str,
        now_ms: u64,
        window: Duration,
        limit: u64,
    ) -> Result<WindowSnapshot>;

    /// Read token bucket state; `None` if the key does not exist.
    async fn load_bucket(&self, key: &str) -> Result<Option<BucketState>>;

    /// Overwrite token bucket state with the given TTL.
    async fn save_bucket(&self, key: &str, state: BucketState, ttl: Duration) -> Result<()>;

    /// Cheap liveness check.
    async fn ping(&self) -> Result<()>;
}
