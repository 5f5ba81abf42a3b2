//! In-process implementation of the store primitives.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use super::{BucketState, RateLimitStore, WindowSnapshot};
use crate::error::{HivegateError, Result};
use crate::ratelimit::clock::{Clock, SystemClock};

#[derive(Debug, Clone)]
enum Value {
    Counter(u64),
    Events(VecDeque<u64>),
    Bucket(BucketState),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: u64,
}

impl Entry {
    fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at
    }
}

/// Minimum time between purges triggered by writes.
const DEFAULT_PURGE_INTERVAL: Duration = Duration::from_secs(1);

/// A [`RateLimitStore`] kept in process memory.
///
/// Expiry is driven by the injected clock. Expired entries are treated as
/// absent on access, and writes purge them at most once per purge interval,
/// so keys that are never touched again (past fixed windows) still go away.
/// Each key is locked for the duration of a primitive, so all three
/// algorithms behave exactly as they would against a shared server.
pub struct LocalStore {
    entries: DashMap<String, Entry>,
    clock: Arc<dyn Clock>,
    purge_interval_ms: u64,
    last_purge: AtomicU64,
}

impl LocalStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            purge_interval_ms: DEFAULT_PURGE_INTERVAL.as_millis() as u64,
            last_purge: AtomicU64::new(0),
        }
    }

    pub fn with_purge_interval(mut self, interval: Duration) -> Self {
        self.purge_interval_ms = millis(interval);
        self
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let purged = before.saturating_sub(self.entries.len());
        if purged > 0 {
            debug!(purged, remaining = self.entries.len(), "Purged expired local store entries");
        }
        purged
    }

    /// Purge if the interval has passed since the last purge. Must not be
    /// called while holding an entry guard.
    fn maybe_purge(&self) {
        let now = self.clock.now_millis();
        let last = self.last_purge.load(Ordering::Relaxed);
        if now < last.saturating_add(self.purge_interval_ms) {
            return;
        }
        if self
            .last_purge
            .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            self.purge_expired();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    fn wrong_type(key: &str, expected: &str) -> HivegateError {
        HivegateError::Store(format!("key '{}' does not hold a {}", key, expected))
    }
}

impl Default for LocalStore {
    fn default() -> Self {
        Self::new()
    }
}

fn millis(d: Duration) -> u64 {
    d.as_millis() as u64
}

#[async_trait]
impl RateLimitStore for LocalStore {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64> {
        self.maybe_purge();
        let now = self.clock.now_millis();
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Counter(0),
            expires_at: now + millis(ttl),
        });

        if entry.is_expired(now) {
            *entry = Entry {
                value: Value::Counter(0),
                expires_at: now + millis(ttl),
            };
        }

        match &mut entry.value {
            Value::Counter(count) => {
                *count += 1;
                Ok(*count)
            }
            _ => Err(Self::wrong_type(key, "counter")),
        }
    }

    async fn decrement(&self, key: &str) -> Result<()> {
        if let Some(mut entry) = self.entries.get_mut(key) {
            match &mut entry.value {
                Value::Counter(count) => *count = count.saturating_sub(1),
                _ => return Err(Self::wrong_type(key, "counter")),
            }
        }
        Ok(())
    }

    async fn record_event(
        &self,
        key: &str,
        now_ms: u64,
        window: Duration,
        limit: u64,
    ) -> Result<WindowSnapshot> {
        self.maybe_purge();
        let window_ms = millis(window);
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Events(VecDeque::new()),
            expires_at: now_ms + window_ms,
        });

        if entry.is_expired(now_ms) {
            entry.value = Value::Events(VecDeque::new());
        }

        let admitted;
        let count;
        let oldest;
        {
            let events = match &mut entry.value {
                Value::Events(events) => events,
                _ => return Err(Self::wrong_type(key, "sorted set")),
            };

            let cutoff = now_ms.saturating_sub(window_ms);
            while events.front().is_some_and(|&ts| ts < cutoff) {
                events.pop_front();
            }

            count = events.len() as u64;
            admitted = count < limit;
            if admitted {
                // Keep the deque ordered even if callers' clocks disagree slightly.
                let pos = events.partition_point(|&ts| ts <= now_ms);
                events.insert(pos, now_ms);
            }
            oldest = events.front().copied();
        }

        if admitted {
            entry.expires_at = now_ms + window_ms;
        }

        trace!(key = %key, count, admitted, "Local sliding window step");

        Ok(WindowSnapshot {
            admitted,
            count,
            oldest,
        })
    }

    async fn load_bucket(&self, key: &str) -> Result<Option<BucketState>> {
        let now = self.clock.now_millis();
        match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => match &entry.value {
                Value::Bucket(state) => Ok(Some(*state)),
                _ => Err(Self::wrong_type(key, "bucket")),
            },
            _ => Ok(None),
        }
    }

    async fn save_bucket(&self, key: &str, state: BucketState, ttl: Duration) -> Result<()> {
        self.maybe_purge();
        let now = self.clock.now_millis();
        self.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Bucket(state),
                expires_at: now + millis(ttl),
            },
        );
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
