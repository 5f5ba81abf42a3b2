//! In-process fallback used while the distributed store is disabled or down.
//!
//! The fallback always applies sliding-window semantics with the rule's quota
//! and window, whatever algorithm the rule names. It is a safety net that keeps
//! decisions flowing, not a replacement for the configured algorithm: token
//! bucket rules lose their burst allowance and fixed window rules lose their
//! aligned resets while degraded.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::clock::Clock;
use super::decision::{ceil_secs, Decision};
use super::descriptor::RateLimitKey;
use super::rules::RateLimitRule;

#[derive(Debug)]
struct EventLog {
    window_ms: u64,
    /// Ascending timestamps, never longer than the rule's quota
    events: VecDeque<u64>,
}

impl EventLog {
    fn trim(&mut self, now_ms: u64) {
        let cutoff = now_ms.saturating_sub(self.window_ms);
        while self.events.front().is_some_and(|&ts| ts < cutoff) {
            self.events.pop_front();
        }
    }

    fn is_idle(&self, now_ms: u64) -> bool {
        self.events
            .back()
            .map_or(true, |&newest| newest < now_ms.saturating_sub(self.window_ms))
    }
}

/// Minimum time between sweeps triggered by an over-capacity key table.
const EAGER_SWEEP_INTERVAL_MS: u64 = 1000;

/// Per-key sliding windows held in process memory.
///
/// Each key's log is locked for the duration of a check. Memory is bounded by
/// trimming on access, by [`FallbackWindow::sweep`] dropping idle keys, and by
/// an eager sweep, at most once a second, while more than `max_keys` keys are
/// tracked.
pub struct FallbackWindow {
    logs: DashMap<String, EventLog>,
    max_keys: usize,
    last_eager_sweep: AtomicU64,
}

impl FallbackWindow {
    pub fn new(max_keys: usize) -> Self {
        Self {
            logs: DashMap::new(),
            max_keys: max_keys.max(1),
            last_eager_sweep: AtomicU64::new(0),
        }
    }

    /// Decide one request for `key` under `rule`'s quota and window.
    pub fn check(&self, key: &RateLimitKey, rule: &RateLimitRule, now_ms: u64) -> Decision {
        if self.logs.len() >= self.max_keys
            && !self.logs.contains_key(key.as_str())
            && self.claim_eager_sweep(now_ms)
        {
            let evicted = self.sweep(now_ms);
            if self.logs.len() >= self.max_keys {
                warn!(
                    target: "hivegate::fallback",
                    tracked = self.logs.len(),
                    max_keys = self.max_keys,
                    evicted,
                    "Fallback key table is over capacity"
                );
            }
        }

        let max_requests = rule.max_requests;
        let window_ms = rule.window().max(Duration::from_secs(1)).as_millis() as u64;

        let mut log = self.logs.entry(key.as_str().to_string()).or_insert_with(|| EventLog {
            window_ms,
            events: VecDeque::new(),
        });
        log.window_ms = window_ms;
        log.trim(now_ms);

        let count = log.events.len() as u64;
        if count >= max_requests {
            let oldest = log.events.front().copied().unwrap_or(now_ms);
            let frees_at = oldest + window_ms;
            return Decision::deny(
                max_requests,
                ceil_secs(frees_at),
                ceil_secs(frees_at.saturating_sub(now_ms)),
            );
        }

        let pos = log.events.partition_point(|&ts| ts <= now_ms);
        log.events.insert(pos, now_ms);
        // Never hold more events than can be counted against the quota.
        while log.events.len() as u64 > max_requests {
            log.events.pop_front();
        }

        let oldest = log.events.front().copied().unwrap_or(now_ms);
        Decision::allow(
            max_requests,
            max_requests - (count + 1),
            ceil_secs(oldest + window_ms),
        )
    }

    fn claim_eager_sweep(&self, now_ms: u64) -> bool {
        let last = self.last_eager_sweep.load(Ordering::Relaxed);
        now_ms >= last.saturating_add(EAGER_SWEEP_INTERVAL_MS)
            && self
                .last_eager_sweep
                .compare_exchange(last, now_ms, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
    }

    /// Drop keys with no event inside their window. Returns how many were dropped.
    pub fn sweep(&self, now_ms: u64) -> usize {
        let before = self.logs.len();
        self.logs.retain(|_, log| !log.is_idle(now_ms));
        let evicted = before.saturating_sub(self.logs.len());
        if evicted > 0 {
            debug!(target: "hivegate::fallback", evicted, remaining = self.logs.len(), "Swept idle fallback keys");
        }
        evicted
    }

    /// Run [`FallbackWindow::sweep`] on a fixed interval until the task is aborted.
    pub fn spawn_sweeper(self: Arc<Self>, clock: Arc<dyn Clock>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(10)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.sweep(clock.now_millis());
            }
        })
    }

    pub fn len(&self) -> usize {
        self.logs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }

    pub fn clear(&self) {
        self.logs.clear();
    }
}

impl Default for FallbackWindow {
    fn default() -> Self {
        Self::new(10_000)
    }
}
