//! Process-wide rate limit analytics.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

/// In-memory decision counters.
///
/// Owned by whoever builds the limiter and shared through an `Arc`, so tests
/// and embedders can hold their own isolated instance. Nothing here is ever
/// written to the backing store.
#[derive(Debug, Default)]
pub struct Analytics {
    total_requests: AtomicU64,
    fallback_decisions: AtomicU64,
    violations: Mutex<HashMap<String, u64>>,
}

/// A point-in-time copy of [`Analytics`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnalyticsSnapshot {
    pub total_requests: u64,
    pub total_violations: u64,
    /// `total_violations / total_requests`, 0 when there were no requests
    pub violation_rate: f64,
    /// Decisions made by the in-process fallback
    pub fallback_decisions: u64,
    pub violations_by_rule: BTreeMap<String, u64>,
}

impl Analytics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one decision.
    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one denial against a rule.
    pub fn record_violation(&self, rule: &str) {
        let mut violations = self.violations.lock();
        *violations.entry(rule.to_string()).or_insert(0) += 1;
    }

    /// Count one decision made without the distributed store.
    pub fn record_fallback(&self) {
        self.fallback_decisions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> AnalyticsSnapshot {
        let violations_by_rule: BTreeMap<String, u64> = self
            .violations
            .lock()
            .iter()
            .map(|(rule, count)| (rule.clone(), *count))
            .collect();
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let total_violations = violations_by_rule.values().sum();

        AnalyticsSnapshot {
            total_requests,
            total_violations,
            violation_rate: if total_requests == 0 {
                0.0
            } else {
                total_violations as f64 / total_requests as f64
            },
            fallback_decisions: self.fallback_decisions.load(Ordering::Relaxed),
            violations_by_rule,
        }
    }

    /// Zero every counter.
    pub fn reset(&self) {
        let mut violations = self.violations.lock();
        violations.clear();
        self.total_requests.store(0, Ordering::Relaxed);
        self.fallback_decisions.store(0, Ordering::Relaxed);
    }

    /// Log a snapshot at `info` on a fixed interval until the task is aborted.
    pub fn spawn_reporter(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let snapshot = self.snapshot();
                info!(
                    total_requests = snapshot.total_requests,
                    total_violations = snapshot.total_violations,
                    violation_rate = snapshot.violation_rate,
                    fallback_decisions = snapshot.fallback_decisions,
                    violations_by_rule = ?snapshot.violations_by_rule,
                    "Rate limit analytics"
                );
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_and_rate() {
        let analytics = Analytics::new();
        for _ in 0..4 {
            analytics.record_request();
        }
        analytics.record_violation("chat");

        let snapshot = analytics.snapshot();
        assert_eq!(snapshot.total_requests, 4);
        assert_eq!(snapshot.total_violations, 1);
        assert_eq!(snapshot.violation_rate, 0.25);
        assert_eq!(snapshot.violations_by_rule["chat"], 1);
    }

    #[test]
    fn test_empty_rate_is_zero() {
        assert_eq!(Analytics::new().snapshot().violation_rate, 0.0);
    }

    #[test]
    fn test_reset() {
        let analytics = Analytics::new();
        analytics.record_request();
        analytics.record_violation("default");
        analytics.record_fallback();

        analytics.reset();
        assert_eq!(analytics.snapshot(), AnalyticsSnapshot::default());
    }

    #[test]
    fn test_snapshot_serializes() {
        let analytics = Analytics::new();
        analytics.record_request();
        analytics.record_violation("login");

        let json = serde_json::to_value(analytics.snapshot()).unwrap();
        assert_eq!(json["total_requests"], 1);
        assert_eq!(json["violations_by_rule"]["login"], 1);
    }
}
