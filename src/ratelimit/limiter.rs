//! Core rate limiter implementation.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use super::algorithm::Limiter;
use super::analytics::{Analytics, AnalyticsSnapshot};
use super::clock::{Clock, SystemClock};
use super::decision::Decision;
use super::descriptor::{RateLimitKey, RequestDescriptor};
use super::fallback::FallbackWindow;
use super::rules::{RateLimitRule, RuleResolver, CUSTOM_RULE_NAME};
use super::store::{LocalStore, RateLimitStore, RedisStore};
use crate::config::{HivegateConfig, StoreBackend};
use crate::error::{HivegateError, Result};

/// Default time to stay on the fallback after a store failure.
const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Tracks whether the distributed store should be tried.
struct StoreHealth {
    retry_interval_ms: u64,
    /// When the store last failed, while it is considered down
    down_since: Mutex<Option<u64>>,
}

impl StoreHealth {
    fn new(retry_interval: Duration) -> Self {
        Self {
            retry_interval_ms: retry_interval.as_millis() as u64,
            down_since: Mutex::new(None),
        }
    }

    /// Down long enough that the next call should probe it again.
    fn should_probe(&self, now_ms: u64) -> bool {
        match *self.down_since.lock() {
            None => false,
            Some(since) => now_ms >= since + self.retry_interval_ms,
        }
    }

    fn is_down(&self) -> bool {
        self.down_since.lock().is_some()
    }

    fn mark_down(&self, now_ms: u64, store: &str, error: &HivegateError) {
        let mut down_since = self.down_since.lock();
        if down_since.is_none() {
            warn!(
                target: "hivegate::fallback",
                store = store,
                error = %error,
                retry_in_ms = self.retry_interval_ms,
                "Distributed store unavailable, degrading to in-process fallback"
            );
        } else {
            debug!(target: "hivegate::fallback", store = store, error = %error, "Distributed store probe failed");
        }
        *down_since = Some(now_ms);
    }

    fn mark_up(&self, store: &str) {
        if self.down_since.lock().take().is_some() {
            info!(target: "hivegate::fallback", store = store, "Distributed store recovered");
        }
    }
}

/// The rate limiter facade: resolves the rule, key and store for a request and
/// runs the rule's algorithm.
///
/// Per-request failures never reach the caller. When the distributed store is
/// disabled or failing, decisions come from the in-process fallback.
pub struct RateLimiter {
    rules: RuleResolver,
    store: Option<Arc<dyn RateLimitStore>>,
    fallback: Arc<FallbackWindow>,
    analytics: Arc<Analytics>,
    clock: Arc<dyn Clock>,
    health: StoreHealth,
}

impl RateLimiter {
    /// Create a fallback-only rate limiter with the given rules.
    pub fn new(rules: RuleResolver) -> Self {
        Self {
            rules,
            store: None,
            fallback: Arc::new(FallbackWindow::default()),
            analytics: Arc::new(Analytics::new()),
            clock: Arc::new(SystemClock),
            health: StoreHealth::new(DEFAULT_RETRY_INTERVAL),
        }
    }

    /// Build a rate limiter from configuration, connecting to the store if enabled.
    ///
    /// Invalid rules are an error. An unreachable store is not: the limiter
    /// starts in fallback-only mode.
    pub async fn from_config(config: &HivegateConfig) -> Result<Self> {
        let rules = config.rate_limiting.load_rules()?.compile()?;
        info!(routes = rules.len(), "Rate limit rules compiled");

        let mut limiter = Self::new(rules)
            .with_fallback(Arc::new(FallbackWindow::new(config.fallback.max_keys)))
            .with_retry_interval(config.store.retry_interval());

        if !config.store.enabled {
            info!("Distributed store disabled, using in-process fallback only");
            return Ok(limiter);
        }

        let store: Arc<dyn RateLimitStore> = match config.store.backend {
            StoreBackend::Local => Arc::new(LocalStore::new()),
            StoreBackend::Redis => match RedisStore::connect(&config.store).await {
                Ok(store) => Arc::new(store),
                Err(e) => {
                    warn!(
                        target: "hivegate::fallback",
                        error = %e,
                        "Could not connect to Redis, running on in-process fallback only"
                    );
                    return Ok(limiter);
                }
            },
        };

        info!(store = store.name(), "Distributed store enabled");
        limiter.store = Some(store);
        Ok(limiter)
    }

    pub fn with_store(mut self, store: Arc<dyn RateLimitStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_analytics(mut self, analytics: Arc<Analytics>) -> Self {
        self.analytics = analytics;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_fallback(mut self, fallback: Arc<FallbackWindow>) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.health = StoreHealth::new(retry_interval);
        self
    }

    /// Decide a request using the rule table.
    pub async fn check_request(&self, request: &RequestDescriptor) -> (bool, Decision) {
        let resolved = self.rules.resolve(&request.path, request.method.as_deref());
        self.decide(resolved.name, resolved.rule, request).await
    }

    /// Decide a request against a caller-supplied rule, bypassing the rule table.
    pub async fn check_request_with_rule(
        &self,
        request: &RequestDescriptor,
        rule: &RateLimitRule,
    ) -> (bool, Decision) {
        self.decide(CUSTOM_RULE_NAME, rule, request).await
    }

    async fn decide(
        &self,
        rule_name: &str,
        rule: &RateLimitRule,
        request: &RequestDescriptor,
    ) -> (bool, Decision) {
        let key = RateLimitKey::for_request(rule.scope, request);
        let limiter = Limiter::for_rule(rule);
        let now = self.clock.now_millis();

        trace!(
            key = %key,
            rule = rule_name,
            algorithm = %limiter.algorithm(),
            "Checking rate limit"
        );

        let decision = match self.active_store(now).await {
            Some(store) => match limiter.is_allowed(&key, store, now).await {
                Ok(decision) => decision,
                Err(e) if e.is_unavailable() => {
                    self.health.mark_down(now, store.name(), &e);
                    self.decide_degraded(&key, rule, now)
                }
                Err(e) => {
                    // The store is up but refused this key; other keys keep using it.
                    warn!(
                        target: "hivegate::fallback",
                        key = %key,
                        store = store.name(),
                        error = %e,
                        "Store rejected rate limit operation"
                    );
                    self.decide_degraded(&key, rule, now)
                }
            },
            None => self.decide_degraded(&key, rule, now),
        };

        self.analytics.record_request();
        if decision.allowed {
            debug!(key = %key, rule = rule_name, remaining = decision.remaining, "Request allowed");
        } else {
            self.analytics.record_violation(rule_name);
            warn!(
                key = %key,
                rule = rule_name,
                limit = decision.limit,
                retry_after = decision.retry_after,
                "Rate limit exceeded"
            );
        }

        (decision.allowed, decision)
    }

    /// The store to decide with, pinging it first when it is due for a retry.
    async fn active_store(&self, now_ms: u64) -> Option<&dyn RateLimitStore> {
        let store = self.store.as_deref()?;
        if !self.health.is_down() {
            return Some(store);
        }
        if !self.health.should_probe(now_ms) {
            return None;
        }

        match store.ping().await {
            Ok(()) => {
                self.health.mark_up(store.name());
                Some(store)
            }
            Err(e) => {
                self.health.mark_down(now_ms, store.name(), &e);
                None
            }
        }
    }

    fn decide_degraded(&self, key: &RateLimitKey, rule: &RateLimitRule, now_ms: u64) -> Decision {
        self.analytics.record_fallback();
        debug!(
            target: "hivegate::fallback",
            key = %key,
            algorithm = %rule.algorithm,
            "Deciding with in-process sliding window"
        );
        self.fallback.check(key, rule, now_ms)
    }

    /// `X-RateLimit-*` (and, on denial, `Retry-After`) headers for a decision.
    pub fn build_headers(&self, decision: &Decision) -> HashMap<String, String> {
        decision.headers()
    }

    pub fn analytics(&self) -> AnalyticsSnapshot {
        self.analytics.snapshot()
    }

    pub fn reset_analytics(&self) {
        self.analytics.reset();
    }

    /// Shared handle to the analytics collector, e.g. for a reporter task.
    pub fn analytics_handle(&self) -> Arc<Analytics> {
        self.analytics.clone()
    }

    /// Shared handle to the fallback, e.g. for a sweeper task.
    pub fn fallback_handle(&self) -> Arc<FallbackWindow> {
        self.fallback.clone()
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    pub fn rules(&self) -> &RuleResolver {
        &self.rules
    }

    /// Name of the configured distributed store, if any.
    pub fn store_name(&self) -> Option<&'static str> {
        self.store.as_ref().map(|store| store.name())
    }

    /// Whether decisions are currently being made by the fallback.
    pub fn is_degraded(&self) -> bool {
        self.store.is_none() || self.health.is_down()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use crate::ratelimit::rules::{Algorithm, RateLimitConfig, Scope, DEFAULT_RULE_NAME};
    use crate::ratelimit::store::{BucketState, WindowSnapshot};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const T0: u64 = 1_700_000_000_000;

    const RULES: &str = r#"
default:
  algorithm: fixed_window
  max_requests: 3
  window_seconds: 60
  scope: ip
rules:
  - name: chat
    path: /api/chat
    algorithm: token_bucket
    max_requests: 60
    window_seconds: 60
    burst_limit: 5
    scope: user
  - name: search
    path: /api/search
    algorithm: sliding_window
    max_requests: 2
    window_seconds: 10
    scope: endpoint
"#;

    /// A store that times out every call while `failing` is set and rejects
    /// every data call while `rejecting` is set.
    #[derive(Default)]
    struct FlakyStore {
        inner: LocalStore,
        failing: AtomicBool,
        rejecting: AtomicBool,
        calls: AtomicUsize,
        pings: AtomicUsize,
    }

    impl FlakyStore {
        fn failing() -> Self {
            let store = Self::default();
            store.failing.store(true, Ordering::SeqCst);
            store
        }

        fn check(&self) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                Err(HivegateError::StoreTimeout(Duration::from_millis(250)))
            } else if self.rejecting.load(Ordering::SeqCst) {
                Err(HivegateError::Store("key holds the wrong kind of value".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl RateLimitStore for FlakyStore {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn increment(&self, key: &str, ttl: Duration) -> Result<u64> {
            self.check()?;
            self.inner.increment(key, ttl).await
        }

        async fn decrement(&self, key: &str) -> Result<()> {
            self.check()?;
            self.inner.decrement(key).await
        }

        async fn record_event(
            &self,
            key: &str,
            now_ms: u64,
            window: Duration,
            limit: u64,
        ) -> Result<WindowSnapshot> {
            self.check()?;
            self.inner.record_event(key, now_ms, window, limit).await
        }

        async fn load_bucket(&self, key: &str) -> Result<Option<BucketState>> {
            self.check()?;
            self.inner.load_bucket(key).await
        }

        async fn save_bucket(&self, key: &str, state: BucketState, ttl: Duration) -> Result<()> {
            self.check()?;
            self.inner.save_bucket(key, state, ttl).await
        }

        async fn ping(&self) -> Result<()> {
            self.pings.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                Err(HivegateError::StoreTimeout(Duration::from_millis(250)))
            } else {
                Ok(())
            }
        }
    }

    fn resolver() -> RuleResolver {
        RateLimitConfig::from_yaml(RULES).unwrap().compile().unwrap()
    }

    fn limiter_with_local_store() -> (Arc<ManualClock>, RateLimiter) {
        let clock = Arc::new(ManualClock::new(T0));
        let store = Arc::new(LocalStore::with_clock(clock.clone()));
        let limiter = RateLimiter::new(resolver())
            .with_store(store)
            .with_clock(clock.clone());
        (clock, limiter)
    }

    fn chat_request(user: &str) -> RequestDescriptor {
        RequestDescriptor::new("/api/chat")
            .with_method("POST")
            .with_peer_addr([10, 0, 0, 1].into())
            .with_user(user)
    }

    #[tokio::test]
    async fn test_token_bucket_scenario() {
        let (clock, limiter) = limiter_with_local_store();
        let request = chat_request("U");

        for expected_remaining in [4, 3, 2, 1, 0] {
            let (allowed, info) = limiter.check_request(&request).await;
            assert!(allowed);
            assert_eq!(info.remaining, expected_remaining);
            assert_eq!(info.limit, 60);
        }

        let (allowed, info) = limiter.check_request(&request).await;
        assert!(!allowed);
        assert_eq!(info.retry_after, 1);

        clock.advance(Duration::from_secs(1));
        let (allowed, _) = limiter.check_request(&request).await;
        assert!(allowed);

        let analytics = limiter.analytics();
        assert_eq!(analytics.total_requests, 7);
        assert_eq!(analytics.total_violations, 1);
        assert_eq!(analytics.violations_by_rule["chat"], 1);
        assert_eq!(analytics.fallback_decisions, 0);
        assert!(!limiter.is_degraded());
    }

    #[tokio::test]
    async fn test_scope_isolation() {
        let (_, limiter) = limiter_with_local_store();

        for _ in 0..5 {
            assert!(limiter.check_request(&chat_request("alice")).await.0);
        }
        assert!(!limiter.check_request(&chat_request("alice")).await.0);

        // Same address, different user: separate bucket
        let (allowed, info) = limiter.check_request(&chat_request("bob")).await;
        assert!(allowed);
        assert_eq!(info.remaining, 4);
    }

    #[tokio::test]
    async fn test_anonymous_user_scope_uses_ip() {
        let (_, limiter) = limiter_with_local_store();
        let anonymous = RequestDescriptor::new("/api/chat").with_forwarded_for("198.51.100.4");

        for _ in 0..5 {
            assert!(limiter.check_request(&anonymous).await.0);
        }
        assert!(!limiter.check_request(&anonymous).await.0);

        let other = RequestDescriptor::new("/api/chat").with_forwarded_for("198.51.100.5");
        assert!(limiter.check_request(&other).await.0);
    }

    #[tokio::test]
    async fn test_default_rule_fixed_window() {
        let (clock, limiter) = limiter_with_local_store();
        let request = RequestDescriptor::new("/api/tasks").with_real_ip("192.0.2.1");

        for _ in 0..3 {
            assert!(limiter.check_request(&request).await.0);
        }
        let (allowed, info) = limiter.check_request(&request).await;
        assert!(!allowed);
        assert!(info.retry_after > 0);

        // T0 is 20 seconds into its minute
        clock.advance(Duration::from_secs(40));
        assert!(limiter.check_request(&request).await.0);

        assert_eq!(limiter.analytics().violations_by_rule[DEFAULT_RULE_NAME], 1);
    }

    #[tokio::test]
    async fn test_endpoint_scope_shared_across_clients() {
        let (_, limiter) = limiter_with_local_store();

        let a = RequestDescriptor::new("/api/search").with_user("a").with_real_ip("192.0.2.1");
        let b = RequestDescriptor::new("/api/search").with_user("b").with_real_ip("192.0.2.2");

        assert!(limiter.check_request(&a).await.0);
        assert!(limiter.check_request(&b).await.0);
        assert!(!limiter.check_request(&a).await.0);
    }

    #[tokio::test]
    async fn test_custom_rule_overrides_table() {
        let (_, limiter) = limiter_with_local_store();
        let rule = RateLimitRule::new(Algorithm::FixedWindow, 1, 60, Scope::Global);

        let request = chat_request("U");
        assert!(limiter.check_request_with_rule(&request, &rule).await.0);
        assert!(!limiter.check_request_with_rule(&request, &rule).await.0);

        // The table's chat rule is untouched
        assert!(limiter.check_request(&request).await.0);
        assert_eq!(limiter.analytics().violations_by_rule[CUSTOM_RULE_NAME], 1);
    }

    #[tokio::test]
    async fn test_fallback_only_serves_every_algorithm() {
        let limiter = RateLimiter::new(resolver()).with_clock(Arc::new(ManualClock::new(T0)));
        assert!(limiter.is_degraded());
        assert_eq!(limiter.store_name(), None);

        let requests = [
            chat_request("U"),
            RequestDescriptor::new("/api/search"),
            RequestDescriptor::new("/other"),
        ];
        for request in &requests {
            let (allowed, info) = limiter.check_request(request).await;
            assert!(allowed);
            assert!(info.limit > 0);
        }

        // Chat degrades to a sliding window of 60 per minute: no 5-request burst cap
        for _ in 0..10 {
            assert!(limiter.check_request(&requests[0]).await.0);
        }

        assert_eq!(limiter.analytics().fallback_decisions, 13);
    }

    #[tokio::test]
    async fn test_store_failure_fails_open_and_retries() {
        let clock = Arc::new(ManualClock::new(T0));
        let store = Arc::new(FlakyStore::failing());
        let limiter = RateLimiter::new(resolver())
            .with_store(store.clone())
            .with_clock(clock.clone())
            .with_retry_interval(Duration::from_secs(5));

        let request = RequestDescriptor::new("/api/tasks").with_real_ip("192.0.2.1");
        let (allowed, _) = limiter.check_request(&request).await;
        assert!(allowed);
        assert!(limiter.is_degraded());
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);

        // Within the retry interval the store is not touched
        limiter.check_request(&request).await;
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);

        // After it, a ping picks up recovery before the store is used again
        store.failing.store(false, Ordering::SeqCst);
        clock.advance(Duration::from_secs(5));
        let (allowed, info) = limiter.check_request(&request).await;
        assert!(allowed);
        assert_eq!(info.remaining, 2);
        assert!(!limiter.is_degraded());
        assert_eq!(store.pings.load(Ordering::SeqCst), 1);

        assert_eq!(limiter.analytics().fallback_decisions, 2);
    }

    #[tokio::test]
    async fn test_failed_ping_restarts_retry_interval() {
        let clock = Arc::new(ManualClock::new(T0));
        let store = Arc::new(FlakyStore::failing());
        let limiter = RateLimiter::new(resolver())
            .with_store(store.clone())
            .with_clock(clock.clone())
            .with_retry_interval(Duration::from_secs(5));
        let request = RequestDescriptor::new("/api/tasks").with_real_ip("192.0.2.1");

        limiter.check_request(&request).await;
        clock.advance(Duration::from_secs(5));
        limiter.check_request(&request).await;
        assert_eq!(store.pings.load(Ordering::SeqCst), 1);
        // Only the ping reached the store
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_secs(4));
        limiter.check_request(&request).await;
        assert_eq!(store.pings.load(Ordering::SeqCst), 1);
        assert!(limiter.is_degraded());
        assert_eq!(limiter.analytics().fallback_decisions, 3);
    }

    #[tokio::test]
    async fn test_rejected_operation_keeps_store_in_rotation() {
        let clock = Arc::new(ManualClock::new(T0));
        let store = Arc::new(FlakyStore::default());
        let limiter = RateLimiter::new(resolver())
            .with_store(store.clone())
            .with_clock(clock.clone());
        let request = RequestDescriptor::new("/api/tasks").with_real_ip("192.0.2.1");

        store.rejecting.store(true, Ordering::SeqCst);
        let (allowed, _) = limiter.check_request(&request).await;
        assert!(allowed);
        assert!(!limiter.is_degraded());
        assert_eq!(limiter.analytics().fallback_decisions, 1);

        // The very next request goes straight back to the store
        store.rejecting.store(false, Ordering::SeqCst);
        let (allowed, info) = limiter.check_request(&request).await;
        assert!(allowed);
        assert_eq!(info.remaining, 2);
        assert_eq!(limiter.analytics().fallback_decisions, 1);
        assert_eq!(store.pings.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_global_rules_with_different_algorithms_coexist() {
        let rules = RateLimitConfig::from_yaml(
            r#"
rules:
  - name: items
    path: /api/items
    methods: [GET]
    algorithm: sliding_window
    max_requests: 10
    window_seconds: 60
    scope: global
  - name: orders
    path: /api/orders
    methods: [POST]
    algorithm: token_bucket
    max_requests: 10
    window_seconds: 60
    scope: global
  - name: tasks
    path: /api/tasks
    algorithm: fixed_window
    max_requests: 10
    window_seconds: 60
    scope: global
"#,
        )
        .unwrap()
        .compile()
        .unwrap();

        let clock = Arc::new(ManualClock::new(T0));
        let limiter = RateLimiter::new(rules)
            .with_store(Arc::new(LocalStore::with_clock(clock.clone())))
            .with_clock(clock);

        let requests = [
            RequestDescriptor::new("/api/items").with_method("GET"),
            RequestDescriptor::new("/api/orders").with_method("POST"),
            RequestDescriptor::new("/api/tasks").with_method("PUT"),
        ];
        for request in requests.iter().chain(requests.iter()) {
            let (allowed, info) = limiter.check_request(request).await;
            assert!(allowed);
            assert!(info.remaining >= 8);
        }

        assert!(!limiter.is_degraded());
        assert_eq!(limiter.analytics().fallback_decisions, 0);
    }

    #[tokio::test]
    async fn test_local_store_stays_bounded_across_windows() {
        let rules = RateLimitConfig::from_yaml(
            r#"
default:
  algorithm: fixed_window
  max_requests: 5
  window_seconds: 1
"#,
        )
        .unwrap()
        .compile()
        .unwrap();

        let clock = Arc::new(ManualClock::new(T0));
        let store = Arc::new(LocalStore::with_clock(clock.clone()));
        let limiter = RateLimiter::new(rules)
            .with_store(store.clone())
            .with_clock(clock.clone());
        let request = RequestDescriptor::new("/api/tasks").with_real_ip("192.0.2.1");

        for _ in 0..1000 {
            assert!(limiter.check_request(&request).await.0);
            clock.advance(Duration::from_secs(1));
        }
        assert!(store.len() <= 2, "local store holds {} entries", store.len());
    }

    #[tokio::test]
    async fn test_fallback_still_enforces_quota() {
        let limiter = RateLimiter::new(resolver())
            .with_store(Arc::new(FlakyStore::failing()))
            .with_clock(Arc::new(ManualClock::new(T0)));
        let request = RequestDescriptor::new("/api/tasks").with_real_ip("192.0.2.1");

        let allowed = {
            let mut n = 0;
            for _ in 0..5 {
                if limiter.check_request(&request).await.0 {
                    n += 1;
                }
            }
            n
        };
        assert_eq!(allowed, 3);
    }

    #[tokio::test]
    async fn test_analytics_totals_and_reset() {
        let analytics = Arc::new(Analytics::new());
        let (_, limiter) = limiter_with_local_store();
        let limiter = limiter.with_analytics(analytics.clone());
        let request = RequestDescriptor::new("/api/tasks").with_real_ip("192.0.2.9");

        for _ in 0..7 {
            limiter.check_request(&request).await;
        }

        let snapshot = limiter.analytics();
        assert_eq!(snapshot.total_requests, 7);
        assert_eq!(snapshot.total_violations, 4);
        assert_eq!(analytics.snapshot(), snapshot);

        limiter.reset_analytics();
        let snapshot = limiter.analytics();
        assert_eq!(snapshot.total_requests, 0);
        assert_eq!(snapshot.total_violations, 0);
    }

    #[tokio::test]
    async fn test_build_headers_idempotent() {
        let (_, limiter) = limiter_with_local_store();
        let (_, decision) = limiter.check_request(&chat_request("U")).await;

        let first = limiter.build_headers(&decision);
        let second = limiter.build_headers(&decision);
        assert_eq!(first, second);
        assert_eq!(first["X-RateLimit-Limit"], "60");
        assert_eq!(first["X-RateLimit-Remaining"], "4");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_share_quota() {
        let (_, limiter) = limiter_with_local_store();
        let limiter = Arc::new(limiter);

        let checks = (0..20).map(|_| {
            let limiter = limiter.clone();
            tokio::spawn(async move {
                let request = RequestDescriptor::new("/api/tasks").with_real_ip("192.0.2.1");
                limiter.check_request(&request).await.0
            })
        });

        let allowed = futures::future::join_all(checks)
            .await
            .into_iter()
            .filter(|r| *r.as_ref().unwrap())
            .count();
        assert_eq!(allowed, 3);
        assert_eq!(limiter.analytics().total_requests, 20);
    }

    #[tokio::test]
    async fn test_from_config_local_backend() {
        let config = HivegateConfig::from_yaml(
            r#"
store:
  enabled: true
  backend: local
rate_limiting:
  rules:
    default:
      algorithm: sliding_window
      max_requests: 1
      window_seconds: 60
"#,
        )
        .unwrap();

        let limiter = RateLimiter::from_config(&config).await.unwrap();
        assert_eq!(limiter.store_name(), Some("local"));

        let request = RequestDescriptor::new("/x").with_real_ip("192.0.2.1");
        assert!(limiter.check_request(&request).await.0);
        assert!(!limiter.check_request(&request).await.0);
    }

    #[tokio::test]
    async fn test_from_config_rejects_invalid_rules() {
        let config = HivegateConfig::from_yaml(
            r#"
rate_limiting:
  rules:
    default:
      algorithm: fixed_window
      max_requests: 0
      window_seconds: 60
"#,
        )
        .unwrap();

        assert!(matches!(
            RateLimiter::from_config(&config).await,
            Err(HivegateError::Config(_))
        ));
    }
}
