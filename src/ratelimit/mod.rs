//! Rate limiting logic and state management.

mod algorithm;
mod analytics;
mod clock;
mod decision;
mod descriptor;
mod fallback;
mod limiter;
mod rules;
pub mod store;

pub use algorithm::{FixedWindowLimiter, Limiter, SlidingWindowLimiter, TokenBucketLimiter};
pub use analytics::{Analytics, AnalyticsSnapshot};
pub use clock::{Clock, ManualClock, SystemClock};
pub use decision::{Decision, HEADER_LIMIT, HEADER_REMAINING, HEADER_RESET, HEADER_RETRY_AFTER};
pub use descriptor::{RateLimitKey, RequestDescriptor};
pub use fallback::FallbackWindow;
pub use limiter::RateLimiter;
pub use rules::{
    Algorithm, MatchKind, RateLimitConfig, RateLimitRule, ResolvedRule, RouteConfig, RuleResolver,
    Scope, CUSTOM_RULE_NAME, DEFAULT_RULE_NAME,
};
pub use store::{BucketState, LocalStore, RateLimitStore, RedisStore, WindowSnapshot};
