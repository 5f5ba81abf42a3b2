//! Hivegate - Adaptive Request Rate Limiting
//!
//! This crate decides, for every inbound request, whether it may proceed. A
//! rule table maps requests to one of three algorithms (fixed window, sliding
//! window, token bucket) tracked per IP, user, endpoint or globally. State
//! lives in a shared Redis store, with an in-process fallback that keeps
//! decisions flowing while the store is disabled or unreachable.

pub mod config;
pub mod error;
pub mod ratelimit;
