//! Rate limit rules configuration and matching.
//!
//! A rule table is an ordered list of routes plus a catch-all default. Each
//! route matches on the request path (prefix, exact or regex) and optionally
//! on the HTTP method. Resolution is first-match-wins.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{HivegateError, Result};

/// Name reported for requests that fell through to the default rule.
pub const DEFAULT_RULE_NAME: &str = "default";
/// Name reported for requests checked against a caller-supplied rule.
pub const CUSTOM_RULE_NAME: &str = "custom";

/// Throttling algorithm applied by a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    FixedWindow,
    SlidingWindow,
    TokenBucket,
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Algorithm::FixedWindow => "fixed_window",
            Algorithm::SlidingWindow => "sliding_window",
            Algorithm::TokenBucket => "token_bucket",
        };
        f.write_str(name)
    }
}

/// The dimension along which a quota is tracked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    #[default]
    Ip,
    User,
    Endpoint,
    Global,
}

impl Scope {
    /// Tag used as the first component of storage keys.
    pub fn tag(&self) -> &'static str {
        match self {
            Scope::Ip => "ip",
            Scope::User => "user",
            Scope::Endpoint => "endpoint",
            Scope::Global => "global",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A rate limit rule: which algorithm, how much quota, over what window,
/// tracked along which scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRule {
    pub algorithm: Algorithm,
    /// Requests allowed per window
    pub max_requests: u64,
    /// Window length in seconds
    pub window_seconds: u64,
    /// Token bucket capacity; defaults to `max_requests`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub burst_limit: Option<u64>,
    #[serde(default)]
    pub scope: Scope,
}

impl Default for RateLimitRule {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::SlidingWindow,
            max_requests: 100,
            window_seconds: 60,
            burst_limit: None,
            scope: Scope::Ip,
        }
    }
}

impl RateLimitRule {
    pub fn new(algorithm: Algorithm, max_requests: u64, window_seconds: u64, scope: Scope) -> Self {
        Self {
            algorithm,
            max_requests,
            window_seconds,
            burst_limit: None,
            scope,
        }
    }

    pub fn with_burst_limit(mut self, burst_limit: u64) -> Self {
        self.burst_limit = Some(burst_limit);
        self
    }

    /// The window as a `Duration`.
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }

    /// Bucket capacity, falling back to `max_requests` when unset.
    pub fn effective_burst(&self) -> u64 {
        self.burst_limit.unwrap_or(self.max_requests)
    }

    /// Reject rules that could never admit a request or would divide by zero.
    pub fn validate(&self, name: &str) -> Result<()> {
        if self.max_requests == 0 {
            return Err(HivegateError::Config(format!(
                "rule '{}': max_requests must be greater than zero",
                name
            )));
        }
        if self.window_seconds == 0 {
            return Err(HivegateError::Config(format!(
                "rule '{}': window_seconds must be greater than zero",
                name
            )));
        }
        if self.burst_limit == Some(0) {
            return Err(HivegateError::Config(format!(
                "rule '{}': burst_limit must be greater than zero",
                name
            )));
        }
        Ok(())
    }
}

/// How a route's `path` is compared against the request path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    #[default]
    Prefix,
    Exact,
    Regex,
}

/// A single entry of the rule table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Name used in logs and violation analytics
    pub name: String,
    /// Path prefix, exact path or regex, depending on `match`
    pub path: String,
    #[serde(default, rename = "match")]
    pub match_kind: MatchKind,
    /// HTTP methods this route applies to; empty means all
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(flatten)]
    pub rule: RateLimitRule,
}

/// The rule table as written in configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Catch-all rule for requests no route matches
    #[serde(default)]
    pub default: RateLimitRule,
    /// Ordered routes; the first match wins
    #[serde(default)]
    pub rules: Vec<RouteConfig>,
}

impl RateLimitConfig {
    /// Create a table holding only the built-in default rule.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the rule table from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit rules");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load the rule table from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| HivegateError::Config(format!("Failed to parse rate limit rules: {}", e)))
    }

    /// Validate every rule and compile the route matchers.
    pub fn compile(&self) -> Result<RuleResolver> {
        RuleResolver::new(self)
    }
}

#[derive(Debug, Clone)]
enum PathMatcher {
    Prefix(String),
    Exact(String),
    Regex(Regex),
}

impl PathMatcher {
    fn matches(&self, path: &str) -> bool {
        match self {
            PathMatcher::Prefix(prefix) => path.starts_with(prefix.as_str()),
            PathMatcher::Exact(exact) => path == exact.as_str(),
            PathMatcher::Regex(re) => re.is_match(path),
        }
    }
}

impl fmt::Display for PathMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathMatcher::Prefix(p) => write!(f, "{}*", p),
            PathMatcher::Exact(p) => write!(f, "={}", p),
            PathMatcher::Regex(re) => write!(f, "~{}", re.as_str()),
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledRoute {
    name: String,
    matcher: PathMatcher,
    methods: Vec<String>,
    rule: RateLimitRule,
}

impl CompiledRoute {
    fn matches(&self, path: &str, method: Option<&str>) -> bool {
        if !self.methods.is_empty() {
            match method {
                Some(m) if self.methods.iter().any(|allowed| allowed.eq_ignore_ascii_case(m)) => {}
                _ => return false,
            }
        }
        self.matcher.matches(path)
    }
}

/// The rule that applies to one request.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedRule<'a> {
    /// Route name, [`DEFAULT_RULE_NAME`] or [`CUSTOM_RULE_NAME`]
    pub name: &'a str,
    pub rule: &'a RateLimitRule,
}

/// Compiled, validated rule table.
#[derive(Debug, Clone)]
pub struct RuleResolver {
    routes: Vec<CompiledRoute>,
    default: RateLimitRule,
}

impl RuleResolver {
    /// Compile a rule table, failing on the first invalid rule or pattern.
    pub fn new(config: &RateLimitConfig) -> Result<Self> {
        config.default.validate(DEFAULT_RULE_NAME)?;

        let mut routes = Vec::with_capacity(config.rules.len());
        for route in &config.rules {
            route.rule.validate(&route.name)?;

            let matcher = match route.match_kind {
                MatchKind::Prefix => PathMatcher::Prefix(route.path.clone()),
                MatchKind::Exact => PathMatcher::Exact(route.path.clone()),
                MatchKind::Regex => PathMatcher::Regex(Regex::new(&route.path).map_err(|e| {
                    HivegateError::Config(format!(
                        "rule '{}': invalid path regex '{}': {}",
                        route.name, route.path, e
                    ))
                })?),
            };

            routes.push(CompiledRoute {
                name: route.name.clone(),
                matcher,
                methods: route.methods.clone(),
                rule: route.rule.clone(),
            });
        }

        Ok(Self {
            routes,
            default: config.default.clone(),
        })
    }

    /// Find the rule for a request. Never fails: the default rule is the catch-all.
    pub fn resolve(&self, path: &str, method: Option<&str>) -> ResolvedRule<'_> {
        self.routes
            .iter()
            .find(|route| route.matches(path, method))
            .map(|route| ResolvedRule {
                name: &route.name,
                rule: &route.rule,
            })
            .unwrap_or(ResolvedRule {
                name: DEFAULT_RULE_NAME,
                rule: &self.default,
            })
    }

    pub fn default_rule(&self) -> &RateLimitRule {
        &self.default
    }

    /// Routes in match order as `(name, pattern, methods, rule)`.
    pub fn routes(&self) -> impl Iterator<Item = (&str, String, &[String], &RateLimitRule)> {
        self.routes.iter().map(|route| {
            (
                route.name.as_str(),
                route.matcher.to_string(),
                route.methods.as_slice(),
                &route.rule,
            )
        })
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl Default for RuleResolver {
    fn default() -> Self {
        Self {
            routes: Vec::new(),
            default: RateLimitRule::default(),
        }
    }
}
