//! Configuration management for Hivegate.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{HivegateError, Result};
use crate::ratelimit::RateLimitConfig;

/// Prefix for environment overrides, e.g. `HIVEGATE__STORE__ENABLED=true`.
const ENV_PREFIX: &str = "HIVEGATE";

/// Main configuration for Hivegate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HivegateConfig {
    /// Distributed store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Degraded-mode fallback configuration
    #[serde(default)]
    pub fallback: FallbackConfig,

    /// Rule table location
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Analytics reporting
    #[serde(default)]
    pub analytics: AnalyticsConfig,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which shared store backs the limiter when enabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Redis,
    Local,
}

/// Distributed store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// When false, every decision is made by the in-process fallback
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub backend: StoreBackend,

    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Namespace prepended to every storage key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Deadline for a single store operation
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,

    /// How long to stay on the fallback after a store failure
    #[serde(default = "default_retry_interval")]
    pub retry_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            backend: StoreBackend::default(),
            redis_url: default_redis_url(),
            key_prefix: default_key_prefix(),
            connect_timeout_ms: default_connect_timeout_ms(),
            operation_timeout_ms: default_operation_timeout_ms(),
            retry_interval_secs: default_retry_interval(),
        }
    }
}

impl StoreConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_key_prefix() -> String {
    "hivegate".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    2000
}

fn default_operation_timeout_ms() -> u64 {
    250
}

fn default_retry_interval() -> u64 {
    5
}

/// In-process fallback configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    /// Soft bound on tracked keys; exceeding it triggers an eager sweep
    #[serde(default = "default_max_keys")]
    pub max_keys: usize,

    /// Interval of the background eviction sweep
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            max_keys: default_max_keys(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl FallbackConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn default_max_keys() -> usize {
    10000
}

fn default_sweep_interval() -> u64 {
    60
}

/// Rule table configuration. Inline rules win over `rules_path`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Path to a YAML rule table
    pub rules_path: Option<String>,

    /// Rule table given inline
    #[serde(default)]
    pub rules: Option<RateLimitConfig>,
}

impl RateLimitingConfig {
    /// Resolve the rule table, falling back to the built-in default rule.
    pub fn load_rules(&self) -> Result<RateLimitConfig> {
        match (&self.rules, &self.rules_path) {
            (Some(rules), _) => Ok(rules.clone()),
            (None, Some(path)) => RateLimitConfig::from_file(path),
            (None, None) => {
                info!("No rate limit rules configured, using the built-in default rule");
                Ok(RateLimitConfig::new())
            }
        }
    }
}

/// Analytics configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    /// Log an analytics snapshot this often; disabled when unset
    pub report_interval_secs: Option<u64>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl HivegateConfig {
    /// Load configuration from a file, layered with `HIVEGATE__*` environment
    /// overrides.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| HivegateError::Config(e.to_string()))
    }

    /// Load configuration from environment overrides only.
    pub fn from_env() -> Result<Self> {
        config::Config::builder()
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| HivegateError::Config(e.to_string()))
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| HivegateError::Config(e.to_string()))
    }
}
