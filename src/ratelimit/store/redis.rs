//! Redis-backed store shared by every process of a deployment.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use super::{BucketState, RateLimitStore, WindowSnapshot};
use crate::config::StoreConfig;
use crate::error::{HivegateError, Result};

const INCREMENT_SCRIPT: &str = r#"
local current = redis.call("INCR", KEYS[1])
if current == 1 then
    redis.call("PEXPIRE", KEYS[1], ARGV[1])
end
return current
"#;

const DECREMENT_SCRIPT: &str = r#"
if redis.call("EXISTS", KEYS[1]) == 1 then
    return redis.call("DECR", KEYS[1])
end
return 0
"#;

// ARGV: now_ms, exclusive trim bound "(cutoff", window_ms, limit, member
const SLIDING_WINDOW_SCRIPT: &str = r#"
local key = KEYS[1]
local now_ms = ARGV[1]
local cutoff = ARGV[2]
local window_ms = tonumber(ARGV[3])
local limit = tonumber(ARGV[4])
local member = ARGV[5]

redis.call("ZREMRANGEBYSCORE", key, "-inf", cutoff)
local count = redis.call("ZCARD", key)

local admitted = 0
if count < limit then
    redis.call("ZADD", key, now_ms, member)
    redis.call("PEXPIRE", key, window_ms)
    admitted = 1
end

local oldest = redis.call("ZRANGE", key, 0, 0, "WITHSCORES")
local oldest_ms = -1
if #oldest > 0 then
    oldest_ms = tonumber(oldest[2])
end

return {admitted, count, oldest_ms}
"#;

const FIELD_TOKENS: &str = "tokens";
const FIELD_LAST_REFILL: &str = "last_refill";

/// A [`RateLimitStore`] on a Redis server.
///
/// Counter and sliding-window steps run as Lua scripts so each is a single
/// atomic unit on the server. Every call is bounded by the operation timeout;
/// a timeout surfaces as [`HivegateError::StoreTimeout`].
pub struct RedisStore {
    connection_manager: ConnectionManager,
    prefix: String,
    timeout: Duration,
    increment_script: Script,
    decrement_script: Script,
    window_script: Script,
}

impl RedisStore {
    /// Connect using the store section of the configuration.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        info!(url = %sanitize_url(&config.redis_url), "Connecting to Redis");

        let client = redis::Client::open(config.redis_url.as_str())?;
        let connect_timeout = config.connect_timeout();
        let connection_manager =
            match tokio::time::timeout(connect_timeout, client.get_connection_manager()).await {
                Ok(result) => result?,
                Err(_) => return Err(HivegateError::StoreTimeout(connect_timeout)),
            };

        info!("Redis connection established");
        Ok(Self::new(
            connection_manager,
            config.key_prefix.clone(),
            config.operation_timeout(),
        ))
    }

    pub fn new(connection_manager: ConnectionManager, prefix: String, timeout: Duration) -> Self {
        Self {
            connection_manager,
            prefix,
            timeout,
            increment_script: Script::new(INCREMENT_SCRIPT),
            decrement_script: Script::new(DECREMENT_SCRIPT),
            window_script: Script::new(SLIDING_WINDOW_SCRIPT),
        }
    }

    fn key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}:{}", self.prefix, key)
        }
    }

    async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(HivegateError::StoreTimeout(self.timeout)),
        }
    }
}

#[async_trait]
impl RateLimitStore for RedisStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64> {
        let key = self.key(key);
        let mut conn = self.connection_manager.clone();
        let count: u64 = self
            .run(
                self.increment_script
                    .key(&key)
                    .arg(ttl.as_millis() as u64)
                    .invoke_async(&mut conn),
            )
            .await?;
        Ok(count)
    }

    async fn decrement(&self, key: &str) -> Result<()> {
        let key = self.key(key);
        let mut conn = self.connection_manager.clone();
        let _: i64 = self
            .run(self.decrement_script.key(&key).invoke_async(&mut conn))
            .await?;
        Ok(())
    }

    async fn record_event(
        &self,
        key: &str,
        now_ms: u64,
        window: Duration,
        limit: u64,
    ) -> Result<WindowSnapshot> {
        let key = self.key(key);
        let window_ms = window.as_millis() as u64;
        let cutoff = format!("({}", now_ms.saturating_sub(window_ms));
        let member = format!("{}-{}", now_ms, Uuid::new_v4());
        let mut conn = self.connection_manager.clone();

        let (admitted, count, oldest): (i64, u64, i64) = self
            .run(
                self.window_script
                    .key(&key)
                    .arg(now_ms)
                    .arg(cutoff)
                    .arg(window_ms)
                    .arg(limit)
                    .arg(member)
                    .invoke_async(&mut conn),
            )
            .await?;

        debug!(key = %key, count, admitted, "Redis sliding window step");

        Ok(WindowSnapshot {
            admitted: admitted == 1,
            count,
            oldest: u64::try_from(oldest).ok(),
        })
    }

    async fn load_bucket(&self, key: &str) -> Result<Option<BucketState>> {
        let key = self.key(key);
        let mut conn = self.connection_manager.clone();
        let fields: HashMap<String, String> = self.run(conn.hgetall(&key)).await?;

        if fields.is_empty() {
            return Ok(None);
        }

        let tokens = fields
            .get(FIELD_TOKENS)
            .and_then(|v| v.parse::<f64>().ok())
            .ok_or_else(|| HivegateError::Store(format!("bucket '{}' has no valid tokens field", key)))?;
        let last_refill = fields
            .get(FIELD_LAST_REFILL)
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| {
                HivegateError::Store(format!("bucket '{}' has no valid last_refill field", key))
            })?;

        Ok(Some(BucketState { tokens, last_refill }))
    }

    async fn save_bucket(&self, key: &str, state: BucketState, ttl: Duration) -> Result<()> {
        let key = self.key(key);
        let mut conn = self.connection_manager.clone();
        let fields = [
            (FIELD_TOKENS, state.tokens.to_string()),
            (FIELD_LAST_REFILL, state.last_refill.to_string()),
        ];

        let _: () = self
            .run(
                redis::pipe()
                    .atomic()
                    .hset_multiple(&key, &fields)
                    .ignore()
                    .pexpire(&key, ttl.as_millis() as i64)
                    .ignore()
                    .query_async(&mut conn),
            )
            .await?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection_manager.clone();
        let _: String = self
            .run(redis::cmd("PING").query_async(&mut conn))
            .await?;
        Ok(())
    }
}

/// Strip credentials from a Redis URL before logging it.
fn sanitize_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***@{}", &url[..scheme_end], &url[at + 1..])
        }
        _ => url.to_string(),
    }
}
