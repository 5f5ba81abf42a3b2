//! Error types for Hivegate.

use std::time::Duration;

use thiserror::Error;

/// Main error type for Hivegate operations.
///
/// Only `Config` is ever returned to the embedding application at runtime
/// boundaries; store errors are absorbed by the limiter into fallback decisions.
#[derive(Error, Debug)]
pub enum HivegateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic store failures (wrong value type, bad reply shape, ...)
    #[error("Store error: {0}")]
    Store(String),

    /// A store operation exceeded its deadline
    #[error("Store operation timed out after {0:?}")]
    StoreTimeout(Duration),

    /// Redis errors
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HivegateError {
    /// Whether the store itself is unreachable or too slow, as opposed to
    /// rejecting one operation. Only these failures take the store out of
    /// rotation.
    pub fn is_unavailable(&self) -> bool {
        match self {
            HivegateError::StoreTimeout(_) | HivegateError::Io(_) => true,
            HivegateError::Redis(e) => {
                e.is_io_error()
                    || e.is_connection_refusal()
                    || e.is_connection_dropped()
                    || e.is_timeout()
            }
            HivegateError::Config(_) | HivegateError::Store(_) => false,
        }
    }
}

/// Result type alias for Hivegate operations.
pub type Result<T> = std::result::Result<T, HivegateError>;
