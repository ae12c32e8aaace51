//! Minimal Redis primitives for liveness keys and wake-up lists.
//!
//! Every [`Connector::connect`] call opens a fresh, exclusively owned
//! [`Connection`]. Callers that block on a list pop must never share that
//! connection with anyone else, so there is no pooled or
//! multiplexed client here.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

// Re-export ErrorKind so consumers can construct CustomRedisError in tests
pub use redis::ErrorKind as RedisErrorKind;

#[derive(Error, Debug, Clone)]
pub enum CustomRedisError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Timeout error")]
    Timeout,
    #[error(transparent)]
    Redis(#[from] Arc<redis::RedisError>),
}

impl From<redis::RedisError> for CustomRedisError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            CustomRedisError::Timeout
        } else {
            CustomRedisError::Redis(Arc::new(err))
        }
    }
}

impl CustomRedisError {
    /// Create a Redis error from an ErrorKind (primarily for testing)
    pub fn from_redis_kind(kind: redis::ErrorKind, description: &'static str) -> Self {
        CustomRedisError::Redis(Arc::new(redis::RedisError::from((kind, description))))
    }

    /// Whether the connection that produced this error is no longer usable.
    ///
    /// A timed out command on a dedicated connection leaves its reply in flight,
    /// so the connection is considered broken as well.
    pub fn is_connection_failure(&self) -> bool {
        match self {
            CustomRedisError::Timeout => true,
            CustomRedisError::InvalidConfiguration(_) => false,
            CustomRedisError::Redis(err) => {
                err.is_io_error()
                    || err.is_connection_dropped()
                    || err.is_connection_refusal()
                    || err.is_timeout()
            }
        }
    }
}

/// Opens connections to a single store.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, host: &str, port: u16)
        -> Result<Box<dyn Connection>, CustomRedisError>;
}

/// One exclusively owned store connection. Dropping it disconnects.
#[async_trait]
pub trait Connection: Send {
    async fn auth(&mut self, password: String) -> Result<(), CustomRedisError>;
    async fn select(&mut self, db: i64) -> Result<(), CustomRedisError>;

    /// Atomic `SET key value EX seconds`.
    async fn set_ex(&mut self, k: String, v: String, seconds: u64)
        -> Result<(), CustomRedisError>;

    /// Returns false when the key does not exist.
    async fn expire(&mut self, k: String, seconds: u64) -> Result<bool, CustomRedisError>;

    async fn del(&mut self, k: String) -> Result<(), CustomRedisError>;
    async fn rpush(&mut self, k: String, v: String) -> Result<(), CustomRedisError>;

    /// Blocks for at most `timeout_seconds` waiting for a value on the list.
    /// `Ok(None)` means the wait elapsed without a value.
    async fn blpop(
        &mut self,
        k: String,
        timeout_seconds: u64,
    ) -> Result<Option<String>, CustomRedisError>;
}

mod client;
mod mock;

pub use client::{RedisConnection, RedisConnector};
pub use mock::{MockConnector, MockFailure, MockRedisCall};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_breaks_connection() {
        assert!(CustomRedisError::Timeout.is_connection_failure());
    }

    #[test]
    fn test_invalid_configuration_is_not_a_connection_failure() {
        let err = CustomRedisError::InvalidConfiguration("bad".to_string());
        assert!(!err.is_connection_failure());
    }

    #[test]
    fn test_io_error_breaks_connection() {
        let io = std::io::Error::from(std::io::ErrorKind::ConnectionReset);
        let err: CustomRedisError = redis::RedisError::from(io).into();
        assert!(err.is_connection_failure());

        // An error reply that merely carries the I/O kind is not a broken socket.
        let described =
            CustomRedisError::from_redis_kind(RedisErrorKind::IoError, "Connection reset");
        assert!(!described.is_connection_failure());
    }

    #[test]
    fn test_error_reply_keeps_connection() {
        let err = CustomRedisError::from_redis_kind(
            RedisErrorKind::TypeError,
            "WRONGTYPE Operation against a key holding the wrong kind of value",
        );
        assert!(!err.is_connection_failure());
    }

    #[test]
    fn test_redis_timeout_maps_to_timeout() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out");
        let err: CustomRedisError = redis::RedisError::from(io).into();
        assert!(matches!(err, CustomRedisError::Timeout));
    }
}
