use async_trait::async_trait;
use redis::{FromRedisValue, RedisError};
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

use crate::{Connection, Connector, CustomRedisError};

const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);
// Extra slack on top of a BLPOP's own timeout before the socket is declared dead.
const BLOCKING_GRACE: Duration = Duration::from_secs(5);

/// Opens one dedicated `redis` async connection per call.
#[derive(Debug, Clone)]
pub struct RedisConnector {
    connection_timeout: Duration,
    response_timeout: Duration,
}

impl RedisConnector {
    /// Create a connector with 5s connection and response timeouts.
    pub fn new() -> RedisConnector {
        RedisConnector {
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }

    /// Create a connector with explicit timeouts.
    ///
    /// # Errors
    /// Returns `CustomRedisError::InvalidConfiguration` if `Duration::ZERO` is passed for either
    /// timeout: every store round trip must be bounded.
    pub fn with_config(
        connection_timeout: Duration,
        response_timeout: Duration,
    ) -> Result<RedisConnector, CustomRedisError> {
        if connection_timeout.is_zero() {
            return Err(CustomRedisError::InvalidConfiguration(
                "Redis connection timeout cannot be Duration::ZERO".to_string(),
            ));
        }
        if response_timeout.is_zero() {
            return Err(CustomRedisError::InvalidConfiguration(
                "Redis response timeout cannot be Duration::ZERO".to_string(),
            ));
        }

        Ok(RedisConnector {
            connection_timeout,
            response_timeout,
        })
    }

    fn url(host: &str, port: u16) -> String {
        if host.contains(':') {
            format!("redis://[{}]:{}/", host, port)
        } else {
            format!("redis://{}:{}/", host, port)
        }
    }
}

impl Default for RedisConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for RedisConnector {
    async fn connect(
        &self,
        host: &str,
        port: u16,
    ) -> Result<Box<dyn Connection>, CustomRedisError> {
        let client = redis::Client::open(Self::url(host, port))?;

        let connection = timeout(self.connection_timeout, client.get_async_connection())
            .await
            .map_err(|_| CustomRedisError::Timeout)??;

        debug!(host, port, "opened redis connection");

        Ok(Box::new(RedisConnection {
            connection,
            response_timeout: self.response_timeout,
        }))
    }
}

pub struct RedisConnection {
    connection: redis::aio::Connection,
    response_timeout: Duration,
}

impl RedisConnection {
    async fn query<T>(&mut self, cmd: redis::Cmd, limit: Duration) -> Result<T, CustomRedisError>
    where
        T: FromRedisValue + Send,
    {
        let reply: Result<T, RedisError> = timeout(limit, cmd.query_async(&mut self.connection))
            .await
            .map_err(|_| CustomRedisError::Timeout)?;

        Ok(reply?)
    }
}

#[async_trait]
impl Connection for RedisConnection {
    async fn auth(&mut self, password: String) -> Result<(), CustomRedisError> {
        let mut cmd = redis::cmd("AUTH");
        cmd.arg(password);
        self.query(cmd, self.response_timeout).await
    }

    async fn select(&mut self, db: i64) -> Result<(), CustomRedisError> {
        let mut cmd = redis::cmd("SELECT");
        cmd.arg(db);
        self.query(cmd, self.response_timeout).await
    }

    async fn set_ex(&mut self, k: String, v: String, seconds: u64) -> Result<(), CustomRedisError> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(k).arg(v).arg("EX").arg(seconds);
        self.query(cmd, self.response_timeout).await
    }

    async fn expire(&mut self, k: String, seconds: u64) -> Result<bool, CustomRedisError> {
        let mut cmd = redis::cmd("EXPIRE");
        cmd.arg(k).arg(seconds);
        self.query(cmd, self.response_timeout).await
    }

    async fn del(&mut self, k: String) -> Result<(), CustomRedisError> {
        let mut cmd = redis::cmd("DEL");
        cmd.arg(k);
        self.query(cmd, self.response_timeout).await
    }

    async fn rpush(&mut self, k: String, v: String) -> Result<(), CustomRedisError> {
        let mut cmd = redis::cmd("RPUSH");
        cmd.arg(k).arg(v);
        self.query(cmd, self.response_timeout).await
    }

    async fn blpop(
        &mut self,
        k: String,
        timeout_seconds: u64,
    ) -> Result<Option<String>, CustomRedisError> {
        let mut cmd = redis::cmd("BLPOP");
        cmd.arg(k).arg(timeout_seconds);

        let limit = Duration::from_secs(timeout_seconds) + BLOCKING_GRACE;
        let popped: Option<(String, String)> = self.query(cmd, limit).await?;

        Ok(popped.map(|(_, value)| value))
    }
}
