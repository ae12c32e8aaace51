use std::fmt;
use std::time::Duration;

use crate::error::HeartbeatError;

pub const DEFAULT_VALUE: &str = "OK";
pub const DEFAULT_EXPIRE_SECS: u64 = 30;
pub const DEFAULT_INTERVAL_SECS: u64 = 10;
const SIGNAL_KEY_SUFFIX: &str = ":signal";

/// Where and how to advertise liveness. Built once by the caller and then
/// shared read-only between the controller and its worker.
#[derive(Clone, PartialEq, Eq)]
pub struct HeartbeatConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    /// Logical database; 0 is the server default and is never selected explicitly.
    pub db: i64,
    /// The liveness key.
    pub key: String,
    pub value: String,
    /// List popped by the worker; pushes wake it and may carry a signal number.
    pub key_signal: String,
    /// TTL of the liveness key, in seconds.
    pub expire: u64,
    /// Maximum wait between refreshes, in seconds. Zero publishes once and exits.
    pub interval: u64,
    pub start_timeout: Option<Duration>,
    pub stop_timeout: Option<Duration>,
}

impl HeartbeatConfig {
    pub fn new(host: &str, port: u16, key: &str) -> Self {
        Self {
            host: host.to_owned(),
            port,
            password: None,
            db: 0,
            key: key.to_owned(),
            value: DEFAULT_VALUE.to_owned(),
            key_signal: format!("{}{}", key, SIGNAL_KEY_SUFFIX),
            expire: DEFAULT_EXPIRE_SECS,
            interval: DEFAULT_INTERVAL_SECS,
            start_timeout: None,
            stop_timeout: None,
        }
    }

    pub fn with_password(mut self, password: &str) -> Self {
        self.password = Some(password.to_owned());
        self
    }

    pub fn with_db(mut self, db: i64) -> Self {
        self.db = db;
        self
    }

    pub fn with_value(mut self, value: &str) -> Self {
        self.value = value.to_owned();
        self
    }

    pub fn with_signal_key(mut self, key_signal: &str) -> Self {
        self.key_signal = key_signal.to_owned();
        self
    }

    pub fn with_expire(mut self, expire: u64) -> Self {
        self.expire = expire;
        self
    }

    pub fn with_interval(mut self, interval: u64) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = Some(timeout);
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = Some(timeout);
        self
    }

    /// Whether the worker keeps refreshing after the first publish.
    pub fn is_periodic(&self) -> bool {
        self.interval > 0
    }

    /// Bound on how long start waits for the first publish; defaults to the TTL.
    pub fn start_timeout(&self) -> Duration {
        self.start_timeout
            .unwrap_or(Duration::from_secs(self.expire))
    }

    /// Bound on how long a waiting stop blocks; defaults to the TTL.
    pub fn stop_timeout(&self) -> Duration {
        self.stop_timeout.unwrap_or(Duration::from_secs(self.expire))
    }

    pub fn validate(&self) -> Result<(), HeartbeatError> {
        let invalid = |reason: &str| Err(HeartbeatError::InvalidConfiguration(reason.to_owned()));

        if self.host.is_empty() {
            return invalid("host must not be empty");
        }
        if self.key.is_empty() {
            return invalid("key must not be empty");
        }
        if self.key_signal.is_empty() {
            return invalid("signal key must not be empty");
        }
        if self.key == self.key_signal {
            return invalid("key and signal key must differ");
        }
        if self.expire == 0 {
            return invalid("expire must be greater than zero");
        }
        if self.is_periodic() && self.interval >= self.expire {
            return invalid("interval must be shorter than expire");
        }
        if self.db < 0 {
            return invalid("db must not be negative");
        }
        Ok(())
    }
}

impl fmt::Debug for HeartbeatConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeartbeatConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("db", &self.db)
            .field("key", &self.key)
            .field("value", &self.value)
            .field("key_signal", &self.key_signal)
            .field("expire", &self.expire)
            .field("interval", &self.interval)
            .field("start_timeout", &self.start_timeout)
            .field("stop_timeout", &self.stop_timeout)
            .finish()
    }
}
