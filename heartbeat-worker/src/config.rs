use std::collections::HashMap;
use std::str::FromStr;
use std::time;

use envconfig::Envconfig;
use heartbeat::HeartbeatConfig;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "REDIS_HOST", default = "localhost")]
    pub redis_host: NonEmptyString,

    #[envconfig(from = "REDIS_PORT", default = "6379")]
    pub redis_port: u16,

    #[envconfig(from = "REDIS_PASSWORD")]
    pub redis_password: Option<String>,

    #[envconfig(from = "REDIS_DB", default = "0")]
    pub redis_db: i64,

    #[envconfig(from = "HEARTBEAT_KEY")]
    pub key: NonEmptyString,

    #[envconfig(from = "HEARTBEAT_VALUE", default = "OK")]
    pub value: String,

    #[envconfig(from = "HEARTBEAT_SIGNAL_KEY")]
    pub signal_key: Option<NonEmptyString>,

    /// Seconds.
    #[envconfig(from = "HEARTBEAT_EXPIRE", default = "30")]
    pub expire: u64,

    /// Seconds; 0 publishes the key once and exits.
    #[envconfig(from = "HEARTBEAT_INTERVAL", default = "10")]
    pub interval: u64,

    #[envconfig(from = "HEARTBEAT_START_TIMEOUT")]
    pub start_timeout: Option<EnvMsDuration>,

    #[envconfig(from = "HEARTBEAT_STOP_TIMEOUT")]
    pub stop_timeout: Option<EnvMsDuration>,

    /// Serve prometheus metrics on this address when set, e.g. `0.0.0.0:9102`.
    #[envconfig(from = "METRICS_ADDRESS")]
    pub metrics_address: Option<String>,
}

impl Config {
    pub fn heartbeat_config(&self) -> HeartbeatConfig {
        let mut config =
            HeartbeatConfig::new(self.redis_host.as_str(), self.redis_port, self.key.as_str())
                .with_db(self.redis_db)
                .with_value(&self.value)
                .with_expire(self.expire)
                .with_interval(self.interval);

        if let Some(password) = self.redis_password.as_deref().filter(|p| !p.is_empty()) {
            config = config.with_password(password);
        }
        if let Some(signal_key) = &self.signal_key {
            config = config.with_signal_key(signal_key.as_str());
        }
        if let Some(timeout) = self.start_timeout {
            config = config.with_start_timeout(timeout.0);
        }
        if let Some(timeout) = self.stop_timeout {
            config = config.with_stop_timeout(timeout.0);
        }

        config
    }

    pub fn init_with_defaults(key: &str) -> Result<Self, envconfig::Error> {
        let mut env = HashMap::new();
        env.insert("HEARTBEAT_KEY".to_string(), key.to_string());
        Config::init_from_hashmap(&env)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

#[derive(Debug, Clone)]
pub struct NonEmptyString(pub String);

impl NonEmptyString {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct StringIsEmptyError;

impl FromStr for NonEmptyString {
    type Err = StringIsEmptyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            Err(StringIsEmptyError)
        } else {
            Ok(NonEmptyString(s.to_owned()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_defaults() {
        let config = Config::init_with_defaults("worker:1").unwrap();
        let heartbeat = config.heartbeat_config();

        assert_eq!(heartbeat.host, "localhost");
        assert_eq!(heartbeat.port, 6379);
        assert_eq!(heartbeat.key, "worker:1");
        assert_eq!(heartbeat.key_signal, "worker:1:signal");
        assert_eq!(heartbeat.expire, 30);
        assert_eq!(heartbeat.interval, 10);
        assert_eq!(heartbeat.password, None);
        assert_eq!(heartbeat.start_timeout(), Duration::from_secs(30));
        assert!(config.metrics_address.is_none());
        assert!(heartbeat.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<String, String> = [
            ("REDIS_HOST", "redis.internal"),
            ("REDIS_PORT", "6380"),
            ("REDIS_PASSWORD", "secret"),
            ("REDIS_DB", "2"),
            ("HEARTBEAT_KEY", "worker:1"),
            ("HEARTBEAT_SIGNAL_KEY", "worker:1:control"),
            ("HEARTBEAT_EXPIRE", "5"),
            ("HEARTBEAT_INTERVAL", "2"),
            ("HEARTBEAT_STOP_TIMEOUT", "1500"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let heartbeat = Config::init_from_hashmap(&env).unwrap().heartbeat_config();

        assert_eq!(heartbeat.host, "redis.internal");
        assert_eq!(heartbeat.port, 6380);
        assert_eq!(heartbeat.password.as_deref(), Some("secret"));
        assert_eq!(heartbeat.db, 2);
        assert_eq!(heartbeat.key_signal, "worker:1:control");
        assert_eq!(heartbeat.stop_timeout(), Duration::from_millis(1500));
        assert_eq!(heartbeat.start_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_key_is_required() {
        assert!(Config::init_from_hashmap(&HashMap::new()).is_err());
        assert!(Config::init_with_defaults("").is_err());
    }
}
