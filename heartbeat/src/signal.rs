//! The remote signal channel: values pushed onto the signal key wake the
//! worker, and positive integers are delivered as signals to this process.

use common_redis::Connector;
use tracing::{info, warn};

use crate::config::HeartbeatConfig;
use crate::error::HeartbeatError;
use crate::store;

/// Value pushed by stop: wakes the worker without delivering anything.
pub(crate) const WAKE_SENTINEL: &str = "0";

/// Receives signal numbers popped from the signal key.
pub trait SignalHandler: Send + Sync {
    fn deliver(&self, signal: i32);
}

impl<F> SignalHandler for F
where
    F: Fn(i32) + Send + Sync,
{
    fn deliver(&self, signal: i32) {
        self(signal)
    }
}

/// Raises the signal in the current process. A no-op where process signals
/// do not exist.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessSignal;

#[cfg(unix)]
impl SignalHandler for ProcessSignal {
    fn deliver(&self, signal: i32) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let signal = match Signal::try_from(signal) {
            Ok(signal) => signal,
            Err(error) => {
                warn!(signal, %error, "ignoring unknown signal number");
                return;
            }
        };
        info!(%signal, "raising signal received through heartbeat");
        if let Err(error) = kill(Pid::this(), signal) {
            warn!(%signal, %error, "failed to raise signal");
        }
    }
}

#[cfg(not(unix))]
impl SignalHandler for ProcessSignal {
    fn deliver(&self, signal: i32) {
        warn!(signal, "process signals are not supported on this platform");
    }
}

/// Interpret a popped value by its leading integer, so `"15 term"` is 15.
/// A value without one, or one out of range, means "no signal".
pub fn parse_signal(value: &str) -> i32 {
    let value = value.trim_start();
    let unsigned = value.strip_prefix(&['+', '-'][..]).unwrap_or(value);
    let digits = unsigned
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(unsigned.len());
    let sign = value.len() - unsigned.len();

    value[..sign + digits].parse().unwrap_or(0)
}

/// Push a signal number onto a heartbeat's signal key, waking its worker.
/// Zero only wakes it; a positive number is raised in the heartbeat's process.
pub async fn send_signal(
    connector: &dyn Connector,
    config: &HeartbeatConfig,
    signal: i32,
) -> Result<(), HeartbeatError> {
    let mut conn = store::open(connector, config)
        .await
        .map_err(|status| HeartbeatError::from_status(status, config))?;

    conn.rpush(config.key_signal.clone(), signal.to_string())
        .await?;
    info!(key_signal = %config.key_signal, signal, "sent heartbeat signal");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use common_redis::{MockConnector, MockFailure};
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_parse_signal() {
        assert_eq!(parse_signal("15"), 15);
        assert_eq!(parse_signal(" 2\n"), 2);
        assert_eq!(parse_signal(WAKE_SENTINEL), 0);
        assert_eq!(parse_signal("-9"), -9);
        assert_eq!(parse_signal("stop"), 0);
        assert_eq!(parse_signal(""), 0);
        assert_eq!(parse_signal("12abc"), 12);
        assert_eq!(parse_signal("15 extra"), 15);
        assert_eq!(parse_signal("+3"), 3);
        assert_eq!(parse_signal("-"), 0);
        assert_eq!(parse_signal("99999999999"), 0);
    }

    #[test]
    fn test_closures_are_handlers() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handler = {
            let seen = seen.clone();
            move |signal: i32| seen.lock().unwrap().push(signal)
        };

        handler.deliver(10);
        handler.deliver(12);

        assert_eq!(*seen.lock().unwrap(), vec![10, 12]);
    }

    #[cfg(unix)]
    #[test]
    fn test_process_signal_ignores_unknown_numbers() {
        ProcessSignal.deliver(9999);
    }

    #[tokio::test]
    async fn test_send_signal_pushes_onto_signal_key() {
        let connector = MockConnector::new();
        let config = HeartbeatConfig::new("localhost", 6379, "job:7");

        send_signal(&connector, &config, 15).await.unwrap();

        assert_eq!(connector.list("job:7:signal"), vec!["15".to_string()]);
    }

    #[tokio::test]
    async fn test_send_signal_uses_configured_database() {
        let connector = MockConnector::new();
        let config = HeartbeatConfig::new("localhost", 6379, "job:7").with_db(5);

        send_signal(&connector, &config, 1).await.unwrap();

        assert!(connector.list("job:7:signal").is_empty());
        assert_eq!(connector.list_in(5, "job:7:signal"), vec!["1".to_string()]);
    }

    #[tokio::test]
    async fn test_send_signal_reports_push_failure() {
        let connector = MockConnector::new().fail(MockFailure::Rpush);
        let config = HeartbeatConfig::new("localhost", 6379, "job:7");

        let result = send_signal(&connector, &config, 15).await;

        assert!(matches!(result, Err(HeartbeatError::Redis(_))));
    }
}
