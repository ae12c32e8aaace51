use std::sync::Arc;
use std::time::Duration;

use common_redis::{Connector, RedisConnector};
use tracing::{debug, info, warn};

use crate::config::HeartbeatConfig;
use crate::control::{ConnectionStatus, ControlBlock, Side};
use crate::error::HeartbeatError;
use crate::signal::{ProcessSignal, SignalHandler, WAKE_SENTINEL};
use crate::store;
use crate::worker::Worker;

/// Granularity of the start and stop polling loops.
const POLL_EVERY: Duration = Duration::from_millis(10);

/// Options for [`Heartbeat::stop`].
#[derive(Clone, Debug, Default)]
pub struct StopOptions {
    /// Block until the worker confirms it deleted the key and disconnected.
    pub wait: bool,
    /// Bound on the wait; defaults to the config's stop timeout.
    pub timeout: Option<Duration>,
    /// Fail with [`HeartbeatError::AlreadyStopped`] instead of reporting
    /// [`StopOutcome::Absent`] when the handle was already released.
    pub closed_error: bool,
}

impl StopOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wait(mut self, wait: bool) -> Self {
        self.wait = wait;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn closed_error(mut self, closed_error: bool) -> Self {
        self.closed_error = closed_error;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The worker deleted the key and disconnected before stop returned.
    Stopped,
    /// Shutdown was requested; the orphaned worker finishes on its own.
    Requested,
    /// The handle had already been stopped.
    Absent,
}

/// Builder for a [`Heartbeat`], for callers that need a non-default store
/// connector or signal handler.
pub struct HeartbeatBuilder {
    config: HeartbeatConfig,
    connector: Arc<dyn Connector>,
    signals: Arc<dyn SignalHandler>,
}

impl HeartbeatBuilder {
    pub fn with_connector<C>(mut self, connector: C) -> Self
    where
        C: Connector + 'static,
    {
        self.connector = Arc::new(connector);
        self
    }

    /// Replace process signal delivery, e.g. with a callback on platforms
    /// without signals.
    pub fn with_signal_handler<S>(mut self, signals: S) -> Self
    where
        S: SignalHandler + 'static,
    {
        self.signals = Arc::new(signals);
        self
    }

    /// Spawn the worker and wait until it is publishing, it fails, or the
    /// start timeout elapses.
    pub async fn start(self) -> Result<Heartbeat, HeartbeatError> {
        self.config.validate()?;

        let config = Arc::new(self.config);
        let control = Arc::new(ControlBlock::new());
        let worker = Worker::new(
            config.clone(),
            control.clone(),
            self.connector.clone(),
            self.signals,
        );
        drop(tokio::spawn(worker.run()));

        let timeout = config.start_timeout();
        for _ in 0..poll_attempts(timeout) {
            if control.is_started() {
                debug!(key = %config.key, "heartbeat worker reported started");
                return Ok(Heartbeat {
                    control: Some(control),
                    config,
                    connector: self.connector,
                });
            }
            if !control.keep_going() {
                let status = control.status();
                control.release(Side::Controller);
                return Err(HeartbeatError::from_status(status, &config));
            }
            tokio::time::sleep(POLL_EVERY).await;
        }

        // Still connecting: leave it to clean up after itself.
        warn!(key = %config.key, ?timeout, "heartbeat did not start in time, orphaning worker");
        control.set_status(ConnectionStatus::FailOrphan);
        if control.orphan() {
            control.release(Side::Controller);
        }
        control.request_stop();
        // The worker may have failed on its own just as the wait ran out.
        Err(HeartbeatError::from_status(control.status(), &config))
    }
}

/// Handle to a running heartbeat.
///
/// Dropping a live handle is equivalent to `stop(wait = false)`: the worker
/// is told to stop, woken if a tokio runtime is available, and releases the
/// control block itself.
pub struct Heartbeat {
    control: Option<Arc<ControlBlock>>,
    config: Arc<HeartbeatConfig>,
    connector: Arc<dyn Connector>,
}

impl Heartbeat {
    pub fn builder(config: HeartbeatConfig) -> HeartbeatBuilder {
        HeartbeatBuilder {
            config,
            connector: Arc::new(RedisConnector::new()),
            signals: Arc::new(ProcessSignal),
        }
    }

    /// Start a heartbeat against redis, raising received signals in this process.
    pub async fn start(config: HeartbeatConfig) -> Result<Heartbeat, HeartbeatError> {
        Self::builder(config).start().await
    }

    /// The liveness key being advertised.
    pub fn key(&self) -> &str {
        &self.config.key
    }

    pub fn config(&self) -> &HeartbeatConfig {
        &self.config
    }

    /// True until the handle is stopped or the worker exits on its own.
    pub fn is_running(&self) -> bool {
        self.control
            .as_ref()
            .is_some_and(|control| control.is_started() && !control.is_exited())
    }

    /// Startup status, or `None` once the handle has been released.
    pub fn status(&self) -> Option<ConnectionStatus> {
        self.control.as_ref().map(|control| control.status())
    }

    /// Request shutdown and optionally wait for it. Stopping twice is a no-op
    /// that reports [`StopOutcome::Absent`] and touches no store.
    pub async fn stop(&mut self, options: StopOptions) -> Result<StopOutcome, HeartbeatError> {
        let Some(control) = self.control.take() else {
            return if options.closed_error {
                Err(HeartbeatError::AlreadyStopped)
            } else {
                Ok(StopOutcome::Absent)
            };
        };

        if !options.wait && control.orphan() {
            control.release(Side::Controller);
        }
        control.request_stop();

        if !control.is_exited() {
            wake(self.connector.as_ref(), &self.config).await;
        }

        if !options.wait {
            info!(key = %self.config.key, "heartbeat stop requested");
            return Ok(StopOutcome::Requested);
        }

        let timeout = options
            .timeout
            .unwrap_or_else(|| self.config.stop_timeout());
        for _ in 0..poll_attempts(timeout) {
            if control.is_stopped() {
                control.release(Side::Controller);
                info!(key = %self.config.key, "heartbeat stop confirmed");
                return Ok(StopOutcome::Stopped);
            }
            tokio::time::sleep(POLL_EVERY).await;
        }

        // Nobody will wait any longer, so the worker takes over the release.
        warn!(key = %self.config.key, ?timeout, "heartbeat stop not confirmed in time");
        if control.orphan() {
            control.release(Side::Controller);
        }
        Err(HeartbeatError::StopTimeout(timeout))
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        let Some(control) = self.control.take() else {
            return;
        };

        if control.orphan() {
            control.release(Side::Controller);
        }
        control.request_stop();
        if control.is_exited() {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let connector = self.connector.clone();
                let config = self.config.clone();
                drop(runtime.spawn(async move { wake(connector.as_ref(), &config).await }));
            }
            Err(_) => {
                debug!(key = %self.config.key, "no runtime to wake the heartbeat worker, it stops after its current wait");
            }
        }
    }
}

/// Number of polls that covers `timeout` at [`POLL_EVERY`], plus the initial check.
fn poll_attempts(timeout: Duration) -> u128 {
    timeout.as_millis() / POLL_EVERY.as_millis() + 1
}

/// Push the wake sentinel on a connection of our own: the worker's may be
/// blocked in BLPOP. Best effort, the worker also notices on its next timeout.
async fn wake(connector: &dyn Connector, config: &HeartbeatConfig) {
    let mut conn = match store::open(connector, config).await {
        Ok(conn) => conn,
        Err(status) => {
            warn!(key_signal = %config.key_signal, ?status, "could not connect to wake heartbeat worker");
            return;
        }
    };

    if let Err(error) = conn
        .rpush(config.key_signal.clone(), WAKE_SENTINEL.to_owned())
        .await
    {
        warn!(key_signal = %config.key_signal, %error, "failed to wake heartbeat worker");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common_redis::{MockConnector, MockFailure};

    fn config() -> HeartbeatConfig {
        HeartbeatConfig::new("localhost", 6379, "job:42")
            .with_expire(5)
            .with_interval(2)
    }

    async fn start(connector: &MockConnector, config: HeartbeatConfig) -> Heartbeat {
        Heartbeat::builder(config)
            .with_connector(connector.clone())
            .with_signal_handler(|_: i32| {})
            .start()
            .await
            .unwrap()
    }

    #[test]
    fn test_poll_attempts_cover_the_timeout() {
        assert_eq!(poll_attempts(Duration::from_secs(5)), 501);
        assert_eq!(poll_attempts(Duration::from_millis(15)), 2);
        assert_eq!(poll_attempts(Duration::ZERO), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waited_stop_releases_on_controller_side() {
        let connector = MockConnector::new();
        let mut heartbeat = start(&connector, config()).await;
        let control = heartbeat.control.clone().unwrap();

        let outcome = heartbeat.stop(StopOptions::new().wait(true)).await.unwrap();

        assert_eq!(outcome, StopOutcome::Stopped);
        assert!(control.is_released());
        assert!(!control.is_orphaned());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unwaited_stop_hands_release_to_worker() {
        let connector = MockConnector::new();
        let mut heartbeat = start(&connector, config()).await;
        let control = heartbeat.control.clone().unwrap();

        let outcome = heartbeat.stop(StopOptions::new()).await.unwrap();
        assert_eq!(outcome, StopOutcome::Requested);
        assert!(control.is_orphaned());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(control.is_exited());
        assert!(control.is_released());
        assert!(!control.release(Side::Controller));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_wait_grants_ownership_to_worker() {
        let connector = MockConnector::new();
        let mut heartbeat = start(&connector, config()).await;
        let control = heartbeat.control.clone().unwrap();
        // The wake-up push is lost, so the worker sleeps out its interval.
        connector.fail(MockFailure::Rpush);

        let result = heartbeat
            .stop(
                StopOptions::new()
                    .wait(true)
                    .with_timeout(Duration::from_millis(500)),
            )
            .await;

        assert!(matches!(result, Err(HeartbeatError::StopTimeout(_))));
        assert!(control.is_orphaned());
        assert!(!control.is_released());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(control.is_stopped());
        assert!(control.is_released());
        assert_eq!(connector.get("job:42"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_failure_reports_status() {
        let connector = MockConnector::new().fail(MockFailure::SetEx);

        let result = Heartbeat::builder(config())
            .with_connector(connector.clone())
            .start()
            .await;

        assert!(matches!(result, Err(HeartbeatError::Set(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_after_worker_exit_skips_wake() {
        let connector = MockConnector::new();
        let mut heartbeat = start(&connector, config().with_interval(0)).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!heartbeat.is_running());

        let outcome = heartbeat.stop(StopOptions::new().wait(true)).await.unwrap();

        assert_eq!(outcome, StopOutcome::Stopped);
        assert!(connector.list("job:42:signal").is_empty());
    }
}
