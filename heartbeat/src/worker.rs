use std::sync::Arc;
use std::time::Duration;

use common_redis::{Connection, Connector};
use tracing::{debug, info, warn};

use crate::config::HeartbeatConfig;
use crate::control::{ConnectionStatus, ControlBlock, Side};
use crate::signal::{parse_signal, SignalHandler};
use crate::store;

enum State {
    Connecting,
    Publishing(Box<dyn Connection>),
    Looping(Box<dyn Connection>),
    Draining(Box<dyn Connection>),
    Terminated,
}

/// The background half of a heartbeat. Owns its connection exclusively and
/// talks to the controller only through the control block.
pub(crate) struct Worker {
    config: Arc<HeartbeatConfig>,
    control: Arc<ControlBlock>,
    connector: Arc<dyn Connector>,
    signals: Arc<dyn SignalHandler>,
}

impl Worker {
    pub(crate) fn new(
        config: Arc<HeartbeatConfig>,
        control: Arc<ControlBlock>,
        connector: Arc<dyn Connector>,
        signals: Arc<dyn SignalHandler>,
    ) -> Self {
        Self {
            config,
            control,
            connector,
            signals,
        }
    }

    /// Run connect, publish, loop and drain to completion.
    pub(crate) async fn run(self) {
        let mut state = State::Connecting;

        loop {
            state = match state {
                State::Connecting => {
                    match store::open(self.connector.as_ref(), &self.config).await {
                        Ok(conn) => State::Publishing(conn),
                        Err(status) => self.abort(status),
                    }
                }
                State::Publishing(_) if !self.control.keep_going() => {
                    // The controller gave up waiting while we were connecting.
                    self.abort(ConnectionStatus::FailOrphan)
                }
                State::Publishing(mut conn) => match self.publish(conn.as_mut()).await {
                    Ok(()) => {
                        self.control.mark_started();
                        info!(key = %self.config.key, expire = self.config.expire, "heartbeat started");
                        if self.config.is_periodic() {
                            State::Looping(conn)
                        } else {
                            // One-shot: the key lives out its TTL.
                            drop(conn);
                            self.control.mark_stopped();
                            State::Terminated
                        }
                    }
                    Err(status) => self.abort(status),
                },
                State::Looping(mut conn) => {
                    self.beat(conn.as_mut()).await;
                    State::Draining(conn)
                }
                State::Draining(mut conn) => {
                    self.drain(conn.as_mut()).await;
                    drop(conn);
                    self.control.mark_stopped();
                    info!(key = %self.config.key, "heartbeat stopped");
                    State::Terminated
                }
                State::Terminated => break,
            };
        }

        if self.control.exit() && self.control.release(Side::Worker) {
            debug!(key = %self.config.key, "orphaned worker released its control block");
        }
    }

    fn abort(&self, status: ConnectionStatus) -> State {
        warn!(key = %self.config.key, ?status, "heartbeat failed to start");
        metrics::counter!("heartbeat_worker_exits_total", "reason" => "startup_failure")
            .increment(1);
        self.control.fail(status);
        State::Terminated
    }

    async fn publish(&self, conn: &mut dyn Connection) -> Result<(), ConnectionStatus> {
        conn.set_ex(
            self.config.key.clone(),
            self.config.value.clone(),
            self.config.expire,
        )
        .await
        .map_err(|error| {
            warn!(key = %self.config.key, %error, "failed to publish liveness key");
            ConnectionStatus::FailSet
        })
    }

    /// Refresh then block on the signal key, until asked to stop or the
    /// connection breaks.
    async fn beat(&self, conn: &mut dyn Connection) {
        while self.control.keep_going() {
            self.refresh(conn).await;

            match conn
                .blpop(self.config.key_signal.clone(), self.config.interval)
                .await
            {
                Ok(None) => {}
                Ok(Some(value)) => self.dispatch(&value),
                Err(error) if error.is_connection_failure() => {
                    warn!(key = %self.config.key, %error, "heartbeat connection lost");
                    metrics::counter!("heartbeat_worker_exits_total", "reason" => "connection_lost")
                        .increment(1);
                    return;
                }
                Err(error) => {
                    // The connection is still usable; wait out the interval
                    // rather than spinning on the error.
                    warn!(key_signal = %self.config.key_signal, %error, "failed to poll signal key");
                    tokio::time::sleep(Duration::from_secs(self.config.interval)).await;
                }
            }
        }

        metrics::counter!("heartbeat_worker_exits_total", "reason" => "stop_requested").increment(1);
    }

    /// Best effort: a missed refresh is retried on the next cycle.
    async fn refresh(&self, conn: &mut dyn Connection) {
        match conn
            .expire(self.config.key.clone(), self.config.expire)
            .await
        {
            Ok(true) => {
                debug!(key = %self.config.key, "refreshed liveness key");
                metrics::counter!("heartbeat_refresh_total", "outcome" => "ok").increment(1);
            }
            Ok(false) => {
                warn!(key = %self.config.key, "liveness key missing during refresh");
                metrics::counter!("heartbeat_refresh_total", "outcome" => "missing").increment(1);
            }
            Err(error) => {
                warn!(key = %self.config.key, %error, "failed to refresh liveness key");
                metrics::counter!("heartbeat_refresh_total", "outcome" => "error").increment(1);
            }
        }
    }

    fn dispatch(&self, value: &str) {
        let signal = parse_signal(value);
        if signal > 0 {
            info!(key = %self.config.key, signal, "received signal through heartbeat");
            metrics::counter!("heartbeat_signals_received_total").increment(1);
            self.signals.deliver(signal);
        } else {
            debug!(key = %self.config.key, value, "heartbeat woken without a signal");
        }
    }

    /// Best effort: the key expires on its own if the delete is lost.
    async fn drain(&self, conn: &mut dyn Connection) {
        if let Err(error) = conn.del(self.config.key.clone()).await {
            warn!(key = %self.config.key, %error, "failed to delete liveness key");
        }
    }
}
