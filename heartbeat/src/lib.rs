//! Advertise that a process is alive by keeping a TTL key fresh in redis.
//!
//! [`Heartbeat::start`] spawns a detached worker that publishes the liveness
//! key, then loops refreshing its TTL and blocking on a signal list for up to
//! `interval` seconds. If the process stalls or dies the key simply expires.
//! [`Heartbeat::stop`] clears the worker's `keep_going` flag and wakes it
//! through the signal list from a separate connection, so shutdown does not
//! wait out the interval. Anyone able to write to the store can push a
//! positive integer onto the signal list to have it raised as a signal in the
//! heartbeat's process.
//!
//! ```no_run
//! use heartbeat::{Heartbeat, HeartbeatConfig, StopOptions};
//!
//! # async fn example() -> Result<(), heartbeat::HeartbeatError> {
//! let config = HeartbeatConfig::new("localhost", 6379, "job:42")
//!     .with_expire(5)
//!     .with_interval(2);
//! let mut heartbeat = Heartbeat::start(config).await?;
//! // ... do the work ...
//! heartbeat.stop(StopOptions::new().wait(true)).await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod control;
mod controller;
mod error;
mod signal;
mod store;
mod worker;

pub use config::{HeartbeatConfig, DEFAULT_EXPIRE_SECS, DEFAULT_INTERVAL_SECS, DEFAULT_VALUE};
pub use control::ConnectionStatus;
pub use controller::{Heartbeat, HeartbeatBuilder, StopOptions, StopOutcome};
pub use error::HeartbeatError;
pub use signal::{parse_signal, send_signal, ProcessSignal, SignalHandler};
pub use store::cleanup;

pub use common_redis::{Connector, MockConnector, MockFailure, MockRedisCall, RedisConnector};
