use std::time::Duration;

use common_redis::CustomRedisError;
use thiserror::Error;

use crate::config::HeartbeatConfig;
use crate::control::ConnectionStatus;

/// Enumeration of errors surfaced by starting, stopping and signalling heartbeats.
#[derive(Error, Debug)]
pub enum HeartbeatError {
    #[error("invalid heartbeat configuration: {0}")]
    InvalidConfiguration(String),
    #[error("failed to connect to redis at {host}:{port}")]
    Connect { host: String, port: u16 },
    #[error("failed to authenticate with redis")]
    Auth,
    #[error("failed to select redis database {0}")]
    Select(i64),
    #[error("failed to publish liveness key '{0}'")]
    Set(String),
    #[error("heartbeat did not start within {0:?}, worker orphaned")]
    StartTimeout(Duration),
    #[error("heartbeat did not confirm shutdown within {0:?}")]
    StopTimeout(Duration),
    #[error("heartbeat already stopped")]
    AlreadyStopped,
    #[error(transparent)]
    Redis(#[from] CustomRedisError),
}

impl HeartbeatError {
    /// Map a failed startup status to the error reported by start.
    pub(crate) fn from_status(status: ConnectionStatus, config: &HeartbeatConfig) -> Self {
        match status {
            ConnectionStatus::FailConnect => HeartbeatError::Connect {
                host: config.host.clone(),
                port: config.port,
            },
            ConnectionStatus::FailAuth => HeartbeatError::Auth,
            ConnectionStatus::FailSelect => HeartbeatError::Select(config.db),
            ConnectionStatus::FailSet => HeartbeatError::Set(config.key.clone()),
            ConnectionStatus::FailOrphan | ConnectionStatus::Unset | ConnectionStatus::Ok => {
                HeartbeatError::StartTimeout(config.start_timeout())
            }
        }
    }

    /// The startup status this error corresponds to, if any.
    pub fn status(&self) -> Option<ConnectionStatus> {
        match self {
            HeartbeatError::Connect { .. } => Some(ConnectionStatus::FailConnect),
            HeartbeatError::Auth => Some(ConnectionStatus::FailAuth),
            HeartbeatError::Select(_) => Some(ConnectionStatus::FailSelect),
            HeartbeatError::Set(_) => Some(ConnectionStatus::FailSet),
            HeartbeatError::StartTimeout(_) => Some(ConnectionStatus::FailOrphan),
            _ => None,
        }
    }
}
