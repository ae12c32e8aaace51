use common_redis::{Connection, Connector};
use tracing::{info, warn};

use crate::config::HeartbeatConfig;
use crate::control::ConnectionStatus;
use crate::error::HeartbeatError;

/// Open a fresh connection, authenticate and select the database.
/// Each step fails with its own status.
pub(crate) async fn open(
    connector: &dyn Connector,
    config: &HeartbeatConfig,
) -> Result<Box<dyn Connection>, ConnectionStatus> {
    let mut conn = match connector.connect(&config.host, config.port).await {
        Ok(conn) => conn,
        Err(error) => {
            warn!(host = %config.host, port = config.port, %error, "redis connection failed");
            return Err(ConnectionStatus::FailConnect);
        }
    };

    if let Some(password) = &config.password {
        if let Err(error) = conn.auth(password.clone()).await {
            warn!(host = %config.host, %error, "redis authentication failed");
            return Err(ConnectionStatus::FailAuth);
        }
    }

    if config.db != 0 {
        if let Err(error) = conn.select(config.db).await {
            warn!(db = config.db, %error, "redis database selection failed");
            return Err(ConnectionStatus::FailSelect);
        }
    }

    Ok(conn)
}

/// Delete a liveness key left behind by a process that died without stopping.
pub async fn cleanup(
    connector: &dyn Connector,
    config: &HeartbeatConfig,
) -> Result<(), HeartbeatError> {
    let mut conn = open(connector, config)
        .await
        .map_err(|status| HeartbeatError::from_status(status, config))?;

    conn.del(config.key.clone()).await?;
    info!(key = %config.key, "removed liveness key");

    Ok(())
}
