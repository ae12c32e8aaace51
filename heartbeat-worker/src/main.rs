//! Keep a liveness key fresh in redis for as long as this process runs.
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use envconfig::Envconfig;
use heartbeat::{Heartbeat, StopOptions};
use heartbeat_worker::config::Config;
use heartbeat_worker::shutdown::ShutdownSignals;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LIVENESS_CHECK_EVERY: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::init_from_env().context("invalid configuration")?;

    if let Some(address) = &config.metrics_address {
        let address: SocketAddr = address
            .parse()
            .with_context(|| format!("invalid METRICS_ADDRESS '{}'", address))?;
        PrometheusBuilder::new()
            .with_http_listener(address)
            .install()
            .context("failed to install prometheus exporter")?;
        info!(%address, "serving metrics");
    }

    let mut signals = ShutdownSignals::install().context("failed to install signal handlers")?;

    let mut heartbeat = Heartbeat::start(config.heartbeat_config())
        .await
        .context("failed to start heartbeat")?;
    info!(key = heartbeat.key(), "heartbeat running");

    let mut liveness = tokio::time::interval(LIVENESS_CHECK_EVERY);
    loop {
        tokio::select! {
            signal = signals.recv() => {
                info!(signal, "received shutdown signal");
                break;
            }
            _ = liveness.tick() => {
                if !heartbeat.is_running() {
                    if heartbeat.config().is_periodic() {
                        warn!(key = heartbeat.key(), "heartbeat worker exited");
                    } else {
                        info!(key = heartbeat.key(), "liveness key published once");
                    }
                    break;
                }
            }
        }
    }

    heartbeat
        .stop(StopOptions::new().wait(true))
        .await
        .context("failed to stop heartbeat")?;
    info!("heartbeat stopped");

    Ok(())
}
