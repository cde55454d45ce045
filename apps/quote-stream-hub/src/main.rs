//! Quote Stream Hub Binary
//!
//! Starts the real-time quote hub with its health endpoint.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin quote-stream-hub
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `QUOTE_HUB_STREAM_URL`: STOMP WebSocket endpoint (`ws://` or `wss://`)
//!
//! ## Optional
//! - `QUOTE_HUB_ACCESS_TOKEN`: bearer token for the STOMP `CONNECT` frame
//! - `QUOTE_HUB_SEED_INSTRUMENTS`: comma-separated instruments subscribed at start
//! - `QUOTE_HUB_HEALTH_PORT`: health check HTTP port (default: 8082)
//! - `OTEL_ENABLED`: export spans over OTLP (default: false)
//! - `RUST_LOG`: log filter (default: `quote_stream_hub=info`)
//!
//! See `HubConfig::from_env` for the complete list.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use quote_stream_hub::application::ports::StaticInstrumentDirectory;
use quote_stream_hub::infrastructure::health::{HealthServer, HealthServerState};
use quote_stream_hub::infrastructure::stream::WebSocketTransport;
use quote_stream_hub::infrastructure::telemetry;
use quote_stream_hub::{HubConfig, QuoteHub, init_metrics};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Time allowed for the health server to drain after shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        anyhow::bail!("failed to install rustls crypto provider");
    }

    load_dotenv();

    let telemetry_guard = telemetry::init().context("failed to initialize telemetry")?;

    tracing::info!(
        otlp = telemetry_guard.is_exporting(),
        "Starting Quote Stream Hub"
    );

    let _metrics_handle = init_metrics().context("failed to install metrics recorder")?;

    let config = HubConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let directory = StaticInstrumentDirectory::new(config.seed_instruments.clone());
    let health_port = config.server.health_port;
    let hub = Arc::new(QuoteHub::new(config, Arc::new(WebSocketTransport)));

    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&hub),
    ));
    let health_server = HealthServer::new(health_port, health_state, shutdown_token.clone());
    let health_task = tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    let seeded = hub.start(&directory).await;
    tracing::info!(seeded, "Quote hub ready");

    await_shutdown(shutdown_token).await;

    hub.shutdown();
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, health_task).await.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Health server did not stop in time"
        );
    }

    tracing::info!("Shutdown complete");
    drop(telemetry_guard);
    Ok(())
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &HubConfig) {
    tracing::info!(
        stream_url = %config.stream.url,
        authenticated = config.stream.access_token.is_some(),
        health_port = config.server.health_port,
        seed_instruments = config.seed_instruments.len(),
        "Configuration loaded"
    );
    tracing::debug!(
        all_instruments = %config.topics.all_instruments,
        featured_challenge = %config.topics.featured_challenge,
        hot = config.tiers.hot_capacity,
        warm = config.tiers.warm_capacity,
        cold = config.tiers.cold_capacity,
        "Topics and tiers"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
}
