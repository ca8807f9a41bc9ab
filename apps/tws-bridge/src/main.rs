//! TWS Bridge Binary
//!
//! Starts the gateway session, its supervisor and the HTTP server.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin tws-bridge
//! ```
//!
//! # Environment Variables
//!
//! ## Gateway
//! - `GATEWAY_HOST`: Gateway host (default: localhost)
//! - `GATEWAY_PORT`: Gateway port (default: 4002)
//! - `GATEWAY_CLIENT_ID`: Client id (default: 0)
//! - `GATEWAY_BRIDGE_URL`: Explicit sidecar WebSocket URL
//! - `GATEWAY_AUTO_CONNECT`: Connect at startup (default: true)
//!
//! ## Bridge
//! - `BRIDGE_HTTP_PORT`: Health, metrics and listener port (default: 8080)
//! - `BRIDGE_AUTO_RECONNECT`: Supervise and reconnect (default: true)
//! - `BRIDGE_REQUEST_TIMEOUT_SECS`: Correlated request timeout (default: 30)
//! - `BRIDGE_LISTENER_BUFFER`: Per-listener buffer (default: 1024)
//!
//! ## Telemetry
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tws_bridge::application::ports::{BroadcastPort, GatewayTransport};
use tws_bridge::infrastructure::gateway::ReconnectConfig;
use tws_bridge::infrastructure::telemetry;
use tws_bridge::{
    BridgeConfig, BroadcastConfig, BroadcastHub, GatewaySession, HttpServer, HttpServerState,
    SessionSupervisor, WebSocketTransport, WebSocketTransportConfig, init_metrics,
};

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting TWS bridge");

    let _metrics_handle = init_metrics();

    let config = BridgeConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let broadcast_hub = Arc::new(BroadcastHub::new(BroadcastConfig::from(config.broadcast)));
    let transport: Arc<dyn GatewayTransport> =
        Arc::new(WebSocketTransport::new(WebSocketTransportConfig {
            bridge_url: config.gateway.bridge_url.clone(),
            event_buffer: config.session.event_buffer,
        }));
    let session = Arc::new(GatewaySession::new(
        transport,
        Arc::clone(&broadcast_hub) as Arc<dyn BroadcastPort>,
        config.session.clone().into(),
    ));

    // HTTP server
    let http_state = Arc::new(HttpServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&session),
        config.broadcast.listener_buffer,
    ));
    let http_server = HttpServer::new(config.server.http_port, http_state, shutdown_token.clone());
    let http_handle = tokio::spawn(async move {
        if let Err(e) = http_server.run().await {
            tracing::error!(error = %e, "HTTP server error");
        }
    });

    // Gateway session
    let endpoint = config.gateway.endpoint();
    let supervisor_handle = if config.reconnect.enabled {
        let supervisor = SessionSupervisor::new(
            Arc::clone(&session),
            ReconnectConfig::from(&config.reconnect),
            config.reconnect.health_check_interval,
        )
        .with_initial_connect(config.gateway.auto_connect);
        let cancel = shutdown_token.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = supervisor.run(endpoint, cancel).await {
                tracing::error!(error = %e, "Session supervisor gave up");
            }
        }))
    } else {
        if config.gateway.auto_connect {
            match session.connect(endpoint.clone()).await {
                Ok(true) => {}
                Ok(false) => tracing::warn!(%endpoint, "Initial gateway connect failed"),
                Err(e) => tracing::warn!(%endpoint, error = %e, "Initial gateway connect rejected"),
            }
        }
        None
    };

    tracing::info!("TWS bridge ready");

    await_shutdown(shutdown_token).await;

    session.disconnect();
    let drain = async {
        if let Some(handle) = supervisor_handle {
            let _ = handle.await;
        }
        let _ = http_handle.await;
    };
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, drain).await.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Shutdown timed out waiting for tasks"
        );
    }

    tracing::info!("TWS bridge stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &BridgeConfig) {
    tracing::info!(
        endpoint = %config.gateway.endpoint(),
        auto_connect = config.gateway.auto_connect,
        auto_reconnect = config.reconnect.enabled,
        http_port = config.server.http_port,
        "Configuration loaded"
    );
    tracing::debug!(
        bridge_url = ?config.gateway.bridge_url,
        request_timeout_secs = config.session.request_timeout.as_secs(),
        listener_buffer = config.broadcast.listener_buffer,
        "Session settings"
    );
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
