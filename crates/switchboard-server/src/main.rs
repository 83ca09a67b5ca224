//! Thin binary wrapper around the progress bus (C4). Bootstraps the bus
//! from `SwitchboardConfig`, mounts `switchboard_bus::router`, and serves
//! it until a shutdown signal arrives. No REST/gRPC surface — that stays
//! out of scope; this binary exists only because C4 specifies a server,
//! not just a library.

use std::sync::Arc;
use switchboard_bus::{BusState, HeartbeatSettings, ProgressBus};
use switchboard_shared::config::SwitchboardConfig;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("switchboard_server=info".parse()?))
        .init();

    let env = std::env::var("SWITCHBOARD_ENV").ok();
    let config = SwitchboardConfig::load(env.as_deref()).map_err(|e| format!("failed to load config: {e}"))?;

    info!(version = env!("CARGO_PKG_VERSION"), "starting switchboard-server");

    let bus = Arc::new(ProgressBus::new(
        std::time::Duration::from_secs(config.confirmation.default_timeout_seconds),
        config.confirmation.default_timeout_policy,
        config.bus.max_connections,
    ));
    let state = BusState {
        bus,
        heartbeat: HeartbeatSettings {
            ping_interval: config.bus.ping_interval(),
            ping_timeout: config.bus.ping_timeout(),
        },
    };

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "listening");

    axum::serve(listener, switchboard_bus::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| {
            error!(error = %e, "server exited with error");
            e
        })?;

    info!("switchboard-server shutdown complete");
    Ok(())
}

/// Waits for Ctrl+C or SIGTERM (Unix only; `terminate` never resolves elsewhere).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C"),
        _ = terminate => info!("received SIGTERM"),
    }
}
