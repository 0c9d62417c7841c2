use std::net::SocketAddr;
use std::process::ExitCode;

use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use keygate::{AppState, Config, build_router, metrics, utils};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();

    info!("Starting keygate v{}", env!("CARGO_PKG_VERSION"));

    match run().await {
        Ok(()) => ExitCode::from(exitcode::OK as u8),
        Err(exit_code) => ExitCode::from(exit_code as u8),
    }
}

/// Run the server, returning an exit code on error.
async fn run() -> Result<(), exitcode::ExitCode> {
    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {e}");
        exitcode::CONFIG
    })?;
    info!(
        host = %config.host,
        port = %config.port,
        base_url = %config.base_url,
        backend = ?config.ratelimit_backend,
        log_level = %config.log_level,
        "Configuration loaded"
    );

    if let Some(addr) = config.metrics_addr() {
        metrics::try_init_metrics(addr);
    }

    let state = AppState::new(config.clone());
    let app = build_router(state).map_err(|e| {
        error!("Failed to build router: {e}");
        exitcode::CONFIG
    })?;

    let addr: SocketAddr = config.server_addr().parse().map_err(|e| {
        error!("Invalid server address: {e}");
        exitcode::CONFIG
    })?;
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to {addr}: {e}");
        exitcode::UNAVAILABLE
    })?;

    info!("Server listening on http://{addr}");
    info!("  GET  /health     - Health check");
    info!("  GET  /protected  - Requires API key");
    info!("  GET  /limited    - Rate limited");
    info!("  POST /api/echo   - Rate limited, requires API key");

    // ConnectInfo feeds the default rate limit identifier
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(utils::shutdown_signal())
    .await
    .map_err(|e| {
        error!("Server error: {e}");
        exitcode::SOFTWARE
    })?;

    info!("Server shutdown complete");
    Ok(())
}
