use std::net::SocketAddr;
use std::process::ExitCode;

use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use webcore::error::default_error_handler;
use webcore::session::MemoryStore;
use webcore::{AppState, Config, build_app, handlers, metrics, utils};

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();

    info!("Starting webcore demo server v{}", env!("CARGO_PKG_VERSION"));

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
        insecure_cookies = config.insecure_cookies,
        timeout_ms = config.request_timeout.as_millis() as u64,
        "Configuration loaded"
    );

    if let Some(metrics_addr) = config.metrics_addr() {
        metrics::try_init_metrics(metrics_addr);
    }

    let addr: SocketAddr = config.server_addr().parse().map_err(|e| {
        error!("Invalid server address: {e}");
        exitcode::CONFIG
    })?;

    let state = AppState::new(config, MemoryStore::new()).map_err(|e| {
        error!("Failed to build pipeline state: {e}");
        exitcode::CONFIG
    })?;

    let error_handler = default_error_handler();
    let router = handlers::routes(&state, error_handler.clone());
    let app = build_app(&state, router, error_handler);

    let listener = TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to {addr}: {e}");
        exitcode::UNAVAILABLE
    })?;

    info!("Server listening on http://{addr}");
    info!("  GET  /                  - Visit counter and CSRF token");
    info!("  GET  /health            - Health check");
    info!("  POST /sign-in           - Sign in (form field `user`)");
    info!("  POST /sign-out          - Destroy the session");
    info!("  GET  /users/{{id}}        - Typed path parameter");
    info!("  GET  /files/{{path...}}   - Greedy path parameter");
    info!("  GET  /slow?ms=N         - Deadline-aware sleep");
    info!("  GET  /boom              - Handler fault");
    info!("  GET  /admin             - Requires a signed-in user");

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

    info!("HTTP server stopped, shutting down background tasks...");
    state.shutdown().await;

    info!("Server shutdown complete");
    Ok(())
}
