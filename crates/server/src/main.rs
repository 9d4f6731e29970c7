// crates/server/src/main.rs
//! Jobrelay server binary.
//!
//! Reads configuration from `JOBRELAY_*` environment variables, starts
//! the job manager's housekeeping, and serves the HTTP API until ctrl-c.

use std::net::SocketAddr;

use anyhow::Result;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use jobrelay_core::JobsConfig;
use jobrelay_server::{create_app_with_state, init_metrics, AppState};

/// Default port for the server.
const DEFAULT_PORT: u16 = 47911;

/// Get the server port from environment or use default.
fn get_port() -> u16 {
    std::env::var("JOBRELAY_PORT")
        .ok()
        .or_else(|| std::env::var("PORT").ok())
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for ctrl-c: {e}");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    init_metrics();

    let config = JobsConfig::from_env();
    tracing::info!(
        max_concurrent_jobs = config.max_concurrent_jobs,
        progress_enabled = config.progress_enabled,
        legacy_polling_enabled = config.legacy_polling_enabled,
        "Loaded configuration"
    );

    let state = AppState::new(config);
    state.manager.start().await;

    let app = create_app_with_state(state.clone());

    let port = get_port();
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    eprintln!("\njobrelay v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("  -> http://localhost:{port}\n");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Drain live jobs before exiting so results are recorded.
    state.manager.shutdown().await;

    Ok(())
}
