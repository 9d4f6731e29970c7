// crates/server/src/lib.rs
//! Jobrelay server library.
//!
//! This crate provides the Axum-based HTTP server over the jobrelay job
//! manager: a modern observation surface (listing, detail, stats, SSE
//! progress stream) plus the deprecated token-polling gateway.

pub mod error;
pub mod metrics;
pub mod routes;
pub mod state;

pub use error::*;
pub use metrics::{init_metrics, render_metrics};
pub use routes::api_routes;
pub use state::AppState;

use std::sync::Arc;

use axum::Router;
use jobrelay_core::JobsConfig;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the Axum application with all routes and middleware.
///
/// This sets up:
/// - API routes (health, jobs, progress metrics, legacy gateway)
/// - CORS for development (allows any origin)
/// - Request tracing
pub fn create_app(config: JobsConfig) -> Router {
    create_app_with_state(AppState::new(config))
}

/// Create the app over an externally owned state. Callers that submit
/// jobs (or tests) keep the state handle.
pub fn create_app_with_state(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(api_routes(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

// ============================================================================
// Integration Tests
// ============================================================================
