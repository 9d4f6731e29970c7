//! API route handlers for the jobrelay server.

pub mod health;
pub mod jobs;
pub mod legacy;
pub mod progress;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;

use crate::state::AppState;

/// Create the combined API router with all routes under /api prefix.
///
/// Routes:
/// - GET /api/health - Health check
/// - GET /api/jobs - List jobs (filter: status, limit, include_completed)
/// - GET /api/jobs/stats - Per-state counts + progress delivery metrics
/// - GET /api/jobs/{token} - Job detail, result included once terminal
/// - GET /api/jobs/stream - SSE of pushed progress (push mode only)
/// - GET /api/progress/metrics - Progress delivery counters
/// - POST /api/progress/metrics/reset - Zero the counters
/// - GET /api/legacy/jobs/{token} - Poll status/result (or 410 stub)
/// - POST /api/legacy/jobs/{token}/terminate - Cancel (or 410 stub)
/// - GET /metrics - Prometheus text format
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", health::router())
        .nest("/api", jobs::router(state.config.progress_enabled))
        .nest("/api", progress::router())
        .nest("/api", legacy::router(state.config.legacy_polling_enabled))
        .route("/metrics", get(crate::metrics::metrics_handler))
        .with_state(state)
}
