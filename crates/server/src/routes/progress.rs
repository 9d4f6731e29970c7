// crates/server/src/routes/progress.rs
//! Operational introspection of the progress delivery metrics.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;

use jobrelay_core::MetricsSnapshot;

use crate::state::AppState;

/// GET /api/progress/metrics — current delivery counters.
async fn progress_metrics(State(state): State<Arc<AppState>>) -> Json<MetricsSnapshot> {
    let snapshot = state.manager.progress().metrics();
    crate::metrics::record_active_tokens(snapshot.active_tokens);
    Json(snapshot)
}

/// POST /api/progress/metrics/reset — zero the counters.
///
/// Active-token count is preserved: it tracks live registrations, not
/// history.
async fn reset_progress_metrics(State(state): State<Arc<AppState>>) -> Json<MetricsSnapshot> {
    state.manager.progress().reset_metrics();
    tracing::info!("Progress metrics reset");
    Json(state.manager.progress().metrics())
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/progress/metrics", get(progress_metrics))
        .route("/progress/metrics/reset", post(reset_progress_metrics))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use jobrelay_core::JobsConfig;
    use tower::ServiceExt;

    fn test_app(state: Arc<AppState>) -> Router {
        Router::new().nest("/api", router()).with_state(state)
    }

    async fn request(app: Router, method: Method, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_metrics_endpoint_shape() {
        let state = AppState::new(JobsConfig::default());
        let (status, body) =
            request(test_app(state), Method::GET, "/api/progress/metrics").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["notifications_sent"], 0);
        assert_eq!(body["notifications_skipped"], 0);
        assert_eq!(body["errors"], 0);
        assert_eq!(body["active_tokens"], 0);
        assert!(body.get("last_error").is_none());
    }

    #[tokio::test]
    async fn test_reset_zeroes_counters() {
        let state = AppState::new(JobsConfig::default());
        // Drive a counter up through the handler itself.
        state.manager.progress().register(&"t-1".to_string(), Some(state.progress_channel()));
        state
            .manager
            .progress()
            .report(&"t-1".to_string(), 1, 10, None)
            .await;
        assert_eq!(state.manager.progress().metrics().notifications_sent, 1);

        let (status, body) = request(
            test_app(state.clone()),
            Method::POST,
            "/api/progress/metrics/reset",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["notifications_sent"], 0);
        // Live registration survives the reset.
        assert_eq!(body["active_tokens"], 1);
    }
}
