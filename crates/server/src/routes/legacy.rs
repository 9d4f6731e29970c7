// crates/server/src/routes/legacy.rs
//! Deprecated token-polling surface.
//!
//! Two explicit routers cover the same paths: the active one serves
//! polls and terminations for callers that cannot consume pushed
//! progress, the stub answers 410 Gone with a deprecation notice. Which
//! one is mounted is decided once from configuration at startup.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;

use jobrelay_core::{JobProgress, JobResult, JobState, JobToken};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct LegacyJobResponse {
    pub token: JobToken,
    pub status: JobState,
    pub progress: JobProgress,
    pub percentage: f64,
    /// Present once the job is terminal (and its result still retained).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
}

/// GET /api/legacy/jobs/{token} — one poll cycle: current state,
/// progress, and the result when terminal.
async fn poll_job(
    State(state): State<Arc<AppState>>,
    Path(token): Path<JobToken>,
) -> ApiResult<Json<LegacyJobResponse>> {
    let snapshot = state.manager.status(&token)?;
    let result = if snapshot.state.is_terminal() {
        state.manager.result(&token).await.ok()
    } else {
        None
    };
    Ok(Json(LegacyJobResponse {
        token: snapshot.token,
        status: snapshot.state,
        percentage: snapshot.progress.percentage(),
        progress: snapshot.progress,
        result,
    }))
}

#[derive(Debug, Serialize)]
pub struct TerminateResponse {
    pub token: JobToken,
    pub cancelled: bool,
    pub status: JobState,
}

/// POST /api/legacy/jobs/{token}/terminate — request cancellation.
///
/// Cancellation is a signal, not a synchronous stop: the reported status
/// may still be `running` until the job exits at a safe point.
async fn terminate_job(
    State(state): State<Arc<AppState>>,
    Path(token): Path<JobToken>,
) -> ApiResult<Json<TerminateResponse>> {
    state.manager.cancel(&token)?;
    let snapshot = state.manager.status(&token)?;
    Ok(Json(TerminateResponse {
        token: snapshot.token,
        cancelled: true,
        status: snapshot.state,
    }))
}

/// Stub handler for the retired surface.
async fn gone() -> ApiError {
    ApiError::LegacyDisabled
}

/// Build the legacy router: active when polling is enabled, otherwise
/// the 410 stub on the same paths.
pub fn router(enabled: bool) -> Router<Arc<AppState>> {
    if enabled {
        Router::new()
            .route("/legacy/jobs/{token}", get(poll_job))
            .route("/legacy/jobs/{token}/terminate", post(terminate_job))
    } else {
        Router::new()
            .route("/legacy/jobs/{token}", get(gone))
            .route("/legacy/jobs/{token}/terminate", post(gone))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use jobrelay_core::{FnJob, JobsConfig};
    use serde_json::json;
    use std::time::Duration;
    use tower::ServiceExt;

    fn legacy_state() -> Arc<AppState> {
        AppState::new(JobsConfig {
            legacy_polling_enabled: true,
            ..JobsConfig::default()
        })
    }

    fn test_app(state: Arc<AppState>) -> Router {
        Router::new()
            .nest("/api", router(state.config.legacy_polling_enabled))
            .with_state(state)
    }

    async fn request(
        app: Router,
        method: Method,
        uri: &str,
    ) -> (StatusCode, serde_json::Value) {
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
        (status, serde_json::from_slice(&body).unwrap_or(json!(null)))
    }

    async fn settle(state: &AppState, token: &JobToken) {
        for _ in 0..100 {
            if state.manager.status(token).unwrap().state.is_terminal() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job never settled");
    }

    #[tokio::test]
    async fn test_poll_running_then_terminal_with_result() {
        let state = legacy_state();
        let token = state.manager.submit(
            FnJob::new(|ctx| async move {
                ctx.report(1, 2, Some("halfway")).await;
                ctx.cancelled().await;
                Ok(JobResult::ok(json!(null)))
            }),
            None,
        );
        tokio::time::sleep(Duration::from_millis(30)).await;

        let uri = format!("/api/legacy/jobs/{token}");
        let (status, body) = request(test_app(state.clone()), Method::GET, &uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "running");
        assert_eq!(body["progress"]["current"], 1);
        assert_eq!(body["percentage"], 50.0);
        assert!(body.get("result").is_none());

        state.manager.cancel(&token).unwrap();
        settle(&state, &token).await;

        let (status, body) = request(test_app(state), Method::GET, &uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "cancelled");
        assert_eq!(body["result"]["success"], false);
    }

    #[tokio::test]
    async fn test_terminate_requests_cancellation() {
        let state = legacy_state();
        let token = state.manager.submit(
            FnJob::new(|ctx| async move {
                ctx.cancelled().await;
                Ok(JobResult::ok(json!(null)))
            }),
            None,
        );
        tokio::time::sleep(Duration::from_millis(20)).await;

        let (status, body) = request(
            test_app(state.clone()),
            Method::POST,
            &format!("/api/legacy/jobs/{token}/terminate"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cancelled"], true);

        settle(&state, &token).await;
        assert_eq!(
            state.manager.status(&token).unwrap().state,
            JobState::Cancelled
        );
    }

    #[tokio::test]
    async fn test_poll_unknown_token_404() {
        let state = legacy_state();
        let (status, body) =
            request(test_app(state), Method::GET, "/api/legacy/jobs/ghost").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Job not found");
    }

    #[tokio::test]
    async fn test_disabled_surface_answers_410() {
        let state = AppState::new(JobsConfig::default());
        let app = test_app(state.clone());

        let (status, body) =
            request(app.clone(), Method::GET, "/api/legacy/jobs/any-token").await;
        assert_eq!(status, StatusCode::GONE);
        assert_eq!(body["deprecated"], true);
        assert!(body["notice"].as_str().unwrap().contains("stream"));

        let (status, _) = request(
            app,
            Method::POST,
            "/api/legacy/jobs/any-token/terminate",
        )
        .await;
        assert_eq!(status, StatusCode::GONE);
    }
}
