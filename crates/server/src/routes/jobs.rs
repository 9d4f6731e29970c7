// crates/server/src/routes/jobs.rs
//! API routes for job observation.
//!
//! - GET /jobs — list known jobs, filterable by state
//! - GET /jobs/stats — per-state counts plus progress delivery metrics
//! - GET /jobs/{token} — full detail for one job
//! - GET /jobs/stream — SSE stream of pushed progress updates (only
//!   mounted when push progress is enabled)

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, Sse};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;

use jobrelay_core::{JobResult, JobSnapshot, JobState, JobToken, ManagerStats, MetricsSnapshot};

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ListJobsQuery {
    /// Keep only jobs in this state.
    pub status: Option<JobState>,
    /// Truncate the (sorted) listing.
    pub limit: Option<usize>,
    /// Include terminal jobs when no explicit status filter is given.
    pub include_completed: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct JobView {
    #[serde(flatten)]
    pub snapshot: JobSnapshot,
    pub percentage: f64,
}

impl From<JobSnapshot> for JobView {
    fn from(snapshot: JobSnapshot) -> Self {
        let percentage = snapshot.progress.percentage();
        Self {
            snapshot,
            percentage,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobView>,
    pub total_count: usize,
    pub running_count: usize,
    pub completed_count: usize,
}

/// GET /api/jobs — list known jobs.
///
/// Terminal jobs are hidden by default; pass `include_completed=true` or
/// an explicit `status=` filter to see them.
async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListJobsQuery>,
) -> Json<JobListResponse> {
    let mut snapshots = state.manager.list();
    snapshots.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at).then(a.token.cmp(&b.token)));

    let total_count = snapshots.len();
    let running_count = snapshots
        .iter()
        .filter(|s| s.state == JobState::Running)
        .count();
    let completed_count = snapshots
        .iter()
        .filter(|s| s.state == JobState::Completed)
        .count();

    let filtered: Vec<JobView> = snapshots
        .into_iter()
        .filter(|s| match query.status {
            Some(status) => s.state == status,
            None => query.include_completed.unwrap_or(false) || !s.state.is_terminal(),
        })
        .take(query.limit.unwrap_or(usize::MAX))
        .map(JobView::from)
        .collect();

    Json(JobListResponse {
        jobs: filtered,
        total_count,
        running_count,
        completed_count,
    })
}

#[derive(Debug, Serialize)]
pub struct JobStatsResponse {
    pub jobs: ManagerStats,
    pub progress: MetricsSnapshot,
}

/// GET /api/jobs/stats — per-state counts and progress delivery metrics.
async fn job_stats(State(state): State<Arc<AppState>>) -> Json<JobStatsResponse> {
    Json(JobStatsResponse {
        jobs: state.manager.stats(),
        progress: state.manager.progress().metrics(),
    })
}

#[derive(Debug, Serialize)]
pub struct JobDetailResponse {
    #[serde(flatten)]
    pub job: JobView,
    /// Present once the job is terminal (and its result still retained).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
}

/// GET /api/jobs/{token} — full detail for one job.
async fn job_detail(
    State(state): State<Arc<AppState>>,
    Path(token): Path<JobToken>,
) -> ApiResult<Json<JobDetailResponse>> {
    let snapshot = state.manager.status(&token)?;
    let result = if snapshot.state.is_terminal() {
        state.manager.result(&token).await.ok()
    } else {
        None
    };
    Ok(Json(JobDetailResponse {
        job: snapshot.into(),
        result,
    }))
}

/// GET /api/jobs/stream — SSE stream of pushed progress updates.
async fn stream_jobs(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.subscribe();

    let stream = async_stream::stream! {
        let mut rx = rx;
        while let Ok(update) = rx.recv().await {
            let json = serde_json::to_string(&update).unwrap_or_default();
            yield Ok(Event::default().data(json));
        }
    };

    Sse::new(stream)
}

/// Build the jobs router. The push stream is mounted only when push
/// progress is enabled.
pub fn router(progress_enabled: bool) -> Router<Arc<AppState>> {
    let mut router = Router::new()
        .route("/jobs", get(list_jobs))
        .route("/jobs/stats", get(job_stats))
        .route("/jobs/{token}", get(job_detail));
    if progress_enabled {
        router = router.route("/jobs/stream", get(stream_jobs));
    }
    router
}
