// crates/server/src/metrics.rs
//! Prometheus metrics for the job server.

use axum::http::StatusCode;
use metrics::{describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Called once at startup, before any metrics are recorded. Returns
/// `true` if initialization succeeded, `false` if already initialized.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        return false;
    }

    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();

    if metrics::set_global_recorder(recorder).is_err() {
        tracing::warn!("Failed to set global metrics recorder (already set)");
        return false;
    }

    if PROMETHEUS_HANDLE.set(handle).is_err() {
        tracing::warn!("Failed to store Prometheus handle (already set)");
    }

    describe_metrics();

    tracing::info!("Prometheus metrics initialized");
    true
}

fn describe_metrics() {
    describe_counter!(
        "jobrelay_jobs_submitted_total",
        "Total number of jobs accepted by the manager"
    );
    describe_counter!(
        "jobrelay_jobs_finished_total",
        "Total number of jobs reaching a terminal state, by state"
    );
    describe_gauge!(
        "jobrelay_progress_active_tokens",
        "Progress tokens currently registered for push delivery"
    );
}

/// Record the current number of registered progress tokens.
pub fn record_active_tokens(count: u64) {
    gauge!("jobrelay_progress_active_tokens").set(count as f64);
}

/// Render current metrics in Prometheus text format.
///
/// Returns `None` if metrics are not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|h| h.render())
}

/// GET /metrics - Prometheus scrape endpoint.
pub async fn metrics_handler() -> Result<String, StatusCode> {
    render_metrics().ok_or(StatusCode::SERVICE_UNAVAILABLE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handler_before_and_after_init() {
        // Before init (in this process) the handler may 503; after a
        // successful init it must render. Either way the second init
        // call reports already-initialized.
        init_metrics();
        init_metrics();
        if PROMETHEUS_HANDLE.get().is_some() {
            assert!(metrics_handler().await.is_ok());
        } else {
            assert_eq!(metrics_handler().await.unwrap_err(), StatusCode::SERVICE_UNAVAILABLE);
        }
    }
}
