// crates/server/src/state.rs
//! Application state for the Axum server.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::broadcast;

use jobrelay_core::{
    BroadcastChannel, JobManager, JobsConfig, ProgressChannel, ProgressUpdate,
};

/// Shared application state accessible from all route handlers.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    /// Configuration snapshot taken at startup. Route topology (push
    /// stream, legacy gateway) is decided from this once, not re-read
    /// per request.
    pub config: JobsConfig,
    /// The job manager: submission, lifecycle, results.
    pub manager: Arc<JobManager>,
    /// Broadcast fan-out feeding the SSE progress stream.
    pub progress_tx: broadcast::Sender<ProgressUpdate>,
}

impl AppState {
    /// Create a new application state wrapped in an Arc for sharing.
    pub fn new(config: JobsConfig) -> Arc<Self> {
        let manager = JobManager::new(config.clone());
        Arc::new(Self {
            start_time: Instant::now(),
            config,
            manager,
            progress_tx: broadcast::channel(256).0,
        })
    }

    /// Get the server uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Subscribe to the pushed progress updates.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressUpdate> {
        self.progress_tx.subscribe()
    }

    /// The channel handed to the manager when registering a token for
    /// push delivery.
    pub fn progress_channel(&self) -> Arc<dyn ProgressChannel> {
        Arc::new(BroadcastChannel::new(self.progress_tx.clone()))
    }
}
