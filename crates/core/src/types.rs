// crates/core/src/types.rs
//! Types for the async job system.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Opaque unique identifier for a submitted job.
///
/// Allocated by the manager at submission (UUID v4) and used for all
/// subsequent status/result/cancel/progress operations.
pub type JobToken = String;

/// Allocate a fresh job token.
pub(crate) fn new_token() -> JobToken {
    uuid::Uuid::new_v4().to_string()
}

/// Lifecycle state of a job.
///
/// Transitions: `Queued → Running → Completed | Failed`, and
/// `Queued | Running → Cancelled`. `Completed`, `Failed`, and `Cancelled`
/// are terminal — no transition leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued = 0,
    Running = 1,
    Completed = 2,
    Failed = 3,
    Cancelled = 4,
}

impl JobState {
    /// Whether this state permits no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Queued,
            1 => Self::Running,
            2 => Self::Completed,
            4 => Self::Cancelled,
            _ => Self::Failed,
        }
    }

    /// Wire name, matching the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a job, created exactly once when the job reaches a terminal
/// state and immutable thereafter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub success: bool,
    /// Payload-defined output; opaque to the manager.
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl JobResult {
    /// A successful result carrying the given data.
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data,
            error: None,
            metadata: HashMap::new(),
        }
    }

    /// A failed result carrying the fault message.
    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: serde_json::Value::Null,
            error: Some(error.into()),
            metadata: HashMap::new(),
        }
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Point-in-time progress of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub current: u64,
    pub total: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl JobProgress {
    /// Completion percentage, clamped to 100. Zero when `total` is 0.
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.current.min(self.total) as f64 / self.total as f64) * 100.0
        }
    }
}

/// Snapshot of a job's identity, state, and progress as seen by a status
/// reader. Never a live view.
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct JobSnapshot {
    pub token: JobToken,
    /// Payload-declared kind, e.g. "command" or "fn".
    pub kind: String,
    pub state: JobState,
    pub progress: JobProgress,
    pub submitted_at: chrono::DateTime<chrono::Utc>,
}

/// How a job's underlying work may be stopped when it does not observe
/// cancellation within the grace period.
///
/// Declared by the job rather than assumed: only `Forceful` payloads
/// (e.g. subprocesses) may be aborted by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationCapability {
    /// The body can only exit at its own safe points.
    Cooperative,
    /// The manager may force-terminate the work after the grace period.
    Forceful,
}

/// Per-state job counts reported by `JobManager::stats`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ManagerStats {
    pub total_jobs: usize,
    pub queued_jobs: usize,
    pub running_jobs: usize,
    pub completed_jobs: usize,
    pub failed_jobs: usize,
    pub cancelled_jobs: usize,
}
