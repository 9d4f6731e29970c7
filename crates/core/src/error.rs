// crates/core/src/error.rs
use thiserror::Error;

use crate::types::JobToken;

/// Errors returned by the manager's control-plane operations.
///
/// Faults raised *inside* a job body are never surfaced here — they are
/// converted into a `Failed` [`crate::types::JobResult`] at the execution
/// boundary.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Job not found: {token}")]
    NotFound { token: JobToken },

    #[error("Result for job {token} is not ready")]
    NotReady { token: JobToken },
}

impl JobError {
    pub fn not_found(token: impl Into<JobToken>) -> Self {
        Self::NotFound {
            token: token.into(),
        }
    }

    pub fn not_ready(token: impl Into<JobToken>) -> Self {
        Self::NotReady {
            token: token.into(),
        }
    }
}

/// A fault raised by a job body. Carries the message that ends up in the
/// `Failed` result's `error` field.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ExecutionFault {
    pub message: String,
}

impl ExecutionFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for ExecutionFault {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for ExecutionFault {
    fn from(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

impl From<std::io::Error> for ExecutionFault {
    fn from(e: std::io::Error) -> Self {
        Self {
            message: e.to_string(),
        }
    }
}

/// A progress forwarding failure. Recorded in metrics and swallowed —
/// never propagated to the reporting job.
#[derive(Debug, Error)]
#[error("progress delivery failed: {message}")]
pub struct DeliveryFault {
    pub message: String,
}

impl DeliveryFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
