// crates/core/src/job.rs
//! The job abstraction: a cancellable unit of async work.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::cell::JobCell;
use crate::error::ExecutionFault;
use crate::progress::ProgressNotificationHandler;
use crate::types::{JobResult, JobToken, TerminationCapability};

/// A single unit of cancellable, asynchronous work.
///
/// Implementations own their payload internals; the manager owns the
/// lifecycle. A body must observe `ctx` cancellation at its suspension
/// points — cancellation is cooperative, the manager never interrupts a
/// `Cooperative` body.
#[async_trait]
pub trait Job: Send + Sync {
    /// Short label for listings and logs, e.g. "command".
    fn kind(&self) -> &str {
        "job"
    }

    /// Whether the manager may force-terminate this work after the
    /// cancellation grace period.
    fn termination(&self) -> TerminationCapability {
        TerminationCapability::Cooperative
    }

    /// Per-job timeout override. `None` uses the manager's configured
    /// default.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Run the work to completion. A returned fault becomes a `Failed`
    /// result; it never crashes the manager.
    async fn execute(&self, ctx: JobContext) -> Result<JobResult, ExecutionFault>;
}

/// Execution context handed to every job body.
///
/// Carries the cancellation signal and a best-effort progress reporter.
/// Cloneable so bodies can hand it to sub-tasks.
#[derive(Clone)]
pub struct JobContext {
    token: JobToken,
    cancel: CancellationToken,
    cell: Arc<JobCell>,
    progress: Arc<ProgressNotificationHandler>,
    advisory_interval: Duration,
}

impl JobContext {
    pub(crate) fn new(
        token: JobToken,
        cancel: CancellationToken,
        cell: Arc<JobCell>,
        progress: Arc<ProgressNotificationHandler>,
        advisory_interval: Duration,
    ) -> Self {
        Self {
            token,
            cancel,
            cell,
            progress,
            advisory_interval,
        }
    }

    pub fn token(&self) -> &JobToken {
        &self.token
    }

    /// Whether cancellation has been requested. One-shot and idempotent.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when cancellation is requested. Bodies select on this at
    /// I/O boundaries.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Safe-point probe: bail out with a fault if cancellation has been
    /// requested. The manager records the job `Cancelled` either way.
    pub fn checkpoint(&self) -> Result<(), ExecutionFault> {
        if self.cancel.is_cancelled() {
            Err(ExecutionFault::new("Job was cancelled"))
        } else {
            Ok(())
        }
    }

    /// Advisory maximum gap a well-behaved body should target between
    /// progress reports.
    pub fn advisory_interval(&self) -> Duration {
        self.advisory_interval
    }

    /// Report progress. Best-effort telemetry: the update may be
    /// rate-limited or the push channel may be gone, and neither affects
    /// the job's outcome. The call returning says nothing about delivery.
    pub async fn report(&self, current: u64, total: u64, message: Option<&str>) {
        self.cell.set_progress(current, total, message);
        self.progress
            .report(&self.token, current, total, message)
            .await;
    }
}

/// Adapter turning an async closure into a [`Job`].
///
/// The closure runs at most once; a (never expected) second execution
/// yields a fault instead of a panic.
pub struct FnJob<F> {
    kind: String,
    body: std::sync::Mutex<Option<F>>,
}

impl<F> FnJob<F> {
    pub fn new<Fut>(body: F) -> Self
    where
        F: FnOnce(JobContext) -> Fut,
        Fut: std::future::Future<Output = Result<JobResult, ExecutionFault>>,
    {
        Self::named("fn", body)
    }

    pub fn named<Fut>(kind: impl Into<String>, body: F) -> Self
    where
        F: FnOnce(JobContext) -> Fut,
        Fut: std::future::Future<Output = Result<JobResult, ExecutionFault>>,
    {
        Self {
            kind: kind.into(),
            body: std::sync::Mutex::new(Some(body)),
        }
    }
}

#[async_trait]
impl<F, Fut> Job for FnJob<F>
where
    F: FnOnce(JobContext) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<JobResult, ExecutionFault>> + Send + 'static,
{
    fn kind(&self) -> &str {
        &self.kind
    }

    async fn execute(&self, ctx: JobContext) -> Result<JobResult, ExecutionFault> {
        let body = match self.body.lock() {
            Ok(mut guard) => guard.take(),
            Err(e) => return Err(ExecutionFault::new(format!("job body lock poisoned: {e}"))),
        };
        match body {
            Some(f) => f(ctx).await,
            None => Err(ExecutionFault::new("job body already executed")),
        }
    }
}
