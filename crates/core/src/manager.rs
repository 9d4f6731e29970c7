// crates/core/src/manager.rs
//! Central coordinator for async job execution.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::cell::JobCell;
use crate::config::JobsConfig;
use crate::error::{ExecutionFault, JobError};
use crate::job::{Job, JobContext};
use crate::metrics::ProgressMetrics;
use crate::progress::{ProgressChannel, ProgressNotificationHandler};
use crate::store::{InMemoryJobStore, JobStore};
use crate::types::{
    new_token, JobResult, JobSnapshot, JobState, JobToken, ManagerStats, TerminationCapability,
};

/// Per-token record in the manager's job table.
struct JobEntry {
    cell: Arc<JobCell>,
    cancel: CancellationToken,
    termination: TerminationCapability,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

/// Submits jobs, enforces the bounded concurrency pool, tracks state
/// transitions, and exposes status/result/cancel by token.
///
/// The job and result tables are mutated only through the manager's own
/// operations. Control-plane calls (submit/status/cancel) never wait on
/// job completion — execution runs detached in per-job supervisor tasks.
pub struct JobManager {
    jobs: RwLock<HashMap<JobToken, Arc<JobEntry>>>,
    semaphore: Arc<Semaphore>,
    store: Arc<dyn JobStore>,
    memory_store: Option<Arc<InMemoryJobStore>>,
    progress: Arc<ProgressNotificationHandler>,
    config: JobsConfig,
}

impl JobManager {
    /// Create a manager with the default in-memory result store.
    pub fn new(config: JobsConfig) -> Arc<Self> {
        let memory = Arc::new(InMemoryJobStore::new(config.ttl(), config.sweep_interval()));
        Self::build(config, Arc::clone(&memory) as Arc<dyn JobStore>, Some(memory))
    }

    /// Create a manager over an externally provided result store.
    pub fn with_store(config: JobsConfig, store: Arc<dyn JobStore>) -> Arc<Self> {
        Self::build(config, store, None)
    }

    fn build(
        config: JobsConfig,
        store: Arc<dyn JobStore>,
        memory_store: Option<Arc<InMemoryJobStore>>,
    ) -> Arc<Self> {
        let progress = Arc::new(ProgressNotificationHandler::new(
            config.rate_limit(),
            Arc::new(ProgressMetrics::new()),
        ));
        Arc::new(Self {
            jobs: RwLock::new(HashMap::new()),
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1))),
            store,
            memory_store,
            progress,
            config,
        })
    }

    /// Start background housekeeping (result store TTL sweeps).
    pub async fn start(&self) {
        if let Some(memory) = &self.memory_store {
            memory.start_cleanup().await;
        }
        tracing::info!(
            max_concurrent_jobs = self.config.max_concurrent_jobs,
            "Job manager started"
        );
    }

    /// Cancel every live job, wait for their supervisors, and stop
    /// housekeeping.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down job manager");
        let handles: Vec<JoinHandle<()>> = {
            let jobs = match self.jobs.read() {
                Ok(g) => g,
                Err(e) => {
                    tracing::error!("RwLock poisoned during shutdown: {e}");
                    e.into_inner()
                }
            };
            jobs.values()
                .filter_map(|entry| {
                    if !entry.cell.state().is_terminal() {
                        entry.cancel.cancel();
                    }
                    match entry.supervisor.lock() {
                        Ok(mut g) => g.take(),
                        Err(e) => {
                            tracing::error!("Mutex poisoned taking supervisor handle: {e}");
                            None
                        }
                    }
                })
                .collect()
        };
        for handle in handles {
            let _ = handle.await;
        }
        if let Some(memory) = &self.memory_store {
            memory.stop_cleanup().await;
        }
        tracing::info!("Job manager shutdown complete");
    }

    /// The progress handler owned by this manager. Callers use it for
    /// operational introspection; jobs reach it through their context.
    pub fn progress(&self) -> &Arc<ProgressNotificationHandler> {
        &self.progress
    }

    pub fn config(&self) -> &JobsConfig {
        &self.config
    }

    /// Accept a job for execution and return its token immediately.
    ///
    /// The job stays `Queued` until the admission gate grants a slot.
    /// When the caller supplied a live channel and push delivery is
    /// enabled, the token is registered for progress notifications;
    /// otherwise progress becomes a no-op.
    pub fn submit(
        self: &Arc<Self>,
        job: impl Job + 'static,
        channel: Option<Arc<dyn ProgressChannel>>,
    ) -> JobToken {
        let job: Arc<dyn Job> = Arc::new(job);
        let token = new_token();
        let entry = Arc::new(JobEntry {
            cell: Arc::new(JobCell::new(token.clone(), job.kind().to_string())),
            cancel: CancellationToken::new(),
            termination: job.termination(),
            supervisor: Mutex::new(None),
        });

        match self.jobs.write() {
            Ok(mut jobs) => {
                jobs.insert(token.clone(), Arc::clone(&entry));
            }
            Err(e) => tracing::error!("RwLock poisoned inserting job entry: {e}"),
        }

        if self.config.progress_enabled {
            self.progress.register(&token, channel);
        } else if channel.is_some() {
            tracing::debug!(token, "Push progress disabled; ignoring caller channel");
        }

        let manager = Arc::clone(self);
        let supervise_entry = Arc::clone(&entry);
        let supervise_token = token.clone();
        let handle = tokio::spawn(async move {
            manager.supervise(supervise_token, supervise_entry, job).await;
        });
        match entry.supervisor.lock() {
            Ok(mut g) => *g = Some(handle),
            Err(e) => tracing::error!("Mutex poisoned storing supervisor handle: {e}"),
        }

        metrics::counter!("jobrelay_jobs_submitted_total").increment(1);
        tracing::info!(token, "Submitted job");
        token
    }

    /// Current state and progress for a token.
    pub fn status(&self, token: &JobToken) -> Result<JobSnapshot, JobError> {
        self.entry(token).map(|e| e.cell.snapshot())
    }

    /// The stored result for a token.
    ///
    /// Fails `NotReady` while the job is non-terminal and `NotFound` for
    /// unknown (or expired) tokens.
    pub async fn result(&self, token: &JobToken) -> Result<JobResult, JobError> {
        match self.store.retrieve(token).await {
            Ok(result) => Ok(result),
            Err(JobError::NotFound { .. }) => match self.entry(token) {
                Ok(entry) if !entry.cell.state().is_terminal() => {
                    Err(JobError::not_ready(token.clone()))
                }
                Ok(_) => Err(JobError::not_found(token.clone())),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    /// Signal cancellation for a job.
    ///
    /// Idempotent: cancelling a job already in a terminal state is a
    /// no-op, not an error. The signal is cooperative — a `Running` body
    /// keeps the grace period to exit at a safe point before any
    /// escalation.
    pub fn cancel(&self, token: &JobToken) -> Result<(), JobError> {
        let entry = self.entry(token)?;
        if entry.cell.state().is_terminal() {
            tracing::debug!(token, "Cancel on terminal job ignored");
            return Ok(());
        }
        entry.cancel.cancel();
        tracing::info!(token, "Cancellation requested");
        Ok(())
    }

    /// Point-in-time snapshot of every known job. Not a live view;
    /// re-call to restart.
    pub fn list(&self) -> Vec<JobSnapshot> {
        match self.jobs.read() {
            Ok(jobs) => jobs.values().map(|e| e.cell.snapshot()).collect(),
            Err(e) => {
                tracing::error!("RwLock poisoned listing jobs: {e}");
                Vec::new()
            }
        }
    }

    /// Per-state job counts.
    pub fn stats(&self) -> ManagerStats {
        let mut stats = ManagerStats::default();
        match self.jobs.read() {
            Ok(jobs) => {
                stats.total_jobs = jobs.len();
                for entry in jobs.values() {
                    match entry.cell.state() {
                        JobState::Queued => stats.queued_jobs += 1,
                        JobState::Running => stats.running_jobs += 1,
                        JobState::Completed => stats.completed_jobs += 1,
                        JobState::Failed => stats.failed_jobs += 1,
                        JobState::Cancelled => stats.cancelled_jobs += 1,
                    }
                }
            }
            Err(e) => tracing::error!("RwLock poisoned reading stats: {e}"),
        }
        stats
    }

    /// Drop a job from the table and discard its stored result.
    pub async fn cleanup_job(&self, token: &JobToken) {
        let entry = match self.jobs.write() {
            Ok(mut jobs) => jobs.remove(token),
            Err(e) => {
                tracing::error!("RwLock poisoned cleaning up job: {e}");
                None
            }
        };
        if let Some(entry) = entry {
            if !entry.cell.state().is_terminal() {
                entry.cancel.cancel();
            }
        }
        self.progress.unregister(token);
        self.store.cleanup(token).await;
        tracing::debug!(token, "Cleaned up job");
    }

    fn entry(&self, token: &JobToken) -> Result<Arc<JobEntry>, JobError> {
        match self.jobs.read() {
            Ok(jobs) => jobs
                .get(token)
                .cloned()
                .ok_or_else(|| JobError::not_found(token.clone())),
            Err(e) => {
                tracing::error!("RwLock poisoned reading job entry: {e}");
                Err(JobError::not_found(token.clone()))
            }
        }
    }

    /// Drives one job from admission to its terminal state. The only
    /// place terminal transitions happen, so each job is finalized
    /// exactly once.
    async fn supervise(self: Arc<Self>, token: JobToken, entry: Arc<JobEntry>, job: Arc<dyn Job>) {
        let cancel = entry.cancel.clone();

        // Admission gate: stay Queued until a slot frees. The semaphore
        // is fair, so bursts drain in submission order.
        let _permit = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(token, "Job cancelled while queued");
                self.finalize(&token, &entry, JobState::Cancelled, JobResult::err("Job was cancelled"))
                    .await;
                return;
            }
            permit = Arc::clone(&self.semaphore).acquire_owned() => match permit {
                Ok(p) => p,
                Err(_) => {
                    self.finalize(
                        &token,
                        &entry,
                        JobState::Cancelled,
                        JobResult::err("Job manager is shutting down"),
                    )
                    .await;
                    return;
                }
            }
        };

        if !entry.cell.transition(JobState::Running) {
            return;
        }
        tracing::info!(token, kind = job.kind(), "Job running");

        let timeout = job.timeout().unwrap_or_else(|| self.config.timeout());
        let deadline = tokio::time::Instant::now() + timeout;
        let ctx = JobContext::new(
            token.clone(),
            cancel.clone(),
            Arc::clone(&entry.cell),
            Arc::clone(&self.progress),
            self.config.update_interval(),
        );

        // The body runs in its own task: a panic there surfaces as a
        // JoinError instead of tearing down the supervisor, and abort()
        // gives the escalation path a handle on the work.
        let mut body = {
            let job = Arc::clone(&job);
            tokio::spawn(async move { job.execute(ctx).await })
        };

        let (state, result) = tokio::select! {
            joined = &mut body => settle(joined),
            _ = tokio::time::sleep_until(deadline) => {
                body.abort();
                let _ = (&mut body).await;
                (
                    JobState::Failed,
                    JobResult::err(format!("Job timed out after {:.1}s", timeout.as_secs_f64())),
                )
            }
            _ = cancel.cancelled() => {
                self.escalate(&token, &mut body, entry.termination, deadline).await
            }
        };

        self.finalize(&token, &entry, state, result).await;
    }

    /// After a cancellation signal: give the body the grace period to
    /// exit at a safe point, then force-terminate payloads that declared
    /// the capability. Cooperative-only payloads are waited out under
    /// the job's deadline.
    async fn escalate(
        &self,
        token: &JobToken,
        body: &mut JoinHandle<Result<JobResult, ExecutionFault>>,
        termination: TerminationCapability,
        deadline: tokio::time::Instant,
    ) -> (JobState, JobResult) {
        let grace = self.config.grace_period();
        if tokio::time::timeout(grace, &mut *body).await.is_ok() {
            return (JobState::Cancelled, JobResult::err("Job was cancelled"));
        }

        match termination {
            TerminationCapability::Forceful => {
                tracing::warn!(
                    token,
                    grace_secs = grace.as_secs_f64(),
                    "Job did not observe cancellation within grace period; terminating"
                );
                body.abort();
                let _ = (&mut *body).await;
                (
                    JobState::Cancelled,
                    JobResult::err(format!(
                        "Job was cancelled (terminated after {:.1}s grace period)",
                        grace.as_secs_f64()
                    )),
                )
            }
            TerminationCapability::Cooperative => {
                tracing::warn!(
                    token,
                    "Cooperative job has not observed cancellation; waiting for it to exit"
                );
                if tokio::time::timeout_at(deadline, &mut *body).await.is_ok() {
                    (JobState::Cancelled, JobResult::err("Job was cancelled"))
                } else {
                    body.abort();
                    let _ = (&mut *body).await;
                    (
                        JobState::Failed,
                        JobResult::err("Job ignored cancellation and exceeded its timeout"),
                    )
                }
            }
        }
    }

    /// Record the terminal outcome. The result lands in the store
    /// *before* the terminal state becomes visible, so a terminal
    /// `status()` always implies a retrievable `result()`.
    async fn finalize(&self, token: &JobToken, entry: &JobEntry, state: JobState, result: JobResult) {
        self.store.store(token, result).await;
        if !entry.cell.transition(state) {
            tracing::debug!(token, "Terminal transition already recorded");
        }
        // A completed job whose body never reported current == total gets
        // one closing push so subscribers see the bar reach the end.
        if state == JobState::Completed {
            let p = entry.cell.progress();
            if p.total > 0 && p.current < p.total {
                entry.cell.set_progress(p.total, p.total, p.message.as_deref());
                self.progress
                    .report(token, p.total, p.total, p.message.as_deref())
                    .await;
            }
        }
        self.progress.unregister(token);
        metrics::counter!("jobrelay_jobs_finished_total", "state" => entry.cell.state().as_str())
            .increment(1);
        tracing::info!(token, state = %entry.cell.state(), "Job finished");
    }
}

/// Convert a body task's join outcome into the job's terminal state.
/// Faults become `Failed` results here — they never crash the manager.
fn settle(joined: Result<Result<JobResult, ExecutionFault>, JoinError>) -> (JobState, JobResult) {
    match joined {
        Ok(Ok(result)) => (JobState::Completed, result),
        Ok(Err(fault)) => (JobState::Failed, JobResult::err(fault.message)),
        Err(join_err) if join_err.is_panic() => (
            JobState::Failed,
            JobResult::err(format!("Job panicked: {join_err}")),
        ),
        Err(_) => (JobState::Cancelled, JobResult::err("Job was cancelled")),
    }
}
