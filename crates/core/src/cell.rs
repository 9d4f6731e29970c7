// crates/core/src/cell.rs
//! Shared live state for a single job.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::RwLock;

use crate::types::{JobProgress, JobSnapshot, JobState, JobToken};

/// Live state of one job, shared between the manager's supervisor task
/// and status readers.
///
/// State and counters use lock-free atomics (the progress message sits
/// under a RwLock) so status reads never block on a running body. State
/// transitions go through a compare-exchange loop that refuses to leave
/// a terminal state, which is what makes terminal states stable for
/// every reader.
pub struct JobCell {
    token: JobToken,
    kind: String,
    state: AtomicU8,
    current: AtomicU64,
    total: AtomicU64,
    message: RwLock<Option<String>>,
    submitted_at: chrono::DateTime<chrono::Utc>,
}

impl JobCell {
    pub fn new(token: JobToken, kind: String) -> Self {
        Self {
            token,
            kind,
            state: AtomicU8::new(JobState::Queued as u8),
            current: AtomicU64::new(0),
            total: AtomicU64::new(0),
            message: RwLock::new(None),
            submitted_at: chrono::Utc::now(),
        }
    }

    pub fn token(&self) -> &JobToken {
        &self.token
    }

    pub fn state(&self) -> JobState {
        JobState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Attempt a state transition. Returns `true` if the new state was
    /// recorded, `false` if the job was already terminal.
    pub fn transition(&self, to: JobState) -> bool {
        let mut cur = self.state.load(Ordering::Acquire);
        loop {
            if JobState::from_u8(cur).is_terminal() {
                return false;
            }
            match self.state.compare_exchange_weak(
                cur,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => cur = actual,
            }
        }
    }

    /// Record the latest progress triple reported by the body.
    pub fn set_progress(&self, current: u64, total: u64, message: Option<&str>) {
        self.current.store(current, Ordering::Relaxed);
        self.total.store(total, Ordering::Relaxed);
        match self.message.write() {
            Ok(mut guard) => *guard = message.map(str::to_string),
            Err(e) => tracing::error!("RwLock poisoned writing progress message: {e}"),
        }
    }

    pub fn progress(&self) -> JobProgress {
        JobProgress {
            current: self.current.load(Ordering::Relaxed),
            total: self.total.load(Ordering::Relaxed),
            message: match self.message.read() {
                Ok(g) => g.clone(),
                Err(e) => {
                    tracing::error!("RwLock poisoned reading progress message: {e}");
                    None
                }
            },
        }
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            token: self.token.clone(),
            kind: self.kind.clone(),
            state: self.state(),
            progress: self.progress(),
            submitted_at: self.submitted_at,
        }
    }
}
