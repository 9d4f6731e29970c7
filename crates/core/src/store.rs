// crates/core/src/store.rs
//! Storage backends for completed job results.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::JobError;
use crate::types::{JobResult, JobToken};

/// Persistence of completed job results, keyed by token.
///
/// Only the manager writes through this interface; a durable backend can
/// be substituted without touching the manager.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn store(&self, token: &JobToken, result: JobResult);
    /// Fails with `NotFound` if no result has been stored for the token.
    async fn retrieve(&self, token: &JobToken) -> Result<JobResult, JobError>;
    async fn cleanup(&self, token: &JobToken);
    async fn exists(&self, token: &JobToken) -> bool;
}

struct StoredResult {
    result: JobResult,
    stored_at: tokio::time::Instant,
}

/// In-memory result store with TTL-based expiry.
pub struct InMemoryJobStore {
    entries: Mutex<HashMap<JobToken, StoredResult>>,
    ttl: Duration,
    sweep_interval: Duration,
    sweeper: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl InMemoryJobStore {
    pub fn new(ttl: Duration, sweep_interval: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            sweep_interval,
            sweeper: Mutex::new(None),
        }
    }

    /// Start the background sweep loop. Idempotent.
    pub async fn start_cleanup(self: &Arc<Self>) {
        let mut sweeper = self.sweeper.lock().await;
        if sweeper.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        let store = Arc::clone(self);
        *sweeper = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(store.sweep_interval).await;
                store.sweep_expired().await;
            }
        }));
        tracing::debug!("Started result store cleanup task");
    }

    /// Stop the background sweep loop.
    pub async fn stop_cleanup(&self) {
        if let Some(handle) = self.sweeper.lock().await.take() {
            handle.abort();
            tracing::debug!("Stopped result store cleanup task");
        }
    }

    async fn sweep_expired(&self) {
        let now = tokio::time::Instant::now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, e| now.duration_since(e.stored_at) < self.ttl);
        let expired = before - entries.len();
        if expired > 0 {
            tracing::info!(expired, "Swept expired job results");
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600), Duration::from_secs(300))
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn store(&self, token: &JobToken, result: JobResult) {
        let mut entries = self.entries.lock().await;
        entries.insert(
            token.clone(),
            StoredResult {
                result,
                stored_at: tokio::time::Instant::now(),
            },
        );
        tracing::debug!(token, "Stored job result");
    }

    async fn retrieve(&self, token: &JobToken) -> Result<JobResult, JobError> {
        let mut entries = self.entries.lock().await;
        match entries.get_mut(token) {
            Some(entry) => {
                // Retrieval refreshes the retention clock.
                entry.stored_at = tokio::time::Instant::now();
                Ok(entry.result.clone())
            }
            None => Err(JobError::not_found(token.clone())),
        }
    }

    async fn cleanup(&self, token: &JobToken) {
        let mut entries = self.entries.lock().await;
        if entries.remove(token).is_some() {
            tracing::debug!(token, "Cleaned up job result");
        }
    }

    async fn exists(&self, token: &JobToken) -> bool {
        self.entries.lock().await.contains_key(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> Arc<InMemoryJobStore> {
        Arc::new(InMemoryJobStore::new(
            Duration::from_secs(60),
            Duration::from_secs(10),
        ))
    }

    #[tokio::test]
    async fn test_store_retrieve_cleanup() {
        let s = store();
        let token = "t-1".to_string();

        assert!(!s.exists(&token).await);
        assert!(matches!(
            s.retrieve(&token).await,
            Err(JobError::NotFound { .. })
        ));

        s.store(&token, JobResult::ok(json!("ok"))).await;
        assert!(s.exists(&token).await);
        let got = s.retrieve(&token).await.unwrap();
        assert!(got.success);
        assert_eq!(got.data, json!("ok"));

        s.cleanup(&token).await;
        assert!(!s.exists(&token).await);
    }

    #[tokio::test]
    async fn test_store_overwrites() {
        let s = store();
        let token = "t-2".to_string();
        s.store(&token, JobResult::ok(json!(1))).await;
        s.store(&token, JobResult::err("later")).await;
        let got = s.retrieve(&token).await.unwrap();
        assert!(!got.success);
        assert_eq!(s.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let s = Arc::new(InMemoryJobStore::new(
            Duration::from_secs(30),
            Duration::from_secs(10),
        ));
        s.start_cleanup().await;

        let token = "t-3".to_string();
        s.store(&token, JobResult::ok(json!(null))).await;

        // Not yet expired after one sweep.
        tokio::time::advance(Duration::from_secs(15)).await;
        tokio::task::yield_now().await;
        assert!(s.exists(&token).await);

        // Past the TTL the next sweep removes it.
        tokio::time::advance(Duration::from_secs(30)).await;
        tokio::task::yield_now().await;
        assert!(!s.exists(&token).await);

        s.stop_cleanup().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_retrieve_refreshes_ttl() {
        let s = Arc::new(InMemoryJobStore::new(
            Duration::from_secs(30),
            Duration::from_secs(10),
        ));
        s.start_cleanup().await;

        let token = "t-4".to_string();
        s.store(&token, JobResult::ok(json!(null))).await;

        tokio::time::advance(Duration::from_secs(20)).await;
        tokio::task::yield_now().await;
        // Touch the entry; retention clock restarts.
        s.retrieve(&token).await.unwrap();

        tokio::time::advance(Duration::from_secs(20)).await;
        tokio::task::yield_now().await;
        assert!(s.exists(&token).await);

        s.stop_cleanup().await;
    }

    #[tokio::test]
    async fn test_start_cleanup_idempotent() {
        let s = store();
        s.start_cleanup().await;
        s.start_cleanup().await;
        s.stop_cleanup().await;
        // Stopping twice is fine too.
        s.stop_cleanup().await;
    }
}
