// crates/core/src/progress.rs
//! Push delivery of job progress to caller channels.
//!
//! Progress is best-effort telemetry, not a control-flow mechanism: a
//! job's outcome must never depend on whether an update was delivered.
//! Everything here swallows transport failures into metrics.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::error::DeliveryFault;
use crate::metrics::{MetricsSnapshot, ProgressMetrics};
use crate::types::JobToken;

/// A single progress notification on its way to a caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ProgressUpdate {
    pub token: JobToken,
    pub current: u64,
    pub total: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: String,
}

/// Transport seam for pushing progress to a caller's live channel.
#[async_trait]
pub trait ProgressChannel: Send + Sync {
    async fn send(&self, update: ProgressUpdate) -> Result<(), DeliveryFault>;
}

/// Channel backed by a tokio broadcast sender, feeding SSE subscribers.
///
/// A send with no live subscribers is an expected condition, not a
/// delivery fault.
pub struct BroadcastChannel {
    tx: broadcast::Sender<ProgressUpdate>,
}

impl BroadcastChannel {
    pub fn new(tx: broadcast::Sender<ProgressUpdate>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl ProgressChannel for BroadcastChannel {
    async fn send(&self, update: ProgressUpdate) -> Result<(), DeliveryFault> {
        let _ = self.tx.send(update);
        Ok(())
    }
}

/// Per-token bookkeeping: the bound channel plus last-sent state for
/// rate limiting and the monotonicity check.
struct Registration {
    channel: Arc<dyn ProgressChannel>,
    last: Mutex<LastSent>,
}

#[derive(Default)]
struct LastSent {
    at: Option<tokio::time::Instant>,
    current: Option<u64>,
}

/// Tracks active progress tokens and pushes rate-limited updates to the
/// registered caller channels.
///
/// At most one registration is live per token, and registrations never
/// outlive the owning job — the manager unregisters on every terminal
/// transition.
pub struct ProgressNotificationHandler {
    registrations: RwLock<HashMap<JobToken, Arc<Registration>>>,
    min_interval: Duration,
    metrics: Arc<ProgressMetrics>,
}

impl ProgressNotificationHandler {
    pub fn new(min_interval: Duration, metrics: Arc<ProgressMetrics>) -> Self {
        Self {
            registrations: RwLock::new(HashMap::new()),
            min_interval,
            metrics,
        }
    }

    /// Begin tracking a token for push delivery.
    ///
    /// `None` means the caller has no live channel (e.g. a detached
    /// job): that is an expected condition, so it logs and makes
    /// subsequent reports a no-op instead of raising.
    pub fn register(&self, token: &JobToken, channel: Option<Arc<dyn ProgressChannel>>) {
        let Some(channel) = channel else {
            tracing::debug!(token, "No caller channel available; progress will be dropped");
            return;
        };
        let registration = Arc::new(Registration {
            channel,
            last: Mutex::new(LastSent::default()),
        });
        let replaced = match self.registrations.write() {
            Ok(mut map) => map.insert(token.clone(), registration).is_some(),
            Err(e) => {
                tracing::error!("RwLock poisoned registering token: {e}");
                return;
            }
        };
        if !replaced {
            self.metrics.token_registered();
        }
        tracing::debug!(token, "Registered progress token");
    }

    /// Release tracking state for a token. Idempotent.
    pub fn unregister(&self, token: &JobToken) {
        let removed = match self.registrations.write() {
            Ok(mut map) => map.remove(token).is_some(),
            Err(e) => {
                tracing::error!("RwLock poisoned unregistering token: {e}");
                return;
            }
        };
        if removed {
            self.metrics.token_released();
            tracing::debug!(token, "Unregistered progress token");
        }
    }

    pub fn is_active(&self, token: &JobToken) -> bool {
        match self.registrations.read() {
            Ok(map) => map.contains_key(token),
            Err(e) => {
                tracing::error!("RwLock poisoned reading registrations: {e}");
                false
            }
        }
    }

    pub fn active_count(&self) -> usize {
        match self.registrations.read() {
            Ok(map) => map.len(),
            Err(e) => {
                tracing::error!("RwLock poisoned reading registrations: {e}");
                0
            }
        }
    }

    /// Forward a progress update to the token's channel, applying rate
    /// limiting and the monotonicity check.
    ///
    /// Returns `true` if the update was handed to the transport. An
    /// unregistered token is a quiet no-op; a transport failure is
    /// metered and swallowed.
    pub async fn report(
        &self,
        token: &JobToken,
        current: u64,
        total: u64,
        message: Option<&str>,
    ) -> bool {
        let registration = match self.registrations.read() {
            Ok(map) => map.get(token).cloned(),
            Err(e) => {
                tracing::error!("RwLock poisoned reading registrations: {e}");
                None
            }
        };
        let Some(registration) = registration else {
            tracing::debug!(token, "Progress for inactive token dropped");
            return false;
        };

        // The final update for a job is never suppressed.
        let is_final = total > 0 && current >= total;
        let now = tokio::time::Instant::now();

        {
            let mut last = match registration.last.lock() {
                Ok(g) => g,
                Err(e) => {
                    tracing::error!("Mutex poisoned reading last-sent state: {e}");
                    return false;
                }
            };

            if !is_final {
                if let Some(at) = last.at {
                    let since = now.duration_since(at);
                    if since < self.min_interval {
                        tracing::debug!(
                            token,
                            since_ms = since.as_millis() as u64,
                            "Skipping progress update due to rate limiting"
                        );
                        self.metrics.record_skipped();
                        return false;
                    }
                }
            }

            // Out-of-order progress is surfaced, not dropped: it aids
            // debugging of a misbehaving job.
            if let Some(prev) = last.current {
                if current < prev {
                    tracing::warn!(
                        token,
                        prev,
                        current,
                        "Progress decreased; forwarding anyway"
                    );
                }
            }

            last.at = Some(now);
            last.current = Some(current);
        }

        let update = ProgressUpdate {
            token: token.clone(),
            current,
            total,
            message: message.map(str::to_string),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        match registration.channel.send(update).await {
            Ok(()) => {
                self.metrics.record_sent();
                tracing::debug!(token, current, total, "Sent progress update");
                true
            }
            Err(fault) => {
                tracing::error!(token, error = %fault, "Failed to push progress update");
                self.metrics.record_error(fault.message);
                false
            }
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Channel that records every delivered update.
    struct RecordingChannel {
        sent: Mutex<Vec<ProgressUpdate>>,
    }

    impl RecordingChannel {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
            })
        }

        fn sent(&self) -> Vec<ProgressUpdate> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ProgressChannel for RecordingChannel {
        async fn send(&self, update: ProgressUpdate) -> Result<(), DeliveryFault> {
            self.sent.lock().unwrap().push(update);
            Ok(())
        }
    }

    /// Channel whose transport always fails.
    struct BrokenChannel;

    #[async_trait]
    impl ProgressChannel for BrokenChannel {
        async fn send(&self, _update: ProgressUpdate) -> Result<(), DeliveryFault> {
            Err(DeliveryFault::new("connection reset"))
        }
    }

    fn handler() -> ProgressNotificationHandler {
        ProgressNotificationHandler::new(
            Duration::from_millis(100),
            Arc::new(ProgressMetrics::new()),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_skips_fast_updates() {
        let h = handler();
        let chan = RecordingChannel::new();
        let token = "t-1".to_string();
        h.register(&token, Some(chan.clone()));

        assert!(h.report(&token, 1, 10, Some("start")).await);
        // Within the 100ms window, not final: suppressed.
        assert!(!h.report(&token, 2, 10, None).await);

        tokio::time::advance(Duration::from_millis(150)).await;
        assert!(h.report(&token, 3, 10, None).await);

        let m = h.metrics();
        assert_eq!(m.notifications_sent, 2);
        assert_eq!(m.notifications_skipped, 1);
        assert_eq!(chan.sent().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_update_never_suppressed() {
        let h = handler();
        let chan = RecordingChannel::new();
        let token = "t-2".to_string();
        h.register(&token, Some(chan.clone()));

        assert!(h.report(&token, 9, 10, None).await);
        // Immediately after, but current == total: must go out.
        assert!(h.report(&token, 10, 10, Some("done")).await);

        let sent = chan.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].current, 10);
        assert_eq!(h.metrics().notifications_skipped, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monotonicity_violation_forwarded_not_errored() {
        let h = handler();
        let chan = RecordingChannel::new();
        let token = "t-3".to_string();
        h.register(&token, Some(chan.clone()));

        assert!(h.report(&token, 1, 10, Some("start")).await);
        tokio::time::advance(Duration::from_millis(150)).await;
        // Regression: logged as a warning but still delivered.
        assert!(h.report(&token, 0, 10, Some("regressed")).await);

        let sent = chan.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].current, 0);
        assert_eq!(h.metrics().errors, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_total_updates_stay_rate_limited() {
        let h = handler();
        let chan = RecordingChannel::new();
        let token = "t-0".to_string();
        h.register(&token, Some(chan.clone()));

        assert!(h.report(&token, 1, 0, None).await);
        // A zero total means the end is unknown: no update can be
        // recognized as final, so none is exempt from the rate limit.
        assert!(!h.report(&token, 2, 0, None).await);
        assert_eq!(h.metrics().notifications_skipped, 1);
        assert_eq!(chan.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_unregistered_token_is_noop() {
        let h = handler();
        assert!(!h.report(&"ghost".to_string(), 1, 10, None).await);
        let m = h.metrics();
        assert_eq!(m.notifications_sent, 0);
        assert_eq!(m.notifications_skipped, 0);
        assert_eq!(m.errors, 0);
    }

    #[tokio::test]
    async fn test_register_without_channel_is_noop() {
        let h = handler();
        let token = "t-4".to_string();
        h.register(&token, None);
        assert!(!h.is_active(&token));
        assert_eq!(h.active_count(), 0);
        assert!(!h.report(&token, 1, 10, None).await);
    }

    #[tokio::test]
    async fn test_transport_failure_metered_and_swallowed() {
        let h = handler();
        let token = "t-5".to_string();
        h.register(&token, Some(Arc::new(BrokenChannel)));

        assert!(!h.report(&token, 1, 10, None).await);

        let m = h.metrics();
        assert_eq!(m.errors, 1);
        assert_eq!(m.notifications_sent, 0);
        let last = m.last_error.unwrap();
        assert!(last.message.contains("connection reset"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_updates_delivered_in_order() {
        let h = handler();
        let chan = RecordingChannel::new();
        let token = "t-6".to_string();
        h.register(&token, Some(chan.clone()));

        for i in 1..=5u64 {
            tokio::time::advance(Duration::from_millis(150)).await;
            assert!(h.report(&token, i, 10, None).await);
        }

        let currents: Vec<u64> = chan.sent().iter().map(|u| u.current).collect();
        assert_eq!(currents, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_unregister_releases_token() {
        let h = handler();
        let token = "t-7".to_string();
        h.register(&token, Some(RecordingChannel::new()));
        assert!(h.is_active(&token));
        assert_eq!(h.metrics().active_tokens, 1);

        h.unregister(&token);
        assert!(!h.is_active(&token));
        assert_eq!(h.metrics().active_tokens, 0);
        // Idempotent.
        h.unregister(&token);
        assert_eq!(h.metrics().active_tokens, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reregister_replaces_channel() {
        let h = handler();
        let first = RecordingChannel::new();
        let second = RecordingChannel::new();
        let token = "t-8".to_string();

        h.register(&token, Some(first.clone()));
        h.register(&token, Some(second.clone()));
        assert_eq!(h.metrics().active_tokens, 1);

        assert!(h.report(&token, 1, 10, None).await);
        assert!(first.sent().is_empty());
        assert_eq!(second.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_broadcast_channel_without_subscribers_is_ok() {
        // Binding the receiver to `_` drops it: zero subscribers.
        let (tx, _) = broadcast::channel(8);
        let chan = BroadcastChannel::new(tx);
        let update = ProgressUpdate {
            token: "t-9".into(),
            current: 1,
            total: 2,
            message: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        assert!(chan.send(update).await.is_ok());
    }

    #[tokio::test]
    async fn test_broadcast_channel_delivers_to_subscriber() {
        let (tx, mut rx) = broadcast::channel(8);
        let chan = BroadcastChannel::new(tx);
        let update = ProgressUpdate {
            token: "t-10".into(),
            current: 5,
            total: 10,
            message: Some("halfway".into()),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        chan.send(update.clone()).await.unwrap();
        let got = rx.recv().await.unwrap();
        assert_eq!(got, update);
    }
}
