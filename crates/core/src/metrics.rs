// crates/core/src/metrics.rs
//! Delivery metrics for the progress notification handler.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Serialize;

/// Process-wide, reset-able counters for progress delivery.
///
/// Owned by the `ProgressNotificationHandler` and injected where needed
/// rather than living in ambient global state. Mutated only by the
/// handler; read by the operational metrics endpoint.
pub struct ProgressMetrics {
    sent: AtomicU64,
    skipped: AtomicU64,
    errors: AtomicU64,
    active_tokens: AtomicU64,
    last_error: Mutex<Option<LastError>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct LastError {
    pub message: String,
    pub at: chrono::DateTime<chrono::Utc>,
}

/// Read-only view returned by [`ProgressMetrics::snapshot`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct MetricsSnapshot {
    pub notifications_sent: u64,
    pub notifications_skipped: u64,
    pub errors: u64,
    pub active_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<LastError>,
}

impl ProgressMetrics {
    pub fn new() -> Self {
        Self {
            sent: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            active_tokens: AtomicU64::new(0),
            last_error: Mutex::new(None),
        }
    }

    pub fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self, message: impl Into<String>) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        match self.last_error.lock() {
            Ok(mut guard) => {
                *guard = Some(LastError {
                    message: message.into(),
                    at: chrono::Utc::now(),
                })
            }
            Err(e) => tracing::error!("Mutex poisoned recording last error: {e}"),
        }
    }

    pub fn token_registered(&self) {
        self.active_tokens.fetch_add(1, Ordering::Relaxed);
    }

    pub fn token_released(&self) {
        // Saturating: unregistering an unknown token must not underflow.
        let _ = self
            .active_tokens
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }

    pub fn active_tokens(&self) -> u64 {
        self.active_tokens.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            notifications_sent: self.sent.load(Ordering::Relaxed),
            notifications_skipped: self.skipped.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            active_tokens: self.active_tokens.load(Ordering::Relaxed),
            last_error: match self.last_error.lock() {
                Ok(g) => g.clone(),
                Err(e) => {
                    tracing::error!("Mutex poisoned reading last error: {e}");
                    None
                }
            },
        }
    }

    /// Zero the counters and clear the last error. Active-token count is
    /// preserved — it tracks live registrations, not history.
    pub fn reset(&self) {
        self.sent.store(0, Ordering::Relaxed);
        self.skipped.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        match self.last_error.lock() {
            Ok(mut guard) => *guard = None,
            Err(e) => tracing::error!("Mutex poisoned resetting last error: {e}"),
        }
    }
}

impl Default for ProgressMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let m = ProgressMetrics::new();
        m.record_sent();
        m.record_sent();
        m.record_skipped();
        m.record_error("channel closed");

        let snap = m.snapshot();
        assert_eq!(snap.notifications_sent, 2);
        assert_eq!(snap.notifications_skipped, 1);
        assert_eq!(snap.errors, 1);
        assert_eq!(
            snap.last_error.unwrap().message,
            "channel closed".to_string()
        );
    }

    #[test]
    fn test_active_tokens_saturate() {
        let m = ProgressMetrics::new();
        m.token_released();
        assert_eq!(m.active_tokens(), 0);

        m.token_registered();
        m.token_registered();
        m.token_released();
        assert_eq!(m.active_tokens(), 1);
    }

    #[test]
    fn test_reset_preserves_active() {
        let m = ProgressMetrics::new();
        m.record_sent();
        m.record_error("x");
        m.token_registered();

        m.reset();
        let snap = m.snapshot();
        assert_eq!(snap.notifications_sent, 0);
        assert_eq!(snap.errors, 0);
        assert!(snap.last_error.is_none());
        assert_eq!(snap.active_tokens, 1);
    }
}
