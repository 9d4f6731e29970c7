// crates/core/src/config.rs
//! Runtime configuration for the job system.

use std::time::Duration;

use serde::Deserialize;

/// Configuration knobs recognized by the job manager, progress handler,
/// and compatibility gateway.
///
/// All fields have defaults; deserializing `{}` yields the default
/// configuration. Durations are expressed in seconds on the wire.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// Master switch for push progress delivery.
    pub progress_enabled: bool,
    /// Enables the deprecated token-polling endpoints. When off, those
    /// endpoints answer 410 Gone with a deprecation notice.
    pub legacy_polling_enabled: bool,
    /// Advisory maximum gap (seconds) a well-behaved job should target
    /// between progress updates. Not enforced by the handler.
    pub progress_update_interval: f64,
    /// Minimum interval (seconds) enforced between forwarded progress
    /// updates for a token. Final updates are never suppressed.
    pub progress_rate_limit: f64,
    /// Admission gate size: maximum simultaneously running jobs.
    pub max_concurrent_jobs: usize,
    /// Manager-level timeout (seconds) for a single job body.
    pub job_timeout: f64,
    /// How long (seconds) a cancelled job gets to exit cooperatively
    /// before a forceful-capable payload is terminated.
    pub cancel_grace_period: f64,
    /// How long (seconds) completed results are retained in the store.
    pub result_ttl: f64,
    /// How often (seconds) the store sweeps expired results.
    pub cleanup_interval: f64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            progress_enabled: true,
            legacy_polling_enabled: false,
            progress_update_interval: 5.0,
            progress_rate_limit: 0.1,
            max_concurrent_jobs: 10,
            job_timeout: 300.0,
            cancel_grace_period: 5.0,
            result_ttl: 3600.0,
            cleanup_interval: 300.0,
        }
    }
}

impl JobsConfig {
    /// Build a configuration from `JOBRELAY_*` environment variables,
    /// falling back to defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup. Factored out
    /// of `from_env` so override handling is testable without touching
    /// process-global state.
    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();
        if let Some(v) = parse_override::<bool>("JOBRELAY_PROGRESS_ENABLED", &get) {
            cfg.progress_enabled = v;
        }
        if let Some(v) = parse_override::<bool>("JOBRELAY_LEGACY_POLLING_ENABLED", &get) {
            cfg.legacy_polling_enabled = v;
        }
        if let Some(v) = parse_override::<f64>("JOBRELAY_PROGRESS_UPDATE_INTERVAL", &get) {
            cfg.progress_update_interval = v;
        }
        if let Some(v) = parse_override::<f64>("JOBRELAY_PROGRESS_RATE_LIMIT", &get) {
            cfg.progress_rate_limit = v;
        }
        if let Some(v) = parse_override::<usize>("JOBRELAY_MAX_CONCURRENT_JOBS", &get) {
            cfg.max_concurrent_jobs = v;
        }
        if let Some(v) = parse_override::<f64>("JOBRELAY_JOB_TIMEOUT", &get) {
            cfg.job_timeout = v;
        }
        if let Some(v) = parse_override::<f64>("JOBRELAY_CANCEL_GRACE_PERIOD", &get) {
            cfg.cancel_grace_period = v;
        }
        if let Some(v) = parse_override::<f64>("JOBRELAY_RESULT_TTL", &get) {
            cfg.result_ttl = v;
        }
        if let Some(v) = parse_override::<f64>("JOBRELAY_CLEANUP_INTERVAL", &get) {
            cfg.cleanup_interval = v;
        }
        cfg
    }

    pub fn rate_limit(&self) -> Duration {
        Duration::from_secs_f64(self.progress_rate_limit.max(0.0))
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs_f64(self.progress_update_interval.max(0.0))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.job_timeout.max(0.0))
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs_f64(self.cancel_grace_period.max(0.0))
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs_f64(self.result_ttl.max(0.0))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs_f64(self.cleanup_interval.max(0.0))
    }
}

fn parse_override<T: std::str::FromStr>(
    key: &str,
    get: &impl Fn(&str) -> Option<String>,
) -> Option<T> {
    let raw = get(key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparseable config override");
            None
        }
    }
}
