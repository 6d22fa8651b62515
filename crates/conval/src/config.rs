//! Environment-driven configuration of the CONVAL recalculation client.

use std::time::Duration;

use quotation_core::timing::RecalcTimings;

/// Default per-request HTTP timeout.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Recalculation client configuration loaded from environment variables.
///
/// Only the API URL is required; every delay falls back to the
/// [`RecalcTimings`] defaults.
#[derive(Debug, Clone)]
pub struct RecalcConfig {
    /// Base URL of the quotation backend.
    pub api_url: String,
    /// HTTP request timeout applied to every CONVAL call.
    pub request_timeout: Duration,
    pub timings: RecalcTimings,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("{name} must be a non-negative integer, got '{value}'")]
    Invalid { name: &'static str, value: String },

    #[error("{0} must be a positive integer")]
    Zero(&'static str),
}

impl RecalcConfig {
    /// Configuration with default timings for the given backend URL.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            timings: RecalcTimings::default(),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// | Env Var                       | Default   |
    /// |-------------------------------|-----------|
    /// | `CONVAL_API_URL`              | required  |
    /// | `CONVAL_POLL_INTERVAL_MS`     | `2000`    |
    /// | `CONVAL_POLL_FALLBACK_MS`     | `5000`    |
    /// | `CONVAL_SETTLE_DELAY_MS`      | `3000`    |
    /// | `CONVAL_PER_JOB_MS`           | `50000`   |
    /// | `CONVAL_SLACK_MS`             | `30000`   |
    /// | `CONVAL_MAX_TIMEOUT_MS`       | `600000`  |
    /// | `CONVAL_REQUEST_TIMEOUT_SECS` | `30`      |
    ///
    /// The poll interval and the request timeout must be non-zero.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_url = lookup("CONVAL_API_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("CONVAL_API_URL"))?;

        let defaults = RecalcTimings::default();
        let millis = |name: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            parse_u64(&lookup, name).map(|v| v.map(Duration::from_millis).unwrap_or(default))
        };

        let timings = RecalcTimings {
            poll_interval: non_zero(
                "CONVAL_POLL_INTERVAL_MS",
                millis("CONVAL_POLL_INTERVAL_MS", defaults.poll_interval)?,
            )?,
            poll_fallback: millis("CONVAL_POLL_FALLBACK_MS", defaults.poll_fallback)?,
            settle_delay: millis("CONVAL_SETTLE_DELAY_MS", defaults.settle_delay)?,
            per_job: millis("CONVAL_PER_JOB_MS", defaults.per_job)?,
            slack: millis("CONVAL_SLACK_MS", defaults.slack)?,
            max_timeout: millis("CONVAL_MAX_TIMEOUT_MS", defaults.max_timeout)?,
        };

        let request_timeout = non_zero(
            "CONVAL_REQUEST_TIMEOUT_SECS",
            parse_u64(&lookup, "CONVAL_REQUEST_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS)),
        )?;

        Ok(Self {
            api_url,
            request_timeout,
            timings,
        })
    }
}

fn parse_u64(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<u64>, ConfigError> {
    match lookup(name) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}

fn non_zero(name: &'static str, value: Duration) -> Result<Duration, ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::Zero(name));
    }
    Ok(value)
}
