//! Timing constants and the safety-net timeout estimate.
//!
//! All delays of the recalculation workflow are collected in
//! [`RecalcTimings`] so tests and deployments can shrink or stretch them
//! without touching the state machine.

use std::time::Duration;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Cadence of queue status polls while a job is outstanding.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;
/// Grace period after a failed poll before state is force-reset.
pub const DEFAULT_POLL_FALLBACK_MS: u64 = 5_000;
/// Wait between confirmed completion and re-reading dependent data.
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 3_000;

/// Estimated engine time per queued job.
pub const PER_JOB_MS: u64 = 50_000;
/// Fixed slack added on top of the per-job estimate.
pub const SLACK_MS: u64 = 30_000;
/// Upper bound of the safety-net timeout.
pub const MAX_TIMEOUT_MS: u64 = 600_000;

// ---------------------------------------------------------------------------
// RecalcTimings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecalcTimings {
    pub poll_interval: Duration,
    pub poll_fallback: Duration,
    pub settle_delay: Duration,
    pub per_job: Duration,
    pub slack: Duration,
    pub max_timeout: Duration,
}

impl Default for RecalcTimings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            poll_fallback: Duration::from_millis(DEFAULT_POLL_FALLBACK_MS),
            settle_delay: Duration::from_millis(DEFAULT_SETTLE_DELAY_MS),
            per_job: Duration::from_millis(PER_JOB_MS),
            slack: Duration::from_millis(SLACK_MS),
            max_timeout: Duration::from_millis(MAX_TIMEOUT_MS),
        }
    }
}

impl RecalcTimings {
    /// Safety-net timeout for a job submitted behind `queue_depth` jobs.
    ///
    /// A depth of zero still counts as one job: the engine reported the
    /// job as in flight without giving a position.
    pub fn estimate_timeout(&self, queue_depth: u32) -> Duration {
        let jobs = queue_depth.max(1);
        self.per_job
            .saturating_mul(jobs)
            .saturating_add(self.slack)
            .min(self.max_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(d: Duration) -> u128 {
        d.as_millis()
    }

    #[test]
    fn three_jobs_deep() {
        assert_eq!(ms(RecalcTimings::default().estimate_timeout(3)), 180_000);
    }

    #[test]
    fn zero_depth_counts_as_one() {
        let timings = RecalcTimings::default();
        assert_eq!(ms(timings.estimate_timeout(0)), 80_000);
        assert_eq!(timings.estimate_timeout(0), timings.estimate_timeout(1));
    }

    #[test]
    fn deep_queue_is_capped() {
        assert_eq!(ms(RecalcTimings::default().estimate_timeout(20)), 600_000);
    }

    #[test]
    fn cap_boundary() {
        let timings = RecalcTimings::default();
        // 11 * 50s + 30s = 580s, still under the 600s cap.
        assert_eq!(ms(timings.estimate_timeout(11)), 580_000);
        assert_eq!(ms(timings.estimate_timeout(12)), 600_000);
    }

    #[test]
    fn huge_depth_does_not_overflow() {
        assert_eq!(ms(RecalcTimings::default().estimate_timeout(u32::MAX)), 600_000);
    }
}
