//! Configuration for the orchestration pipeline.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timeouts, retry policy, cache lifetimes and concurrency limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// TTL of extracted-content cache entries.
    ///
    /// Default: 24 hours.
    pub extracted_ttl_secs: u64,

    /// TTL of completed-analysis cache entries.
    ///
    /// Default: 7 days.
    pub analysis_ttl_secs: u64,

    /// Deadline for one analyzer invocation when the analyzer does not
    /// declare its own. Default: 30s.
    pub default_analyzer_timeout_ms: u64,

    /// Retries after the first attempt for retryable analyzer failures.
    ///
    /// Default: 2.
    pub max_retries: u32,

    /// First backoff delay; doubles per retry. Default: 200ms.
    pub backoff_base_ms: u64,

    /// Backoff ceiling before jitter. Default: 5s.
    pub backoff_cap_ms: u64,

    /// Overall deadline for one job, after which it fails as overdue.
    ///
    /// Default: 120s.
    pub job_deadline_ms: u64,

    /// Jobs executed concurrently by this process. Default: 4.
    pub max_concurrent_jobs: usize,

    /// Extra lifetime of a dedup entry past the job deadline, so an entry
    /// orphaned by a crashed process eventually frees the key. Default: 30s.
    pub dedup_lease_grace_ms: u64,

    /// Poll interval when waiting on a job owned by another process.
    ///
    /// Default: 500ms.
    pub wait_poll_interval_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            extracted_ttl_secs: 24 * 60 * 60,
            analysis_ttl_secs: 7 * 24 * 60 * 60,
            default_analyzer_timeout_ms: 30_000,
            max_retries: 2,
            backoff_base_ms: 200,
            backoff_cap_ms: 5_000,
            job_deadline_ms: 120_000,
            max_concurrent_jobs: 4,
            dedup_lease_grace_ms: 30_000,
            wait_poll_interval_ms: 500,
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_job_deadline(mut self, deadline: Duration) -> Self {
        self.job_deadline_ms = deadline.as_millis() as u64;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.backoff_base_ms = base.as_millis() as u64;
        self.backoff_cap_ms = cap.as_millis() as u64;
        self
    }

    pub fn with_max_concurrent_jobs(mut self, jobs: usize) -> Self {
        self.max_concurrent_jobs = jobs.max(1);
        self
    }

    pub fn with_dedup_lease_grace(mut self, grace: Duration) -> Self {
        self.dedup_lease_grace_ms = grace.as_millis() as u64;
        self
    }

    pub fn with_default_analyzer_timeout(mut self, timeout: Duration) -> Self {
        self.default_analyzer_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_ttls(mut self, extracted: Duration, analysis: Duration) -> Self {
        self.extracted_ttl_secs = extracted.as_secs();
        self.analysis_ttl_secs = analysis.as_secs();
        self
    }

    pub fn with_wait_poll_interval(mut self, interval: Duration) -> Self {
        self.wait_poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn extracted_ttl(&self) -> Duration {
        Duration::from_secs(self.extracted_ttl_secs)
    }

    pub fn analysis_ttl(&self) -> Duration {
        Duration::from_secs(self.analysis_ttl_secs)
    }

    pub fn default_analyzer_timeout(&self) -> Duration {
        Duration::from_millis(self.default_analyzer_timeout_ms)
    }

    pub fn job_deadline(&self) -> Duration {
        Duration::from_millis(self.job_deadline_ms)
    }

    pub fn dedup_lease(&self) -> Duration {
        Duration::from_millis(self.job_deadline_ms + self.dedup_lease_grace_ms)
    }

    pub fn wait_poll_interval(&self) -> Duration {
        Duration::from_millis(self.wait_poll_interval_ms)
    }

    /// Backoff before retry number `retry` (0-based), with full jitter on
    /// the upper half so concurrent retries spread out.
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let exp = self
            .backoff_base_ms
            .saturating_mul(1u64 << retry.min(16))
            .min(self.backoff_cap_ms);
        let half = exp / 2;
        Duration::from_millis(half + fastrand::u64(0..=half))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_is_capped() {
        let config = PipelineConfig::new().with_backoff(
            Duration::from_millis(100),
            Duration::from_millis(1_000),
        );
        for _ in 0..50 {
            let first = config.backoff_for(0);
            assert!(first >= Duration::from_millis(50) && first <= Duration::from_millis(100));

            let third = config.backoff_for(2);
            assert!(third >= Duration::from_millis(200) && third <= Duration::from_millis(400));

            let capped = config.backoff_for(30);
            assert!(capped <= Duration::from_millis(1_000));
        }
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: PipelineConfig = serde_json::from_str(r#"{"max_retries": 5}"#).unwrap();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.analysis_ttl(), Duration::from_secs(7 * 24 * 60 * 60));
    }

    #[test]
    fn test_dedup_lease_outlives_deadline() {
        let config = PipelineConfig::new().with_job_deadline(Duration::from_secs(10));
        assert!(config.dedup_lease() > config.job_deadline());
    }
}
