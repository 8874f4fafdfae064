//! Orchestrator configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::config::JobsConfig;

/// Exponential backoff between acquisition attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
}

impl BackoffPolicy {
    /// Delay before the attempt following `attempt` (1-based).
    ///
    /// `initial * multiplier^(attempt-1)`, capped at `max`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let millis = self.initial.as_millis() as f64 * factor;
        let capped = millis.min(self.max.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from(&JobsConfig::default())
    }
}

impl From<&JobsConfig> for BackoffPolicy {
    fn from(jobs: &JobsConfig) -> Self {
        Self {
            initial: Duration::from_millis(jobs.initial_backoff_ms),
            max: Duration::from_millis(jobs.max_backoff_ms),
            multiplier: jobs.backoff_multiplier,
        }
    }
}

/// Settings for driving one job through the pipeline.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Attempts per job, including the first.
    pub max_attempts: u32,
    /// Deadline measured from job creation.
    pub per_job_timeout: Duration,
    /// Bound on one agent fetch including the transfer.
    pub fetch_timeout: Duration,
    pub backoff: BackoffPolicy,
    /// Parent of per-job scratch directories.
    pub work_dir: PathBuf,
    /// First component of artifact keys.
    pub key_prefix: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from(&JobsConfig::default())
    }
}

impl From<&JobsConfig> for OrchestratorConfig {
    fn from(jobs: &JobsConfig) -> Self {
        Self {
            max_attempts: jobs.max_attempts.max(1),
            per_job_timeout: jobs.per_job_timeout(),
            fetch_timeout: jobs.fetch_timeout(),
            backoff: BackoffPolicy::from(jobs),
            work_dir: jobs.work_dir.clone(),
            key_prefix: jobs.key_prefix.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.per_job_timeout, Duration::from_secs(30 * 60));
        assert_eq!(config.backoff.initial, Duration::from_secs(2));
        assert_eq!(config.key_prefix, "downloads");
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = BackoffPolicy {
            initial: Duration::from_millis(100),
            max: Duration::from_millis(1000),
            multiplier: 2.0,
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(400));
        assert_eq!(policy.delay_after(5), Duration::from_millis(1000));
        assert_eq!(policy.delay_after(1000), Duration::from_millis(1000));
    }

    #[test]
    fn test_backoff_flat_multiplier() {
        let policy = BackoffPolicy {
            initial: Duration::from_millis(50),
            max: Duration::from_millis(1000),
            multiplier: 1.0,
        };
        assert_eq!(policy.delay_after(4), Duration::from_millis(50));
    }

    #[test]
    fn test_zero_attempts_clamped() {
        let jobs = JobsConfig {
            max_attempts: 0,
            ..Default::default()
        };
        assert_eq!(OrchestratorConfig::from(&jobs).max_attempts, 1);
    }
}
