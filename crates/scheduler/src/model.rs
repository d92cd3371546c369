use std::path::PathBuf;
use std::time::Duration;

use bluegreen_core_types::RetryPolicy;

use crate::error::SchedulerError;

#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// Snapshot root: `{root}/{tenant}/{timestamp}/{nodes,relationships}`.
    pub data_path: PathBuf,
    pub num_workers: usize,
    pub scan_interval: Duration,
    pub max_retries: u32,
    pub retry_backoff_base: u32,
    /// Worker pause after an unhealthy verdict.
    pub health_check_retry_delay: Duration,
    pub shutdown_timeout: Duration,
    pub status_interval: Duration,
    pub status_file: Option<PathBuf>,
    pub keep_count: usize,
    /// Skip snapshots whose generation is already online on the target.
    pub skip_existing_generations: bool,
    /// Longest a worker blocks on an empty queue before re-checking for stop.
    pub dequeue_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("data"),
            num_workers: 1,
            scan_interval: Duration::from_secs(30),
            max_retries: 3,
            retry_backoff_base: 2,
            health_check_retry_delay: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(300),
            status_interval: Duration::from_secs(5),
            status_file: Some(PathBuf::from("orchestrator_status.json")),
            keep_count: 2,
            skip_existing_generations: true,
            dequeue_timeout: Duration::from_secs(1),
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.num_workers < 1 {
            return Err(SchedulerError::InvalidConfig(
                "num_workers must be at least 1".into(),
            ));
        }
        if self.scan_interval < Duration::from_secs(1) {
            return Err(SchedulerError::InvalidConfig(
                "scan_interval must be at least 1 second".into(),
            ));
        }
        if self.keep_count < 1 {
            return Err(SchedulerError::InvalidConfig(
                "keep_count must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(self.retry_backoff_base, self.max_retries)
    }
}

/// What a worker did with one dequeued task.
#[derive(Clone, Debug, PartialEq)]
pub enum TaskOutcome {
    /// Health gate refused; the task went back to the queue untouched.
    Deferred,
    Completed { cutover: bool },
    Retrying { retry: u32, delay: Duration },
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_workers_and_short_interval() {
        let config = OrchestratorConfig {
            num_workers: 0,
            ..OrchestratorConfig::default()
        };
        assert!(matches!(config.validate(), Err(SchedulerError::InvalidConfig(_))));

        let config = OrchestratorConfig {
            scan_interval: Duration::from_millis(200),
            ..OrchestratorConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(OrchestratorConfig::default().validate().is_ok());
    }

    #[test]
    fn retry_policy_follows_backoff_base() {
        let policy = OrchestratorConfig::default().retry_policy();
        assert_eq!(policy.max_retries(), 3);
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
    }
}
