use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{BlueGreenError, ErrorKind};

/// Delay schedule between attempts.
#[derive(Clone, Debug, PartialEq)]
pub enum Backoff {
    Fixed(Duration),
    /// `unit * base^n` for the n-th retry, capped.
    Exponential { base: u32, unit: Duration, cap: Duration },
}

/// Explicit retry policy, used for target-system calls and for task re-submission.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::fixed(10, Duration::from_secs(3))
    }
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::Fixed(delay),
        }
    }

    /// Policy allowing `max_retries` retries after the first attempt, waiting `base^n` seconds
    /// before the n-th retry.
    pub fn exponential(base: u32, max_retries: u32) -> Self {
        Self {
            max_attempts: max_retries.saturating_add(1),
            backoff: Backoff::Exponential {
                base,
                unit: Duration::from_secs(1),
                cap: Duration::from_secs(24 * 60 * 60),
            },
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_attempts.saturating_sub(1)
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        match &self.backoff {
            Backoff::Fixed(delay) => *delay,
            Backoff::Exponential { base, unit, cap } => {
                let factor = base.saturating_pow(retry);
                unit.saturating_mul(factor).min(*cap)
            }
        }
    }

    /// Whether retry number `retry` (1-based) is still within budget.
    pub fn allows_retry(&self, retry: u32) -> bool {
        retry < self.max_attempts
    }

    /// Run `op` until it succeeds or the attempt budget is spent.
    ///
    /// Protocol state violations are never retried.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, BlueGreenError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, BlueGreenError>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if err.kind == ErrorKind::ProtocolState => return Err(err),
                Err(err) if self.allows_retry(attempt) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        target: "retry",
                        label,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "attempt failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
