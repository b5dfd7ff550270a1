//! Retry logic.
//!
//! # Responsibilities
//! - Run a fallible async operation up to `max_attempts` times
//! - Sleep with exponential backoff + jitter between attempts
//! - Report the last error once attempts are exhausted

use std::future::Future;
use std::time::Duration;

use crate::config::JobRunnerConfig;
use crate::resilience::backoff::calculate_backoff;

/// Attempt budget and backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

/// Returned when every attempt failed.
#[derive(Debug)]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub last: E,
}

impl RetryPolicy {
    pub fn from_config(config: &JobRunnerConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    /// Delay between attempt `attempt` and the next one (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, self.base_delay, self.max_delay)
    }

    /// Run `op` until it succeeds or the budget is spent. `op` receives the
    /// 1-based attempt number.
    pub async fn run<F, Fut, T, E>(&self, mut op: F) -> Result<T, Exhausted<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= self.max_attempts => {
                    return Err(Exhausted { attempts: attempt, last: e });
                }
                Err(e) => {
                    let delay = self.delay_after(attempt);
                    tracing::warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
