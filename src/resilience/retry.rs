//! # Retry Executor
//!
//! Bounded exponential backoff with jitter. Only transient remote failures (rate limits, 408,
//! 5xx, transport errors) are retried. A retry-after hint from the provider replaces the
//! computed delay, and no retry is scheduled to start at or after the caller's deadline.

use crate::config::RetryConfig;
use crate::constants::MAX_BACKOFF_EXPONENT;
use crate::error::GuardResult;
use crate::remote::Endpoint;
use crate::resilience::Deadline;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Relative jitter amplitude, e.g. 0.2 for ±20%
    pub jitter_factor: f64,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
            jitter_factor: config.jitter_factor,
        }
    }

    /// `min(base * 2^attempt * (1 + jitter * sample), max)` for `sample` in `[-1, 1]`.
    ///
    /// `attempt` is zero-based: the delay before the first retry uses `attempt = 0`.
    pub fn backoff_delay(&self, attempt: u32, sample: f64) -> Duration {
        let exponent = attempt.min(MAX_BACKOFF_EXPONENT);
        let grown = self.base_delay.as_secs_f64() * f64::from(1u32 << exponent);
        let jittered = grown * (1.0 + self.jitter_factor * sample.clamp(-1.0, 1.0));
        let capped = jittered.max(0.0).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Delay before retry `attempt`, with a provider hint taking precedence
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>, sample: f64) -> Duration {
        retry_after.unwrap_or_else(|| self.backoff_delay(attempt, sample))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Uniform jitter sample in `[-1, 1]`
fn sample_jitter() -> f64 {
    rand::rng().random_range(-1.0..=1.0)
}

#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation` until it succeeds, fails permanently, exhausts the attempt budget or
    /// the next retry would start past `deadline`. The operation receives the zero-based
    /// attempt number.
    ///
    /// Exhausted transient failures are returned with the total attempt count recorded.
    pub async fn execute<T, F, Fut>(
        &self,
        endpoint: Endpoint,
        deadline: Deadline,
        mut operation: F,
    ) -> GuardResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = GuardResult<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            deadline.check("waiting to attempt a remote call")?;

            let error = match operation(attempt).await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(endpoint = %endpoint, attempts = attempt + 1, "Remote call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            let attempts = attempt + 1;
            if !error.is_locally_retryable() {
                return Err(error);
            }

            if attempts >= self.policy.max_attempts {
                warn!(
                    endpoint = %endpoint,
                    attempts = attempts,
                    error = %error,
                    "Retry attempts exhausted"
                );
                return Err(error.with_attempts(attempts));
            }

            let delay = self
                .policy
                .delay_for(attempt, error.retry_after(), sample_jitter());
            if !deadline.allows(delay) {
                warn!(
                    endpoint = %endpoint,
                    attempts = attempts,
                    delay_ms = delay.as_millis(),
                    remaining_ms = deadline.remaining().as_millis(),
                    "Next retry would start past the deadline, giving up"
                );
                return Err(error.with_attempts(attempts));
            }

            debug!(
                endpoint = %endpoint,
                attempt = attempts,
                delay_ms = delay.as_millis(),
                hinted = error.retry_after().is_some(),
                "Retrying remote call"
            );
            tokio::time::sleep(delay).await;
            attempt = attempts;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GuardError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            jitter_factor: 0.2,
        }
    }

    fn transient(retry_after: Option<Duration>) -> GuardError {
        GuardError::TransientRemote {
            endpoint: "batch_update".into(),
            attempts: 1,
            status: Some(503),
            message: "unavailable".into(),
            retry_after,
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = policy();
        assert_eq!(policy.backoff_delay(0, 0.0), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(1, 0.0), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(3, 0.0), Duration::from_millis(800));
        assert_eq!(policy.backoff_delay(4, 0.0), Duration::from_secs(1));
        assert_eq!(policy.backoff_delay(40, 1.0), Duration::from_secs(1));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = policy();
        let low = policy.backoff_delay(1, -1.0);
        let high = policy.backoff_delay(1, 1.0);
        assert!((low.as_secs_f64() - 0.16).abs() < 1e-9);
        assert!((high.as_secs_f64() - 0.24).abs() < 1e-9);
    }

    #[test]
    fn retry_after_overrides_computed_delay() {
        let policy = policy();
        assert_eq!(
            policy.delay_for(0, Some(Duration::from_secs(7)), 1.0),
            Duration::from_secs(7)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_until_success() {
        let executor = RetryExecutor::new(policy());
        let calls = AtomicU32::new(0);

        let result = executor
            .execute(Endpoint::BatchUpdate, Deadline::after(Duration::from_secs(30)), |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err(transient(None))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_errors_are_not_retried() {
        let executor = RetryExecutor::new(policy());
        let calls = AtomicU32::new(0);

        let result: GuardResult<()> = executor
            .execute(Endpoint::BatchUpdate, Deadline::after(Duration::from_secs(30)), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(GuardError::PermanentRemote {
                        endpoint: "batch_update".into(),
                        status: Some(400),
                        message: "bad request".into(),
                    })
                }
            })
            .await;

        assert_eq!(result.unwrap_err().code(), "PERMANENT_REMOTE_ERROR");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_reports_attempts() {
        let executor = RetryExecutor::new(policy());

        let result: GuardResult<()> = executor
            .execute(Endpoint::ReadValues, Deadline::after(Duration::from_secs(30)), |_| async {
                Err(transient(None))
            })
            .await;

        match result.unwrap_err() {
            GuardError::TransientRemote { attempts, .. } => assert_eq!(attempts, 4),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn honours_retry_after_hint() {
        let executor = RetryExecutor::new(policy());
        let start = tokio::time::Instant::now();

        let result = executor
            .execute(Endpoint::BatchUpdate, Deadline::after(Duration::from_secs(30)), |attempt| async move {
                if attempt == 0 {
                    Err(transient(Some(Duration::from_secs(5))))
                } else {
                    Ok(())
                }
            })
            .await;

        assert!(result.is_ok());
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn does_not_schedule_past_deadline() {
        let executor = RetryExecutor::new(policy());
        let calls = AtomicU32::new(0);

        let result: GuardResult<()> = executor
            .execute(Endpoint::BatchUpdate, Deadline::after(Duration::from_secs(2)), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(transient(Some(Duration::from_secs(3)))) }
            })
            .await;

        assert_eq!(result.unwrap_err().code(), "TRANSIENT_REMOTE_ERROR");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
