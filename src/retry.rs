//! Retry policy for storage calls: exponential backoff with jitter.
//!
//! ```text
//! delay before attempt k+1 = min(base_delay * 2^(k-1), max_delay) + uniform(0..=jitter)
//! ```
//!
//! Only error kinds listed in [`RetryPolicy::retryable`] are retried; every
//! other error is returned after the first attempt.

use crate::config::RetryConfig;
use crate::errors::{ErrorKind, StorageError};
use rand::{rng, Rng};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{error, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Never less than 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: Duration,
    pub retryable: Vec<ErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: Duration::from_millis(config.jitter_ms),
            retryable: vec![ErrorKind::TransientIo],
        }
    }
}

impl RetryPolicy {
    /// Policy with no sleeping between attempts.
    #[cfg(test)]
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: Duration::ZERO,
            retryable: vec![ErrorKind::TransientIo],
        }
    }

    pub fn should_retry(&self, e: &StorageError) -> bool {
        self.retryable.contains(&e.kind())
    }

    /// Backoff after failed attempt number `attempt` (1-based), without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `f` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. The last error is returned.
    pub async fn run<T, F, Fut>(&self, op: &str, mut f: F) -> Result<T, StorageError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        let total_t0 = Instant::now();
        let mut attempt = 0u32;

        loop {
            let attempt_t0 = Instant::now();
            attempt += 1;
            let e = match f().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            let attempt_dt = attempt_t0.elapsed();
            let total_dt = total_t0.elapsed();

            if !self.should_retry(&e) {
                warn!(op, attempt, kind = %e.kind(), error = %e, "not retrying");
                return Err(e);
            }
            if attempt >= self.max_attempts {
                error!(
                    op,
                    attempt,
                    max = self.max_attempts,
                    elapsed_ms_attempt = attempt_dt.as_millis() as u64,
                    elapsed_ms_total = total_dt.as_millis() as u64,
                    error = %e,
                    "exhausted retries"
                );
                return Err(e);
            }

            let jitter_ms: u64 = rng().random_range(0..=self.jitter.as_millis() as u64);
            let delay = self.backoff(attempt) + Duration::from_millis(jitter_ms);
            warn!(
                op,
                attempt,
                max = self.max_attempts,
                elapsed_ms_attempt = attempt_dt.as_millis() as u64,
                elapsed_ms_total = total_dt.as_millis() as u64,
                ?delay,
                error = %e,
                "attempt failed; backing off"
            );
            sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            ..RetryPolicy::immediate(5)
        };
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(policy.backoff(4), Duration::from_secs(5));
        assert_eq!(policy.backoff(40), Duration::from_secs(5));
    }

    #[test]
    fn test_from_config() {
        let policy = RetryPolicy::from(&RetryConfig {
            max_attempts: 0,
            ..RetryConfig::default()
        });
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.base_delay, Duration::from_secs(2));
        assert_eq!(policy.retryable, vec![ErrorKind::TransientIo]);
    }

    #[tokio::test]
    async fn test_transient_failures_retry_up_to_bound() {
        let policy = RetryPolicy::immediate(3);
        let mut calls = 0u32;
        let result: Result<(), _> = policy
            .run("write", || {
                calls += 1;
                async { Err(StorageError::TransientIo("reset".into())) }
            })
            .await;
        assert!(matches!(result, Err(StorageError::TransientIo(_))));
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn test_unauthenticated_is_not_retried() {
        let policy = RetryPolicy::immediate(5);
        let mut calls = 0u32;
        let result: Result<(), _> = policy
            .run("write", || {
                calls += 1;
                async { Err(StorageError::Unauthenticated("no key".into())) }
            })
            .await;
        assert!(matches!(result, Err(StorageError::Unauthenticated(_))));
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failure() {
        let policy = RetryPolicy::immediate(3);
        let mut calls = 0u32;
        let result = policy
            .run("read", || {
                calls += 1;
                let n = calls;
                async move {
                    if n < 2 {
                        Err(StorageError::TransientIo("timeout".into()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 2);
    }
}
