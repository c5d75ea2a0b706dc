//! Bounded exponential backoff

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::config::ResilienceConfig;
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_secs(1),
            backoff_factor: 2.0,
        }
    }
}

/// Result of a retried operation plus how many attempts it took
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T>,
    pub attempts: u32,
}

impl<T> RetryOutcome<T> {
    /// Retries consumed beyond the first attempt
    pub fn retries_used(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

impl RetryPolicy {
    pub fn from_config(config: &ResilienceConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_base: config.backoff_base(),
            backoff_factor: config.backoff_factor,
        }
    }

    /// Delay before retry number `retry` (0-based): base * factor^retry
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        self.backoff_base
            .mul_f64(self.backoff_factor.powi(exponent).min(u32::MAX as f64))
    }

    /// Run `operation` until it succeeds, fails with a non-transient error,
    /// or `max_retries` retries have been spent
    ///
    /// The closure receives the 1-based attempt number.
    pub async fn run<F, Fut, T>(&self, label: &str, mut operation: F) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_retries + 1;
        let mut attempt = 1;

        loop {
            match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        info!("Succeeded on {} at attempt {}", label, attempt);
                    }
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                    };
                }
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.delay_for(attempt - 1);
                    warn!(
                        "Transient error on {} (attempt {}/{}): {}. Retrying in {:?}...",
                        label, attempt, max_attempts, e, delay
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_transient() {
                        error!(
                            "Max retries ({}) exceeded on {}: {}",
                            self.max_retries, label, e
                        );
                    }
                    return RetryOutcome {
                        result: Err(e),
                        attempts: attempt,
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{PlatformError, PostflowError};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff_base: Duration::from_millis(1),
            backoff_factor: 2.0,
        }
    }

    #[test]
    fn test_default_delays_double() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_success_first_attempt() {
        let outcome = fast_policy(3).run("test", |_| async { Ok(42) }).await;
        assert_eq!(outcome.result.unwrap(), 42);
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn test_success_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let outcome = fast_policy(3)
            .run("test", |_| async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(PlatformError::Http {
                        status: 503,
                        message: "unavailable".to_string(),
                    }
                    .into())
                } else {
                    Ok("posted")
                }
            })
            .await;

        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.retries_used(), 2);
        assert_eq!(outcome.result.unwrap(), "posted");
    }

    #[tokio::test]
    async fn test_permanent_error_does_not_retry() {
        let calls = AtomicU32::new(0);
        let outcome: RetryOutcome<()> = fast_policy(3)
            .run("test", |_| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(PlatformError::Http {
                    status: 400,
                    message: "bad request".to_string(),
                }
                .into())
            })
            .await;

        assert!(outcome.result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.retries_used(), 0);
    }

    #[tokio::test]
    async fn test_exhausted_retries_return_last_error() {
        let outcome: RetryOutcome<()> = fast_policy(3)
            .run("test", |attempt| async move {
                Err(PlatformError::Network(format!("attempt {}", attempt)).into())
            })
            .await;

        assert_eq!(outcome.attempts, 4);
        assert_eq!(outcome.retries_used(), 3);
        match outcome.result {
            Err(PostflowError::Platform(PlatformError::Network(message))) => {
                assert_eq!(message, "attempt 4");
            }
            other => panic!("Expected network error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_circuit_open_is_not_retried() {
        let calls = AtomicU32::new(0);
        let outcome: RetryOutcome<()> = fast_policy(3)
            .run("test", |_| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(PlatformError::CircuitOpen("instagram".to_string()).into())
            })
            .await;

        assert!(outcome.result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
