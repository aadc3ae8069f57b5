//! Build retry logic with exponential backoff.

use crate::error::{BuildError, BuildResult};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Retry policy for target builds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Backoff before the first retry
    pub initial_backoff_ms: u64,
    /// Upper bound on any single backoff
    pub max_backoff_ms: u64,
    /// Factor applied to the backoff after every retry
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::no_retry()
    }
}

impl RetryPolicy {
    /// No retries (fail fast)
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 60_000,
            backoff_multiplier: 2.0,
        }
    }

    /// Retry flaky commands a few times
    #[must_use]
    pub fn conservative() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 2_000,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }

    /// Whether an error is worth another attempt.
    ///
    /// Missing inputs and cancellation do not change between attempts.
    #[must_use]
    pub fn should_retry(&self, error: &BuildError) -> bool {
        !matches!(
            error,
            BuildError::DependencyUnavailable(_) | BuildError::Cancelled
        )
    }

    /// Backoff before attempt number `attempt` (0-indexed).
    #[must_use]
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let millis = {
            let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
            let scaled = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(exponent);
            scaled.min(self.max_backoff_ms as f64).max(0.0) as u64
        };
        Duration::from_millis(millis)
    }
}

/// Run `build` until it succeeds, fails with a non-retryable error, or the
/// attempts are exhausted. Returns the outcome and the attempts used.
pub async fn build_with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    target: &str,
    mut build: F,
) -> (BuildResult<T>, u32)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = BuildResult<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        if attempt > 0 {
            let backoff = policy.backoff_duration(attempt);
            tracing::warn!(
                target = %target,
                backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                attempt = attempt + 1,
                max_attempts,
                "Build failed, retrying"
            );
            tokio::time::sleep(backoff).await;
        }

        match build().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!(target = %target, attempt = attempt + 1, "Build succeeded after retry");
                }
                return (Ok(value), attempt + 1);
            }
            Err(error) => {
                attempt += 1;
                if !policy.should_retry(&error) || attempt >= max_attempts {
                    tracing::debug!(target = %target, attempts = attempt, error = %error, "Giving up");
                    return (Err(error), attempt);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            backoff_multiplier: 2.0,
        }
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff_ms: 100,
            max_backoff_ms: 1_000,
            backoff_multiplier: 2.0,
        };
        assert_eq!(policy.backoff_duration(0), Duration::ZERO);
        assert_eq!(policy.backoff_duration(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_duration(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_duration(3), Duration::from_millis(400));
        assert_eq!(policy.backoff_duration(8), Duration::from_millis(1_000));
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let (result, attempts) = build_with_retry(&fast(3), "flaky", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(BuildError::Timeout(Duration::from_secs(1)))
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result, Ok(7));
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let (result, attempts) = build_with_retry(&fast(2), "broken", || async {
            Err::<(), _>(BuildError::Spawn("no shell".to_string()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts, 2);
    }

    #[tokio::test]
    async fn test_does_not_retry_missing_dependency() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let (result, attempts) = build_with_retry(&fast(5), "t", move || async move {
            let _ = calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(BuildError::DependencyUnavailable("x".to_string()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
