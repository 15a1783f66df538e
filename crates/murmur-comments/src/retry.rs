//! Retry with exponential backoff
//!
//! Used only for background revalidation. User-initiated mutations are never
//! retried: a failed mutation rolls back immediately.

use murmur_core::{ApiError, RandomEffects};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Backoff strategy for retry delays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    /// Exponential increase: delay * 2^attempt
    Exponential,
    /// Exponential with up to 10% random jitter to spread out retries
    ExponentialWithJitter,
}

impl BackoffStrategy {
    /// Delay before retry number `attempt` (0 = first retry).
    ///
    /// `jitter_sample` is a value in `[0, 1)`; it is ignored by
    /// [`BackoffStrategy::Exponential`].
    pub fn calculate_delay(
        &self,
        attempt: u32,
        initial_delay: Duration,
        max_delay: Duration,
        jitter_sample: f64,
    ) -> Duration {
        let base_delay = initial_delay.saturating_mul(2u32.saturating_pow(attempt));
        let delay = match self {
            Self::Exponential => base_delay,
            Self::ExponentialWithJitter => {
                let jitter = (base_delay.as_millis() as f64 * 0.1 * jitter_sample) as u64;
                base_delay.saturating_add(Duration::from_millis(jitter))
            }
        };
        delay.min(max_delay)
    }
}

/// Retry policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Backoff strategy
    pub strategy: BackoffStrategy,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0 = first retry).
    pub fn delay_for(&self, attempt: u32, jitter_sample: f64) -> Duration {
        self.strategy
            .calculate_delay(attempt, self.initial_delay, self.max_delay, jitter_sample)
    }
}

/// Run `operation` until it succeeds, fails permanently, or the policy is exhausted.
///
/// Only transient errors (see [`ApiError::is_transient`]) are retried.
pub async fn retry_with_backoff<T, F, Fut, R>(
    policy: &RetryPolicy,
    random: &R,
    label: &str,
    mut operation: F,
) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
    R: RandomEffects + ?Sized,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                attempt += 1;
                if !error.is_transient() || attempt >= policy.max_attempts {
                    debug!(
                        operation = label,
                        attempts = attempt,
                        error = %error,
                        "Giving up on request"
                    );
                    return Err(error);
                }
                let delay = policy.delay_for(attempt - 1, random.random_unit());
                warn!(
                    operation = label,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Request failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_core::SystemEffects;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            strategy: BackoffStrategy::Exponential,
        }
    }

    #[test]
    fn test_backoff_calculation() {
        let policy = policy(5);
        assert_eq!(policy.delay_for(0, 0.5), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1, 0.5), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2, 0.5), Duration::from_millis(400));
        assert_eq!(policy.delay_for(10, 0.5), Duration::from_secs(1)); // Capped
    }

    #[test]
    fn test_jitter_stays_within_ten_percent() {
        let strategy = BackoffStrategy::ExponentialWithJitter;
        let initial = Duration::from_millis(1_000);
        let max = Duration::from_secs(60);
        assert_eq!(strategy.calculate_delay(0, initial, max, 0.0), initial);
        let high = strategy.calculate_delay(0, initial, max, 0.999);
        assert!(high > initial && high < Duration::from_millis(1_100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_errors_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(&policy(5), &SystemEffects, "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ApiError::new(503, "busy"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_at_retry_ceiling() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff(&policy(3), &SystemEffects, "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ApiError::network("offline")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff(&policy(5), &SystemEffects, "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ApiError::new(403, "forbidden")) }
        })
        .await;

        assert_eq!(result, Err(ApiError::new(403, "forbidden")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
