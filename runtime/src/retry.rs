//! Bounded retry for transient failures.
//!
//! Two entry points:
//!
//! - [`retry_with_predicate`]: plain retry loop, used by HTTP clients;
//! - [`retry_until_shutdown`]: the consumer-side executor, which also aborts
//!   as soon as the worker's [`Shutdown`] fires during a backoff delay.
//!
//! # Example
//!
//! ```rust
//! use catalog_runtime::retry::{RetryPolicy, retry_with_predicate};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), String> {
//! let policy = RetryPolicy::builder()
//!     .max_attempts(3)
//!     .delay(Duration::from_millis(10))
//!     .build();
//!
//! let value = retry_with_predicate(
//!     &policy,
//!     || async { Ok::<_, String>(42) },
//!     |err: &String| err.contains("transient"),
//! )
//! .await?;
//! assert_eq!(value, 42);
//! # Ok(())
//! # }
//! ```

use crate::metrics::RetryMetrics;
use crate::shutdown::Shutdown;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Same delay every time.
    Fixed,
    /// `delay * n` before the n-th retry.
    Linear,
    /// `delay * multiplier^(n-1)` before the n-th retry.
    Exponential {
        /// Growth factor
        multiplier: f64,
    },
}

/// Retry policy.
///
/// # Default Values
///
/// - `max_attempts`: 3 (including the first call)
/// - `delay`: 300ms
/// - `max_delay`: 30 seconds
/// - `backoff`: [`Backoff::Fixed`]
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Base delay between attempts
    pub delay: Duration,
    /// Cap on any single delay
    pub max_delay: Duration,
    /// Delay growth
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(300),
            max_delay: Duration::from_secs(30),
            backoff: Backoff::Fixed,
        }
    }
}

impl RetryPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            policy: Self::default(),
        }
    }

    /// Delay to wait after the `failures`-th failed attempt (1-based).
    #[must_use]
    pub fn delay_for_attempt(&self, failures: u32) -> Duration {
        let failures = failures.max(1);
        let delay = match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Linear => self.delay.saturating_mul(failures),
            Backoff::Exponential { multiplier } => {
                let exponent = i32::try_from(failures - 1).unwrap_or(i32::MAX);
                self.delay.mul_f64(multiplier.powi(exponent).clamp(0.0, 1.0e6))
            }
        };
        delay.min(self.max_delay)
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicyBuilder {
    /// Set total attempts (values below 1 are treated as 1).
    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.policy.max_attempts = attempts.max(1);
        self
    }

    /// Set the base delay.
    #[must_use]
    pub const fn delay(mut self, delay: Duration) -> Self {
        self.policy.delay = delay;
        self
    }

    /// Set the delay cap.
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.policy.max_delay = delay;
        self
    }

    /// Set the growth strategy.
    #[must_use]
    pub const fn backoff(mut self, backoff: Backoff) -> Self {
        self.policy.backoff = backoff;
        self
    }

    /// Build the [`RetryPolicy`].
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        self.policy
    }
}

/// Why a cancellable retry gave up.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// Every attempt failed with a retryable error.
    #[error("gave up after {attempts} attempts: {error}")]
    Exhausted {
        /// Attempts made
        attempts: u32,
        /// Error of the last attempt
        error: E,
    },

    /// The error was classified as not worth retrying.
    #[error("non-retryable error: {0}")]
    Rejected(E),

    /// Shutdown was signalled while waiting to retry.
    #[error("retry cancelled by shutdown")]
    Cancelled,
}

/// Retry `operation` while `is_retryable` accepts its error.
///
/// Returns the last error once `max_attempts` is reached, or the first
/// non-retryable error immediately.
///
/// # Errors
///
/// Returns the error of the final attempt.
pub async fn retry_with_predicate<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    mut operation: F,
    is_retryable: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;

    loop {
        attempt += 1;
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(attempt, "Operation succeeded after retry");
                    RetryMetrics::record_success();
                }
                return Ok(result);
            }
            Err(err) => {
                if !is_retryable(&err) {
                    tracing::debug!(error = %err, "Error is not retryable, failing immediately");
                    return Err(err);
                }
                if attempt >= policy.max_attempts {
                    tracing::warn!(attempt, error = %err, "Operation failed after max attempts");
                    RetryMetrics::record_exhausted();
                    return Err(err);
                }

                let delay = policy.delay_for_attempt(attempt);
                tracing::debug!(
                    attempt,
                    delay_ms = delay.as_millis(),
                    error = %err,
                    "Operation failed, retrying..."
                );
                RetryMetrics::record_attempt();
                sleep(delay).await;
            }
        }
    }
}

/// Retry `operation` under `policy`, aborting if `shutdown` fires.
///
/// The operation itself is never interrupted; cancellation is only observed
/// while waiting between attempts.
///
/// # Errors
///
/// - [`RetryError::Rejected`] for the first error `is_retryable` refuses;
/// - [`RetryError::Exhausted`] once `max_attempts` have failed;
/// - [`RetryError::Cancelled`] if shutdown fires during a delay.
pub async fn retry_until_shutdown<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    shutdown: &Shutdown,
    mut operation: F,
    is_retryable: P,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut shutdown = shutdown.clone();
    let mut attempt = 0;

    loop {
        attempt += 1;
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(attempt, "Operation succeeded after retry");
                    RetryMetrics::record_success();
                }
                return Ok(result);
            }
            Err(err) => {
                if !is_retryable(&err) {
                    tracing::warn!(error = %err, "Error is not retryable, failing immediately");
                    return Err(RetryError::Rejected(err));
                }
                if attempt >= policy.max_attempts {
                    tracing::error!(attempt, error = %err, "Operation failed after max attempts");
                    RetryMetrics::record_exhausted();
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        error: err,
                    });
                }

                let delay = policy.delay_for_attempt(attempt);
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis(),
                    error = %err,
                    "Operation failed, retrying..."
                );
                RetryMetrics::record_attempt();

                tokio::select! {
                    () = sleep(delay) => {}
                    () = shutdown.wait() => {
                        tracing::info!(attempt, "Shutdown during retry backoff, abandoning");
                        return Err(RetryError::Cancelled);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::shutdown;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(attempts: u32) -> RetryPolicy {
        RetryPolicy::builder()
            .max_attempts(attempts)
            .delay(Duration::from_millis(5))
            .build()
    }

    #[test]
    fn test_default_policy_is_three_fixed_attempts() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(300));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(300));
    }

    #[test]
    fn test_linear_and_exponential_delays() {
        let linear = RetryPolicy::builder()
            .delay(Duration::from_millis(100))
            .backoff(Backoff::Linear)
            .build();
        assert_eq!(linear.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(linear.delay_for_attempt(3), Duration::from_millis(300));

        let exponential = RetryPolicy::builder()
            .delay(Duration::from_millis(100))
            .max_delay(Duration::from_millis(350))
            .backoff(Backoff::Exponential { multiplier: 2.0 })
            .build();
        assert_eq!(exponential.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(exponential.delay_for_attempt(3), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn test_succeeds_after_failures() {
        let counter = Arc::new(AtomicU32::new(0));
        let calls = Arc::clone(&counter);

        let result = retry_until_shutdown(
            &fast(3),
            &Shutdown::never(),
            || {
                let c = Arc::clone(&calls);
                async move {
                    let n = c.fetch_add(1, Ordering::SeqCst);
                    if n < 2 { Err(format!("attempt {n} failed")) } else { Ok(n) }
                }
            },
            |_| true,
        )
        .await;

        assert_eq!(result, Ok(2));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausts_after_max_attempts() {
        let counter = Arc::new(AtomicU32::new(0));
        let calls = Arc::clone(&counter);

        let result: Result<(), _> = retry_until_shutdown(
            &fast(3),
            &Shutdown::never(),
            || {
                let c = Arc::clone(&calls);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err("down".to_string())
                }
            },
            |_| true,
        )
        .await;

        assert_eq!(
            result,
            Err(RetryError::Exhausted {
                attempts: 3,
                error: "down".to_string()
            })
        );
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_stops_immediately() {
        let counter = Arc::new(AtomicU32::new(0));
        let calls = Arc::clone(&counter);

        let result: Result<(), _> = retry_until_shutdown(
            &fast(3),
            &Shutdown::never(),
            || {
                let c = Arc::clone(&calls);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err("fatal".to_string())
                }
            },
            |err: &String| err != "fatal",
        )
        .await;

        assert_eq!(result, Err(RetryError::Rejected("fatal".to_string())));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_aborts_backoff() {
        let (trigger, observer) = shutdown::channel();
        let policy = RetryPolicy::builder()
            .max_attempts(5)
            .delay(Duration::from_secs(60))
            .build();

        let handle = tokio::spawn(async move {
            retry_until_shutdown(
                &policy,
                &observer,
                || async { Err::<(), _>("down".to_string()) },
                |_| true,
            )
            .await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.trigger();

        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, Err(RetryError::Cancelled));
    }

    #[tokio::test]
    async fn test_plain_retry_returns_last_error() {
        let counter = Arc::new(AtomicU32::new(0));
        let calls = Arc::clone(&counter);

        let result: Result<(), String> = retry_with_predicate(
            &fast(2),
            || {
                let c = Arc::clone(&calls);
                async move {
                    let n = c.fetch_add(1, Ordering::SeqCst);
                    Err(format!("failure {n}"))
                }
            },
            |_| true,
        )
        .await;

        assert_eq!(result, Err("failure 1".to_string()));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
