//! Exponential backoff.
//!
//! Used in two places: webhook delivery retries transient send failures
//! inline, and the state machine spaces out automatic re-checks after a
//! patch test fails for infrastructure reasons.

use std::future::Future;
use std::time::Duration;

/// Configuration for exponential backoff retry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not including the initial attempt).
    pub max_retries: u32,

    /// Delay before the first retry.
    pub initial_delay: Duration,

    /// Cap for exponential growth.
    pub max_delay: Duration,

    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Webhook delivery: 1s, 2s, 4s, 8s, 16s.
    pub const DELIVERY: Self = Self {
        max_retries: 5,
        initial_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(30),
        backoff_multiplier: 2.0,
    };

    /// Automatic re-check after a failed patch test: 2s doubling, 60s cap.
    pub const CHECK: Self = Self {
        max_retries: 3,
        initial_delay: Duration::from_secs(2),
        max_delay: Duration::from_secs(60),
        backoff_multiplier: 2.0,
    };

    pub fn new(
        max_retries: u32,
        initial_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
            backoff_multiplier,
        }
    }

    /// Same delays, different attempt budget.
    pub fn with_max_retries(self, max_retries: u32) -> Self {
        Self {
            max_retries,
            ..self
        }
    }

    /// Delay before retry number `attempt` (0-indexed):
    /// `initial_delay * backoff_multiplier^attempt`, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let multiplier = self.backoff_multiplier.powi(exponent);
        let delay_secs = self.initial_delay.as_secs_f64() * multiplier;
        let capped_secs = delay_secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped_secs)
    }

    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_retries).map(|attempt| self.delay_for_attempt(attempt))
    }

    pub fn total_max_wait(&self) -> Duration {
        self.delays().sum()
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::DELIVERY
    }
}

/// Errors that know whether trying again could help.
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

/// Result of a retried operation.
#[derive(Debug)]
pub enum RetryResult<T, E> {
    Success(T),

    /// Every attempt failed transiently.
    ExhaustedRetries { last_error: E, attempts: u32 },

    /// An attempt failed in a way retrying cannot fix.
    PermanentError(E),
}

impl<T, E> RetryResult<T, E> {
    pub fn into_result(self) -> Result<T, E> {
        match self {
            RetryResult::Success(v) => Ok(v),
            RetryResult::ExhaustedRetries { last_error, .. } => Err(last_error),
            RetryResult::PermanentError(e) => Err(e),
        }
    }
}

/// Runs `operation` until it succeeds, fails permanently, or runs out of
/// retries, sleeping between attempts.
pub async fn retry_with_backoff<T, E, F, Fut>(config: RetryConfig, mut operation: F) -> RetryResult<T, E>
where
    E: Retryable,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = config.max_retries + 1;
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(value) => return RetryResult::Success(value),
            Err(e) => {
                attempt += 1;
                if !e.is_transient() {
                    return RetryResult::PermanentError(e);
                }
                if attempt >= max_attempts {
                    return RetryResult::ExhaustedRetries {
                        last_error: e,
                        attempts: attempt,
                    };
                }
                tokio::time::sleep(config.delay_for_attempt(attempt - 1)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, PartialEq)]
    enum TestError {
        Flaky,
        Broken,
    }

    impl Retryable for TestError {
        fn is_transient(&self) -> bool {
            matches!(self, TestError::Flaky)
        }
    }

    fn fast(max_retries: u32) -> RetryConfig {
        RetryConfig::new(
            max_retries,
            Duration::from_millis(1),
            Duration::from_millis(5),
            2.0,
        )
    }

    // ─── Delays ───

    #[test]
    fn check_delays_double_then_cap() {
        let config = RetryConfig::CHECK.with_max_retries(7);
        let delays: Vec<_> = config.delays().map(|d| d.as_secs()).collect();
        assert_eq!(delays, vec![2, 4, 8, 16, 32, 60, 60]);
    }

    #[test]
    fn delivery_total_wait() {
        assert_eq!(RetryConfig::DELIVERY.total_max_wait(), Duration::from_secs(31));
    }

    #[test]
    fn huge_attempt_numbers_stay_capped() {
        assert_eq!(
            RetryConfig::CHECK.delay_for_attempt(u32::MAX),
            Duration::from_secs(60)
        );
    }

    // ─── Retry loop ───

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = retry_with_backoff(fast(3), move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(TestError::Flaky)
                } else {
                    Ok("done")
                }
            }
        })
        .await;
        assert!(matches!(result, RetryResult::Success("done")));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_error_stops_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: RetryResult<(), _> = retry_with_backoff(fast(5), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(TestError::Broken) }
        })
        .await;
        assert!(matches!(result, RetryResult::PermanentError(TestError::Broken)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_after_max_retries() {
        let result: RetryResult<(), _> =
            retry_with_backoff(fast(2), || async { Err(TestError::Flaky) }).await;
        match result {
            RetryResult::ExhaustedRetries { attempts, last_error } => {
                assert_eq!(attempts, 3);
                assert_eq!(last_error, TestError::Flaky);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    proptest! {
        #[test]
        fn delays_never_exceed_cap(attempt in 0u32..200, initial_ms in 1u64..5000, cap_ms in 1u64..120_000) {
            let config = RetryConfig::new(10, Duration::from_millis(initial_ms), Duration::from_millis(cap_ms), 2.0);
            prop_assert!(config.delay_for_attempt(attempt) <= Duration::from_millis(cap_ms) + Duration::from_micros(1));
        }

        #[test]
        fn delays_are_monotonic(attempt in 0u32..50) {
            let config = RetryConfig::CHECK;
            prop_assert!(config.delay_for_attempt(attempt) <= config.delay_for_attempt(attempt + 1));
        }
    }
}
