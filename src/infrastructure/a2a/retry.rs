use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::error::ProtocolError;
use crate::domain::models::RetryConfig;

/// Retry policy with exponential backoff
///
/// Backoff doubles with each retry and is capped: 200ms → 400ms → 800ms → …
/// → 5s (max) with the defaults.
///
/// `max_retries` is the total transmission budget, first attempt included:
/// a call that keeps failing transiently is transmitted exactly
/// `max_retries` times.
///
/// # Retry Decision
/// - Retry on: connection failures, resets, timeouts, 5xx, 408, 429
/// - Do NOT retry: malformed responses, 4xx, structured remote errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total transmissions before giving up (at least 1)
    pub max_retries: u32,

    /// Initial backoff duration in milliseconds
    pub initial_backoff_ms: u64,

    /// Maximum backoff duration in milliseconds
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 5_000,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(
            config.max_retries,
            config.initial_backoff_ms,
            config.max_backoff_ms,
        )
    }
}

impl RetryPolicy {
    /// Create a new retry policy with custom settings
    pub fn new(max_retries: u32, initial_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            max_retries: max_retries.max(1),
            initial_backoff_ms,
            max_backoff_ms: max_backoff_ms.max(initial_backoff_ms),
        }
    }

    /// Same backoff, different budget.
    #[must_use]
    pub fn with_max_retries(self, max_retries: u32) -> Self {
        Self {
            max_retries: max_retries.max(1),
            ..self
        }
    }

    /// Execute an operation with exponential backoff retry logic
    ///
    /// The operation receives the zero-based attempt number. Non-transient
    /// errors are returned as-is after the first failure. When the budget is
    /// spent on transient errors the result is
    /// [`ProtocolError::Exhausted`] carrying the attempt count and the last
    /// cause.
    ///
    /// # Example
    /// ```no_run
    /// # use meshwork::infrastructure::a2a::{RetryPolicy, ProtocolError};
    /// # async fn example() -> Result<u32, ProtocolError> {
    /// let policy = RetryPolicy::new(3, 200, 5_000);
    ///
    /// let result = policy.execute(|_attempt| async {
    ///     Ok(42)
    /// }).await?;
    /// # Ok(result)
    /// # }
    /// ```
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T, ProtocolError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ProtocolError>>,
    {
        let mut attempt = 0;

        loop {
            match operation(attempt).await {
                Ok(result) => {
                    if attempt > 0 {
                        debug!(attempts = attempt + 1, "operation succeeded after retry");
                    }
                    return Ok(result);
                }
                Err(err) if !err.is_transient() => {
                    debug!(error = %err, "permanent error, not retrying");
                    return Err(err);
                }
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.max_retries {
                        warn!(attempts = attempt, error = %err, "retry budget exhausted");
                        return Err(ProtocolError::Exhausted {
                            attempts: attempt,
                            last_cause: Box::new(err),
                        });
                    }

                    let backoff = self.calculate_backoff(attempt - 1);
                    warn!(
                        attempt,
                        max_retries = self.max_retries,
                        backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "transient failure, retrying"
                    );
                    sleep(backoff).await;
                }
            }
        }
    }

    /// Calculate backoff duration for a given retry
    ///
    /// Formula: min(initial_backoff * 2^retry, max_backoff), `retry` 0-indexed.
    pub fn calculate_backoff(&self, retry: u32) -> Duration {
        let backoff_ms = self
            .initial_backoff_ms
            .saturating_mul(2_u64.saturating_pow(retry))
            .min(self.max_backoff_ms);

        Duration::from_millis(backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::TransportError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn timeout_error() -> ProtocolError {
        ProtocolError::Transient(TransportError::Timeout(Duration::from_millis(10)))
    }

    #[test]
    fn test_calculate_backoff() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.calculate_backoff(0), Duration::from_millis(200));
        assert_eq!(policy.calculate_backoff(1), Duration::from_millis(400));
        assert_eq!(policy.calculate_backoff(2), Duration::from_millis(800));
        assert_eq!(policy.calculate_backoff(5), Duration::from_millis(5_000));
        assert_eq!(policy.calculate_backoff(60), Duration::from_millis(5_000));
    }

    #[test]
    fn test_budget_is_at_least_one() {
        assert_eq!(RetryPolicy::new(0, 10, 100).max_retries, 1);
        assert_eq!(RetryPolicy::default().with_max_retries(0).max_retries, 1);
        assert_eq!(RetryPolicy::new(2, 500, 100).max_backoff_ms, 500);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let policy = RetryPolicy::new(3, 10, 100);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result = policy
            .execute(|_| {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(timeout_error())
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_reports_exact_attempts() {
        let policy = RetryPolicy::new(4, 10, 100);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let err = policy
            .execute(|_| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(timeout_error())
                }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        match err {
            ProtocolError::Exhausted { attempts, last_cause } => {
                assert_eq!(attempts, 4);
                assert!(matches!(*last_cause, ProtocolError::Transient(_)));
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let policy = RetryPolicy::new(5, 10, 100);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let err = policy
            .execute(|_| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(ProtocolError::Rejected {
                        status: 404,
                        body: "not found".into(),
                    })
                }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, ProtocolError::Rejected { status: 404, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_elapsed_time() {
        let policy = RetryPolicy::new(3, 200, 5_000);
        let start = tokio::time::Instant::now();
        let _ = policy
            .execute(|_| async { Err::<(), _>(timeout_error()) })
            .await;
        // Two sleeps: 200ms then 400ms.
        assert_eq!(start.elapsed(), Duration::from_millis(600));
    }
}
