//! Deadline-bounded retries for operations that must finish within a fixed budget.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{E2eError, E2eResult};
use crate::transport::RetryPolicy;

/// Wall-clock budget shared by every attempt of an operation.
///
/// The clock starts on the first [`TimeoutBudget::start`] (or on `run_*`) and keeps running
/// across attempts, so retries never extend the overall deadline.
#[derive(Debug, Clone)]
pub struct TimeoutBudget {
    timeout: Duration,
    retry: RetryPolicy,
    started_at: Option<Instant>,
}

impl TimeoutBudget {
    pub fn new(timeout: Duration, retry: RetryPolicy) -> Self {
        Self {
            timeout,
            retry,
            started_at: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Start the clock. Calling again while running has no effect.
    pub fn start(&mut self) {
        if self.started_at.is_none() {
            self.started_at = Some(Instant::now());
        }
    }

    /// Stop the clock and forget the start time
    pub fn reset(&mut self) {
        self.started_at = None;
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at
            .map(|t| t.elapsed())
            .unwrap_or(Duration::ZERO)
    }

    pub fn remaining(&self) -> Duration {
        self.timeout.saturating_sub(self.elapsed())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Run `operation` until it succeeds, retries run out, or the budget is spent.
    pub async fn run<T, F, Fut>(&mut self, operation: F) -> E2eResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = E2eResult<T>>,
    {
        self.run_with_observer(operation, |_, _| {}).await
    }

    /// Like [`TimeoutBudget::run`], calling `on_retry(retry_number, error)` before each retry.
    ///
    /// Each attempt is cut off at the remaining budget and every backoff sleep is clamped to
    /// it. The last attempt's error is returned; if no attempt ran at all the result is a
    /// generic [`E2eError::OperationTimeout`].
    pub async fn run_with_observer<T, F, Fut, R>(
        &mut self,
        mut operation: F,
        mut on_retry: R,
    ) -> E2eResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = E2eResult<T>>,
        R: FnMut(u32, &E2eError),
    {
        self.start();
        let mut last_error = None;

        for attempt in 0..=self.retry.max_retries {
            if self.is_expired() {
                break;
            }

            match tokio::time::timeout(self.remaining(), operation()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(err)) => last_error = Some(err),
                Err(_) => {
                    last_error = Some(E2eError::OperationTimeout(self.timeout));
                    break;
                }
            }

            if attempt < self.retry.max_retries {
                if let Some(ref err) = last_error {
                    on_retry(attempt + 1, err);
                }
                let wait = self.retry.delay(attempt).min(self.remaining());
                if !wait.is_zero() {
                    tokio::time::sleep(wait).await;
                }
            }
        }

        Err(last_error.unwrap_or(E2eError::OperationTimeout(self.timeout)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn flaky(failures: u32, calls: &Cell<u32>) -> E2eResult<&'static str> {
        calls.set(calls.get() + 1);
        if calls.get() <= failures {
            Err(E2eError::TransportConnection {
                url: "http://h:1".into(),
                message: "refused".into(),
            })
        } else {
            Ok("ready")
        }
    }

    fn assert_near(actual: Duration, expected: Duration) {
        assert!(
            actual >= expected && actual <= expected + Duration::from_millis(10),
            "expected ~{:?}, got {:?}",
            expected,
            actual
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let calls = &Cell::new(0);
        let mut retries = Vec::new();
        let mut budget = TimeoutBudget::new(Duration::from_secs(30), RetryPolicy::default());

        let value = budget
            .run_with_observer(
                move || async move { flaky(2, calls) },
                |n, _| retries.push(n),
            )
            .await
            .unwrap();

        assert_eq!(value, "ready");
        assert_eq!(calls.get(), 3);
        assert_eq!(retries, vec![1, 2]);
        // 1s + 2s of backoff
        assert_near(budget.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_is_clamped_to_deadline() {
        let calls = &Cell::new(0);
        let mut budget = TimeoutBudget::new(Duration::from_millis(1500), RetryPolicy::default());

        let err = budget
            .run(move || async move { flaky(u32::MAX, calls) })
            .await
            .unwrap_err();

        assert!(matches!(err, E2eError::TransportConnection { .. }));
        assert_eq!(calls.get(), 2);
        assert_near(budget.elapsed(), Duration::from_millis(1500));
        assert!(budget.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_attempt_is_cut_off() {
        let mut budget = TimeoutBudget::new(Duration::from_secs(1), RetryPolicy::default());

        let err = budget
            .run(|| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .await
            .unwrap_err();

        assert!(matches!(err, E2eError::OperationTimeout(_)));
        assert_near(budget.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_budget_runs_nothing() {
        let calls = &Cell::new(0);
        let mut budget = TimeoutBudget::new(Duration::ZERO, RetryPolicy::default());

        let err = budget
            .run(move || async move { flaky(0, calls) })
            .await
            .unwrap_err();

        assert!(matches!(err, E2eError::OperationTimeout(_)));
        assert_eq!(calls.get(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_reset() {
        let mut budget = TimeoutBudget::new(Duration::from_secs(5), RetryPolicy::none());
        assert_eq!(budget.elapsed(), Duration::ZERO);
        assert_eq!(budget.remaining(), Duration::from_secs(5));

        budget.start();
        tokio::time::advance(Duration::from_secs(2)).await;
        budget.start();
        assert_eq!(budget.elapsed(), Duration::from_secs(2));
        assert_eq!(budget.remaining(), Duration::from_secs(3));

        budget.reset();
        assert_eq!(budget.elapsed(), Duration::ZERO);
        assert!(!budget.is_expired());
    }
}
