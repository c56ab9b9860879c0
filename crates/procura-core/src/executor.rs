//! Request throttling with retry on rate-limit responses.
//!
//! `RateLimitedExecutor` spaces the starts of consecutive requests by a
//! minimum delay and retries a request that failed with a rate-limit
//! signal (HTTP 429) a bounded number of times. Any other failure, or a
//! rate-limit failure after the last retry, is returned unchanged.

use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;
use tokio::sync::Mutex;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, warn};

use crate::config::SessionConfig;

pub const DEFAULT_MIN_DELAY_MS: u64 = 1_000;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 3_000;

/// Failures that tell the caller to slow down.
pub trait RateLimitSignal {
    fn is_rate_limited(&self) -> bool;
}

impl RateLimitSignal for StatusCode {
    fn is_rate_limited(&self) -> bool {
        *self == StatusCode::TOO_MANY_REQUESTS
    }
}

impl RateLimitSignal for reqwest::Error {
    fn is_rate_limited(&self) -> bool {
        self.status().is_some_and(|status| status.is_rate_limited())
    }
}

#[derive(Debug, Default)]
struct ExecutorState {
    /// Start instant reserved by the most recent invocation
    last_call: Option<Instant>,
    retry_count: u32,
}

#[derive(Debug)]
pub struct RateLimitedExecutor {
    min_delay: Duration,
    max_retries: u32,
    retry_delay: Duration,
    state: Mutex<ExecutorState>,
}

impl Default for RateLimitedExecutor {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(DEFAULT_MIN_DELAY_MS),
            DEFAULT_MAX_RETRIES,
            Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        )
    }
}

impl RateLimitedExecutor {
    pub fn new(min_delay: Duration, max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            min_delay,
            max_retries,
            retry_delay,
            state: Mutex::new(ExecutorState::default()),
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(
            Duration::from_millis(config.request_min_delay_ms),
            config.request_max_retries,
            Duration::from_millis(config.request_retry_delay_ms),
        )
    }

    /// Run `request_fn`, throttled and retried on rate-limit failures.
    pub async fn execute<T, E, F, Fut>(&self, request_fn: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RateLimitSignal,
    {
        self.execute_with(request_fn, |_| {}).await
    }

    /// Like `execute`, calling `on_rate_limit(retry)` before each retry wait.
    pub async fn execute_with<T, E, F, Fut, R>(
        &self,
        mut request_fn: F,
        mut on_rate_limit: R,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RateLimitSignal,
        R: FnMut(u32),
    {
        let mut retries = 0;

        loop {
            self.wait_for_slot().await;

            let err = match request_fn().await {
                Ok(value) => {
                    self.state.lock().await.retry_count = 0;
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !err.is_rate_limited() {
                return Err(err);
            }
            if retries >= self.max_retries {
                warn!(retries, "Rate limited, retries exhausted");
                return Err(err);
            }

            retries += 1;
            self.state.lock().await.retry_count = retries;
            warn!(
                retry = retries,
                max_retries = self.max_retries,
                retry_delay_ms = self.retry_delay.as_millis() as u64,
                "Rate limited, backing off"
            );
            on_rate_limit(retries);
            sleep(self.retry_delay).await;
        }
    }

    /// Forget the last call and retry count, for an independent call sequence.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        *state = ExecutorState::default();
    }

    /// Retries performed by the most recent call
    pub async fn retry_count(&self) -> u32 {
        self.state.lock().await.retry_count
    }

    /// Reserve the next start slot and sleep until it arrives.
    /// Reserving under the lock keeps concurrent callers spaced too.
    async fn wait_for_slot(&self) {
        let start = {
            let mut state = self.state.lock().await;
            let now = Instant::now();
            let start = match state.last_call {
                Some(last) => now.max(last + self.min_delay),
                None => now,
            };
            state.last_call = Some(start);
            start
        };

        let wait = start.saturating_duration_since(Instant::now());
        if !wait.is_zero() {
            debug!(wait_ms = wait.as_millis() as u64, "Throttling request");
            sleep_until(start).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn executor(max_retries: u32) -> RateLimitedExecutor {
        RateLimitedExecutor::new(
            Duration::from_millis(1000),
            max_retries,
            Duration::from_millis(3000),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_call_runs_immediately() {
        let executor = executor(3);
        let began = Instant::now();
        let result: Result<u32, StatusCode> = executor.execute(|| async { Ok(7) }).await;
        assert_eq!(result, Ok(7));
        assert_eq!(began.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_back_to_back_calls_are_spaced() {
        let executor = executor(3);
        let began = Instant::now();

        let _: Result<(), StatusCode> = executor.execute(|| async { Ok(()) }).await;
        sleep(Duration::from_millis(50)).await;

        let started_at = executor
            .execute(|| async { Ok::<_, StatusCode>(Instant::now()) })
            .await
            .unwrap();
        assert_eq!(started_at - began, Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_rate_limited_then_succeeds() {
        let executor = executor(3);
        let attempts = Arc::new(AtomicU32::new(0));
        let mut notified = Vec::new();

        let result = executor
            .execute_with(
                || {
                    let attempts = Arc::clone(&attempts);
                    async move {
                        if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                            Err(StatusCode::TOO_MANY_REQUESTS)
                        } else {
                            Ok("done")
                        }
                    }
                },
                |retry| notified.push(retry),
            )
            .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(notified, vec![1, 2]);
        assert_eq!(executor.retry_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_waits_retry_delay() {
        let executor = executor(1);
        let began = Instant::now();
        let starts = Arc::new(std::sync::Mutex::new(Vec::new()));

        let _ = executor
            .execute(|| {
                let starts = Arc::clone(&starts);
                async move {
                    starts.lock().unwrap().push(began.elapsed());
                    Err::<(), _>(StatusCode::TOO_MANY_REQUESTS)
                }
            })
            .await;

        assert_eq!(
            *starts.lock().unwrap(),
            vec![Duration::ZERO, Duration::from_millis(3000)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_return_original_error() {
        let executor = executor(3);
        let attempts = Arc::new(AtomicU32::new(0));
        let mut notified = 0;

        let result: Result<(), StatusCode> = executor
            .execute_with(
                || {
                    let attempts = Arc::clone(&attempts);
                    async move {
                        attempts.fetch_add(1, Ordering::SeqCst);
                        Err(StatusCode::TOO_MANY_REQUESTS)
                    }
                },
                |_| notified += 1,
            )
            .await;

        assert_eq!(result, Err(StatusCode::TOO_MANY_REQUESTS));
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        assert_eq!(notified, 3);
        assert_eq!(executor.retry_count().await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_errors_are_not_retried() {
        let executor = executor(3);
        let attempts = Arc::new(AtomicU32::new(0));

        let result: Result<(), StatusCode> = executor
            .execute(|| {
                let attempts = Arc::clone(&attempts);
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(StatusCode::INTERNAL_SERVER_ERROR)
                }
            })
            .await;

        assert_eq!(result, Err(StatusCode::INTERNAL_SERVER_ERROR));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_budget_is_per_call() {
        let executor = executor(1);
        let _: Result<(), StatusCode> = executor
            .execute(|| async { Err(StatusCode::TOO_MANY_REQUESTS) })
            .await;

        // A new call gets its own retries
        let attempts = Arc::new(AtomicU32::new(0));
        let result = executor
            .execute(|| {
                let attempts = Arc::clone(&attempts);
                async move {
                    if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(StatusCode::TOO_MANY_REQUESTS)
                    } else {
                        Ok(())
                    }
                }
            })
            .await;
        assert_eq!(result, Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_clears_throttle() {
        let executor = executor(3);
        let _: Result<(), StatusCode> = executor.execute(|| async { Ok(()) }).await;
        executor.reset().await;

        let began = Instant::now();
        let _: Result<(), StatusCode> = executor.execute(|| async { Ok(()) }).await;
        assert_eq!(began.elapsed(), Duration::ZERO);
        assert_eq!(executor.retry_count().await, 0);
    }

    #[test]
    fn test_status_code_signal() {
        assert!(StatusCode::TOO_MANY_REQUESTS.is_rate_limited());
        assert!(!StatusCode::SERVICE_UNAVAILABLE.is_rate_limited());
    }
}
