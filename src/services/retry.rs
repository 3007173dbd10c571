use crate::config::OutputConfig;
use crate::error::UploadError;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

const GROWTH_FACTOR: u32 = 2;

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Error, Debug)]
pub enum RetryError<E> {
    #[error("{0}")]
    Fatal(E),

    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        /// Set only when more than one attempt failed.
        first: Option<E>,
        last: E,
    },

    #[error("cancelled")]
    Cancelled,
}

impl From<RetryError<UploadError>> for UploadError {
    fn from(err: RetryError<UploadError>) -> Self {
        match err {
            RetryError::Fatal(e) => e,
            RetryError::Exhausted { attempts, last, .. } => UploadError::RetryExhausted {
                attempts,
                last: Box::new(last),
            },
            RetryError::Cancelled => UploadError::Cancelled,
        }
    }
}

#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub value: T,
    pub attempts: u32,
}

/// Details handed to the retry observer before each wait.
#[derive(Debug)]
pub struct RetryNotice<'a, E> {
    pub error: &'a E,
    /// 1-based number of the attempt that just failed.
    pub retry_count: u32,
    pub max_attempts: u32,
    pub wait: Duration,
}

/// Bounded exponential backoff executor.
///
/// The wait before attempt `n` (n >= 2) is `initial_wait * 2^(n-2)`, capped
/// at `max_wait`. Holds no state between calls to [`RetryPolicy::execute`].
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_wait: Duration,
    max_wait: Duration,
    sleeper: Arc<dyn Sleeper>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_wait: Duration, max_wait: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_wait,
            max_wait,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn from_config(config: &OutputConfig) -> Self {
        Self::new(
            config.max_connection_retry,
            Duration::from_millis(config.initial_retry_wait_ms),
            Duration::from_millis(config.max_retry_wait_ms),
        )
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Wait before the given 1-based attempt. Zero for the first attempt.
    pub fn wait_before(&self, attempt: u32) -> Duration {
        if attempt < 2 {
            return Duration::ZERO;
        }
        let factor = GROWTH_FACTOR.saturating_pow(attempt - 2);
        self.initial_wait.saturating_mul(factor).min(self.max_wait)
    }

    /// Runs `operation` until it succeeds, fails with an error `is_retryable`
    /// rejects, runs out of attempts, or `cancel` fires.
    ///
    /// `operation` receives the 1-based attempt number. `on_retry` is called
    /// before every wait and has no influence on the outcome.
    pub async fn execute<T, E, F, Fut, C, O>(
        &self,
        mut operation: F,
        is_retryable: C,
        mut on_retry: O,
        cancel: &CancellationToken,
    ) -> Result<RetryOutcome<T>, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> bool,
        O: FnMut(RetryNotice<'_, E>),
    {
        let mut first_error: Option<E> = None;
        let mut attempt = 1;

        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                result = operation(attempt) => result,
            };

            let error = match result {
                Ok(value) => {
                    return Ok(RetryOutcome {
                        value,
                        attempts: attempt,
                    });
                }
                Err(e) => e,
            };

            if !is_retryable(&error) {
                return Err(RetryError::Fatal(error));
            }

            if attempt >= self.max_attempts {
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    first: first_error,
                    last: error,
                });
            }

            let wait = self.wait_before(attempt + 1);
            on_retry(RetryNotice {
                error: &error,
                retry_count: attempt,
                max_attempts: self.max_attempts,
                wait,
            });
            if first_error.is_none() {
                first_error = Some(error);
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                _ = self.sleeper.sleep(wait) => {}
            }
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct RecordingSleeper {
        waits: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.waits.lock().unwrap().push(duration);
        }
    }

    fn policy(max_attempts: u32, sleeper: Arc<RecordingSleeper>) -> RetryPolicy {
        RetryPolicy::new(
            max_attempts,
            Duration::from_millis(500),
            Duration::from_millis(30_000),
        )
        .with_sleeper(sleeper)
    }

    #[tokio::test]
    async fn test_exhausts_after_max_attempts() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let calls = AtomicU32::new(0);
        let mut notices = Vec::new();

        let result: Result<RetryOutcome<()>, _> = policy(3, sleeper.clone())
            .execute(
                |attempt| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move { Err::<(), _>(format!("boom {attempt}")) }
                },
                |_| true,
                |n| notices.push((n.retry_count, n.max_attempts, n.wait)),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(RetryError::Exhausted {
                attempts,
                first,
                last,
            }) => {
                assert_eq!(attempts, 3);
                assert_eq!(first.as_deref(), Some("boom 1"));
                assert_eq!(last, "boom 3");
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(
            notices,
            vec![
                (1, 3, Duration::from_millis(500)),
                (2, 3, Duration::from_millis(1000)),
            ]
        );
        assert_eq!(sleeper.waits.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_fatal_error_short_circuits() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let calls = AtomicU32::new(0);
        let mut notified = false;

        let result: Result<RetryOutcome<()>, _> = policy(10, sleeper.clone())
            .execute(
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>("not found") }
                },
                |_| false,
                |_| notified = true,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(RetryError::Fatal("not found"))));
        assert!(!notified);
        assert!(sleeper.waits.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let sleeper = Arc::new(RecordingSleeper::default());

        let outcome = policy(5, sleeper)
            .execute(
                |attempt| async move {
                    if attempt < 3 {
                        Err("503")
                    } else {
                        Ok(attempt * 10)
                    }
                },
                |_| true,
                |_| {},
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.value, 30);
        assert_eq!(outcome.attempts, 3);
    }

    #[test]
    fn test_backoff_doubles_up_to_ceiling() {
        let policy = policy(20, Arc::new(RecordingSleeper::default()));
        let waits: Vec<u128> = (2..=12).map(|n| policy.wait_before(n).as_millis()).collect();
        assert_eq!(
            waits,
            vec![
                500, 1000, 2000, 4000, 8000, 16000, 30000, 30000, 30000, 30000, 30000
            ]
        );
        assert_eq!(policy.wait_before(1), Duration::ZERO);
        assert_eq!(policy.wait_before(200), Duration::from_millis(30_000));
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_wait() {
        let policy = RetryPolicy::new(5, Duration::from_secs(60), Duration::from_secs(60));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let calls = AtomicU32::new(0);
        let started = std::time::Instant::now();
        let result: Result<RetryOutcome<()>, _> = policy
            .execute(
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>("timeout") }
                },
                |_| true,
                |_| {},
                &cancel,
            )
            .await;

        assert!(matches!(result, Err(RetryError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_zero_attempts_means_one() {
        let policy = RetryPolicy::new(0, Duration::from_millis(1), Duration::from_millis(1));
        assert_eq!(policy.max_attempts(), 1);
    }
}
