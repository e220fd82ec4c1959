//! Cancellation-aware waiting and retry helpers

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Sleep for `duration` unless cancelled first. Returns false on cancellation.
pub async fn sleep_or_cancel(cancel: &CancellationToken, duration: Duration) -> bool {
    if cancel.is_cancelled() {
        return false;
    }
    if duration.is_zero() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = cancel.cancelled() => false,
    }
}

/// Exponential backoff that doubles on every step up to a ceiling
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            current: initial.min(max),
            max,
        }
    }

    /// Delay to wait now; the following call returns twice as much (capped)
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }
}

/// Why [`retry_fixed`] gave up
#[derive(Debug, Error, PartialEq)]
pub enum RetryError<E> {
    /// Every attempt failed; holds the last error
    #[error("{0}")]
    Exhausted(E),
    /// Cancelled during an attempt or between attempts
    #[error("cancelled")]
    Cancelled,
}

impl<E> RetryError<E> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryError::Cancelled)
    }
}

/// Run `op` up to `attempts` times with a fixed `delay` between attempts.
///
/// An attempt in flight is dropped as soon as `cancel` fires.
pub async fn retry_fixed<T, E, F, Fut>(
    operation: &str,
    attempts: u32,
    delay: Duration,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            result = op() => result,
        };
        match result {
            Ok(value) => return Ok(value),
            Err(e) => {
                warn!(
                    operation = %operation,
                    attempt,
                    attempts,
                    error = %e,
                    "Attempt failed"
                );
                if attempt >= attempts {
                    return Err(RetryError::Exhausted(e));
                }
                if !sleep_or_cancel(cancel, delay).await {
                    return Err(RetryError::Cancelled);
                }
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(600));
        let delays: Vec<u64> = (0..12).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(
            delays,
            vec![1, 2, 4, 8, 16, 32, 64, 128, 256, 512, 600, 600]
        );
    }

    #[tokio::test]
    async fn test_sleep_or_cancel_returns_false_when_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(!sleep_or_cancel(&cancel, Duration::from_secs(60)).await);
    }

    #[tokio::test]
    async fn test_sleep_or_cancel_wakes_on_cancel() {
        let cancel = CancellationToken::new();
        let child = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            child.cancel();
        });

        let start = std::time::Instant::now();
        assert!(!sleep_or_cancel(&cancel, Duration::from_secs(60)).await);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_retry_fixed_succeeds_after_failures() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result: Result<u32, RetryError<String>> =
            retry_fixed("op", 5, Duration::from_millis(1), &cancel, || async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(format!("failure {}", n))
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_fixed_gives_up_after_attempts() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result: Result<(), RetryError<String>> =
            retry_fixed("op", 3, Duration::from_millis(1), &cancel, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("nope".to_string())
            })
            .await;

        assert_eq!(result, Err(RetryError::Exhausted("nope".to_string())));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_fixed_stops_on_cancel() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<(), RetryError<String>> =
            retry_fixed("op", 5, Duration::from_secs(60), &cancel, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("nope".to_string())
            })
            .await;

        assert_eq!(result, Err(RetryError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_retry_fixed_drops_hung_attempt_on_cancel() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result: Result<(), RetryError<String>> = tokio::time::timeout(
            Duration::from_secs(5),
            retry_fixed("op", 5, Duration::from_millis(1), &cancel, || async {
                std::future::pending::<()>().await;
                Ok(())
            }),
        )
        .await
        .expect("retry_fixed did not observe cancellation");

        assert!(result.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_retry_fixed_cancel_between_attempts() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result: Result<(), RetryError<String>> =
            retry_fixed("op", 5, Duration::from_secs(60), &cancel, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                cancel.cancel();
                Err("nope".to_string())
            })
            .await;

        assert_eq!(result, Err(RetryError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
