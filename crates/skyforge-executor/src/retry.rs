//! Retry loop with bounded exponential backoff and cancellation.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tracing::debug;

use skyforge_core::RetryPolicy;

use crate::error::{ExecutorError, ExecutorResult};

/// Final result of a retried operation and how many attempts it took.
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: ExecutorResult<T>,
    pub attempts: u32,
}

/// Whether the stop signal has been raised.
pub fn is_cancelled(cancel: Option<&watch::Receiver<bool>>) -> bool {
    cancel.is_some_and(|rx| *rx.borrow())
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy's attempts are exhausted.
///
/// The stop signal is checked before every attempt and interrupts the
/// backoff wait.
pub async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: Option<&watch::Receiver<bool>>,
    mut op: F,
) -> Attempted<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ExecutorResult<T>>,
{
    let max_attempts = policy.max_attempts();
    let mut attempts = 0;

    loop {
        if is_cancelled(cancel) {
            return Attempted {
                result: Err(ExecutorError::Cancelled),
                attempts,
            };
        }

        attempts += 1;
        match op().await {
            Ok(value) => {
                return Attempted {
                    result: Ok(value),
                    attempts,
                };
            }
            Err(e) if attempts >= max_attempts || !e.is_retryable() => {
                return Attempted {
                    result: Err(e),
                    attempts,
                };
            }
            Err(e) => {
                let delay = policy.delay_after(attempts - 1);
                debug!(
                    attempt = attempts,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "attempt failed, backing off"
                );
                backoff(delay, cancel).await;
            }
        }
    }
}

async fn backoff(delay: Duration, cancel: Option<&watch::Receiver<bool>>) {
    match cancel {
        Some(rx) => {
            let mut rx = rx.clone();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                Ok(_) = rx.wait_for(|stop| *stop) => {}
            }
        }
        None => tokio::time::sleep(delay).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use skyforge_core::Provider;
    use skyforge_provider::ProviderError;

    fn flaky(fail_times: u32, calls: &AtomicU32) -> ExecutorResult<u32> {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        if n < fail_times {
            Err(ProviderError::api(Provider::Fly, "transient").into())
        } else {
            Ok(n)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = &AtomicU32::new(0);
        let policy = RetryPolicy::new(3, 1_000, 2.0, 30_000);
        let out = retry(&policy, None, || async move { flaky(2, calls) }).await;
        assert_eq!(out.attempts, 3);
        assert_eq!(out.result.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_after_max_attempts() {
        let calls = &AtomicU32::new(0);
        let policy = RetryPolicy::new(2, 1_000, 2.0, 30_000);
        let started = tokio::time::Instant::now();
        let out = retry(&policy, None, || async move { flaky(10, calls) }).await;

        assert_eq!(out.attempts, 3);
        assert!(out.result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1000ms + 2000ms of backoff between the three attempts.
        assert!(started.elapsed() >= Duration::from_millis(3_000));
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_errors_fail_fast() {
        let calls = &AtomicU32::new(0);
        let policy = RetryPolicy::new(5, 1_000, 2.0, 30_000);
        let out: Attempted<()> = retry(&policy, None, || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ExecutorError::NoAdapter(Provider::Aws))
        })
        .await;
        assert_eq!(out.attempts, 1);
        assert!(matches!(out.result, Err(ExecutorError::NoAdapter(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_signal_aborts_between_attempts() {
        let (tx, rx) = watch::channel(false);
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, 60_000, 2.0, 60_000);

        let out = retry(&policy, Some(&rx), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                let _ = tx.send(true);
            }
            async { Err::<(), ExecutorError>(ProviderError::api(Provider::Fly, "down").into()) }
        })
        .await;

        assert_eq!(out.attempts, 1);
        assert!(matches!(out.result, Err(ExecutorError::Cancelled)));
    }

    #[tokio::test]
    async fn raised_signal_prevents_any_attempt() {
        let (_tx, rx) = watch::channel(true);
        let out = retry(&RetryPolicy::none(), Some(&rx), || async { Ok(()) }).await;
        assert_eq!(out.attempts, 0);
        assert!(matches!(out.result, Err(ExecutorError::Cancelled)));
    }
}
