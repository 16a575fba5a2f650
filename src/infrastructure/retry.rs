//! Retry with linear backoff.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Run `op` up to `attempts` times, sleeping `delay * n` after the n-th
/// failure.
///
/// `op` receives the 1-based attempt number. Errors for which
/// `should_retry` returns `false` are returned immediately.
pub async fn retry_with_backoff<T, E, F, Fut, R>(
    attempts: u32,
    delay: Duration,
    should_retry: R,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: Display,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= attempts || !should_retry(&e) => return Err(e),
            Err(e) => {
                let backoff = delay * attempt;
                tracing::warn!(
                    "attempt {}/{} failed: {}, retrying in {:?}",
                    attempt,
                    attempts,
                    e,
                    backoff
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_succeeds_first_try() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> =
            retry_with_backoff(3, Duration::from_millis(1), |_| true, |n| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Ok(n) }
            })
            .await;
        assert_eq!(result, Ok(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recovers_on_later_attempt() {
        let result: Result<u32, String> =
            retry_with_backoff(3, Duration::from_millis(1), |_| true, |n| async move {
                if n < 3 {
                    Err(format!("fail {}", n))
                } else {
                    Ok(n)
                }
            })
            .await;
        assert_eq!(result, Ok(3));
    }

    #[tokio::test]
    async fn test_exhausts_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> =
            retry_with_backoff(3, Duration::from_millis(1), |_| true, |n| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Err(format!("fail {}", n)) }
            })
            .await;
        assert_eq!(result, Err("fail 3".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_stops_early() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> =
            retry_with_backoff(5, Duration::from_millis(1), |e: &String| e != "fatal", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("fatal".to_string()) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_attempts_runs_once() {
        let calls = AtomicU32::new(0);
        let _: Result<(), String> =
            retry_with_backoff(0, Duration::from_millis(1), |_| true, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("x".to_string()) }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_is_linear() {
        let started = tokio::time::Instant::now();
        let _: Result<(), String> =
            retry_with_backoff(3, Duration::from_millis(100), |_| true, |_| async {
                Err("x".to_string())
            })
            .await;
        // 100ms after attempt 1, 200ms after attempt 2
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert!(started.elapsed() < Duration::from_millis(400));
    }
}
