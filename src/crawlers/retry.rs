//! Retry-with-backoff combinator used around remote calls.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// How many times to retry and how long to wait between attempts.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }
}

/// Runs `operation` until it succeeds, `is_retryable` rejects the error, or
/// `policy.max_retries` retries have been spent.
///
/// The last error is returned as-is so callers keep the typed failure.
pub async fn retry_with_backoff<T, E, F, Fut, P>(
    label: &str,
    policy: RetryPolicy,
    is_retryable: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: Display,
{
    let attempts = policy.max_retries + 1;
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) if attempt < attempts && is_retryable(&error) => {
                log::warn!(
                    "{label} failed (attempt {attempt}/{attempts}): {error}; retrying in {:?}",
                    policy.delay
                );
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
            Err(error) => {
                log::error!("{label} failed after {attempt} attempt(s): {error}");
                return Err(error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test]
    async fn returns_first_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> =
            retry_with_backoff("op", RetryPolicy::new(3, Duration::ZERO), |_| true, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { if n < 2 { Err("flaky".to_string()) } else { Ok(n) } }
            })
            .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> =
            retry_with_backoff("op", RetryPolicy::new(2, Duration::ZERO), |_| true, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("down".to_string()) }
            })
            .await;

        assert_eq!(result, Err("down".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_on_non_retryable_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = retry_with_backoff(
            "op",
            RetryPolicy::new(5, Duration::ZERO),
            |error: &String| error != "fatal",
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("fatal".to_string()) }
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
