//! Retry-with-backoff combinator shared by the network clients.
//!
//! Both the embedding providers and the vector store wrap their transient
//! request failures with [`retry_with_backoff`] instead of each carrying
//! their own retry loop.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Bounded retry policy with exponential delay.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based), doubling each time.
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.initial_delay * 2u32.saturating_pow(retry)
    }
}

/// Run `op`, retrying transient failures up to the policy's attempt budget.
///
/// `is_transient` decides whether a given error is worth another attempt;
/// non-transient errors propagate immediately. The backoff sleep is raced
/// against `token` so a stop request does not sit out the full delay; the
/// next attempt then observes the token and fails fast.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    token: &CancellationToken,
    label: &str,
    is_transient: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut retry = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if is_transient(&err) && retry + 1 < policy.max_attempts.max(1) => {
                let delay = policy.delay_for(retry);
                warn!(
                    "{label} failed (attempt {}/{}): {err}; retrying in {delay:?}",
                    retry + 1,
                    policy.max_attempts
                );
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep(delay) => {}
                }
                retry += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retry() {
        let policy = RetryPolicy::default();
        let token = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let out: Result<u32, String> = retry_with_backoff(&policy, &token, "op", |_| true, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(42) }
        })
        .await;

        assert_eq!(out, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_transient_until_budget_exhausted() {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
        };
        let token = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let out: Result<u32, String> = retry_with_backoff(&policy, &token, "op", |_| true, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("boom".to_string()) }
        })
        .await;

        assert!(out.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_transient_errors_fail_fast() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_millis(1),
        };
        let token = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let out: Result<u32, String> = retry_with_backoff(&policy, &token, "op", |_| false, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("bad request".to_string()) }
        })
        .await;

        assert!(out.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
        };
        let token = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let out: Result<usize, String> = retry_with_backoff(&policy, &token, "op", |_| true, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("timeout".to_string())
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(out, Ok(2));
    }

    #[test]
    fn delay_doubles_per_retry() {
        let policy = RetryPolicy {
            max_attempts: 4,
            initial_delay: Duration::from_millis(100),
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
    }
}
