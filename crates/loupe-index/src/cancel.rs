//! Cooperative cancellation helpers.
//!
//! A single [`CancellationToken`] is threaded through every call that may
//! suspend. Cancellation is checked at well-defined points (file boundary,
//! before each embedding call, before a batch upsert) and surfaces as a
//! distinguished [`Cancelled`] value rather than a generic error.

use std::future::Future;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Marker error for an explicitly cancelled operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Race a future against a cancellation token.
///
/// Resolves to `Err(Cancelled)` as soon as the token is signalled, which
/// also drops the in-flight future (aborting an outbound HTTP request
/// instead of waiting for it to complete).
pub async fn or_cancel<F>(fut: F, token: &CancellationToken) -> Result<F::Output, Cancelled>
where
    F: Future,
{
    tokio::select! {
        _ = token.cancelled() => Err(Cancelled),
        out = fut => Ok(out),
    }
}

/// Synchronous cancellation check for loop boundaries.
pub fn check(token: &CancellationToken) -> Result<(), Cancelled> {
    if token.is_cancelled() {
        Err(Cancelled)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn completes_when_not_cancelled() {
        let token = CancellationToken::new();
        let out = or_cancel(async { 7 }, &token).await;
        assert_eq!(out, Ok(7));
    }

    #[tokio::test]
    async fn pending_future_is_cut_short() {
        let token = CancellationToken::new();
        token.cancel();
        let out = or_cancel(tokio::time::sleep(Duration::from_secs(60)), &token).await;
        assert!(out.is_err());
    }

    #[test]
    fn check_reflects_token_state() {
        let token = CancellationToken::new();
        assert!(check(&token).is_ok());
        token.cancel();
        assert_eq!(check(&token), Err(Cancelled));
    }
}
