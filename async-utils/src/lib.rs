//! Async utilities for deadline- and cancellation-aware futures.
//!
//! Every outbound call in the workspace is bounded by two independent abort
//! sources: an internal timeout and an optional caller-owned
//! [`CancellationToken`]. [`OrAbortExt`] races a future against both and
//! reports which one fired, so callers can tell a timeout apart from a
//! deliberate cancellation.

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a raced future did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aborted {
    /// The internal deadline elapsed first.
    TimedOut,
    /// The caller's token was cancelled first (or was already cancelled).
    Cancelled,
}

/// Extension trait for racing futures against a deadline and a token.
#[async_trait]
pub trait OrAbortExt: Sized {
    type Output;

    /// Race this future against an absolute deadline and an optional token.
    ///
    /// A token that is already cancelled wins without the future being
    /// polled at all.
    async fn or_abort(
        self,
        deadline: Instant,
        token: Option<&CancellationToken>,
    ) -> Result<Self::Output, Aborted>;
}

#[async_trait]
impl<F> OrAbortExt for F
where
    F: Future + Send,
    F::Output: Send,
{
    type Output = F::Output;

    async fn or_abort(
        self,
        deadline: Instant,
        token: Option<&CancellationToken>,
    ) -> Result<Self::Output, Aborted> {
        let Some(token) = token else {
            return tokio::time::timeout_at(deadline, self)
                .await
                .map_err(|_| Aborted::TimedOut);
        };

        if token.is_cancelled() {
            return Err(Aborted::Cancelled);
        }

        tokio::select! {
            biased;
            _ = token.cancelled() => Err(Aborted::Cancelled),
            _ = tokio::time::sleep_until(deadline) => Err(Aborted::TimedOut),
            res = self => Ok(res),
        }
    }
}

/// Sleep for `duration`, waking early if the deadline or token fires.
pub async fn sleep_or_abort(
    duration: Duration,
    deadline: Instant,
    token: Option<&CancellationToken>,
) -> Result<(), Aborted> {
    if duration.is_zero() {
        return match token {
            Some(t) if t.is_cancelled() => Err(Aborted::Cancelled),
            _ => Ok(()),
        };
    }
    tokio::time::sleep(duration).or_abort(deadline, token).await
}
