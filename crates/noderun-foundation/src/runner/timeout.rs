//! Timeout Wrapper
//!
//! Races an operation against a deadline and reports the outcome as a
//! [`TimeoutResult`]. The wrapper itself never fails and never unwinds: a
//! panic while building or polling the operation becomes
//! [`TimeoutResult::Failed`] carrying a [`PanicError`].
//!
//! On timeout the operation future is dropped, which cancels it at its
//! current await point. Work the operation spawned elsewhere keeps running;
//! [`with_timeout_cancellable`] fires a token so such work can stop.

use futures::FutureExt;
use noderun_kernel::runner::error::{BoxError, NodeError, PanicError};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Outcome of a deadline-guarded operation.
#[derive(Debug)]
pub enum TimeoutResult<T> {
    /// The operation finished in time and succeeded
    Completed(T),
    /// The operation finished in time with an error or a panic
    Failed(BoxError),
    /// The deadline passed first
    TimedOut { timeout: Duration, elapsed: Duration },
}

impl<T> TimeoutResult<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }

    /// Collapse into a `Result`, turning a timeout into [`NodeError::Timeout`].
    pub fn into_result(self) -> Result<T, BoxError> {
        match self {
            Self::Completed(value) => Ok(value),
            Self::Failed(err) => Err(err),
            Self::TimedOut { timeout, .. } => Err(Box::new(NodeError::timeout(
                u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            ))),
        }
    }
}

/// Run `operation` with a deadline. A zero `timeout` disables the deadline.
///
/// ```rust,ignore
/// match with_timeout(|| fetch_docs(url), Duration::from_secs(5)).await {
///     TimeoutResult::Completed(docs) => index(docs),
///     TimeoutResult::Failed(err) => tracing::warn!(error = %err, "fetch failed"),
///     TimeoutResult::TimedOut { elapsed, .. } => tracing::warn!(?elapsed, "fetch timed out"),
/// }
/// ```
pub async fn with_timeout<T, F, Fut>(operation: F, timeout: Duration) -> TimeoutResult<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, BoxError>>,
{
    run(operation, timeout, None).await
}

/// Like [`with_timeout`], additionally cancelling `token` when the deadline
/// passes.
pub async fn with_timeout_cancellable<T, F, Fut>(
    operation: F,
    timeout: Duration,
    token: &CancellationToken,
) -> TimeoutResult<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, BoxError>>,
{
    run(operation, timeout, Some(token)).await
}

async fn run<T, F, Fut>(
    operation: F,
    timeout: Duration,
    token: Option<&CancellationToken>,
) -> TimeoutResult<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, BoxError>>,
{
    let started = Instant::now();

    let future = match std::panic::catch_unwind(AssertUnwindSafe(operation)) {
        Ok(future) => future,
        Err(payload) => {
            return TimeoutResult::Failed(Box::new(PanicError::from_payload(payload.as_ref())));
        }
    };
    let guarded = AssertUnwindSafe(future).catch_unwind();

    let outcome = if timeout.is_zero() {
        guarded.await
    } else {
        match tokio::time::timeout(timeout, guarded).await {
            Ok(outcome) => outcome,
            Err(_) => {
                if let Some(token) = token {
                    token.cancel();
                }
                return TimeoutResult::TimedOut {
                    timeout,
                    elapsed: started.elapsed(),
                };
            }
        }
    };

    match outcome {
        Ok(Ok(value)) => TimeoutResult::Completed(value),
        Ok(Err(err)) => TimeoutResult::Failed(err),
        Err(payload) => TimeoutResult::Failed(Box::new(PanicError::from_payload(payload.as_ref()))),
    }
}
