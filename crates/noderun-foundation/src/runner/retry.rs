//! Retry Wrapper
//!
//! Re-runs a failing operation with exponential backoff. Every failure goes
//! through an [`ErrorClassifier`]: terminal failures stop the loop at once,
//! retryable ones sleep `min(base * 2^(attempt-1), max)` plus jitter and try
//! again until `max_attempts` is used up.
//!
//! Jitter comes from an injectable [`JitterSource`] so backoff curves are
//! reproducible in tests.

use noderun_kernel::runner::config::RetryConfig;
use noderun_kernel::runner::error::{BoxError, FailureKind, NodeError};
use noderun_kernel::runner::node::ErrorClassifier;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Source of the random part of a backoff delay.
pub trait JitterSource: Send + Sync {
    /// Sample a duration in `[0, bound]`.
    fn sample(&self, bound: Duration) -> Duration;
}

/// Uniform jitter from the thread-local RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomJitter;

impl JitterSource for RandomJitter {
    fn sample(&self, bound: Duration) -> Duration {
        if bound.is_zero() {
            return Duration::ZERO;
        }
        bound.mul_f64(rand::thread_rng().gen_range(0.0..=1.0))
    }
}

/// No jitter at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoJitter;

impl JitterSource for NoJitter {
    fn sample(&self, _bound: Duration) -> Duration {
        Duration::ZERO
    }
}

/// Always the same fraction of the bound. `FixedJitter(1.0)` picks the
/// maximum jitter.
#[derive(Debug, Clone, Copy)]
pub struct FixedJitter(pub f64);

impl JitterSource for FixedJitter {
    fn sample(&self, bound: Duration) -> Duration {
        if !self.0.is_finite() || self.0 <= 0.0 {
            return Duration::ZERO;
        }
        bound.mul_f64(self.0.min(1.0))
    }
}

type RetryCallback<'a> = dyn Fn(u32, &NodeError, Duration) + Send + Sync + 'a;

/// Optional collaborators of [`with_node_retry`].
pub struct RetryHooks<'a> {
    jitter: &'a dyn JitterSource,
    on_retry_attempt: Option<&'a RetryCallback<'a>>,
    cancellation: Option<&'a CancellationToken>,
}

impl Default for RetryHooks<'_> {
    fn default() -> Self {
        Self {
            jitter: &RandomJitter,
            on_retry_attempt: None,
            cancellation: None,
        }
    }
}

impl<'a> RetryHooks<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_jitter(mut self, jitter: &'a dyn JitterSource) -> Self {
        self.jitter = jitter;
        self
    }

    /// Called with the failed attempt number, its normalized error and the
    /// delay before the next attempt, right before sleeping.
    pub fn on_retry_attempt(mut self, callback: &'a RetryCallback<'a>) -> Self {
        self.on_retry_attempt = Some(callback);
        self
    }

    /// Stop retrying (and cut a backoff sleep short) once `token` fires.
    pub fn with_cancellation(mut self, token: &'a CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

/// Outcome of a retried operation.
#[derive(Debug)]
pub struct RetryResult<T> {
    pub outcome: Result<T, NodeError>,
    /// Attempts actually made, in `0..=max_attempts`; `0` when cancelled
    /// before the first attempt
    pub attempts: u32,
    /// Sum of the backoff delays slept
    pub total_delay: Duration,
    /// Metrics bucket of the final failure
    pub failure_kind: Option<FailureKind>,
}

impl<T> RetryResult<T> {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Attempts beyond the first
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// Delay before attempt `attempt + 1`, without jitter.
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    config.backoff_for(attempt)
}

/// Delay before attempt `attempt + 1`, with jitter from `jitter` when enabled.
pub fn retry_delay(config: &RetryConfig, attempt: u32, jitter: &dyn JitterSource) -> Duration {
    let base = config.backoff_for(attempt);
    if !config.jitter {
        return base;
    }
    let bound = config.jitter_bound(base);
    base + jitter.sample(bound).min(bound)
}

/// Run `operation` until it succeeds, fails terminally or runs out of
/// attempts. `operation` receives the 1-indexed attempt number.
///
/// Exhausting several attempts yields [`NodeError::RetryExhausted`] wrapping
/// the last error. With `max_attempts == 1` nothing is retried and the
/// normalized error is returned as-is.
pub async fn with_node_retry<T, F, Fut>(
    mut operation: F,
    config: &RetryConfig,
    classifier: &dyn ErrorClassifier,
    hooks: RetryHooks<'_>,
) -> RetryResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, BoxError>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut total_delay = Duration::ZERO;
    let mut attempt = 0;

    loop {
        attempt += 1;

        if hooks.cancellation.is_some_and(CancellationToken::is_cancelled) {
            return RetryResult {
                outcome: Err(NodeError::cancelled(format!(
                    "cancelled before attempt {attempt}"
                ))),
                attempts: attempt - 1,
                total_delay,
                failure_kind: Some(FailureKind::Cancellation),
            };
        }

        debug!(attempt, max_attempts, "starting attempt");
        let err = match operation(attempt).await {
            Ok(value) => {
                return RetryResult {
                    outcome: Ok(value),
                    attempts: attempt,
                    total_delay,
                    failure_kind: None,
                };
            }
            Err(err) => err,
        };

        let classification = classifier.classify(&*err);
        let failure_kind = Some(classification.failure_kind);

        if !classification.is_retryable() {
            debug!(
                attempt,
                code = classification.normalized.code(),
                error = %classification.normalized,
                "terminal failure, not retrying"
            );
            return RetryResult {
                outcome: Err(classification.normalized),
                attempts: attempt,
                total_delay,
                failure_kind,
            };
        }

        if attempt >= max_attempts {
            let outcome = if max_attempts == 1 {
                classification.normalized
            } else {
                NodeError::retry_exhausted(attempt, classification.normalized)
            };
            return RetryResult {
                outcome: Err(outcome),
                attempts: attempt,
                total_delay,
                failure_kind,
            };
        }

        let delay = retry_delay(config, attempt, hooks.jitter);
        warn!(
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %classification.normalized,
            "attempt failed, retrying"
        );
        if let Some(callback) = hooks.on_retry_attempt {
            callback(attempt, &classification.normalized, delay);
        }

        match hooks.cancellation {
            Some(token) => {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = token.cancelled() => {
                        return RetryResult {
                            outcome: Err(NodeError::cancelled(format!(
                                "cancelled during backoff after attempt {attempt}"
                            ))),
                            attempts: attempt,
                            total_delay,
                            failure_kind: Some(FailureKind::Cancellation),
                        };
                    }
                }
            }
            None => tokio::time::sleep(delay).await,
        }
        total_delay += delay;
    }
}
