//! Node Contracts
//!
//! The traits the runner composes: the user-supplied node implementation,
//! the error classifier consulted between attempts, and the observability
//! hooks fired while a node runs.

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

use super::context::NodeExecutionContext;
use super::error::{BoxError, ErrorClassification, NodeError};
use super::state::StateUpdate;

/// User-supplied node logic.
///
/// Each attempt receives its own copy of the input state and a fresh
/// [`NodeExecutionContext`]. Any async closure of the shape
/// `Fn(S, NodeExecutionContext) -> impl Future<Output = Result<StateUpdate, BoxError>>`
/// implements this trait.
///
/// # Example
///
/// ```rust,ignore
/// let implementation = |state: GraphState, ctx: NodeExecutionContext| async move {
///     tracing::info!(node = %ctx.node_name, attempt = ctx.attempt, "summarizing");
///     Ok(create_complete_update(json!({"summary": "..."})))
/// };
/// ```
#[async_trait]
pub trait NodeImplementation<S>: Send + Sync {
    async fn execute(&self, state: S, ctx: NodeExecutionContext) -> Result<StateUpdate, BoxError>;
}

#[async_trait]
impl<S, F, Fut> NodeImplementation<S> for F
where
    S: Send + 'static,
    F: Fn(S, NodeExecutionContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<StateUpdate, BoxError>> + Send,
{
    async fn execute(&self, state: S, ctx: NodeExecutionContext) -> Result<StateUpdate, BoxError> {
        (self)(state, ctx).await
    }
}

/// Decides whether a failure is worth retrying and normalizes it into a
/// [`NodeError`].
pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, error: &(dyn std::error::Error + 'static)) -> ErrorClassification;
}

/// Observability callbacks fired by a running node. All methods default to
/// no-ops.
pub trait NodeHooks: Send + Sync {
    /// A retryable failure occurred and attempt `attempt + 1` will start
    /// after `delay`.
    fn on_retry_attempt(&self, node_name: &str, attempt: u32, error: &NodeError, delay: Duration) {
        let _ = (node_name, attempt, error, delay);
    }

    /// An attempt exceeded its deadline.
    fn on_timeout(&self, node_name: &str, error: &NodeError) {
        let _ = (node_name, error);
    }
}

/// Hooks that do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl NodeHooks for NoopHooks {}
