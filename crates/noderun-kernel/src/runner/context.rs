//! Execution Context
//!
//! [`RuntimeContext`] is what the graph scheduler hands to a node for one
//! invocation. [`NodeExecutionContext`] is derived from it for every attempt
//! and passed to the node implementation; it exists for log correlation and
//! cooperative cancellation only and is never persisted.

use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Per-invocation context supplied by the caller.
///
/// # Example
///
/// ```rust,ignore
/// let ctx = RuntimeContext::new()
///     .with_trace_id("trace-42")
///     .with_tag("story", "wrkf-1020");
/// let update = node.invoke(&state, &ctx).await;
/// ```
#[derive(Debug, Clone)]
pub struct RuntimeContext {
    /// Correlation id shared by every node in a trace
    pub trace_id: String,
    /// Id of the graph execution this invocation belongs to
    pub graph_execution_id: String,
    /// Free-form tags forwarded to logs
    pub tags: HashMap<String, String>,
    /// Parent token; cancelling it aborts the invocation
    pub cancellation: CancellationToken,
}

impl Default for RuntimeContext {
    fn default() -> Self {
        Self {
            trace_id: Uuid::new_v4().to_string(),
            graph_execution_id: Uuid::new_v4().to_string(),
            tags: HashMap::new(),
            cancellation: CancellationToken::new(),
        }
    }
}

impl RuntimeContext {
    /// Create a context with fresh ids
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the trace id
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = trace_id.into();
        self
    }

    /// Set the graph execution id
    pub fn with_graph_execution_id(mut self, id: impl Into<String>) -> Self {
        self.graph_execution_id = id.into();
        self
    }

    /// Add a tag
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Use an existing cancellation token as the parent
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Derive the context for one attempt of `node_name`.
    ///
    /// The attempt gets a child token: cancelling the parent cancels it, while
    /// cancelling the child (on timeout) leaves the parent untouched.
    pub fn for_attempt(&self, node_name: &str, attempt: u32) -> NodeExecutionContext {
        NodeExecutionContext {
            trace_id: self.trace_id.clone(),
            graph_execution_id: self.graph_execution_id.clone(),
            node_name: node_name.to_string(),
            attempt,
            cancellation: self.cancellation.child_token(),
        }
    }
}

/// Identity of a single attempt.
#[derive(Debug, Clone)]
pub struct NodeExecutionContext {
    pub trace_id: String,
    pub graph_execution_id: String,
    pub node_name: String,
    /// 1-indexed attempt number
    pub attempt: u32,
    /// Fired when the attempt times out or the invocation is cancelled.
    /// Implementations that spawn detached work should stop when it fires.
    pub cancellation: CancellationToken,
}

impl NodeExecutionContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Wait until the attempt is cancelled
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }

    pub fn is_first_attempt(&self) -> bool {
        self.attempt == 1
    }
}
