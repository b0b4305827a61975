//! Resilient node runner
//!
//! - [`circuit_breaker`]: per-node CLOSED/OPEN/HALF_OPEN gate
//! - [`timeout`]: deadline wrapper that never fails
//! - [`classifier`]: retryable/terminal decision and error normalization
//! - [`retry`]: exponential backoff loop with injectable jitter
//! - [`metrics`]: rolling per-node counters and threshold callbacks
//! - [`state_helpers`]: pure `StateUpdate` constructors
//! - [`node_factory`]: composes the above around a node implementation

pub mod circuit_breaker;
pub mod classifier;
pub mod metrics;
pub mod node_factory;
pub mod retry;
pub mod state_helpers;
pub mod timeout;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerStatus, CircuitState};
pub use classifier::{DefaultErrorClassifier, classify_error, sanitize_stack, strip_paths};
pub use metrics::{
    InvocationOutcome, MetricsConfig, NodeMetrics, NodeMetricsCollector, ThresholdCallback,
    ThresholdEvent, ThresholdKind,
};
pub use node_factory::{
    Node, NodeBuilder, create_llm_node, create_node, create_simple_node, create_tool_node,
};
pub use retry::{
    FixedJitter, JitterSource, NoJitter, RandomJitter, RetryHooks, RetryResult, backoff_delay,
    retry_delay, with_node_retry,
};
pub use state_helpers::{
    StateUpdateBuilder, create_blocked_update, create_complete_update, create_error_update,
    create_error_update_at, merge_state_updates, update_artifact_paths, update_gate_decisions,
    update_routing_flags, update_state,
};
pub use timeout::{TimeoutResult, with_timeout, with_timeout_cancellable};
