//! noderun foundation
//!
//! Implementations behind the `noderun-kernel` contracts: the circuit
//! breaker, timeout and retry wrappers, the default error classifier, the
//! metrics collector, state helpers and the node factory that composes them.
//!
//! ```rust,ignore
//! use noderun_foundation::prelude::*;
//!
//! let node = create_llm_node("elaborate", |state: GraphState, ctx: NodeExecutionContext| async move {
//!     let logger = create_node_logger(&ctx.node_name);
//!     logger.info("drafting elaboration");
//!     Ok::<_, BoxError>(create_complete_update(json!({ "draft": "..." })))
//! })?;
//! let update = node.invoke(&state, &RuntimeContext::new()).await;
//! ```

// logging module
pub mod logging;

// runner module
pub mod runner;

pub use logging::{NodeLogger, create_node_logger, init_logging};
pub use runner::*;

/// Common imports for node authors.
pub mod prelude {
    pub use crate::logging::{NodeLogger, create_node_logger};
    pub use crate::runner::{
        CircuitState, Node, NodeBuilder, NodeMetricsCollector, create_blocked_update,
        create_complete_update, create_error_update, create_llm_node, create_node,
        create_simple_node, create_tool_node, merge_state_updates, update_state,
    };
    pub use noderun_kernel::{
        BoxError, CircuitBreakerConfig, GateDecision, GraphState, NodeConfig, NodeError,
        NodeExecutionContext, RetryConfig, RoutingFlag, RuntimeContext, StateUpdate,
        ValidationError,
    };
}
