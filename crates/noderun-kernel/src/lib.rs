//! noderun kernel
//!
//! Types and traits of the node-execution runtime: the error taxonomy,
//! execution contexts, node/classifier contracts, graph state shapes and
//! configuration. Implementations live in `noderun-foundation`.

// config module
pub mod config;

// error module
pub mod error;

// runner module
pub mod runner;
pub use runner::{
    BoxError, CircuitBreakerConfig, ClassifierConfig, ErrorCategory, ErrorClassification,
    ErrorClassifier, FailureKind, GateDecision, GraphState, NodeConfig, NodeError,
    NodeErrorKind, NodeErrorRecord, NodeExecutionContext, NodeHooks, NodeImplementation,
    NoopHooks, PanicError, RetryConfig, RoutingFlag, RuntimeContext, StateUpdate,
    ValidationError, codes,
};
