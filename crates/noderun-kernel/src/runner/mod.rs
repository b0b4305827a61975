//! Node runner contracts and data types
//!
//! - [`error`]: the five-variant [`NodeError`] taxonomy and classification results
//! - [`context`]: per-invocation and per-attempt contexts
//! - [`config`]: retry, timeout, circuit breaker and classifier settings
//! - [`state`]: graph state and the partial updates nodes return
//! - [`node`]: implementation, classifier and hook traits

pub mod config;
pub mod context;
pub mod error;
pub mod node;
pub mod state;

pub use config::{CircuitBreakerConfig, ClassifierConfig, NodeConfig, RetryConfig};
pub use context::{NodeExecutionContext, RuntimeContext};
pub use error::{
    BoxError, ErrorCategory, ErrorClassification, FailureKind, NodeError, NodeErrorKind,
    PanicError, ValidationError, codes,
};
pub use node::{ErrorClassifier, NodeHooks, NodeImplementation, NoopHooks};
pub use state::{GateDecision, GraphState, NodeErrorRecord, RoutingFlag, StateUpdate};
