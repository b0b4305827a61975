//! Node Error Model
//!
//! Every failure that leaves the runner boundary is one of the five
//! [`NodeError`] variants. Each variant carries a stable, machine-readable
//! code so graph authors can route on errors without matching on messages.
//!
//! The taxonomy is a tagged enum rather than a type hierarchy: it serializes
//! with an internal `kind` tag and survives process boundaries unchanged.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Boxed error returned by node implementations.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Stable error codes.
pub mod codes {
    pub const NODE_TIMEOUT: &str = "NODE_TIMEOUT";
    pub const NODE_CANCELLED: &str = "NODE_CANCELLED";
    pub const CIRCUIT_OPEN: &str = "CIRCUIT_OPEN";
    pub const RETRY_EXHAUSTED: &str = "RETRY_EXHAUSTED";
    /// Generic code for unrecognized failures.
    pub const EXECUTION_FAILED: &str = "EXECUTION_FAILED";
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
    pub const NETWORK_ERROR: &str = "NETWORK_ERROR";
    /// A panic inside a node implementation.
    pub const PROGRAMMER_ERROR: &str = "PROGRAMMER_ERROR";
}

/// Error surfaced by a node invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[non_exhaustive]
pub enum NodeError {
    /// The attempt did not finish within its deadline.
    #[error("node timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The invocation was cancelled, either by the caller or by the
    /// implementation reporting an aborted operation.
    #[error("node cancelled: {reason}")]
    Cancellation { reason: String },

    /// The circuit breaker rejected the call before it was attempted.
    #[error("circuit breaker open for node '{node_name}' (retry in {retry_after_ms}ms)")]
    CircuitOpen {
        node_name: String,
        retry_after_ms: u64,
    },

    /// Every allowed attempt failed with a retryable error.
    #[error("retry exhausted after {attempts} attempts: {last}")]
    RetryExhausted { attempts: u32, last: Box<NodeError> },

    /// The implementation failed. `code` is one of [`codes`] or a
    /// caller-defined code; `retryable` is false once the failure has been
    /// judged terminal.
    #[error("{message}")]
    Execution {
        code: String,
        message: String,
        #[serde(default = "default_retryable")]
        retryable: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cause: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stack: Option<String>,
    },
}

impl NodeError {
    /// Create a timeout error.
    pub fn timeout(timeout_ms: u64) -> Self {
        Self::Timeout { timeout_ms }
    }

    /// Create a cancellation error.
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancellation {
            reason: reason.into(),
        }
    }

    /// Create a circuit-open rejection.
    pub fn circuit_open(node_name: impl Into<String>, retry_after_ms: u64) -> Self {
        Self::CircuitOpen {
            node_name: node_name.into(),
            retry_after_ms,
        }
    }

    /// Wrap the last error of an exhausted retry loop.
    pub fn retry_exhausted(attempts: u32, last: NodeError) -> Self {
        Self::RetryExhausted {
            attempts,
            last: Box::new(last),
        }
    }

    /// Create an execution error with the given code.
    pub fn execution(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Execution {
            code: code.into(),
            message: message.into(),
            retryable: true,
            cause: None,
            stack: None,
        }
    }

    /// Mark an execution error as terminal. No-op for other variants.
    pub fn terminal(mut self) -> Self {
        if let Self::Execution { retryable, .. } = &mut self {
            *retryable = false;
        }
        self
    }

    /// Attach a cause description to an execution error. No-op for other variants.
    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        if let Self::Execution { cause: slot, .. } = &mut self {
            *slot = Some(cause.into());
        }
        self
    }

    /// Attach a sanitized stack to an execution error. No-op for other variants.
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        if let Self::Execution { stack: slot, .. } = &mut self {
            *slot = Some(stack.into());
        }
        self
    }

    /// Stable code for programmatic matching.
    pub fn code(&self) -> &str {
        match self {
            Self::Timeout { .. } => codes::NODE_TIMEOUT,
            Self::Cancellation { .. } => codes::NODE_CANCELLED,
            Self::CircuitOpen { .. } => codes::CIRCUIT_OPEN,
            Self::RetryExhausted { .. } => codes::RETRY_EXHAUSTED,
            Self::Execution { code, .. } => code,
        }
    }

    /// Variant tag, independent of the code.
    pub fn kind(&self) -> NodeErrorKind {
        match self {
            Self::Timeout { .. } => NodeErrorKind::Timeout,
            Self::Cancellation { .. } => NodeErrorKind::Cancellation,
            Self::CircuitOpen { .. } => NodeErrorKind::CircuitOpen,
            Self::RetryExhausted { .. } => NodeErrorKind::RetryExhausted,
            Self::Execution { .. } => NodeErrorKind::Execution,
        }
    }

    /// Innermost error, following `RetryExhausted` wrappers.
    pub fn root(&self) -> &NodeError {
        match self {
            Self::RetryExhausted { last, .. } => last.root(),
            other => other,
        }
    }

    /// Sanitized stack, if one was captured.
    pub fn stack(&self) -> Option<&str> {
        match self.root() {
            Self::Execution { stack, .. } => stack.as_deref(),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.root(), Self::Timeout { .. })
    }

    /// Whether the failure may clear up without a code or input change.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Execution { retryable, .. } => *retryable,
            _ => true,
        }
    }
}

fn default_retryable() -> bool {
    true
}

/// Discriminant of [`NodeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeErrorKind {
    Timeout,
    Cancellation,
    CircuitOpen,
    RetryExhausted,
    Execution,
}

/// Whether retrying a failure can help.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Retryable,
    Terminal,
}

/// Coarse failure kind used for metrics bucketing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    Validation,
    Network,
    Cancellation,
    #[default]
    Other,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Timeout => "timeout",
            Self::Validation => "validation",
            Self::Network => "network",
            Self::Cancellation => "cancellation",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

/// Result of classifying an arbitrary error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorClassification {
    pub category: ErrorCategory,
    pub failure_kind: FailureKind,
    pub normalized: NodeError,
}

impl ErrorClassification {
    pub fn retryable(failure_kind: FailureKind, normalized: NodeError) -> Self {
        Self {
            category: ErrorCategory::Retryable,
            failure_kind,
            normalized,
        }
    }

    pub fn terminal(failure_kind: FailureKind, normalized: NodeError) -> Self {
        Self {
            category: ErrorCategory::Terminal,
            failure_kind,
            normalized,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.category == ErrorCategory::Retryable
    }
}

/// Input rejected by a node implementation. Classified as terminal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("validation failed: {0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// A panic caught while running a node implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("node implementation panicked: {message}")]
pub struct PanicError {
    pub message: String,
}

impl PanicError {
    /// Build from a panic payload as returned by `catch_unwind`.
    pub fn from_payload(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self { message }
    }
}
