//! Crate-level error types for `noderun-kernel`.
//!
//! [`KernelError`] composes the errors of the kernel's fallible surfaces
//! (configuration, IO, serialization). [`KernelResult`] wraps it in an
//! [`error_stack::Report`] so callers can attach context while propagating.
//!
//! Node failures are not kernel errors: they are
//! [`NodeError`](crate::runner::error::NodeError) values carried inside a
//! `StateUpdate`.
//!
//! ```rust,ignore
//! use error_stack::ResultExt;
//! use noderun_kernel::config::RunnerConfig;
//!
//! let config = RunnerConfig::load("runner.yaml").attach("starting orchestrator")?;
//! ```

use thiserror::Error;

/// Crate-level error type for `noderun-kernel`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KernelError {
    /// A configuration loading or validation error.
    #[error("Config error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// A low-level I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON (de)serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An internal error described by a message string.
    #[error("{0}")]
    Internal(String),
}

/// Convenience result alias using [`error_stack::Report`].
pub type KernelResult<T> = Result<T, error_stack::Report<KernelError>>;
