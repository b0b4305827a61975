//! noderun Testing Framework
//!
//! Utilities for exercising nodes without real LLMs, tools or networks:
//! scripted node implementations, hooks that record what the runner did,
//! and a deterministic jitter source for exact backoff curves.

pub mod hooks;
pub mod node;

pub use hooks::{RecordedRetry, RecordingHooks};
pub use node::{MockNode, MockOutcome};
pub use noderun_foundation::runner::{FixedJitter, NoJitter};
