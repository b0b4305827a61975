//! Error Classification
//!
//! Turns whatever a node implementation returned into an
//! [`ErrorClassification`]: retryable or terminal, a coarse
//! [`FailureKind`] for metrics, and a normalized [`NodeError`].
//!
//! [`DefaultErrorClassifier`] walks the error's `source()` chain and applies
//! the first matching rule:
//!
//! 1. [`NodeError`] values keep their meaning (`RetryExhausted` and
//!    `CircuitOpen` are terminal)
//! 2. [`PanicError`] is a programmer error, terminal
//! 3. [`ValidationError`] and `serde_json::Error` are terminal
//! 4. `tokio::time::error::Elapsed` is a retryable timeout
//! 5. `std::io::Error` is judged by its kind
//! 6. message patterns, matched as whole words: deny patterns are
//!    terminal, transient ones retryable
//! 7. anything else is a retryable `EXECUTION_FAILED`
//!
//! Unknown failures are retryable; the retry policy's attempt bound is the
//! only limit on how often they are retried, so use deny patterns for
//! failures known to be permanent.

use noderun_kernel::runner::config::ClassifierConfig;
use noderun_kernel::runner::error::{
    ErrorClassification, FailureKind, NodeError, PanicError, ValidationError, codes,
};
use noderun_kernel::runner::node::ErrorClassifier;
use regex::Regex;
use std::error::Error;
use std::io;
use std::sync::LazyLock;
use tracing::warn;

/// Lines kept by [`sanitize_stack`]
pub const MAX_STACK_LINES: usize = 20;
/// Characters kept by [`sanitize_stack`]
pub const MAX_STACK_CHARS: usize = 4_000;

/// Rule-based classifier configured by [`ClassifierConfig`].
#[derive(Debug, Clone)]
pub struct DefaultErrorClassifier {
    timeouts_retryable: bool,
    transient_patterns: Vec<MessagePattern>,
    deny_patterns: Vec<MessagePattern>,
}

/// A configured pattern compiled to match on word boundaries.
#[derive(Debug, Clone)]
struct MessagePattern {
    regex: Regex,
    /// Bucket a transient match falls into
    kind: FailureKind,
}

impl MessagePattern {
    fn compile(pattern: &str) -> Option<Self> {
        let pattern = pattern.trim().to_lowercase();
        if pattern.is_empty() {
            return None;
        }
        let is_word = |c: char| c.is_alphanumeric() || c == '_';
        let start = if pattern.starts_with(is_word) { r"\b" } else { "" };
        let end = if pattern.ends_with(is_word) { r"\b" } else { "" };
        let regex = match Regex::new(&format!("{start}{}{end}", regex::escape(&pattern))) {
            Ok(regex) => regex,
            Err(err) => {
                warn!(pattern = %pattern, error = %err, "ignoring classifier pattern");
                return None;
            }
        };
        let kind = if ["timeout", "timed out", "timedout"].iter().any(|t| pattern.contains(t)) {
            FailureKind::Timeout
        } else {
            FailureKind::Network
        };
        Some(Self { regex, kind })
    }

    fn compile_all(patterns: &[String]) -> Vec<Self> {
        patterns.iter().filter_map(|p| Self::compile(p)).collect()
    }
}

impl Default for DefaultErrorClassifier {
    fn default() -> Self {
        Self::new(&ClassifierConfig::default())
    }
}

impl DefaultErrorClassifier {
    pub fn new(config: &ClassifierConfig) -> Self {
        Self {
            timeouts_retryable: config.timeouts_retryable,
            transient_patterns: MessagePattern::compile_all(&config.transient_patterns),
            deny_patterns: MessagePattern::compile_all(&config.deny_patterns),
        }
    }

    fn classify_node_error(&self, error: &NodeError) -> ErrorClassification {
        let kind = failure_kind_of(error);
        match error {
            NodeError::RetryExhausted { .. } | NodeError::CircuitOpen { .. } => {
                ErrorClassification::terminal(kind, error.clone())
            }
            NodeError::Timeout { .. } if !self.timeouts_retryable => {
                ErrorClassification::terminal(kind, error.clone())
            }
            NodeError::Timeout { .. } | NodeError::Cancellation { .. } => {
                ErrorClassification::retryable(kind, error.clone())
            }
            NodeError::Execution { code, retryable, .. } => {
                let terminal_code =
                    code == codes::VALIDATION_ERROR || code == codes::PROGRAMMER_ERROR;
                if *retryable && !terminal_code {
                    ErrorClassification::retryable(kind, error.clone())
                } else {
                    ErrorClassification::terminal(kind, error.clone().terminal())
                }
            }
            _ => ErrorClassification::retryable(kind, error.clone()),
        }
    }

    fn classify_typed(
        &self,
        error: &(dyn Error + 'static),
        top: &(dyn Error + 'static),
    ) -> Option<ErrorClassification> {
        if let Some(node_error) = error.downcast_ref::<NodeError>() {
            return Some(self.classify_node_error(node_error));
        }
        if let Some(panic) = error.downcast_ref::<PanicError>() {
            let normalized =
                NodeError::execution(codes::PROGRAMMER_ERROR, strip_paths(&panic.to_string()))
                    .terminal();
            return Some(ErrorClassification::terminal(FailureKind::Other, normalized));
        }
        if error.is::<ValidationError>() || error.is::<serde_json::Error>() {
            let normalized = normalize(top, codes::VALIDATION_ERROR).terminal();
            return Some(ErrorClassification::terminal(FailureKind::Validation, normalized));
        }
        if error.is::<tokio::time::error::Elapsed>() {
            let normalized = NodeError::timeout(0);
            return Some(if self.timeouts_retryable {
                ErrorClassification::retryable(FailureKind::Timeout, normalized)
            } else {
                ErrorClassification::terminal(FailureKind::Timeout, normalized)
            });
        }
        if let Some(io_error) = error.downcast_ref::<io::Error>() {
            return self.classify_io(io_error.kind(), top);
        }
        None
    }

    fn classify_io(
        &self,
        kind: io::ErrorKind,
        top: &(dyn Error + 'static),
    ) -> Option<ErrorClassification> {
        use io::ErrorKind::*;
        match kind {
            ConnectionRefused | ConnectionReset | ConnectionAborted | NotConnected
            | AddrNotAvailable | BrokenPipe | TimedOut | WouldBlock | Interrupted
            | UnexpectedEof => Some(ErrorClassification::retryable(
                FailureKind::Network,
                normalize(top, codes::NETWORK_ERROR),
            )),
            InvalidInput | InvalidData => Some(ErrorClassification::terminal(
                FailureKind::Validation,
                normalize(top, codes::VALIDATION_ERROR).terminal(),
            )),
            PermissionDenied | NotFound => Some(ErrorClassification::terminal(
                FailureKind::Other,
                normalize(top, codes::EXECUTION_FAILED).terminal(),
            )),
            _ => None,
        }
    }

    fn classify_message(&self, error: &(dyn Error + 'static)) -> ErrorClassification {
        let rendered = render_chain(error).join(": ").to_lowercase();

        if self.deny_patterns.iter().any(|p| p.regex.is_match(&rendered)) {
            return ErrorClassification::terminal(
                FailureKind::Other,
                normalize(error, codes::EXECUTION_FAILED).terminal(),
            );
        }
        let mut matched = self
            .transient_patterns
            .iter()
            .filter(|p| p.regex.is_match(&rendered))
            .map(|p| p.kind)
            .peekable();
        if matched.peek().is_some() {
            // A timeout match wins over a generic network one.
            let kind = if matched.any(|kind| kind == FailureKind::Timeout) {
                FailureKind::Timeout
            } else {
                FailureKind::Network
            };
            return ErrorClassification::retryable(kind, normalize(error, codes::NETWORK_ERROR));
        }
        ErrorClassification::retryable(FailureKind::Other, normalize(error, codes::EXECUTION_FAILED))
    }
}

impl ErrorClassifier for DefaultErrorClassifier {
    fn classify(&self, error: &(dyn Error + 'static)) -> ErrorClassification {
        let mut current: Option<&(dyn Error + 'static)> = Some(error);
        while let Some(candidate) = current {
            if let Some(classification) = self.classify_typed(candidate, error) {
                return classification;
            }
            current = candidate.source();
        }
        self.classify_message(error)
    }
}

/// Classify with the default rules.
pub fn classify_error(error: &(dyn Error + 'static)) -> ErrorClassification {
    DefaultErrorClassifier::default().classify(error)
}

/// Metrics bucket of a normalized error.
pub fn failure_kind_of(error: &NodeError) -> FailureKind {
    match error.root() {
        NodeError::Timeout { .. } => FailureKind::Timeout,
        NodeError::Cancellation { .. } => FailureKind::Cancellation,
        NodeError::Execution { code, .. } => match code.as_str() {
            codes::VALIDATION_ERROR => FailureKind::Validation,
            codes::NETWORK_ERROR => FailureKind::Network,
            codes::NODE_TIMEOUT => FailureKind::Timeout,
            _ => FailureKind::Other,
        },
        _ => FailureKind::Other,
    }
}

fn render_chain(error: &(dyn Error + 'static)) -> Vec<String> {
    std::iter::successors(Some(error), |&e| e.source())
        .map(|e| e.to_string())
        .collect()
}

/// Wrap a foreign error as an execution error with a sanitized cause chain.
/// The top-level message is kept as written.
fn normalize(error: &(dyn Error + 'static), code: &str) -> NodeError {
    let chain = render_chain(error);
    let mut normalized = NodeError::execution(code, chain[0].clone());
    if chain.len() > 1 {
        normalized = normalized.with_cause(sanitize_stack(&chain[1..].join(": ")));
    }
    let frames: Vec<String> = chain
        .iter()
        .enumerate()
        .map(|(depth, message)| format!("{depth}: {message}"))
        .collect();
    normalized.with_stack(sanitize_stack(&frames.join("\n")))
}

static REGISTRY_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:[A-Za-z]:)?[/\\][^\s:()]*[/\\]\.cargo[/\\]registry[/\\]src[/\\][^/\\\s]+[/\\]")
        .expect("registry path pattern is a valid regex")
});

static WINDOWS_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Za-z]:\\(?:[^\\\s:()]+\\)*").expect("windows path pattern is a valid regex")
});

/// Absolute paths under well-known filesystem roots; URL paths are left alone.
static UNIX_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(^|[\s(\x22'=])/(?:home|Users|root|tmp|var|opt|usr|srv|mnt|private|nix|etc)/(?:[^/\s:()\x22']+/)*",
    )
    .expect("unix path pattern is a valid regex")
});

const NOISE_FRAMES: &[&str] = &[
    "std::panicking",
    "std::panic::",
    "core::panicking",
    "core::ops::function",
    "tokio::runtime",
    "futures_util::",
    "__rust_begin_short_backtrace",
    "rust_begin_unwind",
    "/rustc/",
];

/// Remove directory prefixes of absolute filesystem paths, keeping file
/// names.
///
/// Cargo registry paths keep the crate directory (`tokio-1.40.0/src/...`).
pub fn strip_paths(text: &str) -> String {
    let text = REGISTRY_PATH.replace_all(text, "");
    let text = WINDOWS_PATH.replace_all(&text, "");
    UNIX_PATH.replace_all(&text, "$1").into_owned()
}

/// Make a stack or cause chain safe for external sinks.
///
/// Drops runtime and panic-machinery frames, strips absolute paths and caps
/// the result at [`MAX_STACK_LINES`] lines and [`MAX_STACK_CHARS`] characters.
pub fn sanitize_stack(stack: &str) -> String {
    let kept: Vec<&str> = stack
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter(|line| !NOISE_FRAMES.iter().any(|noise| line.contains(noise)))
        .collect();

    let mut lines: Vec<String> = kept
        .iter()
        .take(MAX_STACK_LINES)
        .map(|line| strip_paths(line))
        .collect();
    if kept.len() > MAX_STACK_LINES {
        lines.push(format!("... {} more lines", kept.len() - MAX_STACK_LINES));
    }

    let joined = lines.join("\n");
    if joined.chars().count() <= MAX_STACK_CHARS {
        return joined;
    }
    let mut truncated: String = joined.chars().take(MAX_STACK_CHARS).collect();
    truncated.push_str("\n... truncated");
    truncated
}
