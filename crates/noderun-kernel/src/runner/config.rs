//! Node Configuration
//!
//! Static configuration for a node definition: retry policy, per-attempt
//! timeout, circuit breaker thresholds and classifier overrides. All types
//! deserialize from config files (see [`crate::config`]).

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::{ConfigError, ConfigResult};

// ============================================================================
// RetryConfig
// ============================================================================

/// Retry policy for a node.
///
/// The delay before attempt `k + 1` is `min(base_delay_ms * 2^(k-1), max_delay_ms)`,
/// optionally extended by jitter drawn from `[0, delay * jitter_factor]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one (>= 1)
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay_ms: u64,
    /// Upper bound for the exponential delay (before jitter)
    pub max_delay_ms: u64,
    /// Whether to add random jitter
    pub jitter: bool,
    /// Jitter upper bound as a fraction of the computed delay (0.0 - 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
            jitter: true,
            jitter_factor: 0.25,
        }
    }
}

impl RetryConfig {
    /// Single attempt, no retry
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 0,
            max_delay_ms: 0,
            jitter: false,
            jitter_factor: 0.0,
        }
    }

    /// Many quick retries, for cheap idempotent calls
    pub fn aggressive() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 100,
            max_delay_ms: 2_000,
            jitter: true,
            jitter_factor: 0.25,
        }
    }

    /// Few, widely spaced retries, for expensive or rate-limited calls
    pub fn conservative() -> Self {
        Self {
            max_attempts: 2,
            base_delay_ms: 2_000,
            max_delay_ms: 30_000,
            jitter: true,
            jitter_factor: 0.5,
        }
    }

    /// Profile for nodes calling a language model
    pub fn llm() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
            jitter: true,
            jitter_factor: 0.25,
        }
    }

    /// Profile for nodes calling local tools or services
    pub fn tool() -> Self {
        Self {
            max_attempts: 2,
            base_delay_ms: 500,
            max_delay_ms: 5_000,
            jitter: true,
            jitter_factor: 0.25,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_base_delay_ms(mut self, ms: u64) -> Self {
        self.base_delay_ms = ms;
        self
    }

    pub fn with_max_delay_ms(mut self, ms: u64) -> Self {
        self.max_delay_ms = ms;
        self
    }

    /// Disable jitter so backoff curves are exact
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self.jitter_factor = 0.0;
        self
    }

    pub fn with_jitter_factor(mut self, factor: f64) -> Self {
        self.jitter = factor > 0.0;
        self.jitter_factor = factor;
        self
    }

    /// Delay to wait after failed attempt `attempt` (1-indexed), without jitter.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63);
        let multiplier = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
        let delay = self.base_delay_ms.saturating_mul(multiplier);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    /// Jitter bound for the given base delay; zero when jitter is disabled.
    pub fn jitter_bound(&self, delay: Duration) -> Duration {
        if !self.jitter || !self.jitter_factor.is_finite() || self.jitter_factor <= 0.0 {
            return Duration::ZERO;
        }
        delay.mul_f64(self.jitter_factor)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_attempts < 1 {
            return Err(ConfigError::Invalid(
                "invalid retry configuration: max_attempts must be at least 1".to_string(),
            ));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "invalid retry configuration: base_delay_ms ({}) exceeds max_delay_ms ({})",
                self.base_delay_ms, self.max_delay_ms
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::Invalid(format!(
                "invalid retry configuration: jitter_factor {} must be within 0.0..=1.0",
                self.jitter_factor
            )));
        }
        Ok(())
    }
}

// ============================================================================
// CircuitBreakerConfig
// ============================================================================

/// Circuit breaker thresholds for a node definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Time the circuit stays open before a trial call is allowed
    pub recovery_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_ms: 60_000,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new(failure_threshold: u32, recovery_timeout_ms: u64) -> Self {
        Self {
            failure_threshold,
            recovery_timeout_ms,
        }
    }

    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "invalid circuit breaker configuration: failure_threshold must be greater than 0"
                    .to_string(),
            ));
        }
        if self.recovery_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "invalid circuit breaker configuration: recovery_timeout_ms must be greater than 0"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// ClassifierConfig
// ============================================================================

/// Overrides for the default error classifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Treat timeouts as retryable
    pub timeouts_retryable: bool,
    /// Case-insensitive phrases, matched as whole words, that mark an otherwise
    /// unknown error as transient
    pub transient_patterns: Vec<String>,
    /// Case-insensitive phrases, matched as whole words, that force an unknown
    /// error to be terminal.
    /// Checked before `transient_patterns`.
    pub deny_patterns: Vec<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            timeouts_retryable: true,
            transient_patterns: [
                "econnreset",
                "econnrefused",
                "etimedout",
                "epipe",
                "enotfound",
                "eai_again",
                "socket hang up",
                "connection reset",
                "connection refused",
                "network",
                "timed out",
                "timeout",
                "rate limit",
                "too many requests",
                "429",
                "502",
                "503",
                "504",
                "service unavailable",
                "temporarily unavailable",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            deny_patterns: Vec::new(),
        }
    }
}

impl ClassifierConfig {
    pub fn with_deny_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.deny_patterns.push(pattern.into());
        self
    }

    pub fn with_transient_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.transient_patterns.push(pattern.into());
        self
    }

    pub fn with_timeouts_retryable(mut self, retryable: bool) -> Self {
        self.timeouts_retryable = retryable;
        self
    }
}

// ============================================================================
// NodeConfig
// ============================================================================

/// Full configuration of a node definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node name used for logs, metrics and error records
    pub name: String,
    /// Per-attempt timeout; `None` or `0` disables it
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub retry: RetryConfig,
    /// `None` disables circuit breaking for this node
    #[serde(default)]
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    #[serde(default)]
    pub classifier: ClassifierConfig,
}

impl NodeConfig {
    /// Config with default retry policy, no timeout and no circuit breaker
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            timeout_ms: None,
            retry: RetryConfig::default(),
            circuit_breaker: None,
            classifier: ClassifierConfig::default(),
        }
    }

    /// Single attempt, no timeout
    pub fn simple(name: impl Into<String>) -> Self {
        Self::new(name).with_retry(RetryConfig::none())
    }

    /// LLM profile: three attempts, one minute per attempt
    pub fn llm(name: impl Into<String>) -> Self {
        Self::new(name)
            .with_retry(RetryConfig::llm())
            .with_timeout_ms(60_000)
    }

    /// Tool profile: two attempts, thirty seconds per attempt
    pub fn tool(name: impl Into<String>) -> Self {
        Self::new(name)
            .with_retry(RetryConfig::tool())
            .with_timeout_ms(30_000)
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = Some(config);
        self
    }

    pub fn with_classifier(mut self, classifier: ClassifierConfig) -> Self {
        self.classifier = classifier;
        self
    }

    /// Effective per-attempt timeout
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    /// Reject configurations the runner cannot honour.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("node name is required".to_string()));
        }
        self.retry.validate()?;
        if let Some(cb) = &self.circuit_breaker {
            cb.validate()?;
        }
        Ok(())
    }
}
