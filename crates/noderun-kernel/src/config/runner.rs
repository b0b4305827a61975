//! Runner-level configuration: logging, node defaults and per-node overrides.

use super::{ConfigError, ConfigResult, ENV_PREFIX, load_with_env};
use crate::error::{KernelError, KernelResult};
use crate::runner::config::{CircuitBreakerConfig, ClassifierConfig, NodeConfig, RetryConfig};
use error_stack::{Report, ResultExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging bootstrap settings. `RUST_LOG` takes precedence over `level`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    /// Include the event target (module path) in output
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            with_target: true,
        }
    }
}

/// Preset a node override starts from before its own fields apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeProfile {
    /// Use [`NodeDefaults`] as-is
    #[default]
    Standard,
    Simple,
    Llm,
    Tool,
}

/// Settings shared by every node unless overridden.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeDefaults {
    pub timeout_ms: Option<u64>,
    pub retry: RetryConfig,
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    pub classifier: ClassifierConfig,
}

/// Per-node overrides; unset fields fall back to the profile, then defaults.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeOverrides {
    pub profile: NodeProfile,
    pub timeout_ms: Option<u64>,
    pub retry: Option<RetryConfig>,
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    /// Turn circuit breaking off even when the defaults enable it
    pub disable_circuit_breaker: bool,
    pub classifier: Option<ClassifierConfig>,
}

/// Top-level runner configuration file.
///
/// ```yaml
/// logging:
///   level: debug
/// defaults:
///   timeout_ms: 30000
///   circuit_breaker: { failure_threshold: 5, recovery_timeout_ms: 60000 }
/// nodes:
///   summarize:
///     profile: llm
///   fetch_docs:
///     retry: { max_attempts: 4, base_delay_ms: 250 }
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub logging: LoggingConfig,
    pub defaults: NodeDefaults,
    pub nodes: HashMap<String, NodeOverrides>,
}

impl RunnerConfig {
    /// Load from a file, applying `NODERUN_` environment overrides, and validate.
    pub fn load(path: &str) -> KernelResult<Self> {
        let config: Self = load_with_env(path, ENV_PREFIX)
            .map_err(KernelError::from)
            .map_err(Report::new)
            .attach(format!("loading runner config from {path}"))?;
        config
            .validate()
            .map_err(KernelError::from)
            .map_err(Report::new)
            .attach(format!("validating runner config from {path}"))?;
        Ok(config)
    }

    /// Resolve the effective configuration of `name`.
    ///
    /// Nodes without an entry get the defaults.
    pub fn node_config(&self, name: &str) -> NodeConfig {
        let defaults = &self.defaults;
        let overrides = self.nodes.get(name).cloned().unwrap_or_default();

        let base = NodeConfig {
            name: name.to_string(),
            timeout_ms: defaults.timeout_ms,
            retry: defaults.retry.clone(),
            circuit_breaker: defaults.circuit_breaker.clone(),
            classifier: defaults.classifier.clone(),
        };
        let mut config = match overrides.profile {
            NodeProfile::Standard => base,
            NodeProfile::Simple => base.with_retry(RetryConfig::none()),
            NodeProfile::Llm => {
                let preset = NodeConfig::llm(name);
                NodeConfig {
                    timeout_ms: preset.timeout_ms,
                    retry: preset.retry,
                    ..base
                }
            }
            NodeProfile::Tool => {
                let preset = NodeConfig::tool(name);
                NodeConfig {
                    timeout_ms: preset.timeout_ms,
                    retry: preset.retry,
                    ..base
                }
            }
        };

        if let Some(timeout_ms) = overrides.timeout_ms {
            config.timeout_ms = Some(timeout_ms);
        }
        if let Some(retry) = overrides.retry {
            config.retry = retry;
        }
        if let Some(cb) = overrides.circuit_breaker {
            config.circuit_breaker = Some(cb);
        }
        if overrides.disable_circuit_breaker {
            config.circuit_breaker = None;
        }
        if let Some(classifier) = overrides.classifier {
            config.classifier = classifier;
        }
        config
    }

    /// Validate the defaults and every configured node.
    pub fn validate(&self) -> ConfigResult<()> {
        self.node_config("defaults").validate()?;
        for name in self.nodes.keys() {
            self.node_config(name)
                .validate()
                .map_err(|e| ConfigError::Invalid(format!("node '{name}': {e}")))?;
        }
        Ok(())
    }
}
