//! Node Factory
//!
//! Composes the runner pieces around a user-supplied [`NodeImplementation`].
//! One [`Node`] corresponds to one node definition: its circuit breaker and
//! metrics collector are created once and shared by every invocation.
//!
//! Per invocation the steps run in a fixed order:
//!
//! 1. circuit breaker gate, rejecting with `CircuitOpen` without running
//!    the implementation
//! 2. retry loop over timeout-guarded attempts, failures classified between
//!    attempts
//! 3. breaker and metrics bookkeeping
//! 4. the implementation's update on success, or an error record plus a
//!    blocked marker on failure
//!
//! [`Node::invoke`] never fails and never panics on behalf of the
//! implementation.

use noderun_kernel::config::ConfigError;
use noderun_kernel::runner::config::NodeConfig;
use noderun_kernel::runner::context::RuntimeContext;
use noderun_kernel::runner::error::NodeError;
use noderun_kernel::runner::node::{ErrorClassifier, NodeHooks, NodeImplementation, NoopHooks};
use noderun_kernel::runner::state::StateUpdate;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::circuit_breaker::CircuitBreaker;
use super::classifier::{DefaultErrorClassifier, failure_kind_of};
use super::metrics::{MetricsConfig, NodeMetricsCollector};
use super::retry::{JitterSource, RandomJitter, RetryHooks, with_node_retry};
use super::state_helpers::{create_blocked_update, create_error_update};
use super::timeout::{TimeoutResult, with_timeout_cancellable};

/// A configured, resilient node.
pub struct Node<S> {
    config: NodeConfig,
    implementation: Arc<dyn NodeImplementation<S>>,
    circuit_breaker: Option<Arc<CircuitBreaker>>,
    metrics: Arc<NodeMetricsCollector>,
    classifier: Arc<dyn ErrorClassifier>,
    jitter: Arc<dyn JitterSource>,
    hooks: Arc<dyn NodeHooks>,
}

impl<S> Clone for Node<S> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            implementation: Arc::clone(&self.implementation),
            circuit_breaker: self.circuit_breaker.clone(),
            metrics: Arc::clone(&self.metrics),
            classifier: Arc::clone(&self.classifier),
            jitter: Arc::clone(&self.jitter),
            hooks: Arc::clone(&self.hooks),
        }
    }
}

impl<S> std::fmt::Debug for Node<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("config", &self.config)
            .field("circuit_breaker", &self.circuit_breaker)
            .finish_non_exhaustive()
    }
}

impl<S> Node<S> {
    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// The node's breaker, absent when circuit breaking is disabled
    pub fn circuit_breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.circuit_breaker.as_ref()
    }

    pub fn metrics(&self) -> &Arc<NodeMetricsCollector> {
        &self.metrics
    }

    fn failure_update(&self, err: &NodeError) -> StateUpdate {
        create_error_update(self.name(), err).merged_with(&create_blocked_update(&format!(
            "node '{}' failed: {err}",
            self.name()
        )))
    }
}

impl<S> Node<S>
where
    S: Clone + Send + Sync + 'static,
{
    /// Run the node once against `state`.
    ///
    /// Every failure mode ends up in the returned update's `errors`.
    pub async fn invoke(&self, state: &S, ctx: &RuntimeContext) -> StateUpdate {
        let name = self.name();

        if let Some(breaker) = &self.circuit_breaker {
            if !breaker.can_execute() {
                let err = NodeError::circuit_open(name, breaker.retry_after_ms());
                warn!(node = name, trace_id = %ctx.trace_id, "circuit open, skipping execution");
                self.metrics.record_rejected(name);
                return self.failure_update(&err);
            }
        }

        let started = Instant::now();
        let timeout = self.config.timeout().unwrap_or(Duration::ZERO);
        let implementation: &dyn NodeImplementation<S> = &*self.implementation;
        let hooks = &self.hooks;
        let metrics = &self.metrics;

        let on_retry = |attempt: u32, err: &NodeError, delay: Duration| {
            metrics.record_retry(name, attempt);
            hooks.on_retry_attempt(name, attempt, err, delay);
        };
        let retry_hooks = RetryHooks::new()
            .with_jitter(&*self.jitter)
            .on_retry_attempt(&on_retry)
            .with_cancellation(&ctx.cancellation);

        let result = with_node_retry(
            |attempt| {
                let attempt_ctx = ctx.for_attempt(name, attempt);
                let token = attempt_ctx.cancellation.clone();
                let input = state.clone();
                async move {
                    debug!(node = name, attempt, trace_id = %attempt_ctx.trace_id, "executing");
                    let outcome = with_timeout_cancellable(
                        || implementation.execute(input, attempt_ctx),
                        timeout,
                        &token,
                    )
                    .await;
                    if let TimeoutResult::TimedOut { elapsed, .. } = &outcome {
                        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                        warn!(
                            node = name,
                            attempt,
                            timeout_ms,
                            elapsed_ms = elapsed.as_millis() as u64,
                            "attempt timed out"
                        );
                        hooks.on_timeout(name, &NodeError::timeout(timeout_ms));
                    }
                    outcome.into_result()
                }
            },
            &self.config.retry,
            &*self.classifier,
            retry_hooks,
        )
        .await;

        let latency = started.elapsed();
        match result.outcome {
            Ok(update) => {
                if let Some(breaker) = &self.circuit_breaker {
                    breaker.record_success();
                }
                self.metrics.record_success(name, latency);
                info!(
                    node = name,
                    attempts = result.attempts,
                    latency_ms = latency.as_millis() as u64,
                    "node completed"
                );
                update
            }
            Err(err) => {
                // A caller-side cancellation says nothing about the node's health.
                if !ctx.is_cancelled() {
                    if let Some(breaker) = &self.circuit_breaker {
                        breaker.record_failure();
                    }
                }
                if result.attempts == 0 {
                    self.metrics.record_rejected(name);
                } else {
                    let kind = result.failure_kind.unwrap_or_else(|| failure_kind_of(&err));
                    self.metrics.record_failure(name, latency, kind);
                }
                error!(
                    node = name,
                    attempts = result.attempts,
                    code = err.code(),
                    error = %err,
                    "node failed"
                );
                self.failure_update(&err)
            }
        }
    }
}

/// Assembles a [`Node`] with optional collaborators.
///
/// # Example
///
/// ```rust,ignore
/// let metrics = Arc::new(NodeMetricsCollector::default());
/// let node = NodeBuilder::new(NodeConfig::llm("elaborate"), elaborate)
///     .with_metrics(metrics.clone())
///     .with_hooks(Arc::new(AlertingHooks::new(pager)))
///     .build()?;
/// ```
pub struct NodeBuilder<S> {
    config: NodeConfig,
    implementation: Arc<dyn NodeImplementation<S>>,
    circuit_breaker: Option<Arc<CircuitBreaker>>,
    metrics: Option<Arc<NodeMetricsCollector>>,
    classifier: Option<Arc<dyn ErrorClassifier>>,
    jitter: Arc<dyn JitterSource>,
    hooks: Arc<dyn NodeHooks>,
}

impl<S: 'static> NodeBuilder<S> {
    pub fn new(config: NodeConfig, implementation: impl NodeImplementation<S> + 'static) -> Self {
        Self {
            config,
            implementation: Arc::new(implementation),
            circuit_breaker: None,
            metrics: None,
            classifier: None,
            jitter: Arc::new(RandomJitter),
            hooks: Arc::new(NoopHooks),
        }
    }

    /// Share a metrics collector, e.g. one per graph
    pub fn with_metrics(mut self, metrics: Arc<NodeMetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Replace the classifier built from the node's classifier config
    pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn NodeHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Use an existing breaker instead of building one from the config.
    /// Nodes sharing a breaker trip together.
    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.circuit_breaker = Some(breaker);
        self
    }

    /// Validate the config and assemble the node.
    pub fn build(self) -> Result<Node<S>, ConfigError> {
        self.config.validate()?;

        let circuit_breaker = self.circuit_breaker.or_else(|| {
            self.config
                .circuit_breaker
                .clone()
                .map(|cb| Arc::new(CircuitBreaker::new(self.config.name.clone(), cb)))
        });
        let classifier = self
            .classifier
            .unwrap_or_else(|| Arc::new(DefaultErrorClassifier::new(&self.config.classifier)));
        let metrics = self
            .metrics
            .unwrap_or_else(|| Arc::new(NodeMetricsCollector::new(MetricsConfig::default())));

        debug!(
            node = %self.config.name,
            max_attempts = self.config.retry.max_attempts,
            timeout_ms = ?self.config.timeout_ms,
            circuit_breaker = circuit_breaker.is_some(),
            "node created"
        );

        Ok(Node {
            config: self.config,
            implementation: self.implementation,
            circuit_breaker,
            metrics,
            classifier,
            jitter: self.jitter,
            hooks: self.hooks,
        })
    }
}

/// Build a node from `config` with default collaborators.
pub fn create_node<S: 'static>(
    config: NodeConfig,
    implementation: impl NodeImplementation<S> + 'static,
) -> Result<Node<S>, ConfigError> {
    NodeBuilder::new(config, implementation).build()
}

/// Single attempt, no timeout.
pub fn create_simple_node<S: 'static>(
    name: impl Into<String>,
    implementation: impl NodeImplementation<S> + 'static,
) -> Result<Node<S>, ConfigError> {
    create_node(NodeConfig::simple(name), implementation)
}

/// LLM profile: three attempts with a one-minute deadline each.
pub fn create_llm_node<S: 'static>(
    name: impl Into<String>,
    implementation: impl NodeImplementation<S> + 'static,
) -> Result<Node<S>, ConfigError> {
    create_node(NodeConfig::llm(name), implementation)
}

/// Tool profile: two attempts with a thirty-second deadline each.
pub fn create_tool_node<S: 'static>(
    name: impl Into<String>,
    implementation: impl NodeImplementation<S> + 'static,
) -> Result<Node<S>, ConfigError> {
    create_node(NodeConfig::tool(name), implementation)
}
