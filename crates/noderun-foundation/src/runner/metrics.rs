//! Node Metrics
//!
//! [`NodeMetricsCollector`] aggregates execution counters per node name:
//! totals, per-kind failure counts, retries, circuit rejections and a
//! rolling window of latencies (p50/p90/p95/p99) and outcomes (failure rate).
//!
//! Threshold callbacks fire once when a metric crosses above its threshold
//! and are re-armed when it drops back to or below it. Callers who want
//! repeated alerts poll [`NodeMetricsCollector::snapshot`]. Callbacks run
//! after the collector's lock is released and only see snapshots.

use noderun_kernel::runner::error::FailureKind;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Default rolling window length
pub const DEFAULT_WINDOW_SIZE: usize = 100;

/// Collector settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Samples kept for percentiles and the failure rate
    pub window_size: usize,
    /// Failure rate over the window, in `0.0..=1.0`
    pub failure_rate_threshold: Option<f64>,
    /// Compared against the window's p99 latency
    pub latency_threshold_ms: Option<u64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            failure_rate_threshold: None,
            latency_threshold_ms: None,
        }
    }
}

impl MetricsConfig {
    pub fn with_window_size(mut self, size: usize) -> Self {
        self.window_size = size.max(1);
        self
    }

    pub fn with_failure_rate_threshold(mut self, rate: f64) -> Self {
        self.failure_rate_threshold = Some(rate);
        self
    }

    pub fn with_latency_threshold(mut self, latency: Duration) -> Self {
        self.latency_threshold_ms = Some(duration_ms(latency));
        self
    }
}

/// Point-in-time metrics of one node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMetrics {
    pub total_executions: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub retry_count: u64,
    /// Highest attempt number that failed and was retried
    pub max_retried_attempt: u32,
    /// Invocations that never ran an attempt, because the circuit was open
    /// or the run was cancelled first; not counted as executions
    pub rejected_count: u64,
    pub last_execution_ms: Option<u64>,
    pub avg_execution_ms: f64,
    pub p50: Option<u64>,
    pub p90: Option<u64>,
    pub p95: Option<u64>,
    pub p99: Option<u64>,
    /// Failure rate over the rolling window
    pub failure_rate: f64,
    pub timeout_errors: u64,
    pub validation_errors: u64,
    pub network_errors: u64,
    pub cancellation_errors: u64,
    pub other_errors: u64,
}

/// Outcome of one node invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationOutcome {
    Success,
    Failure(FailureKind),
}

/// Which threshold an event is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdKind {
    FailureRate,
    Latency,
}

impl fmt::Display for ThresholdKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThresholdKind::FailureRate => write!(f, "failure_rate"),
            ThresholdKind::Latency => write!(f, "latency"),
        }
    }
}

/// Payload handed to threshold callbacks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdEvent {
    pub kind: ThresholdKind,
    pub node_name: String,
    /// Observed value: a rate for failure-rate events, p99 ms for latency
    pub value: f64,
    pub threshold: f64,
    pub snapshot: NodeMetrics,
}

/// Threshold callback
pub type ThresholdCallback = Arc<dyn Fn(&ThresholdEvent) + Send + Sync>;

#[derive(Debug, Default)]
struct NodeState {
    total_executions: u64,
    success_count: u64,
    failure_count: u64,
    retry_count: u64,
    max_retried_attempt: u32,
    rejected_count: u64,
    last_execution_ms: Option<u64>,
    total_duration_ms: u128,
    timeout_errors: u64,
    validation_errors: u64,
    network_errors: u64,
    cancellation_errors: u64,
    other_errors: u64,
    latencies: VecDeque<u64>,
    /// `true` marks a failure
    outcomes: VecDeque<bool>,
    failure_rate_exceeded: bool,
    latency_exceeded: bool,
}

impl NodeState {
    fn push(&mut self, latency_ms: u64, failed: bool, window: usize) {
        if self.latencies.len() >= window {
            self.latencies.pop_front();
        }
        self.latencies.push_back(latency_ms);
        if self.outcomes.len() >= window {
            self.outcomes.pop_front();
        }
        self.outcomes.push_back(failed);
    }

    fn failure_rate(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 0.0;
        }
        let failures = self.outcomes.iter().filter(|failed| **failed).count();
        failures as f64 / self.outcomes.len() as f64
    }

    fn snapshot(&self) -> NodeMetrics {
        let mut sorted: Vec<u64> = self.latencies.iter().copied().collect();
        sorted.sort_unstable();
        let avg_execution_ms = if self.total_executions > 0 {
            self.total_duration_ms as f64 / self.total_executions as f64
        } else {
            0.0
        };
        NodeMetrics {
            total_executions: self.total_executions,
            success_count: self.success_count,
            failure_count: self.failure_count,
            retry_count: self.retry_count,
            max_retried_attempt: self.max_retried_attempt,
            rejected_count: self.rejected_count,
            last_execution_ms: self.last_execution_ms,
            avg_execution_ms,
            p50: percentile(&sorted, 50.0),
            p90: percentile(&sorted, 90.0),
            p95: percentile(&sorted, 95.0),
            p99: percentile(&sorted, 99.0),
            failure_rate: self.failure_rate(),
            timeout_errors: self.timeout_errors,
            validation_errors: self.validation_errors,
            network_errors: self.network_errors,
            cancellation_errors: self.cancellation_errors,
            other_errors: self.other_errors,
        }
    }
}

/// Nearest-rank percentile at index `floor(p/100 * (n-1))` of sorted samples.
fn percentile(sorted: &[u64], p: f64) -> Option<u64> {
    if sorted.is_empty() {
        return None;
    }
    let index = ((p / 100.0) * (sorted.len() - 1) as f64).floor() as usize;
    sorted.get(index.min(sorted.len() - 1)).copied()
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Per-node metrics keyed by node name. Share one collector across nodes
/// through an `Arc`.
pub struct NodeMetricsCollector {
    config: MetricsConfig,
    nodes: Mutex<HashMap<String, NodeState>>,
    failure_rate_callbacks: RwLock<Vec<ThresholdCallback>>,
    latency_callbacks: RwLock<Vec<ThresholdCallback>>,
}

impl fmt::Debug for NodeMetricsCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeMetricsCollector")
            .field("config", &self.config)
            .field("nodes", &self.nodes.lock().len())
            .finish_non_exhaustive()
    }
}

impl Default for NodeMetricsCollector {
    fn default() -> Self {
        Self::new(MetricsConfig::default())
    }
}

impl NodeMetricsCollector {
    pub fn new(config: MetricsConfig) -> Self {
        let config = MetricsConfig {
            window_size: config.window_size.max(1),
            ..config
        };
        Self {
            config,
            nodes: Mutex::new(HashMap::new()),
            failure_rate_callbacks: RwLock::new(Vec::new()),
            latency_callbacks: RwLock::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    /// Register a callback for failure-rate threshold crossings.
    pub fn on_failure_rate_threshold<F>(&self, callback: F)
    where
        F: Fn(&ThresholdEvent) + Send + Sync + 'static,
    {
        self.failure_rate_callbacks.write().push(Arc::new(callback));
    }

    /// Register a callback for p99 latency threshold crossings.
    pub fn on_latency_threshold<F>(&self, callback: F)
    where
        F: Fn(&ThresholdEvent) + Send + Sync + 'static,
    {
        self.latency_callbacks.write().push(Arc::new(callback));
    }

    pub fn record_success(&self, node_name: &str, latency: Duration) {
        self.record_invocation(node_name, InvocationOutcome::Success, latency);
    }

    pub fn record_failure(&self, node_name: &str, latency: Duration, kind: FailureKind) {
        self.record_invocation(node_name, InvocationOutcome::Failure(kind), latency);
    }

    /// Record one finished invocation and evaluate thresholds.
    pub fn record_invocation(&self, node_name: &str, outcome: InvocationOutcome, latency: Duration) {
        let latency_ms = duration_ms(latency);
        let events = {
            let mut nodes = self.nodes.lock();
            let state = nodes.entry(node_name.to_string()).or_default();

            state.total_executions += 1;
            state.last_execution_ms = Some(latency_ms);
            state.total_duration_ms += u128::from(latency_ms);
            match outcome {
                InvocationOutcome::Success => state.success_count += 1,
                InvocationOutcome::Failure(kind) => {
                    state.failure_count += 1;
                    match kind {
                        FailureKind::Timeout => state.timeout_errors += 1,
                        FailureKind::Validation => state.validation_errors += 1,
                        FailureKind::Network => state.network_errors += 1,
                        FailureKind::Cancellation => state.cancellation_errors += 1,
                        FailureKind::Other => state.other_errors += 1,
                    }
                }
            }
            state.push(
                latency_ms,
                matches!(outcome, InvocationOutcome::Failure(_)),
                self.config.window_size,
            );
            self.check_thresholds(node_name, state)
        };

        for event in events {
            let callbacks = match event.kind {
                ThresholdKind::FailureRate => self.failure_rate_callbacks.read().clone(),
                ThresholdKind::Latency => self.latency_callbacks.read().clone(),
            };
            for callback in callbacks {
                callback(&event);
            }
        }
    }

    /// Count a retry of `node_name`. `attempt` is the attempt that failed.
    pub fn record_retry(&self, node_name: &str, attempt: u32) {
        let mut nodes = self.nodes.lock();
        let state = nodes.entry(node_name.to_string()).or_default();
        state.retry_count += 1;
        state.max_retried_attempt = state.max_retried_attempt.max(attempt);
    }

    /// Count an invocation that never ran an attempt.
    pub fn record_rejected(&self, node_name: &str) {
        let mut nodes = self.nodes.lock();
        nodes.entry(node_name.to_string()).or_default().rejected_count += 1;
    }

    /// Metrics of `node_name`; all-zero for unknown nodes.
    pub fn snapshot(&self, node_name: &str) -> NodeMetrics {
        self.nodes
            .lock()
            .get(node_name)
            .map(NodeState::snapshot)
            .unwrap_or_default()
    }

    pub fn all_snapshots(&self) -> BTreeMap<String, NodeMetrics> {
        self.nodes
            .lock()
            .iter()
            .map(|(name, state)| (name.clone(), state.snapshot()))
            .collect()
    }

    /// Clear one node's metrics, or every node's when `node_name` is `None`.
    pub fn reset(&self, node_name: Option<&str>) {
        let mut nodes = self.nodes.lock();
        match node_name {
            Some(name) => {
                nodes.remove(name);
            }
            None => nodes.clear(),
        }
    }

    /// All snapshots as a JSON object keyed by node name.
    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self.all_snapshots())
    }

    fn check_thresholds(&self, node_name: &str, state: &mut NodeState) -> Vec<ThresholdEvent> {
        let mut events = Vec::new();

        if let Some(threshold) = self.config.failure_rate_threshold {
            let rate = state.failure_rate();
            if rate > threshold && !state.failure_rate_exceeded {
                state.failure_rate_exceeded = true;
                warn!(node = node_name, rate, threshold, "failure rate threshold exceeded");
                events.push(ThresholdEvent {
                    kind: ThresholdKind::FailureRate,
                    node_name: node_name.to_string(),
                    value: rate,
                    threshold,
                    snapshot: state.snapshot(),
                });
            } else if rate <= threshold {
                state.failure_rate_exceeded = false;
            }
        }

        if let Some(threshold_ms) = self.config.latency_threshold_ms {
            let mut sorted: Vec<u64> = state.latencies.iter().copied().collect();
            sorted.sort_unstable();
            if let Some(p99) = percentile(&sorted, 99.0) {
                if p99 > threshold_ms && !state.latency_exceeded {
                    state.latency_exceeded = true;
                    warn!(node = node_name, p99, threshold_ms, "latency threshold exceeded");
                    events.push(ThresholdEvent {
                        kind: ThresholdKind::Latency,
                        node_name: node_name.to_string(),
                        value: p99 as f64,
                        threshold: threshold_ms as f64,
                        snapshot: state.snapshot(),
                    });
                } else if p99 <= threshold_ms {
                    state.latency_exceeded = false;
                }
            }
        }

        events
    }
}
