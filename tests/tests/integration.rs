use noderun_foundation::prelude::*;
use noderun_foundation::runner::{
    CircuitBreaker, MetricsConfig, ThresholdEvent, ThresholdKind, merge_state_updates,
};
use noderun_kernel::config::RunnerConfig;
use noderun_kernel::{CircuitBreakerConfig, codes};
use noderun_testing::{FixedJitter, MockNode, MockOutcome, NoJitter, RecordingHooks};
use parking_lot::Mutex;
use serde_json::json;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn retry(max_attempts: u32, base_delay_ms: u64) -> RetryConfig {
    RetryConfig::default()
        .with_max_attempts(max_attempts)
        .with_base_delay_ms(base_delay_ms)
        .with_max_delay_ms(base_delay_ms * 100)
        .without_jitter()
}

fn build(config: NodeConfig, mock: &MockNode) -> Node<GraphState> {
    NodeBuilder::new(config, mock.clone())
        .with_jitter(Arc::new(NoJitter))
        .build()
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_fails_twice_then_succeeds() {
    let mock = MockNode::scripted([
        MockOutcome::Transient("connection reset by peer".into()),
        MockOutcome::Transient("connection reset by peer".into()),
        MockOutcome::Succeed(create_complete_update(json!({"plan": "ready"}))),
    ]);
    let config = NodeConfig::new("plan")
        .with_retry(retry(3, 100))
        .with_circuit_breaker(CircuitBreakerConfig::new(2, 1_000));
    let node = build(config, &mock);

    let started = Instant::now();
    let update = node.invoke(&GraphState::new(), &RuntimeContext::new()).await;

    assert!(!update.has_errors());
    assert_eq!(update.result, Some(json!({"plan": "ready"})));
    noderun_testing::assert_node_called!(mock, 3);
    assert_eq!(mock.attempts().await, vec![1, 2, 3]);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(300) && elapsed < Duration::from_millis(400));

    // Two retryable failures inside one invocation never reach the breaker.
    let breaker = node.circuit_breaker().unwrap();
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.status().failures, 0);

    let snapshot = node.metrics().snapshot("plan");
    assert_eq!(snapshot.success_count, 1);
    assert_eq!(snapshot.retry_count, 2);
}

#[tokio::test]
async fn test_open_circuit_never_calls_implementation() {
    let mock = MockNode::with_fallback(MockOutcome::Invalid("story id missing".into()));
    let config = NodeConfig::simple("seed").with_circuit_breaker(CircuitBreakerConfig::new(2, 60_000));
    let node = build(config, &mock);
    let state = GraphState::new();
    let ctx = RuntimeContext::new();

    node.invoke(&state, &ctx).await;
    node.invoke(&state, &ctx).await;
    noderun_testing::assert_node_called!(mock, 2);
    assert!(!node.circuit_breaker().unwrap().can_execute());

    let rejected = node.invoke(&state, &ctx).await;
    noderun_testing::assert_node_called!(mock, 2);
    assert_eq!(rejected.errors.len(), 1);
    assert_eq!(rejected.errors[0].code, codes::CIRCUIT_OPEN);
    assert!(rejected.errors[0].message.contains("seed"));
    assert!(rejected.is_blocked());
}

#[tokio::test(start_paused = true)]
async fn test_slow_implementation_times_out_at_deadline() {
    let mock = MockNode::with_fallback(MockOutcome::after(
        Duration::from_millis(200),
        MockOutcome::ok(),
    ));
    let hooks = Arc::new(RecordingHooks::new());
    let config = NodeConfig::simple("review").with_timeout_ms(50);
    let node: Node<GraphState> = NodeBuilder::new(config, mock.clone())
        .with_hooks(hooks.clone())
        .build()
        .unwrap();

    let started = Instant::now();
    let update = node.invoke(&GraphState::new(), &RuntimeContext::new()).await;
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(50));
    assert!(elapsed < Duration::from_millis(200));
    assert_eq!(update.errors[0].code, codes::NODE_TIMEOUT);
    assert!(update.errors[0].recoverable);
    assert_eq!(
        hooks.timeouts(),
        vec![("review".to_string(), NodeError::timeout(50))]
    );
}

#[tokio::test]
async fn test_breaker_opens_exactly_at_threshold() {
    for threshold in 1..=6u32 {
        let breaker = CircuitBreaker::new("n", CircuitBreakerConfig::new(threshold, 1_000));
        for _ in 0..threshold - 1 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Closed, "threshold {threshold}");
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open, "threshold {threshold}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_recovery_timing_and_half_open_rollback() {
    let breaker = CircuitBreaker::new("n", CircuitBreakerConfig::new(1, 400));
    breaker.record_failure();

    tokio::time::advance(Duration::from_millis(399)).await;
    assert!(!breaker.can_execute());

    tokio::time::advance(Duration::from_millis(1)).await;
    assert!(breaker.can_execute());
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    breaker.record_failure();
    assert_eq!(breaker.state(), CircuitState::Open);
    tokio::time::advance(Duration::from_millis(399)).await;
    assert!(!breaker.can_execute());
    tokio::time::advance(Duration::from_millis(1)).await;
    assert!(breaker.can_execute());

    breaker.record_success();
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_retry_bound_is_max_attempts() {
    for max_attempts in 1..=5u32 {
        let mock = MockNode::with_fallback(MockOutcome::Transient("socket hang up".into()));
        let node = build(NodeConfig::new("n").with_retry(retry(max_attempts, 10)), &mock);

        let update = node.invoke(&GraphState::new(), &RuntimeContext::new()).await;
        noderun_testing::assert_node_called!(mock, max_attempts as usize);

        let expected = if max_attempts == 1 {
            codes::NETWORK_ERROR
        } else {
            codes::RETRY_EXHAUSTED
        };
        assert_eq!(update.errors[0].code, expected, "max_attempts {max_attempts}");
    }
}

#[tokio::test]
async fn test_terminal_error_consumes_one_attempt() {
    let mock = MockNode::with_fallback(MockOutcome::Invalid("acceptance criteria empty".into()));
    let node = build(NodeConfig::new("n").with_retry(retry(5, 10)), &mock);

    let update = node.invoke(&GraphState::new(), &RuntimeContext::new()).await;
    noderun_testing::assert_node_called!(mock, 1);
    assert_eq!(update.errors[0].code, codes::VALIDATION_ERROR);
    assert!(!update.errors[0].recoverable);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_curve_is_reproducible() {
    let config = NodeConfig::new("n").with_retry(
        RetryConfig::default()
            .with_max_attempts(6)
            .with_base_delay_ms(100)
            .with_max_delay_ms(1_000)
            .with_jitter_factor(0.5),
    );

    let mut curves = Vec::new();
    for _ in 0..2 {
        let hooks = Arc::new(RecordingHooks::new());
        let mock = MockNode::with_fallback(MockOutcome::Transient("econnreset".into()));
        let node: Node<GraphState> = NodeBuilder::new(config.clone(), mock)
            .with_jitter(Arc::new(FixedJitter(1.0)))
            .with_hooks(hooks.clone())
            .build()
            .unwrap();
        node.invoke(&GraphState::new(), &RuntimeContext::new()).await;
        curves.push(hooks.delays());
    }

    let expected: Vec<Duration> = [150, 300, 600, 1_200, 1_500]
        .into_iter()
        .map(Duration::from_millis)
        .collect();
    assert_eq!(curves[0], expected);
    assert_eq!(curves[0], curves[1]);
    assert!(curves[0].windows(2).all(|w| w[0] <= w[1]));
}

#[tokio::test]
async fn test_panics_and_errors_become_updates() {
    let mock = MockNode::scripted([
        MockOutcome::Panic("called unwrap on None".into()),
        MockOutcome::Fail("model returned malformed json".into()),
    ]);
    let node = build(NodeConfig::simple("parse"), &mock);
    let ctx = RuntimeContext::new();

    let panicked = node.invoke(&GraphState::new(), &ctx).await;
    assert_eq!(panicked.errors[0].code, codes::PROGRAMMER_ERROR);

    let failed = node.invoke(&GraphState::new(), &ctx).await;
    assert_eq!(failed.errors[0].code, codes::EXECUTION_FAILED);
    assert!(failed.errors[0].message.contains("malformed json"));
}

#[tokio::test]
async fn test_failure_rate_callback_fires_once() {
    let metrics = Arc::new(NodeMetricsCollector::new(
        MetricsConfig::default()
            .with_window_size(4)
            .with_failure_rate_threshold(0.5),
    ));
    let events: Arc<Mutex<Vec<ThresholdEvent>>> = Arc::default();
    let sink = events.clone();
    metrics.on_failure_rate_threshold(move |event| sink.lock().push(event.clone()));

    let mock = MockNode::with_fallback(MockOutcome::Invalid("bad input".into()));
    let node: Node<GraphState> = NodeBuilder::new(NodeConfig::simple("qa"), mock)
        .with_metrics(metrics.clone())
        .build()
        .unwrap();

    for _ in 0..5 {
        node.invoke(&GraphState::new(), &RuntimeContext::new()).await;
    }

    let events = events.lock();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, ThresholdKind::FailureRate);
    assert_eq!(events[0].node_name, "qa");
    assert_eq!(metrics.snapshot("qa").validation_errors, 5);
}

#[tokio::test]
async fn test_concurrent_invocations_share_breaker() {
    let mock = MockNode::with_fallback(MockOutcome::Fail("boom".into()));
    let config = NodeConfig::simple("fanout").with_circuit_breaker(CircuitBreakerConfig::new(3, 60_000));
    let node = build(config, &mock);
    let state = GraphState::new();
    let ctx = RuntimeContext::new();

    tokio::join!(
        node.invoke(&state, &ctx),
        node.invoke(&state, &ctx),
        node.invoke(&state, &ctx),
    );

    assert_eq!(node.circuit_breaker().unwrap().state(), CircuitState::Open);
    let rejected = node.invoke(&state, &ctx).await;
    assert_eq!(rejected.errors[0].code, codes::CIRCUIT_OPEN);
    noderun_testing::assert_node_called!(mock, 3);
}

#[tokio::test]
async fn test_updates_merge_into_graph_state() {
    let draft = MockNode::with_fallback(MockOutcome::Succeed(
        update_state()
            .artifact("draft", "stories/WRKF-1020/draft.md")
            .flag(RoutingFlag::Proceed, true)
            .build(),
    ));
    let review = MockNode::with_fallback(MockOutcome::Succeed(
        update_state()
            .gate("review", GateDecision::Pass)
            .complete(json!({"approved": true}))
            .build(),
    ));
    let failing = MockNode::with_fallback(MockOutcome::Invalid("no reviewer".into()));

    let ctx = RuntimeContext::new();
    let state = GraphState::new();
    let mut updates = Vec::new();
    for (name, mock) in [("draft", &draft), ("review", &review), ("assign", &failing)] {
        let node = build(NodeConfig::simple(name), mock);
        updates.push(node.invoke(&state, &ctx).await);
    }

    let merged = merge_state_updates(&updates);
    let next = merged.apply_to(&state);
    assert_eq!(next.artifact("draft"), Some("stories/WRKF-1020/draft.md"));
    assert_eq!(next.gate_decisions["review"], GateDecision::Pass);
    assert!(next.flag(RoutingFlag::Proceed));
    assert!(next.flag(RoutingFlag::Complete));
    assert!(next.is_blocked());
    assert_eq!(next.errors_for("assign").count(), 1);
    assert_eq!(state, GraphState::new());
}

#[tokio::test(start_paused = true)]
async fn test_runner_config_drives_node() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    write!(
        file,
        r#"
[defaults]
timeout_ms = 1000

[defaults.circuit_breaker]
failure_threshold = 1
recovery_timeout_ms = 5000

[nodes.fetch]
retry = {{ max_attempts = 2, base_delay_ms = 10, max_delay_ms = 100, jitter = false }}
"#
    )
    .unwrap();

    let config = RunnerConfig::load(file.path().to_str().unwrap()).unwrap();
    let mock = MockNode::with_fallback(MockOutcome::Transient("503 service unavailable".into()));
    let node = build(config.node_config("fetch"), &mock);

    let update = node.invoke(&GraphState::new(), &RuntimeContext::new()).await;
    noderun_testing::assert_node_called!(mock, 2);
    assert_eq!(update.errors[0].code, codes::RETRY_EXHAUSTED);
    assert_eq!(node.circuit_breaker().unwrap().state(), CircuitState::Open);
}
