//! State Update Helpers
//!
//! Pure constructors for [`StateUpdate`] values. No helper mutates its
//! inputs; each returns a fresh update for the scheduler to merge.

use chrono::{DateTime, Utc};
use noderun_kernel::runner::error::NodeError;
use noderun_kernel::runner::state::{GateDecision, NodeErrorRecord, RoutingFlag, StateUpdate};
use serde_json::Value;
use std::collections::BTreeMap;

/// Error record update for `error`, stamped with the current time.
pub fn create_error_update(node_name: &str, error: &NodeError) -> StateUpdate {
    create_error_update_at(node_name, error, Utc::now())
}

/// Error record update for `error`, stamped with `at`.
pub fn create_error_update_at(node_name: &str, error: &NodeError, at: DateTime<Utc>) -> StateUpdate {
    StateUpdate {
        errors: vec![NodeErrorRecord::new(node_name, error, at)],
        ..Default::default()
    }
}

/// Raise the `blocked` routing flag with a reason.
pub fn create_blocked_update(reason: &str) -> StateUpdate {
    StateUpdate {
        routing_flags: BTreeMap::from([(RoutingFlag::Blocked, true)]),
        blocked_reason: Some(reason.to_string()),
        ..Default::default()
    }
}

/// Raise the `complete` routing flag with the node's result.
pub fn create_complete_update(result: Value) -> StateUpdate {
    StateUpdate {
        routing_flags: BTreeMap::from([(RoutingFlag::Complete, true)]),
        result: Some(result),
        ..Default::default()
    }
}

fn merged<K: Ord + Clone, V: Clone>(current: &BTreeMap<K, V>, updates: &BTreeMap<K, V>) -> BTreeMap<K, V> {
    let mut out = current.clone();
    out.extend(updates.iter().map(|(k, v)| (k.clone(), v.clone())));
    out
}

/// Artifact paths of `current` with `updates` laid over them.
pub fn update_artifact_paths(
    current: &BTreeMap<String, String>,
    updates: &BTreeMap<String, String>,
) -> StateUpdate {
    StateUpdate {
        artifact_paths: merged(current, updates),
        ..Default::default()
    }
}

/// Routing flags of `current` with `updates` laid over them.
pub fn update_routing_flags(
    current: &BTreeMap<RoutingFlag, bool>,
    updates: &BTreeMap<RoutingFlag, bool>,
) -> StateUpdate {
    StateUpdate {
        routing_flags: merged(current, updates),
        ..Default::default()
    }
}

/// Gate decisions of `current` with `updates` laid over them.
pub fn update_gate_decisions(
    current: &BTreeMap<String, GateDecision>,
    updates: &BTreeMap<String, GateDecision>,
) -> StateUpdate {
    StateUpdate {
        gate_decisions: merged(current, updates),
        ..Default::default()
    }
}

/// Merge updates left to right. Later values win per key and per field;
/// error lists are concatenated.
pub fn merge_state_updates<'a, I>(updates: I) -> StateUpdate
where
    I: IntoIterator<Item = &'a StateUpdate>,
{
    updates
        .into_iter()
        .fold(StateUpdate::default(), |acc, next| acc.merged_with(next))
}

/// Start building an update.
///
/// ```rust,ignore
/// let update = update_state()
///     .artifact("plan", "plans/WRKF-1020.md")
///     .gate("qa", GateDecision::Pass)
///     .flag(RoutingFlag::Proceed, true)
///     .build();
/// ```
pub fn update_state() -> StateUpdateBuilder {
    StateUpdateBuilder::default()
}

/// Fluent [`StateUpdate`] construction.
#[derive(Debug, Clone, Default)]
pub struct StateUpdateBuilder {
    update: StateUpdate,
}

impl StateUpdateBuilder {
    pub fn artifact(mut self, key: impl Into<String>, path: impl Into<String>) -> Self {
        self.update.artifact_paths.insert(key.into(), path.into());
        self
    }

    pub fn flag(mut self, flag: RoutingFlag, value: bool) -> Self {
        self.update.routing_flags.insert(flag, value);
        self
    }

    pub fn gate(mut self, gate: impl Into<String>, decision: GateDecision) -> Self {
        self.update.gate_decisions.insert(gate.into(), decision);
        self
    }

    pub fn error(mut self, record: NodeErrorRecord) -> Self {
        self.update.errors.push(record);
        self
    }

    pub fn data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.update.data.insert(key.into(), value);
        self
    }

    /// Merge another update into the one being built
    pub fn merge(mut self, other: &StateUpdate) -> Self {
        self.update = self.update.merged_with(other);
        self
    }

    pub fn blocked(self, reason: &str) -> Self {
        self.merge(&create_blocked_update(reason))
    }

    pub fn complete(self, result: Value) -> Self {
        self.merge(&create_complete_update(result))
    }

    pub fn build(self) -> StateUpdate {
        self.update
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 9, 30, 0).unwrap()
    }

    #[test]
    fn test_error_update_shape() {
        let update = create_error_update_at("elaborate", &NodeError::circuit_open("elaborate", 500), at());
        assert_eq!(update.errors.len(), 1);
        let record = &update.errors[0];
        assert_eq!(record.node_name, "elaborate");
        assert_eq!(record.code, "CIRCUIT_OPEN");
        assert!(record.message.contains("elaborate"));
        assert_eq!(record.timestamp, "2026-01-15T09:30:00.000Z");
        assert!(record.recoverable);
        assert!(update.routing_flags.is_empty());
    }

    #[test]
    fn test_error_update_stamps_current_time() {
        let before = Utc::now();
        let update = create_error_update("n", &NodeError::timeout(5));
        let stamped = DateTime::parse_from_rfc3339(&update.errors[0].timestamp).unwrap();
        assert!(stamped.with_timezone(&Utc) >= before - chrono::Duration::milliseconds(1));
    }

    #[test]
    fn test_blocked_and_complete_markers() {
        let blocked = create_blocked_update("awaiting human review");
        assert!(blocked.is_blocked());
        assert_eq!(blocked.blocked_reason.as_deref(), Some("awaiting human review"));

        let complete = create_complete_update(json!({"files": 3}));
        assert_eq!(complete.flag(RoutingFlag::Complete), Some(true));
        assert_eq!(complete.result, Some(json!({"files": 3})));
    }

    #[test]
    fn test_map_helpers_overlay_and_pass_through() {
        let current = BTreeMap::from([
            ("plan".to_string(), "a/plan.md".to_string()),
            ("spec".to_string(), "a/spec.md".to_string()),
        ]);
        let updates = BTreeMap::from([("plan".to_string(), "b/plan.md".to_string())]);
        let update = update_artifact_paths(&current, &updates);
        assert_eq!(update.artifact_paths["plan"], "b/plan.md");
        assert_eq!(update.artifact_paths["spec"], "a/spec.md");

        let flags = update_routing_flags(
            &BTreeMap::from([(RoutingFlag::Proceed, true)]),
            &BTreeMap::from([(RoutingFlag::Escalate, true)]),
        );
        assert_eq!(flags.routing_flags.len(), 2);

        let gates = update_gate_decisions(
            &BTreeMap::from([("qa".to_string(), GateDecision::Pending)]),
            &BTreeMap::from([("qa".to_string(), GateDecision::Waived)]),
        );
        assert_eq!(gates.gate_decisions["qa"], GateDecision::Waived);
    }

    #[test]
    fn test_helpers_are_pure() {
        let err = NodeError::timeout(50);
        assert_eq!(
            create_error_update_at("n", &err, at()),
            create_error_update_at("n", &err, at())
        );
        assert_eq!(create_blocked_update("x"), create_blocked_update("x"));
        assert_eq!(create_complete_update(json!(1)), create_complete_update(json!(1)));

        let current = BTreeMap::from([("k".to_string(), "v".to_string())]);
        let snapshot = current.clone();
        let updates = BTreeMap::from([("k".to_string(), "w".to_string())]);
        let first = update_artifact_paths(&current, &updates);
        let second = update_artifact_paths(&current, &updates);
        assert_eq!(first, second);
        assert_eq!(current, snapshot);

        let a = create_blocked_update("first");
        let b = create_complete_update(json!("done"));
        let a_before = a.clone();
        assert_eq!(merge_state_updates([&a, &b]), merge_state_updates([&a, &b]));
        assert_eq!(a, a_before);
    }

    #[test]
    fn test_merge_last_writer_wins() {
        let first = update_state()
            .artifact("plan", "v1.md")
            .flag(RoutingFlag::Proceed, true)
            .blocked("first reason")
            .build();
        let second = update_state()
            .artifact("plan", "v2.md")
            .artifact("review", "r.md")
            .flag(RoutingFlag::Proceed, false)
            .blocked("second reason")
            .build();
        let err = create_error_update_at("n", &NodeError::timeout(1), at());

        let merged = merge_state_updates([&first, &err, &second, &err]);
        assert_eq!(merged.artifact_paths["plan"], "v2.md");
        assert_eq!(merged.artifact_paths["review"], "r.md");
        assert_eq!(merged.flag(RoutingFlag::Proceed), Some(false));
        assert_eq!(merged.blocked_reason.as_deref(), Some("second reason"));
        assert_eq!(merged.errors.len(), 2);

        assert!(merge_state_updates(std::iter::empty()).is_empty());
    }

    #[test]
    fn test_builder_complete_and_data() {
        let update = update_state()
            .data("score", json!(0.9))
            .gate("code-review", GateDecision::Pass)
            .complete(json!({"ok": true}))
            .build();
        assert_eq!(update.data["score"], json!(0.9));
        assert_eq!(update.flag(RoutingFlag::Complete), Some(true));
        assert_eq!(update.gate_decisions["code-review"], GateDecision::Pass);
    }
}
