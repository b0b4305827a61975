//! Graph State and State Updates
//!
//! A node never mutates the graph state it is handed. It returns a
//! [`StateUpdate`], a partial state that the scheduler merges into the
//! authoritative [`GraphState`] with [`StateUpdate::apply_to`].
//!
//! Merge rules, shared by `apply_to` and update-to-update merging:
//! - `errors` append
//! - the maps merge key-wise, a later value replacing an earlier one
//! - scalar fields take the later value when it is set

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::error::NodeError;

/// Routing markers a node can raise for the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingFlag {
    Proceed,
    Retry,
    Blocked,
    Escalate,
    Skip,
    Complete,
}

/// Outcome of a review or quality gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GateDecision {
    Pass,
    Fail,
    Concerns,
    Waived,
    Pending,
}

/// Structured error entry appended to the graph's error list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeErrorRecord {
    pub node_name: String,
    /// Stable code of the surfaced [`NodeError`]
    pub code: String,
    pub message: String,
    /// RFC 3339 timestamp with millisecond precision
    pub timestamp: String,
    /// False when retrying the node with the same input cannot succeed
    pub recoverable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl NodeErrorRecord {
    /// Build a record for `error` raised by `node_name` at `at`.
    pub fn new(node_name: impl Into<String>, error: &NodeError, at: DateTime<Utc>) -> Self {
        Self {
            node_name: node_name.into(),
            code: error.code().to_string(),
            message: error.to_string(),
            timestamp: at.to_rfc3339_opts(SecondsFormat::Millis, true),
            recoverable: error.is_recoverable(),
            stack: error.stack().map(str::to_string),
        }
    }
}

/// Partial graph state produced by a node invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateUpdate {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<NodeErrorRecord>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub artifact_paths: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub routing_flags: BTreeMap<RoutingFlag, bool>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub gate_decisions: BTreeMap<String, GateDecision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<String>,
    /// Payload of a completed node
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Domain fields outside the common shape, merged key-wise
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, Value>,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Whether the update carries at least one error record
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn flag(&self, flag: RoutingFlag) -> Option<bool> {
        self.routing_flags.get(&flag).copied()
    }

    pub fn is_blocked(&self) -> bool {
        self.flag(RoutingFlag::Blocked).unwrap_or(false)
    }

    /// Set a domain field
    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Fold `later` into a copy of `self`.
    pub fn merged_with(&self, later: &StateUpdate) -> StateUpdate {
        let mut out = self.clone();
        out.errors.extend(later.errors.iter().cloned());
        extend_map(&mut out.artifact_paths, &later.artifact_paths);
        extend_map(&mut out.routing_flags, &later.routing_flags);
        extend_map(&mut out.gate_decisions, &later.gate_decisions);
        extend_map(&mut out.data, &later.data);
        if later.blocked_reason.is_some() {
            out.blocked_reason = later.blocked_reason.clone();
        }
        if later.result.is_some() {
            out.result = later.result.clone();
        }
        out
    }

    /// Produce the state that results from merging this update into `state`.
    pub fn apply_to(&self, state: &GraphState) -> GraphState {
        let mut next = state.clone();
        next.errors.extend(self.errors.iter().cloned());
        extend_map(&mut next.artifact_paths, &self.artifact_paths);
        extend_map(&mut next.routing_flags, &self.routing_flags);
        extend_map(&mut next.gate_decisions, &self.gate_decisions);
        extend_map(&mut next.data, &self.data);
        if self.blocked_reason.is_some() {
            next.blocked_reason = self.blocked_reason.clone();
        }
        if self.result.is_some() {
            next.result = self.result.clone();
        }
        next
    }
}

fn extend_map<K: Ord + Clone, V: Clone>(into: &mut BTreeMap<K, V>, from: &BTreeMap<K, V>) {
    into.extend(from.iter().map(|(k, v)| (k.clone(), v.clone())));
}

/// Authoritative workflow state owned by the graph scheduler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphState {
    pub artifact_paths: BTreeMap<String, String>,
    pub routing_flags: BTreeMap<RoutingFlag, bool>,
    pub gate_decisions: BTreeMap<String, GateDecision>,
    pub errors: Vec<NodeErrorRecord>,
    pub blocked_reason: Option<String>,
    pub result: Option<Value>,
    pub data: BTreeMap<String, Value>,
}

impl GraphState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flag(&self, flag: RoutingFlag) -> bool {
        self.routing_flags.get(&flag).copied().unwrap_or(false)
    }

    pub fn is_blocked(&self) -> bool {
        self.flag(RoutingFlag::Blocked)
    }

    pub fn artifact(&self, key: &str) -> Option<&str> {
        self.artifact_paths.get(key).map(String::as_str)
    }

    /// Errors recorded by one node, oldest first
    pub fn errors_for<'a>(&'a self, node_name: &'a str) -> impl Iterator<Item = &'a NodeErrorRecord> {
        self.errors.iter().filter(move |e| e.node_name == node_name)
    }
}
