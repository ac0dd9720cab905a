/// Core flow and execution record types
///
/// Flows are persisted as JSON records and snapshotted by the engine for each run.
/// Execution records are written once, when a run reaches a terminal status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Current flow record schema version
pub const FLOW_SCHEMA_VERSION: u32 = 1;

/// Node type prefix shared by every trigger kind
pub const TRIGGER_PREFIX: &str = "trigger.";

fn schema_version() -> u32 {
    FLOW_SCHEMA_VERSION
}

/// A user-authored automation: a directed graph of typed nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flow {
    /// Opaque identifier, minted by the store on first save
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Only enabled flows have active triggers
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default = "schema_version")]
    pub version: u32,
}

impl Flow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            description: String::new(),
            enabled: false,
            created_at: None,
            updated_at: None,
            nodes: Vec::new(),
            edges: Vec::new(),
            version: FLOW_SCHEMA_VERSION,
        }
    }

    pub fn node(&self, node_id: &str) -> Option<&Node> {
        self.nodes.iter().find(|node| node.id == node_id)
    }

    /// Trigger nodes, in declaration order
    pub fn trigger_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|node| node.is_trigger())
    }

    pub fn summary(&self) -> FlowSummary {
        FlowSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            enabled: self.enabled,
            created_at: self.created_at,
            updated_at: self.updated_at,
            node_count: self.nodes.len(),
        }
    }
}

/// Mint a fresh, time-ordered flow id
pub fn new_flow_id() -> String {
    format!("flow-{}", Uuid::now_v7().simple())
}

/// Mint a fresh, time-ordered execution id
pub fn new_execution_id() -> String {
    format!("exec-{}", Uuid::now_v7().simple())
}

/// Listing view of a flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub enabled: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub node_count: usize,
}

/// A typed unit of work within a flow
///
/// `config` is the only loosely typed part of the schema: its shape belongs to the
/// executor registered for `node_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Canvas position, carried for round-trips only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

impl Node {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            config: Map::new(),
            label: None,
            position: None,
        }
    }

    /// Builder-style config setter, mostly for tests and templates
    pub fn with_config(mut self, config: Value) -> Self {
        if let Value::Object(map) = config {
            self.config = map;
        }
        self
    }

    pub fn is_trigger(&self) -> bool {
        self.node_type.starts_with(TRIGGER_PREFIX)
    }

    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Directed connection between two nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
    /// Traversal guard; absent means "on success"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<EdgeCondition>,
}

impl Edge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            condition: None,
        }
    }

    pub fn when(mut self, condition: EdgeCondition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn condition(&self) -> &EdgeCondition {
        self.condition.as_ref().unwrap_or(&EdgeCondition::OnSuccess)
    }
}

/// Guard evaluated once the edge's source node is terminal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EdgeCondition {
    OnSuccess,
    OnFailure,
    /// Traversed whether the source succeeded or failed
    Always,
    /// Matches the `branch` field of the source output
    Branch { value: String },
    /// Lua boolean expression evaluated with the source output bound to `output`
    Expression { expr: String },
}

/// Terminal status of a whole execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

/// Per-node terminal status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Succeeded,
    Failed,
    Skipped,
}

/// Why a node did not run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// No incoming edge condition held
    Condition,
    /// Only reachable through a failed node
    UpstreamFailed,
    /// Cancellation was observed before the node started
    Cancelled,
}

/// One attempt at running a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeAttempt {
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of a single node within an execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeResult {
    pub node_id: String,
    pub node_type: String,
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub attempts: Vec<NodeAttempt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl NodeResult {
    pub fn skipped(node: &Node, reason: SkipReason) -> Self {
        Self {
            node_id: node.id.clone(),
            node_type: node.node_type.clone(),
            status: NodeStatus::Skipped,
            skip_reason: Some(reason),
            output: None,
            error: None,
            attempts: Vec::new(),
            started_at: None,
            finished_at: None,
        }
    }
}

/// One run of a flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub id: String,
    pub flow_id: String,
    #[serde(default)]
    pub flow_name: String,
    /// Trigger node that fired this run; absent for manual runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_node_id: Option<String>,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// In completion order
    #[serde(default)]
    pub node_results: Vec<NodeResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Execution {
    pub fn result_for(&self, node_id: &str) -> Option<&NodeResult> {
        self.node_results.iter().find(|result| result.node_id == node_id)
    }

    pub fn count(&self, status: NodeStatus) -> usize {
        self.node_results
            .iter()
            .filter(|result| result.status == status)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flow_round_trips_with_camel_case_keys() {
        let raw = json!({
            "id": "flow-1",
            "name": "Morning report",
            "enabled": true,
            "createdAt": "2026-01-02T03:04:05Z",
            "nodes": [
                {"id": "t", "type": "trigger.schedule", "config": {"cron": "0 8 * * *"}, "position": {"x": 1.0, "y": 2.0}},
                {"id": "a", "type": "action.log", "config": {"message": "hi"}}
            ],
            "edges": [
                {"from": "t", "to": "a"},
                {"from": "a", "to": "t", "condition": {"type": "branch", "value": "true"}}
            ]
        });

        let flow: Flow = serde_json::from_value(raw).unwrap();
        assert_eq!(flow.version, FLOW_SCHEMA_VERSION);
        assert_eq!(flow.trigger_nodes().count(), 1);
        assert_eq!(flow.edges[0].condition(), &EdgeCondition::OnSuccess);
        assert_eq!(
            flow.edges[1].condition(),
            &EdgeCondition::Branch { value: "true".into() }
        );

        let back = serde_json::to_value(&flow).unwrap();
        assert_eq!(back["createdAt"], "2026-01-02T03:04:05Z");
        assert_eq!(back["nodes"][0]["type"], "trigger.schedule");
        assert_eq!(back["nodes"][0]["position"]["y"], 2.0);
        assert!(back.get("updatedAt").is_none());
    }

    #[test]
    fn ids_are_prefixed_and_distinct() {
        let a = new_flow_id();
        let b = new_flow_id();
        assert!(a.starts_with("flow-"));
        assert_ne!(a, b);
        assert!(new_execution_id().starts_with("exec-"));
    }

    #[test]
    fn summary_counts_nodes() {
        let mut flow = Flow::new("f");
        flow.nodes.push(Node::new("a", "action.log"));
        flow.nodes.push(Node::new("b", "action.log"));
        assert_eq!(flow.summary().node_count, 2);
    }
}
