/// Flow validation and execution planning
///
/// Builds a petgraph `DiGraph` whose node weights index into `flow.nodes` and whose
/// edge weights index into `flow.edges`, then checks the graph before anything runs:
/// duplicate ids, dangling edges, cycles among reachable nodes, unknown node types
/// and configs rejected by their executors.

use crate::error::ValidationError;
use crate::flow::types::{EdgeCondition, Flow};
use crate::runtime::{executor::NodePolicy, registry::NodeRegistry, script};
use petgraph::{
    graph::{DiGraph, NodeIndex},
    visit::EdgeRef,
    Direction,
};
use std::collections::{HashMap, HashSet};

/// A validated flow, ready for the engine
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    graph: DiGraph<usize, usize>,
    entries: Vec<NodeIndex>,
    /// Reachable nodes in topological order
    order: Vec<NodeIndex>,
    reachable: HashSet<NodeIndex>,
    policies: Vec<NodePolicy>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

impl ExecutionPlan {
    /// Validate `flow` and plan a run starting at `entry` (or the default entry set)
    pub fn build(
        flow: &Flow,
        registry: &NodeRegistry,
        entry: Option<&str>,
    ) -> Result<Self, ValidationError> {
        tracing::debug!(
            "🏗️ Building graph for '{}' with {} nodes and {} edges",
            flow.id,
            flow.nodes.len(),
            flow.edges.len()
        );

        let mut graph = DiGraph::with_capacity(flow.nodes.len(), flow.edges.len());
        let mut index: HashMap<&str, NodeIndex> = HashMap::with_capacity(flow.nodes.len());
        for (position, node) in flow.nodes.iter().enumerate() {
            let idx = graph.add_node(position);
            if index.insert(node.id.as_str(), idx).is_some() {
                return Err(ValidationError::DuplicateNodeId {
                    node_id: node.id.clone(),
                });
            }
        }

        for (position, edge) in flow.edges.iter().enumerate() {
            let from = index.get(edge.from.as_str()).copied();
            let to = index.get(edge.to.as_str()).copied();
            match (from, to) {
                (Some(from), Some(to)) => {
                    graph.add_edge(from, to, position);
                }
                (None, _) => {
                    return Err(ValidationError::DanglingEdge {
                        from: edge.from.clone(),
                        to: edge.to.clone(),
                        missing: edge.from.clone(),
                    })
                }
                (_, None) => {
                    return Err(ValidationError::DanglingEdge {
                        from: edge.from.clone(),
                        to: edge.to.clone(),
                        missing: edge.to.clone(),
                    })
                }
            }
        }

        let entries: Vec<NodeIndex> = match entry {
            Some(node_id) => vec![index.get(node_id).copied().ok_or_else(|| {
                ValidationError::UnknownEntry {
                    node_id: node_id.to_string(),
                }
            })?],
            None => graph
                .node_indices()
                .filter(|&idx| {
                    flow.nodes[graph[idx]].is_trigger()
                        || graph
                            .neighbors_directed(idx, Direction::Incoming)
                            .next()
                            .is_none()
                })
                .collect(),
        };
        if entries.is_empty() {
            return Err(ValidationError::NoEntryNode);
        }

        let post_order = Self::post_order(&graph, &entries, flow)?;
        let reachable: HashSet<NodeIndex> = post_order.iter().copied().collect();
        let order: Vec<NodeIndex> = post_order.into_iter().rev().collect();

        let mut policies = Vec::with_capacity(flow.nodes.len());
        for node in &flow.nodes {
            let executor = registry.get(&node.node_type).ok_or_else(|| {
                ValidationError::UnsupportedNodeType {
                    node_id: node.id.clone(),
                    node_type: node.node_type.clone(),
                }
            })?;
            let invalid = |reason: String| ValidationError::InvalidConfig {
                node_id: node.id.clone(),
                reason,
            };
            policies.push(NodePolicy::from_config(&node.config).map_err(invalid)?);
            executor.validate(&node.config).map_err(invalid)?;
        }

        for edge in &flow.edges {
            if let Some(EdgeCondition::Expression { expr }) = &edge.condition {
                script::check_expression(expr).map_err(|reason| ValidationError::InvalidConfig {
                    node_id: edge.from.clone(),
                    reason,
                })?;
            }
        }

        tracing::debug!(
            "📋 Planned {} reachable nodes from {} entries",
            order.len(),
            entries.len()
        );

        Ok(Self {
            graph,
            entries,
            order,
            reachable,
            policies,
        })
    }

    /// Depth-first post-order over nodes reachable from `entries`
    ///
    /// Meeting a node that is still on the DFS stack means a cycle; that node is
    /// reported.
    fn post_order(
        graph: &DiGraph<usize, usize>,
        entries: &[NodeIndex],
        flow: &Flow,
    ) -> Result<Vec<NodeIndex>, ValidationError> {
        let successors = |idx: NodeIndex| -> Vec<NodeIndex> {
            let mut next: Vec<NodeIndex> = graph.neighbors(idx).collect();
            next.reverse();
            next
        };

        let mut marks: HashMap<NodeIndex, Mark> = HashMap::new();
        let mut post = Vec::with_capacity(graph.node_count());

        for &entry in entries {
            if marks.contains_key(&entry) {
                continue;
            }
            marks.insert(entry, Mark::Visiting);
            let mut stack = vec![(entry, successors(entry))];

            while let Some(frame) = stack.last_mut() {
                let node = frame.0;
                match frame.1.pop() {
                    Some(next) => match marks.get(&next) {
                        Some(Mark::Visiting) => {
                            return Err(ValidationError::CycleDetected {
                                node_id: flow.nodes[graph[next]].id.clone(),
                            })
                        }
                        Some(Mark::Done) => {}
                        None => {
                            marks.insert(next, Mark::Visiting);
                            stack.push((next, successors(next)));
                        }
                    },
                    None => {
                        marks.insert(node, Mark::Done);
                        post.push(node);
                        stack.pop();
                    }
                }
            }
        }

        Ok(post)
    }

    /// Position of the node in `flow.nodes`
    pub fn node_position(&self, idx: NodeIndex) -> usize {
        self.graph[idx]
    }

    pub fn entries(&self) -> &[NodeIndex] {
        &self.entries
    }

    pub fn is_entry(&self, idx: NodeIndex) -> bool {
        self.entries.contains(&idx)
    }

    pub fn order(&self) -> &[NodeIndex] {
        &self.order
    }

    pub fn is_reachable(&self, idx: NodeIndex) -> bool {
        self.reachable.contains(&idx)
    }

    pub fn reachable_count(&self) -> usize {
        self.reachable.len()
    }

    pub fn policy(&self, idx: NodeIndex) -> NodePolicy {
        self.policies[self.graph[idx]]
    }

    /// Incoming edges from reachable nodes: `(edge position, source)`
    pub fn incoming(&self, idx: NodeIndex) -> Vec<(usize, NodeIndex)> {
        let mut edges: Vec<(usize, NodeIndex)> = self
            .graph
            .edges_directed(idx, Direction::Incoming)
            .filter(|edge| self.reachable.contains(&edge.source()))
            .map(|edge| (*edge.weight(), edge.source()))
            .collect();
        edges.sort_unstable_by_key(|(position, _)| *position);
        edges
    }

    /// Outgoing edges, one entry per edge (parallel edges repeat the target)
    pub fn outgoing(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        self.graph
            .edges_directed(idx, Direction::Outgoing)
            .map(|edge| edge.target())
            .collect()
    }

    /// Number of incoming edges whose source is reachable
    pub fn pending_inputs(&self, idx: NodeIndex) -> usize {
        self.graph
            .edges_directed(idx, Direction::Incoming)
            .filter(|edge| self.reachable.contains(&edge.source()))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExecutorError;
    use crate::flow::types::{Edge, Node};
    use crate::runtime::executor::{NodeContext, NodeExecutor};
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct Noop;

    #[async_trait]
    impl NodeExecutor for Noop {
        async fn run(&self, _ctx: NodeContext) -> Result<Value, ExecutorError> {
            Ok(json!({}))
        }
    }

    fn registry() -> NodeRegistry {
        let mut registry = NodeRegistry::new();
        registry.register("trigger.manual", Noop).register("test.step", Noop);
        registry
    }

    fn flow(nodes: &[(&str, &str)], edges: &[(&str, &str)]) -> Flow {
        let mut flow = Flow::new("graph");
        flow.id = "flow-graph".into();
        flow.nodes = nodes.iter().map(|(id, t)| Node::new(*id, *t)).collect();
        flow.edges = edges.iter().map(|(a, b)| Edge::new(*a, *b)).collect();
        flow
    }

    fn ids(flow: &Flow, plan: &ExecutionPlan) -> Vec<String> {
        plan.order()
            .iter()
            .map(|&idx| flow.nodes[plan.node_position(idx)].id.clone())
            .collect()
    }

    #[test]
    fn topological_order_respects_edges() {
        let f = flow(
            &[("d", "test.step"), ("t", "trigger.manual"), ("b", "test.step"), ("c", "test.step")],
            &[("t", "b"), ("t", "c"), ("b", "d"), ("c", "d")],
        );
        let plan = ExecutionPlan::build(&f, &registry(), None).unwrap();
        let order = ids(&f, &plan);
        let pos = |id: &str| order.iter().position(|x| x == id).unwrap();
        assert_eq!(order.len(), 4);
        assert!(pos("t") < pos("b") && pos("t") < pos("c"));
        assert!(pos("b") < pos("d") && pos("c") < pos("d"));
    }

    #[test]
    fn cycle_reports_the_revisited_node() {
        let f = flow(
            &[("t", "trigger.manual"), ("a", "test.step"), ("b", "test.step")],
            &[("t", "a"), ("a", "b"), ("b", "a")],
        );
        let err = ExecutionPlan::build(&f, &registry(), None).unwrap_err();
        assert_eq!(err, ValidationError::CycleDetected { node_id: "a".into() });
    }

    #[test]
    fn unreachable_cycle_is_ignored_for_explicit_entry() {
        let f = flow(
            &[("t", "trigger.manual"), ("a", "test.step"), ("x", "test.step"), ("y", "test.step")],
            &[("t", "a"), ("x", "y"), ("y", "x")],
        );
        let plan = ExecutionPlan::build(&f, &registry(), Some("t")).unwrap();
        assert_eq!(plan.reachable_count(), 2);
    }

    #[test]
    fn dangling_edge_names_the_missing_node() {
        let f = flow(&[("t", "trigger.manual")], &[("t", "ghost")]);
        let err = ExecutionPlan::build(&f, &registry(), None).unwrap_err();
        assert!(matches!(err, ValidationError::DanglingEdge { ref missing, .. } if missing == "ghost"));
    }

    #[test]
    fn unknown_type_duplicate_id_and_bad_policy() {
        let f = flow(&[("t", "trigger.manual"), ("a", "action.teleport")], &[("t", "a")]);
        assert!(matches!(
            ExecutionPlan::build(&f, &registry(), None),
            Err(ValidationError::UnsupportedNodeType { .. })
        ));

        let f = flow(&[("t", "trigger.manual"), ("t", "test.step")], &[]);
        assert!(matches!(
            ExecutionPlan::build(&f, &registry(), None),
            Err(ValidationError::DuplicateNodeId { .. })
        ));

        let mut f = flow(&[("t", "trigger.manual")], &[]);
        f.nodes[0].config = json!({"retry": {"maxAttempts": 0}}).as_object().cloned().unwrap();
        assert!(matches!(
            ExecutionPlan::build(&f, &registry(), None),
            Err(ValidationError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn entry_resolution() {
        let f = flow(&[("t", "trigger.manual"), ("a", "test.step")], &[("t", "a")]);
        assert!(matches!(
            ExecutionPlan::build(&f, &registry(), Some("nope")),
            Err(ValidationError::UnknownEntry { .. })
        ));

        let f = flow(&[("a", "test.step"), ("b", "test.step")], &[("a", "b"), ("b", "a")]);
        assert_eq!(
            ExecutionPlan::build(&f, &registry(), None).unwrap_err(),
            ValidationError::NoEntryNode
        );
    }

    #[test]
    fn bad_edge_expression_is_rejected() {
        let mut f = flow(&[("t", "trigger.manual"), ("a", "test.step")], &[]);
        f.edges.push(Edge::new("t", "a").when(EdgeCondition::Expression {
            expr: "output.x >".into(),
        }));
        assert!(matches!(
            ExecutionPlan::build(&f, &registry(), None),
            Err(ValidationError::InvalidConfig { .. })
        ));
    }
}
