/// Petgraph-based flow execution engine
///
/// Validates a flow snapshot, then walks its reachable nodes as a ready set: a node is
/// decided once every incoming edge from a reachable predecessor has a terminal
/// source. Independent branches run concurrently on worker-pool capacity. Retries,
/// timeouts, skip propagation and cooperative cancellation live here and nowhere else.

use crate::error::{ExecutorError, ValidationError};
use crate::flow::{
    storage::FlowStore,
    types::{
        new_execution_id, EdgeCondition, Execution, ExecutionStatus, Flow, Node, NodeAttempt,
        NodeResult, NodeStatus, SkipReason,
    },
};
use crate::runtime::{
    executor::{NodeContext, NodeExecutor, NodePolicy},
    graph::ExecutionPlan,
    pool::WorkerPool,
    registry::NodeRegistry,
    script::{self, Budget},
    template::{self, as_text, render_config, render_scope},
};
use chrono::Utc;
use petgraph::graph::NodeIndex;
use serde_json::{json, Map, Value};
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Longest an `expression` edge may evaluate before it counts as not taken
const EXPRESSION_TIME_LIMIT: Duration = Duration::from_secs(1);

/// What started a run
#[derive(Debug, Clone, Default)]
pub struct TriggerPayload {
    /// Firing trigger node; `None` for manual runs
    pub source_node: Option<String>,
    /// Input handed to the entry nodes
    pub data: Value,
}

impl TriggerPayload {
    pub fn manual(data: Value) -> Self {
        Self {
            source_node: None,
            data,
        }
    }

    pub fn from_trigger(node_id: impl Into<String>, data: Value) -> Self {
        Self {
            source_node: Some(node_id.into()),
            data,
        }
    }

    fn input(&self) -> Map<String, Value> {
        match &self.data {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("payload".to_string(), other.clone());
                map
            }
        }
    }
}

/// Engine tuning
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Shared worker budget for executions and node attempts
    pub worker_limit: usize,
    /// Upper bound for retry backoff
    pub max_backoff: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_limit: 4,
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// Flow execution engine
///
/// Cheap to clone; every clone shares the registry, store and worker pool.
#[derive(Clone)]
pub struct ExecutionEngine {
    registry: Arc<NodeRegistry>,
    store: Arc<dyn FlowStore>,
    pool: WorkerPool,
    max_backoff: Duration,
}

/// How a node's incoming edges resolved
enum Decision {
    Run(Map<String, Value>),
    Fail(ExecutorError),
    Skip(SkipReason),
}

/// Everything a node task needs, owned
struct NodeJob {
    idx: NodeIndex,
    executor: Arc<dyn NodeExecutor>,
    ctx: NodeContext,
    policy: NodePolicy,
    pool: WorkerPool,
    cancel: CancellationToken,
    max_backoff: Duration,
}

impl ExecutionEngine {
    pub fn new(registry: Arc<NodeRegistry>, store: Arc<dyn FlowStore>, config: EngineConfig) -> Self {
        Self {
            registry,
            store,
            pool: WorkerPool::new(config.worker_limit),
            max_backoff: config.max_backoff,
        }
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn FlowStore> {
        &self.store
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Validate a flow without running it
    pub fn validate(&self, flow: &Flow, entry: Option<&str>) -> Result<ExecutionPlan, ValidationError> {
        ExecutionPlan::build(flow, &self.registry, entry)
    }

    /// Run `flow` to a terminal status and write the execution record
    ///
    /// Validation failures return before anything runs and leave no record. Node
    /// failures are captured in the returned record.
    pub async fn execute(
        &self,
        flow: &Flow,
        payload: TriggerPayload,
        cancel: CancellationToken,
    ) -> Result<Execution, ValidationError> {
        let plan = self.validate(flow, payload.source_node.as_deref())?;
        let execution_id = new_execution_id();
        let span = tracing::info_span!("execution", flow_id = %flow.id, execution_id = %execution_id);

        self.run_plan(Arc::new(flow.clone()), plan, payload, cancel, execution_id)
            .instrument(span)
            .await
    }

    async fn run_plan(
        &self,
        flow: Arc<Flow>,
        plan: ExecutionPlan,
        payload: TriggerPayload,
        cancel: CancellationToken,
        execution_id: String,
    ) -> Result<Execution, ValidationError> {
        let started_at = Utc::now();
        let run_start = std::time::Instant::now();
        tracing::info!(
            "🚀 Starting execution of '{}' ({} reachable nodes)",
            flow.name,
            plan.reachable_count()
        );

        let slot = tokio::select! {
            slot = self.pool.execution_slot() => slot,
            _ = cancel.cancelled() => None,
        };
        if slot.is_none() && !cancel.is_cancelled() {
            tracing::warn!("⚠️ Worker pool closed, cancelling execution");
            cancel.cancel();
        }

        let env = template::environment(&self.store.load_settings().await);
        let node_results = self.walk(&flow, &plan, &payload, &env, &cancel, &execution_id).await;
        drop(slot);

        let status = if cancel.is_cancelled() {
            ExecutionStatus::Cancelled
        } else if node_results.iter().any(|r| r.status == NodeStatus::Failed) {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Succeeded
        };
        let error = match status {
            ExecutionStatus::Cancelled => Some("execution cancelled".to_string()),
            ExecutionStatus::Failed => node_results
                .iter()
                .find(|r| r.status == NodeStatus::Failed)
                .map(|r| {
                    format!(
                        "node '{}' failed: {}",
                        r.node_id,
                        r.error.as_deref().unwrap_or("unknown error")
                    )
                }),
            _ => None,
        };

        let execution = Execution {
            id: execution_id,
            flow_id: flow.id.clone(),
            flow_name: flow.name.clone(),
            trigger_node_id: payload.source_node.clone(),
            status,
            started_at,
            finished_at: Some(Utc::now()),
            node_results,
            error,
        };

        match status {
            ExecutionStatus::Failed => tracing::error!(
                "❌ Execution failed in {:?}: {}",
                run_start.elapsed(),
                execution.error.as_deref().unwrap_or_default()
            ),
            ExecutionStatus::Cancelled => {
                tracing::warn!("🛑 Execution cancelled after {:?}", run_start.elapsed())
            }
            _ => tracing::info!("🎉 Execution succeeded in {:?}", run_start.elapsed()),
        }

        if let Err(e) = self.store.save_execution(&execution).await {
            tracing::warn!("⚠️ Failed to write execution record {}: {}", execution.id, e);
        }

        Ok(execution)
    }

    /// Ready-set walk over the plan; returns results in completion order
    async fn walk(
        &self,
        flow: &Arc<Flow>,
        plan: &ExecutionPlan,
        payload: &TriggerPayload,
        env: &Map<String, Value>,
        cancel: &CancellationToken,
        execution_id: &str,
    ) -> Vec<NodeResult> {
        let mut results: Vec<NodeResult> = Vec::with_capacity(plan.reachable_count());
        let mut finished: HashMap<NodeIndex, usize> = HashMap::new();
        let mut waiting: HashMap<NodeIndex, usize> = plan
            .order()
            .iter()
            .map(|&idx| (idx, plan.pending_inputs(idx)))
            .collect();
        let mut ready: VecDeque<NodeIndex> = plan
            .order()
            .iter()
            .copied()
            .filter(|idx| waiting.get(idx) == Some(&0))
            .collect();
        let mut running: JoinSet<(NodeIndex, NodeResult)> = JoinSet::new();

        loop {
            while let Some(idx) = ready.pop_front() {
                let node = &flow.nodes[plan.node_position(idx)];

                let decision = if cancel.is_cancelled() {
                    Decision::Skip(SkipReason::Cancelled)
                } else if plan.is_entry(idx) {
                    Decision::Run(payload.input())
                } else {
                    self.decide(flow, plan, idx, &results, &finished, cancel).await
                };

                match decision {
                    Decision::Run(input) => {
                        let executor = match self.registry.get(&node.node_type) {
                            Some(executor) => executor,
                            None => {
                                // Validated above; only reachable if the registry changed underneath
                                let result = failed_result(
                                    node,
                                    ExecutorError::config(format!("unsupported node type {}", node.node_type)),
                                );
                                self.settle(plan, idx, result, &mut results, &mut finished, &mut waiting, &mut ready);
                                continue;
                            }
                        };
                        let scope = render_scope(&input, env);
                        let job = NodeJob {
                            idx,
                            executor,
                            ctx: NodeContext {
                                flow_id: flow.id.clone(),
                                execution_id: execution_id.to_string(),
                                node_id: node.id.clone(),
                                node_type: node.node_type.clone(),
                                config: render_config(&node.config, &scope),
                                input,
                                attempt: 0,
                                cancel: cancel.clone(),
                            },
                            policy: plan.policy(idx),
                            pool: self.pool.clone(),
                            cancel: cancel.clone(),
                            max_backoff: self.max_backoff,
                        };
                        tracing::debug!("📍 Starting node '{}' ({})", node.id, node.node_type);
                        running.spawn(run_node(job).in_current_span());
                    }
                    Decision::Fail(error) => {
                        tracing::warn!("⚠️ Node '{}' not started: {}", node.id, error);
                        let result = failed_result(node, error);
                        self.settle(plan, idx, result, &mut results, &mut finished, &mut waiting, &mut ready);
                    }
                    Decision::Skip(reason) => {
                        tracing::debug!("⏭️ Skipping node '{}' ({:?})", node.id, reason);
                        let result = NodeResult::skipped(node, reason);
                        self.settle(plan, idx, result, &mut results, &mut finished, &mut waiting, &mut ready);
                    }
                }
            }

            match running.join_next().await {
                Some(Ok((idx, result))) => {
                    self.settle(plan, idx, result, &mut results, &mut finished, &mut waiting, &mut ready);
                }
                Some(Err(e)) => {
                    tracing::error!("❌ Node task aborted: {}", e);
                }
                None => break,
            }
        }

        // A lost task leaves its node and descendants undecided; record them as failed
        for &idx in plan.order() {
            if !finished.contains_key(&idx) {
                let node = &flow.nodes[plan.node_position(idx)];
                results.push(failed_result(node, ExecutorError::failed("node task aborted")));
                finished.insert(idx, results.len() - 1);
            }
        }

        results
    }

    /// Record a terminal node result and release its successors
    #[allow(clippy::too_many_arguments)]
    fn settle(
        &self,
        plan: &ExecutionPlan,
        idx: NodeIndex,
        result: NodeResult,
        results: &mut Vec<NodeResult>,
        finished: &mut HashMap<NodeIndex, usize>,
        waiting: &mut HashMap<NodeIndex, usize>,
        ready: &mut VecDeque<NodeIndex>,
    ) {
        match result.status {
            NodeStatus::Succeeded => tracing::info!("✅ Node '{}' succeeded", result.node_id),
            NodeStatus::Failed => tracing::warn!(
                "❌ Node '{}' failed: {}",
                result.node_id,
                result.error.as_deref().unwrap_or_default()
            ),
            NodeStatus::Skipped => {}
        }

        results.push(result);
        finished.insert(idx, results.len() - 1);

        for target in plan.outgoing(idx) {
            if let Some(count) = waiting.get_mut(&target) {
                *count = count.saturating_sub(1);
                if *count == 0 && !finished.contains_key(&target) {
                    ready.push_back(target);
                }
            }
        }
    }

    /// Resolve a non-entry node from its predecessors' results
    async fn decide(
        &self,
        flow: &Flow,
        plan: &ExecutionPlan,
        idx: NodeIndex,
        results: &[NodeResult],
        finished: &HashMap<NodeIndex, usize>,
        cancel: &CancellationToken,
    ) -> Decision {
        let mut satisfied: Vec<(String, Value)> = Vec::new();
        let mut upstream_failed = false;
        let mut cancelled = false;

        for (edge_position, source) in plan.incoming(idx) {
            let Some(source_result) = finished.get(&source).map(|&i| &results[i]) else {
                continue;
            };
            let edge = &flow.edges[edge_position];
            let condition = edge.condition();

            match source_result.status {
                NodeStatus::Succeeded => {
                    let output = source_result.output.clone().unwrap_or(Value::Null);
                    if condition_holds(condition, &output, &edge.from, &edge.to, cancel).await {
                        satisfied.push((edge.from.clone(), output));
                    }
                }
                NodeStatus::Failed => match condition {
                    EdgeCondition::OnFailure | EdgeCondition::Always => satisfied.push((
                        edge.from.clone(),
                        json!({
                            "error": source_result.error.clone().unwrap_or_default(),
                            "failedNode": edge.from,
                        }),
                    )),
                    _ => upstream_failed = true,
                },
                NodeStatus::Skipped => match source_result.skip_reason {
                    Some(SkipReason::Cancelled) => cancelled = true,
                    Some(SkipReason::UpstreamFailed) => upstream_failed = true,
                    _ => {}
                },
            }
        }

        if satisfied.is_empty() {
            return if cancelled {
                Decision::Skip(SkipReason::Cancelled)
            } else if upstream_failed {
                Decision::Skip(SkipReason::UpstreamFailed)
            } else {
                Decision::Skip(SkipReason::Condition)
            };
        }

        match merge_inputs(satisfied) {
            Ok(input) => Decision::Run(input),
            Err(conflict) => Decision::Fail(conflict),
        }
    }
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("registry", &self.registry)
            .field("workers", &self.pool.size())
            .field("max_backoff", &self.max_backoff)
            .finish()
    }
}

/// Whether an edge from a succeeded source is traversed
async fn condition_holds(
    condition: &EdgeCondition,
    output: &Value,
    from: &str,
    to: &str,
    cancel: &CancellationToken,
) -> bool {
    match condition {
        EdgeCondition::OnSuccess | EdgeCondition::Always => true,
        EdgeCondition::OnFailure => false,
        EdgeCondition::Branch { value } => output
            .get("branch")
            .map(|branch| as_text(branch) == *value)
            .unwrap_or(false),
        EdgeCondition::Expression { expr } => {
            let expr = expr.clone();
            let output = output.clone();
            let budget = Budget::within(EXPRESSION_TIME_LIMIT).or_cancelled(cancel.clone());
            let evaluated = tokio::task::spawn_blocking(move || script::eval_condition(&expr, &output, budget))
                .await
                .unwrap_or_else(|e| Err(format!("evaluation task failed: {}", e)));
            match evaluated {
                Ok(holds) => holds,
                Err(e) => {
                    tracing::warn!("⚠️ Edge {} -> {} condition not taken: {}", from, to, e);
                    false
                }
            }
        }
    }
}

/// Shallow union of predecessor outputs
///
/// Object outputs contribute their keys; any other output lands under the
/// predecessor's id. A key offered by two predecessors is a conflict.
fn merge_inputs(sources: Vec<(String, Value)>) -> Result<Map<String, Value>, ExecutorError> {
    let mut merged = Map::new();
    let mut owners: HashMap<String, String> = HashMap::new();
    let mut seen_sources: Vec<String> = Vec::new();

    for (source, output) in sources {
        if seen_sources.contains(&source) {
            continue;
        }
        seen_sources.push(source.clone());

        let entries: Vec<(String, Value)> = match output {
            Value::Object(map) => map.into_iter().collect(),
            Value::Null => Vec::new(),
            other => vec![(source.clone(), other)],
        };
        for (key, value) in entries {
            if let Some(first) = owners.get(&key) {
                return Err(ExecutorError::InputConflict {
                    key,
                    first: first.clone(),
                    second: source,
                });
            }
            owners.insert(key.clone(), source.clone());
            merged.insert(key, value);
        }
    }

    Ok(merged)
}

fn failed_result(node: &Node, error: ExecutorError) -> NodeResult {
    let now = Utc::now();
    NodeResult {
        node_id: node.id.clone(),
        node_type: node.node_type.clone(),
        status: NodeStatus::Failed,
        skip_reason: None,
        output: None,
        error: Some(error.to_string()),
        attempts: Vec::new(),
        started_at: Some(now),
        finished_at: Some(now),
    }
}

/// Run one node through its attempts, honoring retry, timeout and cancellation
async fn run_node(job: NodeJob) -> (NodeIndex, NodeResult) {
    let NodeJob {
        idx,
        executor,
        ctx,
        policy,
        pool,
        cancel,
        max_backoff,
    } = job;

    let mut attempts: Vec<NodeAttempt> = Vec::new();
    let mut last_error: Option<ExecutorError> = None;
    let mut output: Option<Value> = None;

    for attempt in 1..=policy.max_attempts {
        // No new attempt starts once cancellation is observed
        let slot = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            slot = pool.node_slot() => slot,
        };
        let Some(slot) = slot else {
            break;
        };

        let started_at = Utc::now();
        let mut attempt_ctx = ctx.clone();
        attempt_ctx.attempt = attempt;
        let outcome = run_attempt(executor.clone(), attempt_ctx, policy.timeout).await;
        drop(slot);
        let finished_at = Utc::now();

        match outcome {
            Ok(value) => {
                attempts.push(NodeAttempt {
                    attempt,
                    started_at,
                    finished_at,
                    error: None,
                });
                output = Some(value);
                break;
            }
            Err(error) => {
                tracing::debug!(
                    "🔁 Node '{}' attempt {}/{} failed: {}",
                    ctx.node_id,
                    attempt,
                    policy.max_attempts,
                    error
                );
                attempts.push(NodeAttempt {
                    attempt,
                    started_at,
                    finished_at,
                    error: Some(error.to_string()),
                });
                let retry = error.is_retryable() && attempt < policy.max_attempts;
                last_error = Some(error);
                if !retry {
                    break;
                }

                let delay = policy.backoff_after(attempt, max_backoff);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    let started_at = attempts.first().map(|a| a.started_at);
    let finished_at = attempts.last().map(|a| a.finished_at);

    let result = match (output, attempts.is_empty()) {
        (Some(value), _) => NodeResult {
            node_id: ctx.node_id,
            node_type: ctx.node_type,
            status: NodeStatus::Succeeded,
            skip_reason: None,
            output: Some(value),
            error: None,
            attempts,
            started_at,
            finished_at,
        },
        // Cancelled before the first attempt began
        (None, true) => NodeResult {
            node_id: ctx.node_id,
            node_type: ctx.node_type,
            status: NodeStatus::Skipped,
            skip_reason: Some(SkipReason::Cancelled),
            output: None,
            error: None,
            attempts,
            started_at: None,
            finished_at: None,
        },
        (None, false) => NodeResult {
            node_id: ctx.node_id,
            node_type: ctx.node_type,
            status: NodeStatus::Failed,
            skip_reason: None,
            output: None,
            error: last_error.map(|e| e.to_string()),
            attempts,
            started_at,
            finished_at,
        },
    };

    (idx, result)
}

/// One attempt on its own task, so a panicking executor fails only its node
///
/// The attempt's token is a child of the execution token; a timeout cancels it so
/// work the executor moved off the task (such as a Lua interpreter) stops as well.
async fn run_attempt(
    executor: Arc<dyn NodeExecutor>,
    mut ctx: NodeContext,
    timeout: Option<Duration>,
) -> Result<Value, ExecutorError> {
    let attempt_token = ctx.cancel.child_token();
    ctx.cancel = attempt_token.clone();
    let mut handle = tokio::spawn(async move { executor.run(ctx).await }.in_current_span());

    let joined = match timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
            Ok(joined) => joined,
            Err(_) => {
                attempt_token.cancel();
                handle.abort();
                return Err(ExecutorError::Timeout(limit));
            }
        },
        None => handle.await,
    };

    joined.map_err(|e| ExecutorError::failed(format!("executor panicked: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{memory::InMemoryStore, types::Edge};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Emit(Value);

    #[async_trait]
    impl NodeExecutor for Emit {
        async fn run(&self, _ctx: NodeContext) -> Result<Value, ExecutorError> {
            Ok(self.0.clone())
        }
    }

    struct Echo;

    #[async_trait]
    impl NodeExecutor for Echo {
        async fn run(&self, ctx: NodeContext) -> Result<Value, ExecutorError> {
            Ok(json!({ "seen": ctx.input_value(), "config": ctx.config }))
        }
    }

    struct Flaky {
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl NodeExecutor for Flaky {
        async fn run(&self, _ctx: NodeContext) -> Result<Value, ExecutorError> {
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(ExecutorError::failed("transient"));
            }
            Ok(json!({ "recovered": true }))
        }
    }

    struct Sleepy;

    #[async_trait]
    impl NodeExecutor for Sleepy {
        async fn run(&self, _ctx: NodeContext) -> Result<Value, ExecutorError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(json!({}))
        }
    }

    struct Panics;

    #[async_trait]
    impl NodeExecutor for Panics {
        async fn run(&self, _ctx: NodeContext) -> Result<Value, ExecutorError> {
            panic!("executor bug");
        }
    }

    fn engine_with(registry: NodeRegistry) -> (ExecutionEngine, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let engine = ExecutionEngine::new(
            Arc::new(registry),
            store.clone(),
            EngineConfig {
                worker_limit: 4,
                max_backoff: Duration::from_millis(20),
            },
        );
        (engine, store)
    }

    fn base_registry() -> NodeRegistry {
        let mut registry = NodeRegistry::new();
        registry
            .register("trigger.manual", Emit(json!({})))
            .register("test.echo", Echo)
            .register("test.a", Emit(json!({"a": 1})))
            .register("test.b", Emit(json!({"b": 2})))
            .register("test.dup", Emit(json!({"a": 99})))
            .register("test.branch_yes", Emit(json!({"branch": "yes"})))
            .register("test.sleepy", Sleepy)
            .register("test.panics", Panics);
        registry
    }

    fn flow(nodes: Vec<Node>, edges: Vec<Edge>) -> Flow {
        let mut flow = Flow::new("engine test");
        flow.id = "flow-engine".into();
        flow.nodes = nodes;
        flow.edges = edges;
        flow
    }

    #[tokio::test]
    async fn join_merges_predecessor_outputs() {
        let (engine, _) = engine_with(base_registry());
        let f = flow(
            vec![
                Node::new("t", "trigger.manual"),
                Node::new("a", "test.a"),
                Node::new("b", "test.b"),
                Node::new("j", "test.echo"),
            ],
            vec![Edge::new("t", "a"), Edge::new("t", "b"), Edge::new("a", "j"), Edge::new("b", "j")],
        );
        let execution = engine
            .execute(&f, TriggerPayload::manual(json!({})), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(execution.status, ExecutionStatus::Succeeded);
        let joined = execution.result_for("j").unwrap();
        assert_eq!(joined.output.as_ref().unwrap()["seen"], json!({"a": 1, "b": 2}));
        assert_eq!(execution.node_results.last().unwrap().node_id, "j");
    }

    #[tokio::test]
    async fn key_collision_fails_the_join() {
        let (engine, _) = engine_with(base_registry());
        let f = flow(
            vec![
                Node::new("t", "trigger.manual"),
                Node::new("a", "test.a"),
                Node::new("d", "test.dup"),
                Node::new("j", "test.echo"),
            ],
            vec![Edge::new("t", "a"), Edge::new("t", "d"), Edge::new("a", "j"), Edge::new("d", "j")],
        );
        let execution = engine
            .execute(&f, TriggerPayload::manual(json!({})), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(execution.status, ExecutionStatus::Failed);
        let join = execution.result_for("j").unwrap();
        assert_eq!(join.status, NodeStatus::Failed);
        assert!(join.error.as_deref().unwrap().contains("input conflict"));
    }

    #[tokio::test]
    async fn branch_edges_skip_the_untaken_side_only() {
        let (engine, _) = engine_with(base_registry());
        let f = flow(
            vec![
                Node::new("t", "trigger.manual"),
                Node::new("c", "test.branch_yes"),
                Node::new("yes", "test.echo"),
                Node::new("no", "test.echo"),
                Node::new("after_no", "test.echo"),
            ],
            vec![
                Edge::new("t", "c"),
                Edge::new("c", "yes").when(EdgeCondition::Branch { value: "yes".into() }),
                Edge::new("c", "no").when(EdgeCondition::Branch { value: "no".into() }),
                Edge::new("no", "after_no"),
            ],
        );
        let execution = engine
            .execute(&f, TriggerPayload::manual(json!({})), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(execution.status, ExecutionStatus::Succeeded);
        assert_eq!(execution.result_for("yes").unwrap().status, NodeStatus::Succeeded);
        for id in ["no", "after_no"] {
            let result = execution.result_for(id).unwrap();
            assert_eq!(result.status, NodeStatus::Skipped);
            assert_eq!(result.skip_reason, Some(SkipReason::Condition));
        }
    }

    #[tokio::test]
    async fn expression_edges_see_source_output() {
        let (engine, _) = engine_with(base_registry());
        let f = flow(
            vec![
                Node::new("t", "trigger.manual"),
                Node::new("a", "test.a"),
                Node::new("big", "test.echo"),
                Node::new("small", "test.echo"),
            ],
            vec![
                Edge::new("t", "a"),
                Edge::new("a", "big").when(EdgeCondition::Expression { expr: "output.a > 5".into() }),
                Edge::new("a", "small").when(EdgeCondition::Expression { expr: "output.a <= 5".into() }),
            ],
        );
        let execution = engine
            .execute(&f, TriggerPayload::manual(json!({})), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(execution.result_for("big").unwrap().status, NodeStatus::Skipped);
        assert_eq!(execution.result_for("small").unwrap().status, NodeStatus::Succeeded);
    }

    #[tokio::test]
    async fn on_failure_edge_routes_the_error() {
        let (engine, _) = engine_with(base_registry());
        let f = flow(
            vec![
                Node::new("t", "trigger.manual"),
                Node::new("boom", "test.panics"),
                Node::new("handler", "test.echo"),
                Node::new("next", "test.echo"),
            ],
            vec![
                Edge::new("t", "boom"),
                Edge::new("boom", "handler").when(EdgeCondition::OnFailure),
                Edge::new("boom", "next"),
            ],
        );
        let execution = engine
            .execute(&f, TriggerPayload::manual(json!({})), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(execution.status, ExecutionStatus::Failed);
        let handler = execution.result_for("handler").unwrap();
        assert_eq!(handler.status, NodeStatus::Succeeded);
        assert_eq!(handler.output.as_ref().unwrap()["seen"]["failedNode"], "boom");
        let next = execution.result_for("next").unwrap();
        assert_eq!(next.skip_reason, Some(SkipReason::UpstreamFailed));
    }

    #[tokio::test]
    async fn retries_until_success() {
        let mut registry = base_registry();
        registry.register(
            "test.flaky",
            Flaky {
                failures_left: AtomicU32::new(2),
            },
        );
        let (engine, _) = engine_with(registry);
        let f = flow(
            vec![
                Node::new("t", "trigger.manual"),
                Node::new("f", "test.flaky").with_config(json!({"retry": {"maxAttempts": 3, "backoff": 1}})),
            ],
            vec![Edge::new("t", "f")],
        );
        let execution = engine
            .execute(&f, TriggerPayload::manual(json!({})), CancellationToken::new())
            .await
            .unwrap();
        let result = execution.result_for("f").unwrap();
        assert_eq!(result.status, NodeStatus::Succeeded);
        assert_eq!(result.attempts.len(), 3);
        assert!(result.attempts[0].error.is_some());
        assert!(result.attempts[2].error.is_none());
    }

    #[tokio::test]
    async fn timeout_is_a_retryable_failure() {
        let (engine, _) = engine_with(base_registry());
        let f = flow(
            vec![
                Node::new("t", "trigger.manual"),
                Node::new("s", "test.sleepy")
                    .with_config(json!({"timeoutMs": 20, "retry": {"maxAttempts": 2, "backoff": 1}})),
            ],
            vec![Edge::new("t", "s")],
        );
        let execution = engine
            .execute(&f, TriggerPayload::manual(json!({})), CancellationToken::new())
            .await
            .unwrap();
        let result = execution.result_for("s").unwrap();
        assert_eq!(result.status, NodeStatus::Failed);
        assert_eq!(result.attempts.len(), 2);
        assert!(result.error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn config_placeholders_are_rendered_from_input() {
        let (engine, _) = engine_with(base_registry());
        let f = flow(
            vec![
                Node::new("t", "trigger.manual"),
                Node::new("e", "test.echo").with_config(json!({"greeting": "hi {{name}}"})),
            ],
            vec![Edge::new("t", "e")],
        );
        let execution = engine
            .execute(&f, TriggerPayload::manual(json!({"name": "Ada"})), CancellationToken::new())
            .await
            .unwrap();
        let output = execution.result_for("e").unwrap().output.clone().unwrap();
        assert_eq!(output["config"]["greeting"], "hi Ada");
    }

    #[tokio::test]
    async fn pre_cancelled_run_skips_everything() {
        let (engine, store) = engine_with(base_registry());
        let f = flow(
            vec![Node::new("t", "trigger.manual"), Node::new("a", "test.a")],
            vec![Edge::new("t", "a")],
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        let execution = engine
            .execute(&f, TriggerPayload::manual(json!({})), cancel)
            .await
            .unwrap();
        assert_eq!(execution.status, ExecutionStatus::Cancelled);
        assert_eq!(execution.count(NodeStatus::Skipped), 2);
        assert!(execution
            .node_results
            .iter()
            .all(|r| r.skip_reason == Some(SkipReason::Cancelled)));
        assert_eq!(store.execution_count().await, 1);
    }

    #[tokio::test]
    async fn record_write_failure_keeps_status() {
        let (engine, store) = engine_with(base_registry());
        store.fail_execution_writes(true);
        let f = flow(vec![Node::new("t", "trigger.manual")], vec![]);
        let execution = engine
            .execute(&f, TriggerPayload::manual(json!({})), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(execution.status, ExecutionStatus::Succeeded);
        assert_eq!(store.execution_count().await, 0);
    }

    #[test]
    fn merge_puts_scalars_under_source_id() {
        let merged = merge_inputs(vec![
            ("a".into(), json!({"x": 1})),
            ("b".into(), json!(7)),
            ("a".into(), json!({"x": 1})),
        ])
        .unwrap();
        assert_eq!(Value::Object(merged), json!({"x": 1, "b": 7}));
    }
}
