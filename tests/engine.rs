//! Execution engine properties exercised end to end against the in-memory store

mod common;

use async_trait::async_trait;
use common::{engine_with, flow, registry_with, Recorder};
use flowdeck::{
    error::{ExecutorError, ValidationError},
    flow::{Edge, EdgeCondition, ExecutionStatus, Node, NodeStatus, SkipReason},
    runtime::{Capabilities, NodeContext, NodeExecutor, NodeRegistry},
    FlowStore, TriggerPayload,
};
use serde_json::{json, Value};
use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn cycle_is_rejected_without_a_record() {
    let (engine, store) = engine_with(registry_with(Recorder::slow(Duration::ZERO)));
    let f = flow(
        "cyclic",
        vec![
            Node::new("t", "trigger.manual"),
            Node::new("a", "test.ok"),
            Node::new("b", "test.ok"),
        ],
        vec![Edge::new("t", "a"), Edge::new("a", "b"), Edge::new("b", "a")],
    );

    let err = engine
        .execute(&f, TriggerPayload::manual(json!({})), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ValidationError::CycleDetected { .. }));
    assert_eq!(store.execution_count().await, 0);
}

#[tokio::test]
async fn dangling_edge_is_rejected_before_any_node_runs() {
    let recorder = Recorder::slow(Duration::ZERO);
    let (engine, store) = engine_with(registry_with(recorder.clone()));
    let f = flow(
        "dangling",
        vec![Node::new("t", "trigger.manual"), Node::new("r", "test.record")],
        vec![Edge::new("t", "r"), Edge::new("r", "ghost")],
    );

    let err = engine
        .execute(&f, TriggerPayload::manual(json!({})), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ValidationError::DanglingEdge { ref missing, .. } if missing == "ghost"));
    assert_eq!(recorder.calls(), 0);
    assert_eq!(store.execution_count().await, 0);
}

#[tokio::test]
async fn unknown_node_type_is_a_validation_error() {
    let (engine, _) = engine_with(registry_with(Recorder::slow(Duration::ZERO)));
    let f = flow(
        "unknown",
        vec![Node::new("t", "trigger.manual"), Node::new("x", "action.teleport")],
        vec![Edge::new("t", "x")],
    );
    let err = engine.validate(&f, None).unwrap_err();
    assert!(matches!(err, ValidationError::UnsupportedNodeType { ref node_type, .. } if node_type == "action.teleport"));
}

#[tokio::test]
async fn failed_sibling_does_not_stop_the_other_branch() {
    let (engine, store) = engine_with(registry_with(Recorder::slow(Duration::ZERO)));
    let mut f = flow(
        "siblings",
        vec![
            Node::new("A", "trigger.manual"),
            Node::new("B", "test.fail"),
            Node::new("C", "test.ok"),
            Node::new("D", "test.ok"),
        ],
        vec![Edge::new("A", "B"), Edge::new("A", "C"), Edge::new("B", "D")],
    );
    f.id = store.save_flow(f.clone()).await.unwrap();

    let execution = engine
        .execute(&f, TriggerPayload::manual(json!({})), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.result_for("B").unwrap().status, NodeStatus::Failed);
    assert_eq!(execution.result_for("C").unwrap().status, NodeStatus::Succeeded);
    let downstream = execution.result_for("D").unwrap();
    assert_eq!(downstream.status, NodeStatus::Skipped);
    assert_eq!(downstream.skip_reason, Some(SkipReason::UpstreamFailed));

    let stored = store.load_execution(&execution.id).await.unwrap();
    assert_eq!(stored, execution);
}

#[tokio::test]
async fn max_attempts_bounds_recorded_attempts() {
    let (engine, _) = engine_with(registry_with(Recorder::slow(Duration::ZERO)));
    for attempts in [1u32, 3] {
        let f = flow(
            "retries",
            vec![
                Node::new("t", "trigger.manual"),
                Node::new("f", "test.fail").with_config(json!({"retry": {"maxAttempts": attempts, "backoff": 1}})),
            ],
            vec![Edge::new("t", "f")],
        );
        let execution = engine
            .execute(&f, TriggerPayload::manual(json!({})), CancellationToken::new())
            .await
            .unwrap();
        let result = execution.result_for("f").unwrap();
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(result.attempts.len(), attempts as usize);
        assert!(result.attempts.iter().all(|a| a.error.is_some()));
    }
}

#[tokio::test]
async fn results_partition_the_reachable_nodes() {
    let (engine, _) = engine_with(registry_with(Recorder::slow(Duration::ZERO)));
    let f = flow(
        "partition",
        vec![
            Node::new("t1", "trigger.manual"),
            Node::new("t2", "trigger.manual"),
            Node::new("a", "test.ok"),
            Node::new("b", "test.fail"),
            Node::new("c", "test.ok"),
            Node::new("d", "test.ok"),
            Node::new("only_t2", "test.ok"),
        ],
        vec![
            Edge::new("t1", "a"),
            Edge::new("t1", "b"),
            Edge::new("b", "c"),
            Edge::new("a", "d"),
            Edge::new("c", "d"),
            Edge::new("t2", "only_t2"),
        ],
    );

    let execution = engine
        .execute(&f, TriggerPayload::from_trigger("t1", json!({})), CancellationToken::new())
        .await
        .unwrap();

    let ids: Vec<&str> = execution.node_results.iter().map(|r| r.node_id.as_str()).collect();
    let unique: HashSet<&str> = ids.iter().copied().collect();
    assert_eq!(ids.len(), unique.len(), "no node recorded twice");
    assert_eq!(unique, HashSet::from(["t1", "a", "b", "c", "d"]));
    assert_eq!(
        execution.count(NodeStatus::Succeeded) + execution.count(NodeStatus::Failed) + execution.count(NodeStatus::Skipped),
        5
    );
    assert_eq!(execution.trigger_node_id.as_deref(), Some("t1"));
}

#[tokio::test]
async fn cancellation_mid_run_skips_remaining_nodes() {
    let recorder = Recorder::slow(Duration::from_millis(150));
    let (engine, _) = engine_with(registry_with(recorder.clone()));
    let f = flow(
        "cancelled",
        vec![
            Node::new("t", "trigger.manual"),
            Node::new("slow", "test.record"),
            Node::new("after", "test.ok"),
        ],
        vec![Edge::new("t", "slow"), Edge::new("slow", "after")],
    );

    let cancel = CancellationToken::new();
    let trip = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trip.cancel();
    });

    let execution = engine
        .execute(&f, TriggerPayload::manual(json!({})), cancel)
        .await
        .unwrap();
    assert_eq!(execution.status, ExecutionStatus::Cancelled);
    // the running attempt is allowed to finish
    assert_eq!(execution.result_for("slow").unwrap().status, NodeStatus::Succeeded);
    let after = execution.result_for("after").unwrap();
    assert_eq!(after.skip_reason, Some(SkipReason::Cancelled));
}

#[tokio::test]
async fn endless_edge_expression_gives_way_to_cancellation() {
    let (engine, _) = engine_with(registry_with(Recorder::slow(Duration::ZERO)));
    let f = flow(
        "spinning edge",
        vec![Node::new("t", "trigger.manual"), Node::new("a", "test.ok")],
        vec![Edge::new("t", "a").when(EdgeCondition::Expression {
            expr: "(function() while true do end end)()".into(),
        })],
    );

    let cancel = CancellationToken::new();
    let trip = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trip.cancel();
    });

    let execution = tokio::time::timeout(
        Duration::from_secs(3),
        engine.execute(&f, TriggerPayload::manual(json!({})), cancel),
    )
    .await
    .expect("execution did not stop")
    .unwrap();
    assert_eq!(execution.status, ExecutionStatus::Cancelled);
    assert_eq!(execution.result_for("a").unwrap().status, NodeStatus::Skipped);
}

#[tokio::test]
async fn endless_edge_expression_is_not_taken() {
    let (engine, _) = engine_with(registry_with(Recorder::slow(Duration::ZERO)));
    let f = flow(
        "spinning edge",
        vec![Node::new("t", "trigger.manual"), Node::new("a", "test.ok")],
        vec![Edge::new("t", "a").when(EdgeCondition::Expression {
            expr: "(function() while true do end end)()".into(),
        })],
    );

    let execution = tokio::time::timeout(
        Duration::from_secs(5),
        engine.execute(&f, TriggerPayload::manual(json!({})), CancellationToken::new()),
    )
    .await
    .expect("edge expression never finished")
    .unwrap();
    assert_eq!(execution.status, ExecutionStatus::Succeeded);
    assert_eq!(execution.result_for("a").unwrap().skip_reason, Some(SkipReason::Condition));
}

/// Never returns; keeps the token each attempt was given
#[derive(Default)]
struct Stuck {
    tokens: Mutex<Vec<CancellationToken>>,
}

#[async_trait]
impl NodeExecutor for Stuck {
    async fn run(&self, ctx: NodeContext) -> Result<Value, ExecutorError> {
        self.tokens.lock().unwrap().push(ctx.cancel.clone());
        std::future::pending().await
    }
}

#[tokio::test]
async fn timed_out_attempts_have_their_token_cancelled() {
    let stuck = Arc::new(Stuck::default());
    let mut registry = registry_with(Recorder::slow(Duration::ZERO));
    registry.register_shared("test.stuck", stuck.clone());
    let (engine, _) = engine_with(registry);
    let f = flow(
        "timeouts",
        vec![
            Node::new("t", "trigger.manual"),
            Node::new("s", "test.stuck").with_config(json!({"timeoutMs": 50, "retry": {"maxAttempts": 2, "backoff": 1}})),
        ],
        vec![Edge::new("t", "s")],
    );

    let cancel = CancellationToken::new();
    let execution = engine
        .execute(&f, TriggerPayload::manual(json!({})), cancel.clone())
        .await
        .unwrap();

    let result = execution.result_for("s").unwrap();
    assert_eq!(result.status, NodeStatus::Failed);
    assert_eq!(result.attempts.len(), 2);
    let tokens = stuck.tokens.lock().unwrap();
    assert_eq!(tokens.len(), 2);
    assert!(tokens.iter().all(CancellationToken::is_cancelled));
    assert!(!cancel.is_cancelled());
}


#[tokio::test]
async fn settings_environment_variables_fill_placeholders() {
    let (engine, store) = engine_with(NodeRegistry::with_builtins(Capabilities::system(std::env::temp_dir())));
    store
        .save_settings(json!({"environmentVariables": [
            {"key": "API_HOST", "value": "api.local"},
            {"key": "user", "value": "from-settings"}
        ]}))
        .await
        .unwrap();
    let f = flow(
        "env",
        vec![
            Node::new("t", "trigger.manual"),
            Node::new("s", "action.set").with_config(json!({"values": {
                "url": "https://{{API_HOST}}/users/{{user}}",
                "host": "{{env.API_HOST}}",
                "configured": "{{env.user}}"
            }})),
        ],
        vec![Edge::new("t", "s")],
    );

    let execution = engine
        .execute(&f, TriggerPayload::manual(json!({"user": "ann"})), CancellationToken::new())
        .await
        .unwrap();
    let output = execution.result_for("s").unwrap().output.clone().unwrap();
    assert_eq!(output["url"], "https://api.local/users/ann");
    assert_eq!(output["host"], "api.local");
    assert_eq!(output["configured"], "from-settings");
}
