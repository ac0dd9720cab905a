//! Shared fixtures for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use flowdeck::{
    error::ExecutorError,
    flow::{Edge, Flow, InMemoryStore, Node},
    runtime::{
        engine::EngineConfig, nodes::triggers::TriggerPassthrough, ExecutionEngine, NodeContext,
        NodeExecutor, NodeRegistry,
    },
};
use serde_json::{json, Value};
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

/// Records every input it sees and how many copies of itself ran at once
#[derive(Default)]
pub struct Recorder {
    pub delay: Duration,
    running: AtomicUsize,
    pub max_running: AtomicUsize,
    pub inputs: Mutex<Vec<Value>>,
}

impl Recorder {
    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Default::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.inputs.lock().unwrap().len()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NodeExecutor for Recorder {
    async fn run(&self, ctx: NodeContext) -> Result<Value, ExecutorError> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        self.inputs.lock().unwrap().push(ctx.input_value());
        tokio::time::sleep(self.delay).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(json!({ "recorded": ctx.node_id }))
    }
}

/// Fails every attempt with a retryable error
pub struct AlwaysFails;

#[async_trait]
impl NodeExecutor for AlwaysFails {
    async fn run(&self, ctx: NodeContext) -> Result<Value, ExecutorError> {
        Err(ExecutorError::failed(format!("attempt {} failed", ctx.attempt)))
    }
}

/// Emits a fixed object
pub struct Emit(pub Value);

#[async_trait]
impl NodeExecutor for Emit {
    async fn run(&self, _ctx: NodeContext) -> Result<Value, ExecutorError> {
        Ok(self.0.clone())
    }
}

/// Registry with every trigger type plus `test.ok`, `test.fail` and `test.record`
pub fn registry_with(recorder: Arc<Recorder>) -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    for node_type in flowdeck::runtime::nodes::triggers::TRIGGER_TYPES {
        registry.register(node_type, TriggerPassthrough);
    }
    registry
        .register("test.ok", Emit(json!({ "ok": true })))
        .register("test.fail", AlwaysFails)
        .register_shared("test.record", recorder);
    registry
}

pub fn engine_with(registry: NodeRegistry) -> (ExecutionEngine, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    let engine = ExecutionEngine::new(
        Arc::new(registry),
        store.clone(),
        EngineConfig {
            worker_limit: 4,
            max_backoff: Duration::from_millis(10),
        },
    );
    (engine, store)
}

pub fn flow(name: &str, nodes: Vec<Node>, edges: Vec<Edge>) -> Flow {
    let mut flow = Flow::new(name);
    flow.nodes = nodes;
    flow.edges = edges;
    flow
}

/// Poll `check` every 10ms until it returns true or `timeout` passes
pub async fn wait_for(timeout: Duration, check: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll the store until its execution count satisfies `done`
pub async fn wait_for_executions(store: &InMemoryStore, timeout: Duration, done: impl Fn(usize) -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if done(store.execution_count().await) {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
