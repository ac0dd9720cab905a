/// Node Executor Registry
///
/// Tagged dispatch table from node `type` to executor. Filled once at startup and
/// shared read-only afterwards; lookups are by exact type string.

use crate::runtime::{capabilities::Capabilities, executor::NodeExecutor, nodes};
use std::{collections::HashMap, sync::Arc};

#[derive(Clone, Default)]
pub struct NodeRegistry {
    executors: HashMap<String, Arc<dyn NodeExecutor>>,
}

impl NodeRegistry {
    /// Empty registry; tests and embedders register their own executors
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in node type
    pub fn with_builtins(capabilities: Capabilities) -> Self {
        let mut registry = Self::new();
        nodes::register_builtins(&mut registry, &capabilities);
        tracing::info!("🧩 Registered {} built-in node types", registry.len());
        registry
    }

    /// Register (or replace) the executor for `node_type`
    pub fn register<E>(&mut self, node_type: impl Into<String>, executor: E) -> &mut Self
    where
        E: NodeExecutor + 'static,
    {
        self.register_shared(node_type, Arc::new(executor))
    }

    pub fn register_shared(
        &mut self,
        node_type: impl Into<String>,
        executor: Arc<dyn NodeExecutor>,
    ) -> &mut Self {
        let node_type = node_type.into();
        if self.executors.insert(node_type.clone(), executor).is_some() {
            tracing::warn!("⚠️ Replacing executor for node type '{}'", node_type);
        }
        self
    }

    pub fn get(&self, node_type: &str) -> Option<Arc<dyn NodeExecutor>> {
        self.executors.get(node_type).cloned()
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.executors.contains_key(node_type)
    }

    /// Registered types, sorted
    pub fn node_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.executors.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("node_types", &self.node_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExecutorError;
    use crate::runtime::executor::NodeContext;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct Echo;

    #[async_trait]
    impl NodeExecutor for Echo {
        async fn run(&self, ctx: NodeContext) -> Result<Value, ExecutorError> {
            Ok(ctx.input_value())
        }
    }

    #[test]
    fn lookup_is_exact() {
        let mut registry = NodeRegistry::new();
        registry.register("test.echo", Echo);
        assert!(registry.contains("test.echo"));
        assert!(registry.get("test.Echo").is_none());
        assert!(registry.get("test").is_none());
    }

    #[test]
    fn builtins_cover_every_family() {
        let dir = tempfile::tempdir().unwrap();
        let registry = NodeRegistry::with_builtins(Capabilities::system(dir.path()));
        for node_type in [
            "trigger.manual",
            "trigger.schedule",
            "trigger.webhook",
            "action.log",
            "action.http_request",
            "logic.script",
            "condition.if",
            "condition.switch",
            "spreadsheet.read",
            "spreadsheet.write",
        ] {
            assert!(registry.contains(node_type), "missing {}", node_type);
        }
    }

    #[tokio::test]
    async fn registered_executor_runs() {
        let mut registry = NodeRegistry::new();
        registry.register("test.echo", Echo);
        let out = registry
            .get("test.echo")
            .unwrap()
            .run(NodeContext {
                flow_id: "f".into(),
                execution_id: "e".into(),
                node_id: "n".into(),
                node_type: "test.echo".into(),
                config: Default::default(),
                input: json!({"x": 1}).as_object().cloned().unwrap(),
                attempt: 1,
                cancel: Default::default(),
            })
            .await
            .unwrap();
        assert_eq!(out, json!({"x": 1}));
    }
}
