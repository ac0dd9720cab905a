/// `logic.script`: sandboxed Lua over the node input
///
/// Config: `{ "script": "return { total = input.a + input.b }" }`. A table result
/// becomes the output object; any other value is wrapped as `{ "result": value }`.

use crate::error::ExecutorError;
use crate::runtime::{
    executor::{NodeContext, NodeExecutor},
    nodes::{as_object, require_string},
    registry::NodeRegistry,
    script::{self, Budget},
};
use async_trait::async_trait;
use serde_json::{Map, Value};

pub fn register(registry: &mut NodeRegistry) {
    registry.register("logic.script", ScriptNode);
}

#[derive(Debug, Clone, Copy)]
pub struct ScriptNode;

#[async_trait]
impl NodeExecutor for ScriptNode {
    fn validate(&self, config: &Map<String, Value>) -> Result<(), String> {
        require_string(config, "script")?;
        match config.get("script").and_then(Value::as_str) {
            Some(source) if !source.contains("{{") => script::check_script(source),
            _ => Ok(()),
        }
    }

    async fn run(&self, ctx: NodeContext) -> Result<Value, ExecutorError> {
        let source = ctx.require_str("script")?.to_string();
        let input = ctx.input_value();
        let budget = Budget::default().or_cancelled(ctx.cancel.clone());
        tracing::debug!("🧠 Running script node '{}'", ctx.node_id);

        // Lua runs on the blocking pool; the budget stops it when the attempt is cancelled
        let result = tokio::task::spawn_blocking(move || script::run_script(&source, &input, budget))
            .await
            .map_err(|e| ExecutorError::failed(format!("script task aborted: {}", e)))?
            .map_err(ExecutorError::Failed)?;

        Ok(Value::Object(as_object(result, "result")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(script: &str, input: Value) -> NodeContext {
        NodeContext {
            flow_id: "f".into(),
            execution_id: "e".into(),
            node_id: "s".into(),
            node_type: "logic.script".into(),
            config: json!({ "script": script }).as_object().cloned().unwrap(),
            input: input.as_object().cloned().unwrap(),
            attempt: 1,
            cancel: Default::default(),
        }
    }

    #[tokio::test]
    async fn scalar_results_are_wrapped() {
        let out = ScriptNode.run(ctx("return input.n + 1", json!({"n": 1}))).await.unwrap();
        assert_eq!(out, json!({"result": 2}));
    }

    #[tokio::test]
    async fn runtime_errors_are_retryable_failures() {
        let err = ScriptNode.run(ctx("error('nope')", json!({}))).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn cancelling_the_attempt_stops_a_busy_script() {
        let context = ctx("while true do end", json!({}));
        let token = context.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            token.cancel();
        });

        let outcome = tokio::time::timeout(std::time::Duration::from_secs(5), ScriptNode.run(context))
            .await
            .expect("script ignored cancellation");
        assert!(outcome.unwrap_err().to_string().contains("cancelled"));
    }

    #[test]
    fn syntax_errors_fail_validation() {
        let config = json!({"script": "return {"}).as_object().cloned().unwrap();
        assert!(ScriptNode.validate(&config).is_err());
    }
}
