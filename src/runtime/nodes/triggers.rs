/// Trigger entry nodes
///
/// Trigger configs are parsed and validated by the trigger manager when a flow is
/// registered; inside an execution a trigger node only hands its payload on.

use crate::error::ExecutorError;
use crate::runtime::{
    executor::{NodeContext, NodeExecutor},
    registry::NodeRegistry,
};
use async_trait::async_trait;
use serde_json::Value;

pub const TRIGGER_TYPES: [&str; 7] = [
    "trigger.manual",
    "trigger.schedule",
    "trigger.interval",
    "trigger.startup",
    "trigger.event",
    "trigger.file_watch",
    "trigger.webhook",
];

pub fn register(registry: &mut NodeRegistry) {
    for node_type in TRIGGER_TYPES {
        registry.register(node_type, TriggerPassthrough);
    }
}

/// Emits the trigger payload as the node output
#[derive(Debug, Clone, Copy)]
pub struct TriggerPassthrough;

#[async_trait]
impl NodeExecutor for TriggerPassthrough {
    async fn run(&self, ctx: NodeContext) -> Result<Value, ExecutorError> {
        tracing::debug!("🎯 Trigger node '{}' entered", ctx.node_id);
        Ok(ctx.input_value())
    }
}
