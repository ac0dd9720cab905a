/// Branch nodes
///
/// Both output `{ "branch": ... }` and nothing else; outgoing `branch` edges pick
/// the path. `condition.if` yields `"true"` or `"false"`; `condition.switch`
/// yields the looked-up value as text, or `"default"`.

use crate::error::ExecutorError;
use crate::runtime::{
    executor::{NodeContext, NodeExecutor},
    nodes::{one_of, require_string},
    registry::NodeRegistry,
    template::{as_text, lookup},
};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::cmp::Ordering;

pub fn register(registry: &mut NodeRegistry) {
    registry
        .register("condition.if", IfCondition)
        .register("condition.switch", SwitchCondition);
}

const OPERATORS: [&str; 11] = [
    "eq", "ne", "gt", "gte", "lt", "lte", "contains", "exists", "not_exists", "truthy", "falsy",
];

fn branch(name: String) -> Value {
    json!({ "branch": name })
}

fn as_number(value: &Value) -> Option<f64> {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|text| text.trim().parse().ok()))
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (as_number(left), as_number(right)) {
        (Some(l), Some(r)) => l.partial_cmp(&r),
        _ => match (left.as_str(), right.as_str()) {
            (Some(l), Some(r)) => Some(l.cmp(r)),
            _ => None,
        },
    }
}

fn loosely_equal(left: &Value, right: &Value) -> bool {
    left == right || compare(left, right) == Some(Ordering::Equal)
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Evaluate `operator` between the looked-up value and the configured operand
pub fn evaluate(operator: &str, found: Option<&Value>, operand: &Value) -> Result<bool, String> {
    let null = Value::Null;
    let left = found.unwrap_or(&null);
    let matched = match operator {
        "eq" => loosely_equal(left, operand),
        "ne" => !loosely_equal(left, operand),
        "gt" => compare(left, operand) == Some(Ordering::Greater),
        "gte" => matches!(compare(left, operand), Some(Ordering::Greater | Ordering::Equal)),
        "lt" => compare(left, operand) == Some(Ordering::Less),
        "lte" => matches!(compare(left, operand), Some(Ordering::Less | Ordering::Equal)),
        "contains" => match left {
            Value::String(text) => text.contains(&as_text(operand)),
            Value::Array(items) => items.iter().any(|item| loosely_equal(item, operand)),
            Value::Object(map) => operand.as_str().map(|key| map.contains_key(key)).unwrap_or(false),
            _ => false,
        },
        "exists" => found.map(|v| !v.is_null()).unwrap_or(false),
        "not_exists" => found.map(Value::is_null).unwrap_or(true),
        "truthy" => truthy(left),
        "falsy" => !truthy(left),
        other => return Err(format!("unknown operator '{}'", other)),
    };
    Ok(matched)
}

/// Config: `{ "path": "order.total", "operator": "gt", "value": 100 }`
#[derive(Debug, Clone, Copy)]
pub struct IfCondition;

#[async_trait]
impl NodeExecutor for IfCondition {
    fn validate(&self, config: &Map<String, Value>) -> Result<(), String> {
        require_string(config, "path")?;
        one_of(config, "operator", &OPERATORS)
    }

    async fn run(&self, ctx: NodeContext) -> Result<Value, ExecutorError> {
        let path = ctx.require_str("path")?;
        let operator = ctx.str_param("operator").unwrap_or("eq");
        let operand = ctx.config.get("value").cloned().unwrap_or(Value::Bool(true));

        let found = lookup(&ctx.input_value(), path);
        let matched = evaluate(operator, found.as_ref(), &operand).map_err(ExecutorError::Config)?;
        tracing::debug!("🔀 '{}' {} {} -> {}", path, operator, operand, matched);

        Ok(branch(matched.to_string()))
    }
}

/// Config: `{ "path": "event.kind" }`
#[derive(Debug, Clone, Copy)]
pub struct SwitchCondition;

#[async_trait]
impl NodeExecutor for SwitchCondition {
    fn validate(&self, config: &Map<String, Value>) -> Result<(), String> {
        require_string(config, "path")
    }

    async fn run(&self, ctx: NodeContext) -> Result<Value, ExecutorError> {
        let path = ctx.require_str("path")?;
        let selected = match lookup(&ctx.input_value(), path) {
            None | Some(Value::Null) => "default".to_string(),
            Some(value) => as_text(&value),
        };
        Ok(branch(selected))
    }
}
