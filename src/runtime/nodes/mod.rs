/// Built-in node executors
///
/// Each node family lives in its own file:
/// - `trigger.*` entry points pass the trigger payload through
/// - `action.*` side effects through the action dispatcher or HTTP
/// - `logic.script` sandboxed Lua
/// - `condition.*` branch selection for `branch` edges
/// - `spreadsheet.*` workbook reads and writes

use crate::runtime::{capabilities::Capabilities, registry::NodeRegistry};
use serde_json::{Map, Value};

// Trigger entry nodes
pub mod triggers;

// OS and network actions
pub mod actions;

// Lua scripting
pub mod logic;

// Branching
pub mod conditions;

// Workbook capability nodes
pub mod spreadsheet;

/// Register every built-in node type
pub fn register_builtins(registry: &mut NodeRegistry, capabilities: &Capabilities) {
    triggers::register(registry);
    actions::register(registry, capabilities);
    logic::register(registry);
    conditions::register(registry);
    spreadsheet::register(registry, capabilities);
}

/// Validation helper: `key` must be a non-empty string
pub(crate) fn require_string(config: &Map<String, Value>, key: &str) -> Result<(), String> {
    match config.get(key) {
        Some(Value::String(value)) if !value.trim().is_empty() => Ok(()),
        Some(Value::String(_)) | None => Err(format!("'{}' is required", key)),
        Some(_) => Err(format!("'{}' must be a string", key)),
    }
}

/// A string that will be filled in from the node input at run time
pub(crate) fn is_placeholder(value: &Value) -> bool {
    value.as_str().is_some_and(|text| text.contains("{{"))
}

/// Validation helper: a known keyword, or a placeholder resolved later
pub(crate) fn one_of(config: &Map<String, Value>, key: &str, allowed: &[&str]) -> Result<(), String> {
    match config.get(key) {
        None | Some(Value::Null) => Ok(()),
        Some(value) if is_placeholder(value) => Ok(()),
        Some(Value::String(text)) if allowed.contains(&text.as_str()) => Ok(()),
        Some(Value::String(text)) => Err(format!("unknown {} '{}'", key, text)),
        Some(_) => Err(format!("'{}' must be a string", key)),
    }
}

/// Validation helper: `key`, when present, must have the expected JSON shape
pub(crate) fn optional_kind(
    config: &Map<String, Value>,
    key: &str,
    expected: &str,
    check: fn(&Value) -> bool,
) -> Result<(), String> {
    match config.get(key) {
        None | Some(Value::Null) => Ok(()),
        Some(value) if is_placeholder(value) => Ok(()),
        Some(value) if check(value) => Ok(()),
        Some(_) => Err(format!("'{}' must be {}", key, expected)),
    }
}

/// Objects pass through unchanged; anything else lands under `key`
pub(crate) fn as_object(value: Value, key: &str) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert(key.to_string(), other);
            map
        }
    }
}
