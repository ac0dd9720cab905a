/// Trigger specifications
///
/// Parses a trigger node's config into a typed spec. Parsing is node-scoped: a bad
/// spec is reported for that node only.

use crate::error::SchedulingError;
use crate::flow::types::{Node, TRIGGER_PREFIX};
use serde_json::{Map, Value};
use std::{path::PathBuf, str::FromStr, time::Duration};

/// Shortest accepted interval
pub const MIN_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerSpec {
    /// Only runs through "run now"
    Manual,
    /// Cron schedule, normalised to the 6-field form (seconds first)
    Schedule { cron: String },
    /// Fixed period, first fire one period after registration
    Interval { every: Duration },
    /// Fires once, `delay` after registration
    Startup { delay: Duration },
    /// In-process event published under `name`
    Event { name: String },
    /// Filesystem changes under `path`
    FileWatch { path: PathBuf, recursive: bool },
    /// HTTP request on `/webhook/<path>`
    Webhook { path: String, method: Option<String> },
}

impl TriggerSpec {
    pub fn parse(node: &Node) -> Result<Self, SchedulingError> {
        let kind = node
            .node_type
            .strip_prefix(TRIGGER_PREFIX)
            .ok_or_else(|| invalid(node, format!("'{}' is not a trigger type", node.node_type)))?;
        Self::from_config(kind, &node.config).map_err(|reason| invalid(node, reason))
    }

    fn from_config(kind: &str, config: &Map<String, Value>) -> Result<Self, String> {
        match kind {
            "manual" => Ok(TriggerSpec::Manual),
            "schedule" => {
                let expr = required_str(config, "cron")?;
                let cron = normalize_cron(expr);
                cron::Schedule::from_str(&cron)
                    .map_err(|e| format!("invalid cron expression '{}': {}", expr, e))?;
                Ok(TriggerSpec::Schedule { cron })
            }
            "interval" => {
                let every = Duration::from_millis(required_u64(config, "everyMs")?);
                if every < MIN_INTERVAL {
                    return Err(format!("everyMs must be at least {}", MIN_INTERVAL.as_millis()));
                }
                Ok(TriggerSpec::Interval { every })
            }
            "startup" => {
                let delay = match config.get("delayMs") {
                    None | Some(Value::Null) => 0,
                    Some(_) => required_u64(config, "delayMs")?,
                };
                Ok(TriggerSpec::Startup {
                    delay: Duration::from_millis(delay),
                })
            }
            "event" => Ok(TriggerSpec::Event {
                name: required_str(config, "event")?.trim().to_string(),
            }),
            "file_watch" => Ok(TriggerSpec::FileWatch {
                path: PathBuf::from(required_str(config, "path")?),
                recursive: config.get("recursive").and_then(Value::as_bool).unwrap_or(false),
            }),
            "webhook" => {
                let path = normalize_webhook_path(required_str(config, "path")?);
                if path.is_empty() {
                    return Err("webhook path is empty".to_string());
                }
                let method = config
                    .get("method")
                    .and_then(Value::as_str)
                    .map(str::to_uppercase)
                    .filter(|m| m != "ANY");
                Ok(TriggerSpec::Webhook { path, method })
            }
            other => Err(format!("unknown trigger kind '{}'", other)),
        }
    }

    /// Short name used in fire payloads and logs
    pub fn kind(&self) -> &'static str {
        match self {
            TriggerSpec::Manual => "manual",
            TriggerSpec::Schedule { .. } => "schedule",
            TriggerSpec::Interval { .. } => "interval",
            TriggerSpec::Startup { .. } => "startup",
            TriggerSpec::Event { .. } => "event",
            TriggerSpec::FileWatch { .. } => "file_watch",
            TriggerSpec::Webhook { .. } => "webhook",
        }
    }
}

fn invalid(node: &Node, reason: String) -> SchedulingError {
    SchedulingError::InvalidSpec {
        node_id: node.id.clone(),
        reason,
    }
}

fn required_str<'a>(config: &'a Map<String, Value>, key: &str) -> Result<&'a str, String> {
    config
        .get(key)
        .and_then(Value::as_str)
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| format!("'{}' is required", key))
}

fn required_u64(config: &Map<String, Value>, key: &str) -> Result<u64, String> {
    config
        .get(key)
        .and_then(Value::as_u64)
        .ok_or_else(|| format!("'{}' must be a non-negative integer", key))
}

/// Prepend a seconds field to standard 5-field expressions
pub fn normalize_cron(expr: &str) -> String {
    let expr = expr.trim();
    if expr.split_whitespace().count() == 5 {
        format!("0 {}", expr)
    } else {
        expr.to_string()
    }
}

/// `"/hooks/deploy/"` -> `"hooks/deploy"`
pub fn normalize_webhook_path(path: &str) -> String {
    path.trim().trim_matches('/').to_string()
}
