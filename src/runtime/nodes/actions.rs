/// Action nodes
///
/// `action.log`, `action.delay` and `action.set` are pure; the rest call out through
/// the action dispatcher or over HTTP.

use crate::error::ExecutorError;
use crate::runtime::{
    capabilities::{ActionDispatcher, Capabilities},
    executor::{NodeContext, NodeExecutor},
    nodes::{is_placeholder, one_of, optional_kind, require_string},
    registry::NodeRegistry,
    template::as_text,
};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::{collections::HashMap, sync::Arc, time::Duration};

pub fn register(registry: &mut NodeRegistry, capabilities: &Capabilities) {
    registry
        .register("action.log", LogAction)
        .register("action.delay", DelayAction)
        .register("action.set", SetAction)
        .register("action.notify", NotifyAction::new(capabilities.actions.clone()))
        .register("action.command", CommandAction::new(capabilities.actions.clone()))
        .register("action.open_url", OpenUrlAction::new(capabilities.actions.clone()))
        .register("action.http_request", HttpRequestAction::new());
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Writes a message to the application log
///
/// Config: `{ "message": "Hello {{name}}", "level": "info" }`. Without a message
/// the node input is logged.
#[derive(Debug, Clone, Copy)]
pub struct LogAction;

#[async_trait]
impl NodeExecutor for LogAction {
    fn validate(&self, config: &Map<String, Value>) -> Result<(), String> {
        one_of(config, "level", &LOG_LEVELS)
    }

    async fn run(&self, ctx: NodeContext) -> Result<Value, ExecutorError> {
        let message = match ctx.config.get("message") {
            Some(value) => as_text(value),
            None => ctx.input_value().to_string(),
        };
        let level = ctx.str_param("level").unwrap_or("info");

        match level {
            "trace" => tracing::trace!(flow_id = %ctx.flow_id, node = %ctx.node_id, "{}", message),
            "debug" => tracing::debug!(flow_id = %ctx.flow_id, node = %ctx.node_id, "{}", message),
            "warn" => tracing::warn!(flow_id = %ctx.flow_id, node = %ctx.node_id, "{}", message),
            "error" => tracing::error!(flow_id = %ctx.flow_id, node = %ctx.node_id, "{}", message),
            _ => tracing::info!(flow_id = %ctx.flow_id, node = %ctx.node_id, "📝 {}", message),
        }

        Ok(json!({ "message": message }))
    }
}

/// Waits; outputs an empty object
///
/// Config: `{ "ms": 1500 }`. A numeric string (such as a rendered placeholder) is
/// accepted too.
#[derive(Debug, Clone, Copy)]
pub struct DelayAction;

#[async_trait]
impl NodeExecutor for DelayAction {
    fn validate(&self, config: &Map<String, Value>) -> Result<(), String> {
        optional_kind(config, "ms", "a non-negative integer", Value::is_u64)
    }

    async fn run(&self, ctx: NodeContext) -> Result<Value, ExecutorError> {
        let ms = match ctx.config.get("ms") {
            None | Some(Value::Null) => 0,
            Some(value) => value
                .as_u64()
                .or_else(|| value.as_str().and_then(|text| text.trim().parse().ok()))
                .ok_or_else(|| ExecutorError::config("'ms' must be a non-negative integer"))?,
        };
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(json!({}))
    }
}

/// Outputs the configured values
///
/// Config: `{ "values": { "greeting": "Hi {{name}}" } }`. The input is not echoed, so
/// parallel branches can be joined without key collisions.
#[derive(Debug, Clone, Copy)]
pub struct SetAction;

#[async_trait]
impl NodeExecutor for SetAction {
    fn validate(&self, config: &Map<String, Value>) -> Result<(), String> {
        match config.get("values") {
            Some(Value::Object(_)) => Ok(()),
            Some(value) if is_placeholder(value) => Ok(()),
            _ => Err("'values' must be an object".to_string()),
        }
    }

    async fn run(&self, ctx: NodeContext) -> Result<Value, ExecutorError> {
        match ctx.config.get("values") {
            Some(Value::Object(values)) => Ok(Value::Object(values.clone())),
            _ => Err(ExecutorError::config("'values' must resolve to an object")),
        }
    }
}

/// Desktop notification
///
/// Config: `{ "title": "Backup", "message": "Done at {{time}}" }`
pub struct NotifyAction {
    actions: Arc<dyn ActionDispatcher>,
}

impl NotifyAction {
    pub fn new(actions: Arc<dyn ActionDispatcher>) -> Self {
        Self { actions }
    }
}

#[async_trait]
impl NodeExecutor for NotifyAction {
    fn validate(&self, config: &Map<String, Value>) -> Result<(), String> {
        require_string(config, "message")
    }

    async fn run(&self, ctx: NodeContext) -> Result<Value, ExecutorError> {
        let title = ctx.str_param("title").unwrap_or("Flowdeck");
        let message = ctx.require_str("message")?;
        self.actions.notify(title, message).await
    }
}

/// Runs a local program
///
/// Config: `{ "command": "git", "args": ["pull"], "workDir": "/repo" }`
pub struct CommandAction {
    actions: Arc<dyn ActionDispatcher>,
}

impl CommandAction {
    pub fn new(actions: Arc<dyn ActionDispatcher>) -> Self {
        Self { actions }
    }
}

#[async_trait]
impl NodeExecutor for CommandAction {
    fn validate(&self, config: &Map<String, Value>) -> Result<(), String> {
        require_string(config, "command")?;
        optional_kind(config, "args", "a list", Value::is_array)?;
        optional_kind(config, "workDir", "a string", Value::is_string)
    }

    async fn run(&self, ctx: NodeContext) -> Result<Value, ExecutorError> {
        let command = ctx.require_str("command")?;
        let args: Vec<String> = match ctx.config.get("args") {
            Some(Value::Array(items)) => items.iter().map(as_text).collect(),
            _ => Vec::new(),
        };
        let work_dir = ctx.str_param("workDir");
        self.actions.run_command(command, &args, work_dir).await
    }
}

/// Opens a URL in the default browser
///
/// Config: `{ "url": "https://example.com" }`
pub struct OpenUrlAction {
    actions: Arc<dyn ActionDispatcher>,
}

impl OpenUrlAction {
    pub fn new(actions: Arc<dyn ActionDispatcher>) -> Self {
        Self { actions }
    }
}

#[async_trait]
impl NodeExecutor for OpenUrlAction {
    fn validate(&self, config: &Map<String, Value>) -> Result<(), String> {
        require_string(config, "url")
    }

    async fn run(&self, ctx: NodeContext) -> Result<Value, ExecutorError> {
        let url = ctx.require_str("url")?;
        self.actions.open_url(url).await
    }
}

const HTTP_METHODS: [&str; 6] = ["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD"];

/// Outbound HTTP request
///
/// Config: `{ "url": "...", "method": "POST", "headers": {...}, "body": {...} }`.
/// Output: `{ "status": 200, "headers": {...}, "body": <json or text> }`. Any non-2xx
/// status is a retryable failure.
#[derive(Debug, Clone)]
pub struct HttpRequestAction {
    client: reqwest::Client,
}

impl HttpRequestAction {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpRequestAction {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeExecutor for HttpRequestAction {
    fn validate(&self, config: &Map<String, Value>) -> Result<(), String> {
        require_string(config, "url")?;
        optional_kind(config, "headers", "an object", Value::is_object)?;
        match config.get("method") {
            Some(method) if is_placeholder(method) => Ok(()),
            Some(Value::String(method)) if !HTTP_METHODS.contains(&method.to_uppercase().as_str()) => {
                Err(format!("unsupported HTTP method '{}'", method))
            }
            _ => Ok(()),
        }
    }

    async fn run(&self, ctx: NodeContext) -> Result<Value, ExecutorError> {
        let url = ctx.require_str("url")?;
        let method = ctx.str_param("method").unwrap_or("GET").to_uppercase();
        tracing::debug!("🌐 {} {}", method, url);

        let mut request = match method.as_str() {
            "GET" => self.client.get(url),
            "POST" => self.client.post(url),
            "PUT" => self.client.put(url),
            "PATCH" => self.client.patch(url),
            "DELETE" => self.client.delete(url),
            "HEAD" => self.client.head(url),
            other => return Err(ExecutorError::config(format!("unsupported HTTP method '{}'", other))),
        };

        if let Some(Value::Object(headers)) = ctx.config.get("headers") {
            for (name, value) in headers {
                request = request.header(name.as_str(), as_text(value));
            }
        }

        match ctx.config.get("body") {
            None | Some(Value::Null) => {}
            Some(Value::String(text)) => request = request.body(text.clone()),
            Some(body) => request = request.json(body),
        }

        let response = request
            .send()
            .await
            .map_err(|e| ExecutorError::failed(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.to_string(), s.to_string())))
            .collect();
        let text = response
            .text()
            .await
            .map_err(|e| ExecutorError::failed(format!("failed to read response body: {}", e)))?;
        let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));

        tracing::debug!("📡 Response status: {}", status);
        if !status.is_success() {
            return Err(ExecutorError::failed(format!("{} {} returned {}", method, url, status)));
        }

        Ok(json!({ "status": status.as_u16(), "headers": headers, "body": body }))
    }
}
