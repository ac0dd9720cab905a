/// Node executor capability
///
/// An executor knows what one node type does. It never schedules, retries or walks
/// the graph: sequencing, retries and cancellation belong to the engine.

use crate::error::ExecutorError;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Everything an executor sees for a single attempt
#[derive(Debug, Clone)]
pub struct NodeContext {
    pub flow_id: String,
    pub execution_id: String,
    pub node_id: String,
    pub node_type: String,
    /// Node config with `{{path}}` placeholders resolved against `input`
    pub config: Map<String, Value>,
    /// Merged outputs of the direct predecessors (or the trigger payload for entry nodes)
    pub input: Map<String, Value>,
    /// 1-based attempt number
    pub attempt: u32,
    /// Cancelled when the execution is cancelled or this attempt times out
    pub cancel: CancellationToken,
}

impl NodeContext {
    pub fn str_param(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }

    /// Required string parameter; a missing value is a config error
    pub fn require_str(&self, key: &str) -> Result<&str, ExecutorError> {
        self.str_param(key)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| ExecutorError::config(format!("{} missing '{}' parameter", self.node_type, key)))
    }

    pub fn input_value(&self) -> Value {
        Value::Object(self.input.clone())
    }
}

/// Capability registered for a node type
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Check the node's config shape; called during flow validation
    fn validate(&self, _config: &Map<String, Value>) -> Result<(), String> {
        Ok(())
    }

    /// Run one attempt and return the node's output payload
    async fn run(&self, ctx: NodeContext) -> Result<Value, ExecutorError>;
}

/// Engine-level behavior a node declares in its config
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodePolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
    pub timeout: Option<Duration>,
}

impl Default for NodePolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::from_millis(100),
            timeout: None,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RetryConfig {
    max_attempts: Option<u32>,
    /// Base delay in milliseconds
    backoff: Option<u64>,
}

impl NodePolicy {
    /// Read `retry.maxAttempts`, `retry.backoff` and `timeoutMs` from a node config
    pub fn from_config(config: &Map<String, Value>) -> Result<Self, String> {
        let mut policy = NodePolicy::default();

        if let Some(retry) = config.get("retry") {
            let retry: RetryConfig = serde_json::from_value(retry.clone())
                .map_err(|e| format!("invalid retry settings: {}", e))?;
            if let Some(max_attempts) = retry.max_attempts {
                if max_attempts == 0 {
                    return Err("retry.maxAttempts must be at least 1".to_string());
                }
                policy.max_attempts = max_attempts;
            }
            if let Some(backoff) = retry.backoff {
                policy.backoff = Duration::from_millis(backoff);
            }
        }

        match config.get("timeoutMs") {
            None | Some(Value::Null) => {}
            Some(value) => {
                let millis = value
                    .as_u64()
                    .filter(|ms| *ms > 0)
                    .ok_or_else(|| "timeoutMs must be a positive integer".to_string())?;
                policy.timeout = Some(Duration::from_millis(millis));
            }
        }

        Ok(policy)
    }

    /// Delay before the attempt following failed attempt `attempt` (1-based)
    pub fn backoff_after(&self, attempt: u32, cap: Duration) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.backoff
            .checked_mul(1u32 << exponent)
            .unwrap_or(cap)
            .min(cap)
    }
}
