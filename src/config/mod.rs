/// Configuration management for the flowdeck server
///
/// Handles server address, data directory, worker budget and trigger dispatch
/// parameters. Every value can be overridden through a `FLOWDECK_*` environment
/// variable; unparsable values fall back to the default.

use crate::{runtime::engine::EngineConfig, triggers::TriggerConfig};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, str::FromStr, time::Duration};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Flow and execution storage
    pub storage: StorageConfig,
    /// Execution engine budget
    pub runtime: RuntimeConfig,
    /// Trigger fire policy
    pub triggers: TriggerSettings,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "127.0.0.1")
    pub host: String,
    /// Server port number
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root of `flows/`, `executions/`, `settings.json` and `workbooks/`
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Concurrent executions and concurrent node attempts, process-wide
    pub workers: usize,
    /// Retry backoff cap in milliseconds
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerSettings {
    /// In-flight executions per flow
    pub flow_concurrency: usize,
    /// Pending fires per flow
    pub flow_queue: usize,
    /// Fire channel capacity
    pub dispatch_capacity: usize,
    /// Shutdown drain period in milliseconds
    pub shutdown_grace_ms: u64,
}

impl Config {
    /// Build from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parsed = |key: &str, default: u64| parse_or(lookup(key), default);
        Self {
            server: ServerConfig {
                host: lookup("FLOWDECK_HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
                port: parse_or(lookup("FLOWDECK_PORT"), 3004),
            },
            storage: StorageConfig {
                data_dir: lookup("FLOWDECK_DATA_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(default_data_dir),
            },
            runtime: RuntimeConfig {
                workers: (parsed("FLOWDECK_WORKERS", 4) as usize).max(1),
                max_backoff_ms: parsed("FLOWDECK_MAX_BACKOFF_MS", 30_000),
            },
            triggers: TriggerSettings {
                flow_concurrency: (parsed("FLOWDECK_FLOW_CONCURRENCY", 1) as usize).max(1),
                flow_queue: parsed("FLOWDECK_FLOW_QUEUE", 1) as usize,
                dispatch_capacity: (parsed("FLOWDECK_DISPATCH_CAPACITY", 64) as usize).max(1),
                shutdown_grace_ms: parsed("FLOWDECK_SHUTDOWN_GRACE_MS", 5_000),
            },
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            worker_limit: self.runtime.workers,
            max_backoff: Duration::from_millis(self.runtime.max_backoff_ms),
        }
    }

    pub fn trigger_config(&self) -> TriggerConfig {
        TriggerConfig {
            per_flow_concurrency: self.triggers.flow_concurrency,
            queue_depth: self.triggers.flow_queue,
            dispatch_capacity: self.triggers.dispatch_capacity,
            shutdown_grace: Duration::from_millis(self.triggers.shutdown_grace_ms),
        }
    }

    pub fn workbook_dir(&self) -> PathBuf {
        self.storage.data_dir.join("workbooks")
    }
}

impl Default for Config {
    /// Default configuration with ENV_VAR overrides
    fn default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

/// `<OS config dir>/flowdeck`, or `./data` when the OS has none
fn default_data_dir() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("flowdeck"))
        .unwrap_or_else(|| PathBuf::from("data"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = config(&[]);
        assert_eq!(config.bind_addr(), "127.0.0.1:3004");
        assert_eq!(config.runtime.workers, 4);
        assert_eq!(config.trigger_config().per_flow_concurrency, 1);
        assert_eq!(config.trigger_config().shutdown_grace, Duration::from_secs(5));
        assert!(config.storage.data_dir.ends_with("flowdeck") || config.storage.data_dir == PathBuf::from("data"));
    }

    #[test]
    fn overrides_and_clamping() {
        let config = config(&[
            ("FLOWDECK_PORT", "8080"),
            ("FLOWDECK_DATA_DIR", "/tmp/fd"),
            ("FLOWDECK_WORKERS", "0"),
            ("FLOWDECK_FLOW_CONCURRENCY", "0"),
            ("FLOWDECK_FLOW_QUEUE", "0"),
            ("FLOWDECK_MAX_BACKOFF_MS", "not-a-number"),
        ]);
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.workbook_dir(), PathBuf::from("/tmp/fd/workbooks"));
        assert_eq!(config.runtime.workers, 1);
        assert_eq!(config.triggers.flow_concurrency, 1);
        assert_eq!(config.triggers.flow_queue, 0);
        assert_eq!(config.engine_config().max_backoff, Duration::from_secs(30));
    }
}
