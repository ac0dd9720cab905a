/// Persistence Port and its flat-file implementation
///
/// The core never reaches for storage through global state: a `FlowStore` is handed
/// to the engine and the trigger manager at construction time. `JsonFileStore` keeps
/// one JSON document per record on disk; `InMemoryStore` (see `memory.rs`) backs tests.

use crate::error::StoreError;
use crate::flow::types::{new_flow_id, Execution, Flow, FlowSummary, FLOW_SCHEMA_VERSION};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use tokio::sync::RwLock;

/// Storage contract consumed by the core
#[async_trait]
pub trait FlowStore: Send + Sync {
    /// Assigns an id and creation time when absent, always refreshes the update time
    async fn save_flow(&self, flow: Flow) -> Result<String, StoreError>;

    async fn load_flow(&self, id: &str) -> Result<Flow, StoreError>;

    async fn list_flows(&self) -> Result<Vec<FlowSummary>, StoreError>;

    async fn delete_flow(&self, id: &str) -> Result<(), StoreError>;

    async fn save_settings(&self, settings: Value) -> Result<(), StoreError>;

    /// Defaults to an empty object; never fails
    async fn load_settings(&self) -> Value;

    /// Overwrites any record with the same id
    async fn save_execution(&self, execution: &Execution) -> Result<(), StoreError>;

    async fn load_execution(&self, id: &str) -> Result<Execution, StoreError>;

    /// Most recent first by start time; `limit <= 0` means unbounded
    async fn list_executions(&self, limit: i64) -> Result<Vec<Execution>, StoreError>;

    async fn delete_execution(&self, id: &str) -> Result<(), StoreError>;

    /// Always mints a fresh id and fresh timestamps
    async fn import_flow(&self, blob: &str) -> Result<String, StoreError> {
        let mut flow: Flow = serde_json::from_str(blob).map_err(|e| StoreError::Invalid {
            kind: "flow",
            reason: e.to_string(),
        })?;
        check_version(&flow)?;
        flow.id.clear();
        flow.created_at = None;
        flow.updated_at = None;
        self.save_flow(flow).await
    }

    /// Same document as `load_flow`, serialized for external transfer
    async fn export_flow(&self, id: &str) -> Result<String, StoreError> {
        let flow = self.load_flow(id).await?;
        Ok(serde_json::to_string_pretty(&flow)?)
    }
}

/// Fill in identity and timestamps ahead of a save
pub(crate) fn stamp_for_save(flow: &mut Flow) {
    let now = Utc::now();
    if flow.id.is_empty() {
        flow.id = new_flow_id();
        flow.created_at = Some(now);
    }
    if flow.created_at.is_none() {
        flow.created_at = Some(now);
    }
    flow.updated_at = Some(now);
}

pub(crate) fn check_version(flow: &Flow) -> Result<(), StoreError> {
    if flow.version > FLOW_SCHEMA_VERSION {
        return Err(StoreError::Invalid {
            kind: "flow",
            reason: format!(
                "schema version {} is newer than supported version {}",
                flow.version, FLOW_SCHEMA_VERSION
            ),
        });
    }
    Ok(())
}

/// Sort most-recent-first and apply the listing limit
pub(crate) fn newest_first(mut executions: Vec<Execution>, limit: i64) -> Vec<Execution> {
    executions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    if limit > 0 {
        executions.truncate(limit as usize);
    }
    executions
}

/// Flat-file store: `flows/<id>.json`, `executions/<id>.json`, `settings.json`
///
/// Reads of a record share its lock; writes to a record are exclusive. Distinct
/// records never contend.
#[derive(Debug)]
pub struct JsonFileStore {
    root: PathBuf,
    locks: Mutex<HashMap<PathBuf, Arc<RwLock<()>>>>,
}

impl JsonFileStore {
    /// Open (and create if needed) a store rooted at `root`
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        tokio::fs::create_dir_all(root.join("flows")).await?;
        tokio::fs::create_dir_all(root.join("executions")).await?;
        tracing::info!("📁 Flow store ready at {}", root.display());
        Ok(Self {
            root,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn lock_for(&self, path: &Path) -> Arc<RwLock<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    /// Drop the record's lock entry once no caller holds it
    fn release(&self, path: &Path, lock: Arc<RwLock<()>>) {
        drop(lock);
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if locks.get(path).is_some_and(|entry| Arc::strong_count(entry) == 1) {
            locks.remove(path);
        }
    }

    fn record_path(&self, dir: &str, kind: &'static str, id: &str) -> Result<PathBuf, StoreError> {
        if id.is_empty() {
            return Err(StoreError::MissingId { kind });
        }
        if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(StoreError::Invalid {
                kind,
                reason: format!("illegal characters in id '{}'", id),
            });
        }
        Ok(self.root.join(dir).join(format!("{}.json", id)))
    }

    async fn write_record(&self, path: &Path, value: &impl serde::Serialize) -> Result<(), StoreError> {
        let data = serde_json::to_vec_pretty(value)?;
        let lock = self.lock_for(path);
        let written = {
            let _guard = lock.write().await;
            let tmp = path.with_extension("json.tmp");
            match tokio::fs::write(&tmp, data).await {
                Ok(()) => tokio::fs::rename(&tmp, path).await,
                Err(e) => Err(e),
            }
        };
        self.release(path, lock);
        Ok(written?)
    }

    async fn read_record(&self, path: &Path, kind: &'static str, id: &str) -> Result<Vec<u8>, StoreError> {
        let lock = self.lock_for(path);
        let read = {
            let _guard = lock.read().await;
            tokio::fs::read(path).await
        };
        self.release(path, lock);
        match read {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound {
                kind,
                id: id.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_record(&self, path: &Path, kind: &'static str, id: &str) -> Result<(), StoreError> {
        let lock = self.lock_for(path);
        let removed = {
            let _guard = lock.write().await;
            tokio::fs::remove_file(path).await
        };
        self.release(path, lock);
        match removed {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound {
                kind,
                id: id.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Read every `.json` document in a directory, skipping unreadable ones
    async fn read_dir_records<T: serde::de::DeserializeOwned>(&self, dir: &str) -> Result<Vec<T>, StoreError> {
        let mut entries = tokio::fs::read_dir(self.root.join(dir)).await?;
        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let lock = self.lock_for(&path);
            let read = {
                let _guard = lock.read().await;
                tokio::fs::read(&path).await
            };
            self.release(&path, lock);
            let data = match read {
                Ok(data) => data,
                Err(e) => {
                    tracing::warn!("⚠️ Skipping unreadable record {}: {}", path.display(), e);
                    continue;
                }
            };
            match serde_json::from_slice(&data) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!("⚠️ Skipping malformed record {}: {}", path.display(), e),
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl FlowStore for JsonFileStore {
    async fn save_flow(&self, mut flow: Flow) -> Result<String, StoreError> {
        check_version(&flow)?;
        stamp_for_save(&mut flow);
        let path = self.record_path("flows", "flow", &flow.id)?;
        self.write_record(&path, &flow).await?;
        tracing::debug!("💾 Saved flow {} ({})", flow.id, flow.name);
        Ok(flow.id)
    }

    async fn load_flow(&self, id: &str) -> Result<Flow, StoreError> {
        let path = self.record_path("flows", "flow", id)?;
        let data = self.read_record(&path, "flow", id).await?;
        let flow: Flow = serde_json::from_slice(&data)?;
        check_version(&flow)?;
        Ok(flow)
    }

    async fn list_flows(&self) -> Result<Vec<FlowSummary>, StoreError> {
        let flows: Vec<Flow> = self.read_dir_records("flows").await?;
        let mut summaries: Vec<FlowSummary> = flows.iter().map(Flow::summary).collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    async fn delete_flow(&self, id: &str) -> Result<(), StoreError> {
        let path = self.record_path("flows", "flow", id)?;
        self.remove_record(&path, "flow", id).await
    }

    async fn save_settings(&self, settings: Value) -> Result<(), StoreError> {
        let path = self.root.join("settings.json");
        self.write_record(&path, &settings).await
    }

    async fn load_settings(&self) -> Value {
        let path = self.root.join("settings.json");
        match self.read_record(&path, "settings", "settings").await {
            Ok(data) => serde_json::from_slice(&data).unwrap_or_else(|e| {
                tracing::warn!("⚠️ Ignoring malformed settings file: {}", e);
                Value::Object(Default::default())
            }),
            Err(_) => Value::Object(Default::default()),
        }
    }

    async fn save_execution(&self, execution: &Execution) -> Result<(), StoreError> {
        let path = self.record_path("executions", "execution", &execution.id)?;
        self.write_record(&path, execution).await
    }

    async fn load_execution(&self, id: &str) -> Result<Execution, StoreError> {
        let path = self.record_path("executions", "execution", id)?;
        let data = self.read_record(&path, "execution", id).await?;
        Ok(serde_json::from_slice(&data)?)
    }

    async fn list_executions(&self, limit: i64) -> Result<Vec<Execution>, StoreError> {
        let executions = self.read_dir_records("executions").await?;
        Ok(newest_first(executions, limit))
    }

    async fn delete_execution(&self, id: &str) -> Result<(), StoreError> {
        let path = self.record_path("executions", "execution", id)?;
        self.remove_record(&path, "execution", id).await
    }
}
