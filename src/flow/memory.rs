/// In-memory Persistence Port
///
/// Substitutes for the file store in tests and embedded use. Behaves like
/// `JsonFileStore` record for record, minus the disk.

use crate::error::StoreError;
use crate::flow::storage::{check_version, newest_first, stamp_for_save, FlowStore};
use crate::flow::types::{Execution, Flow, FlowSummary};
use async_trait::async_trait;
use serde_json::Value;
use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, Ordering},
};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct InMemoryStore {
    flows: RwLock<HashMap<String, Flow>>,
    executions: RwLock<HashMap<String, Execution>>,
    settings: RwLock<Option<Value>>,
    fail_execution_writes: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `save_execution` fail with an I/O error
    pub fn fail_execution_writes(&self, fail: bool) {
        self.fail_execution_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn execution_count(&self) -> usize {
        self.executions.read().await.len()
    }
}

#[async_trait]
impl FlowStore for InMemoryStore {
    async fn save_flow(&self, mut flow: Flow) -> Result<String, StoreError> {
        check_version(&flow)?;
        stamp_for_save(&mut flow);
        let id = flow.id.clone();
        self.flows.write().await.insert(id.clone(), flow);
        Ok(id)
    }

    async fn load_flow(&self, id: &str) -> Result<Flow, StoreError> {
        self.flows
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: "flow",
                id: id.to_string(),
            })
    }

    async fn list_flows(&self) -> Result<Vec<FlowSummary>, StoreError> {
        let mut summaries: Vec<FlowSummary> =
            self.flows.read().await.values().map(Flow::summary).collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    async fn delete_flow(&self, id: &str) -> Result<(), StoreError> {
        self.flows
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound {
                kind: "flow",
                id: id.to_string(),
            })
    }

    async fn save_settings(&self, settings: Value) -> Result<(), StoreError> {
        *self.settings.write().await = Some(settings);
        Ok(())
    }

    async fn load_settings(&self) -> Value {
        self.settings
            .read()
            .await
            .clone()
            .unwrap_or_else(|| Value::Object(Default::default()))
    }

    async fn save_execution(&self, execution: &Execution) -> Result<(), StoreError> {
        if execution.id.is_empty() {
            return Err(StoreError::MissingId { kind: "execution" });
        }
        if self.fail_execution_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "execution writes disabled",
            )));
        }
        self.executions
            .write()
            .await
            .insert(execution.id.clone(), execution.clone());
        Ok(())
    }

    async fn load_execution(&self, id: &str) -> Result<Execution, StoreError> {
        self.executions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: "execution",
                id: id.to_string(),
            })
    }

    async fn list_executions(&self, limit: i64) -> Result<Vec<Execution>, StoreError> {
        let executions = self.executions.read().await.values().cloned().collect();
        Ok(newest_first(executions, limit))
    }

    async fn delete_execution(&self, id: &str) -> Result<(), StoreError> {
        self.executions
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound {
                kind: "execution",
                id: id.to_string(),
            })
    }
}
