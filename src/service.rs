/// Flow service
///
/// Composes the store, the execution engine and the trigger manager into the
/// operations the HTTP API exposes. Every write that can change a flow's triggers
/// re-registers them, so the active trigger set follows the stored flows.

use crate::{
    error::{Error, Result},
    flow::{
        storage::FlowStore,
        types::{Execution, Flow, FlowSummary},
    },
    runtime::engine::{ExecutionEngine, TriggerPayload},
    triggers::{RegistrationReport, ReloadReport, TriggerManager},
};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Result of a save: the id plus what happened to the flow's triggers
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedFlow {
    pub id: String,
    pub enabled: bool,
    /// Trigger nodes now active
    pub triggers: Vec<String>,
    /// Trigger nodes that could not be registered
    pub trigger_errors: Vec<String>,
    /// Why the flow would not run, if it would not
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_error: Option<String>,
}

#[derive(Clone)]
pub struct FlowService {
    store: Arc<dyn FlowStore>,
    engine: ExecutionEngine,
    triggers: Arc<TriggerManager>,
}

impl FlowService {
    pub fn new(engine: ExecutionEngine, triggers: Arc<TriggerManager>) -> Self {
        Self {
            store: Arc::clone(engine.store()),
            engine,
            triggers,
        }
    }

    pub fn triggers(&self) -> &TriggerManager {
        &self.triggers
    }

    pub fn engine(&self) -> &ExecutionEngine {
        &self.engine
    }

    pub async fn list_flows(&self) -> Result<Vec<FlowSummary>> {
        Ok(self.store.list_flows().await?)
    }

    pub async fn get_flow(&self, id: &str) -> Result<Flow> {
        Ok(self.store.load_flow(id).await?)
    }

    /// Create or overwrite a flow and sync its triggers
    ///
    /// Flows that fail validation are still saved, so drafts can be kept; the
    /// reason is reported back.
    pub async fn save_flow(&self, flow: Flow) -> Result<SavedFlow> {
        let id = self.store.save_flow(flow).await?;
        let saved = self.store.load_flow(&id).await?;
        self.sync(saved).await
    }

    /// Replace an existing flow, keeping its id and creation time
    pub async fn update_flow(&self, id: &str, mut flow: Flow) -> Result<SavedFlow> {
        let existing = self.store.load_flow(id).await?;
        flow.id = existing.id;
        flow.created_at = existing.created_at;
        self.save_flow(flow).await
    }

    /// Unregister triggers first so no fire races the delete
    pub async fn delete_flow(&self, id: &str) -> Result<()> {
        self.triggers.unregister_flow(id).await;
        self.store.delete_flow(id).await?;
        tracing::info!("🗑️ Deleted flow {}", id);
        Ok(())
    }

    pub async fn import_flow(&self, blob: &str) -> Result<SavedFlow> {
        let id = self.store.import_flow(blob).await?;
        tracing::info!("📥 Imported flow as {}", id);
        let saved = self.store.load_flow(&id).await?;
        self.sync(saved).await
    }

    pub async fn export_flow(&self, id: &str) -> Result<String> {
        Ok(self.store.export_flow(id).await?)
    }

    pub async fn set_enabled(&self, id: &str, enabled: bool) -> Result<SavedFlow> {
        let mut flow = self.store.load_flow(id).await?;
        flow.enabled = enabled;
        self.save_flow(flow).await
    }

    async fn sync(&self, flow: Flow) -> Result<SavedFlow> {
        let validation_error = self.engine.validate(&flow, None).err().map(|e| e.to_string());
        if let Some(reason) = &validation_error {
            tracing::warn!("⚠️ Flow {} saved but will not run: {}", flow.id, reason);
        }
        let report: RegistrationReport = self.triggers.register_flow(&flow).await?;
        Ok(SavedFlow {
            id: flow.id,
            enabled: flow.enabled,
            trigger_errors: report.error_messages(),
            triggers: report.registered,
            validation_error,
        })
    }

    /// Run a flow now and return its terminal record
    ///
    /// The run is tracked by the trigger manager, so shutdown waits for it, and it
    /// finishes even if the caller goes away.
    pub async fn run_now(&self, id: &str, input: Value) -> Result<Execution> {
        if self.triggers.is_shutting_down() {
            return Err(crate::error::SchedulingError::ShuttingDown.into());
        }
        let flow = self.store.load_flow(id).await?;
        let engine = self.engine.clone();
        let cancel = self.triggers.execution_token();
        let flow_id = flow.id.clone();

        tracing::info!("▶️ Manual run of flow '{}'", flow.name);
        let handle = self
            .triggers
            .tracker()
            .spawn(async move { engine.execute(&flow, TriggerPayload::manual(input), cancel).await });

        match handle.await {
            Ok(result) => Ok(result?),
            Err(e) => Err(Error::Execution {
                flow_id,
                reason: e.to_string(),
            }),
        }
    }

    pub async fn list_executions(&self, limit: i64) -> Result<Vec<Execution>> {
        Ok(self.store.list_executions(limit).await?)
    }

    pub async fn get_execution(&self, id: &str) -> Result<Execution> {
        Ok(self.store.load_execution(id).await?)
    }

    pub async fn delete_execution(&self, id: &str) -> Result<()> {
        Ok(self.store.delete_execution(id).await?)
    }

    pub async fn settings(&self) -> Value {
        self.store.load_settings().await
    }

    pub async fn save_settings(&self, settings: Value) -> Result<()> {
        Ok(self.store.save_settings(settings).await?)
    }

    pub async fn reload_triggers(&self) -> Result<ReloadReport> {
        self.triggers.reload().await
    }

    pub fn publish_event(&self, name: &str, payload: Value) -> usize {
        self.triggers.publish_event(name, payload)
    }

    pub async fn shutdown(&self) -> bool {
        self.triggers.shutdown().await
    }
}

impl std::fmt::Debug for FlowService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowService")
            .field("engine", &self.engine)
            .field("triggers", &self.triggers)
            .finish()
    }
}
