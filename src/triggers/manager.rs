/// Trigger manager service
///
/// Keeps the set of active triggers consistent with the set of enabled flows. Every
/// trigger source only submits fires into the dispatcher's bounded channel and
/// returns; executions run on the dispatcher's tracked task set. Cron triggers run
/// on tokio-cron-scheduler, the rest are tokio tasks, notify watchers, or webhook
/// routes.

use crate::{
    error::{Result, SchedulingError},
    flow::{storage::FlowStore, types::Flow},
    runtime::engine::ExecutionEngine,
    triggers::{
        dispatch::{Dispatcher, FirePolicy, FireRequest, FireSink},
        events::EventBus,
        spec::TriggerSpec,
        webhooks::{WebhookRoutes, WebhookTarget},
    },
};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::{
    collections::{HashMap, HashSet},
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    sync::{broadcast, Mutex, RwLock},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use uuid::Uuid;

/// Trigger manager tuning
#[derive(Debug, Clone, Copy)]
pub struct TriggerConfig {
    /// Executions allowed in flight per flow
    pub per_flow_concurrency: usize,
    /// Fires allowed to wait per flow while it is busy
    pub queue_depth: usize,
    /// Capacity of the fire channel shared by all triggers
    pub dispatch_capacity: usize,
    /// How long shutdown waits for in-flight executions before cancelling them
    pub shutdown_grace: Duration,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            per_flow_concurrency: 1,
            queue_depth: 1,
            dispatch_capacity: 64,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// Whatever keeps one trigger alive
enum TriggerHandle {
    Cron { job_id: Uuid },
    Task { cancel: CancellationToken, task: JoinHandle<()> },
    Watch { _watcher: notify::RecommendedWatcher },
    Webhook { path: String },
    /// Manual triggers own nothing
    Passive,
}

struct ActiveTrigger {
    node_id: String,
    kind: &'static str,
    handle: TriggerHandle,
}

struct ActiveFlow {
    signature: String,
    triggers: Vec<ActiveTrigger>,
}

/// Outcome of registering one flow
#[derive(Debug, Clone, Default)]
pub struct RegistrationReport {
    pub flow_id: String,
    /// Trigger node ids now active
    pub registered: Vec<String>,
    /// Node-scoped failures; the other triggers are unaffected
    pub errors: Vec<SchedulingError>,
}

impl RegistrationReport {
    pub fn error_messages(&self) -> Vec<String> {
        self.errors.iter().map(ToString::to_string).collect()
    }
}

/// Outcome of a reload pass
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReloadReport {
    pub registered: Vec<String>,
    pub unregistered: Vec<String>,
    pub unchanged: usize,
    pub errors: Vec<String>,
}

/// Supervises all active triggers across enabled flows
pub struct TriggerManager {
    store: Arc<dyn FlowStore>,
    events: EventBus,
    webhooks: Arc<WebhookRoutes>,
    scheduler: RwLock<JobScheduler>,
    active: Mutex<HashMap<String, ActiveFlow>>,
    sink: FireSink,
    dispatcher: Dispatcher,
    tracker: TaskTracker,
    triggers_cancel: CancellationToken,
    executions_cancel: CancellationToken,
    dispatcher_stop: CancellationToken,
    shutting_down: AtomicBool,
    config: TriggerConfig,
}

impl TriggerManager {
    /// Start the cron scheduler and the fire dispatcher
    pub async fn new(
        engine: ExecutionEngine,
        events: EventBus,
        webhooks: Arc<WebhookRoutes>,
        config: TriggerConfig,
    ) -> Result<Self, SchedulingError> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| SchedulingError::Scheduler(e.to_string()))?;
        scheduler
            .start()
            .await
            .map_err(|e| SchedulingError::Scheduler(e.to_string()))?;

        let tracker = TaskTracker::new();
        let executions_cancel = CancellationToken::new();
        let dispatcher_stop = CancellationToken::new();
        let policy = FirePolicy {
            per_flow: config.per_flow_concurrency,
            queue_depth: config.queue_depth,
        };
        let store = Arc::clone(engine.store());
        let dispatcher = Dispatcher::new(engine, policy, tracker.clone(), executions_cancel.clone());
        let (sink, rx) = Dispatcher::channel(config.dispatch_capacity);
        tracker.spawn(dispatcher.clone().run(rx, dispatcher_stop.clone()));

        tracing::info!(
            "⏰ Trigger manager started (per-flow cap {}, queue depth {})",
            policy.per_flow.max(1),
            policy.queue_depth
        );

        Ok(Self {
            store,
            events,
            webhooks,
            scheduler: RwLock::new(scheduler),
            active: Mutex::new(HashMap::new()),
            sink,
            dispatcher,
            tracker,
            triggers_cancel: CancellationToken::new(),
            executions_cancel,
            dispatcher_stop,
            shutting_down: AtomicBool::new(false),
            config,
        })
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Replace the flow's active triggers with ones built from its current trigger nodes
    ///
    /// A disabled flow ends up with no active triggers.
    pub async fn register_flow(&self, flow: &Flow) -> Result<RegistrationReport, SchedulingError> {
        if self.is_shutting_down() {
            return Err(SchedulingError::ShuttingDown);
        }
        let mut active = self.active.lock().await;
        // shutdown may have drained the table while we waited
        if self.is_shutting_down() {
            return Err(SchedulingError::ShuttingDown);
        }
        Ok(self.register_locked(&mut active, flow).await)
    }

    async fn register_locked(&self, active: &mut HashMap<String, ActiveFlow>, flow: &Flow) -> RegistrationReport {
        if let Some(previous) = active.remove(&flow.id) {
            self.deactivate(&flow.id, previous).await;
        }

        let mut report = RegistrationReport {
            flow_id: flow.id.clone(),
            ..Default::default()
        };
        if !flow.enabled {
            tracing::debug!("⏸️ Flow {} is disabled, no triggers registered", flow.id);
            return report;
        }

        let mut triggers = Vec::new();
        for node in flow.trigger_nodes() {
            let spec = match TriggerSpec::parse(node) {
                Ok(spec) => spec,
                Err(e) => {
                    tracing::warn!("⚠️ Skipping trigger node in flow {}: {}", flow.id, e);
                    report.errors.push(e);
                    continue;
                }
            };
            let kind = spec.kind();
            match self.activate(&flow.id, &node.id, spec).await {
                Ok(handle) => {
                    report.registered.push(node.id.clone());
                    triggers.push(ActiveTrigger {
                        node_id: node.id.clone(),
                        kind,
                        handle,
                    });
                }
                Err(e) => {
                    tracing::warn!("⚠️ Failed to start trigger in flow {}: {}", flow.id, e);
                    report.errors.push(e);
                }
            }
        }

        tracing::info!(
            "🔥 Registered {} trigger(s) for flow '{}' ({} skipped)",
            report.registered.len(),
            flow.name,
            report.errors.len()
        );
        active.insert(
            flow.id.clone(),
            ActiveFlow {
                signature: trigger_signature(flow),
                triggers,
            },
        );
        report
    }

    async fn activate(&self, flow_id: &str, node_id: &str, spec: TriggerSpec) -> Result<TriggerHandle, SchedulingError> {
        let backend = |reason: String| SchedulingError::Backend {
            node_id: node_id.to_string(),
            reason,
        };

        match spec {
            TriggerSpec::Manual => Ok(TriggerHandle::Passive),

            TriggerSpec::Schedule { cron } => {
                let sink = self.sink.clone();
                let job_flow = flow_id.to_string();
                let job_node = node_id.to_string();
                let job = Job::new_async(cron.as_str(), move |_uuid, _l| {
                    let sink = sink.clone();
                    let flow_id = job_flow.clone();
                    let node_id = job_node.clone();
                    Box::pin(async move {
                        tracing::debug!("🔔 Cron trigger {} fired for flow {}", node_id, flow_id);
                        sink.fire(FireRequest::new(flow_id, node_id, fire_payload("schedule", json!({}))));
                    })
                })
                .map_err(|e| backend(e.to_string()))?;

                let scheduler = self.scheduler.read().await;
                let job_id = scheduler.add(job).await.map_err(|e| backend(e.to_string()))?;
                tracing::debug!("⏰ Scheduled cron job {} ({}) for {}:{}", job_id, cron, flow_id, node_id);
                Ok(TriggerHandle::Cron { job_id })
            }

            TriggerSpec::Interval { every } => {
                let request = self.request_template(flow_id, node_id);
                let (cancel, task) = self.spawn_source(move |sink, cancel| async move {
                    let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                    loop {
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = ticker.tick() => {
                                sink.fire(request.with(fire_payload(
                                    "interval",
                                    json!({"everyMs": every.as_millis() as u64}),
                                )));
                            }
                        }
                    }
                });
                Ok(TriggerHandle::Task { cancel, task })
            }

            TriggerSpec::Startup { delay } => {
                let request = self.request_template(flow_id, node_id);
                let (cancel, task) = self.spawn_source(move |sink, cancel| async move {
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = tokio::time::sleep(delay) => {
                            sink.fire(request.with(fire_payload("startup", json!({}))));
                        }
                    }
                });
                Ok(TriggerHandle::Task { cancel, task })
            }

            TriggerSpec::Event { name } => {
                let request = self.request_template(flow_id, node_id);
                // subscribe before returning so events published right after registration are seen
                let mut rx = self.events.subscribe();
                let (cancel, task) = self.spawn_source(move |sink, cancel| async move {
                    loop {
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            received = rx.recv() => match received {
                                Ok(event) if event.name == name => {
                                    sink.fire(request.with(fire_payload(
                                        "event",
                                        json!({"event": event.name, "payload": event.payload}),
                                    )));
                                }
                                Ok(_) => {}
                                Err(broadcast::error::RecvError::Lagged(missed)) => {
                                    tracing::warn!(
                                        "⚠️ Event trigger {} lagged, {} event(s) missed",
                                        request.node_id,
                                        missed
                                    );
                                }
                                Err(broadcast::error::RecvError::Closed) => break,
                            },
                        }
                    }
                });
                Ok(TriggerHandle::Task { cancel, task })
            }

            TriggerSpec::FileWatch { path, recursive } => {
                let watcher = self
                    .watch_path(flow_id, node_id, &path, recursive)
                    .map_err(|e| backend(e.to_string()))?;
                Ok(TriggerHandle::Watch { _watcher: watcher })
            }

            TriggerSpec::Webhook { path, method } => {
                self.webhooks.insert(
                    &path,
                    WebhookTarget {
                        flow_id: flow_id.to_string(),
                        node_id: node_id.to_string(),
                        method,
                    },
                );
                Ok(TriggerHandle::Webhook { path })
            }
        }
    }

    fn request_template(&self, flow_id: &str, node_id: &str) -> RequestTemplate {
        RequestTemplate {
            flow_id: flow_id.to_string(),
            node_id: node_id.to_string(),
        }
    }

    /// Spawn a trigger task with its own cancellation token
    fn spawn_source<F, Fut>(&self, source: F) -> (CancellationToken, JoinHandle<()>)
    where
        F: FnOnce(FireSink, CancellationToken) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let cancel = self.triggers_cancel.child_token();
        let task = tokio::spawn(source(self.sink.clone(), cancel.clone()));
        (cancel, task)
    }

    fn watch_path(
        &self,
        flow_id: &str,
        node_id: &str,
        path: &Path,
        recursive: bool,
    ) -> notify::Result<notify::RecommendedWatcher> {
        use notify::{Event, EventKind, RecursiveMode, Watcher};

        let sink = self.sink.clone();
        let request = self.request_template(flow_id, node_id);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if matches!(
                    event.kind,
                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                ) {
                    let paths: Vec<String> = event.paths.iter().map(|p| p.display().to_string()).collect();
                    sink.fire(request.with(fire_payload(
                        "file_watch",
                        json!({"kind": format!("{:?}", event.kind), "paths": paths}),
                    )));
                }
            }
            Err(e) => tracing::warn!("⚠️ File watch error for {}: {}", request.node_id, e),
        })?;

        let mode = if recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher.watch(path, mode)?;
        tracing::debug!("👀 Watching {} for {}:{}", path.display(), flow_id, node_id);
        Ok(watcher)
    }

    async fn deactivate(&self, flow_id: &str, flow: ActiveFlow) {
        for trigger in flow.triggers {
            match trigger.handle {
                TriggerHandle::Cron { job_id } => {
                    let scheduler = self.scheduler.read().await;
                    if let Err(e) = scheduler.remove(&job_id).await {
                        tracing::warn!("⚠️ Failed to remove cron job for {}:{}: {}", flow_id, trigger.node_id, e);
                    }
                }
                TriggerHandle::Task { cancel, task } => {
                    cancel.cancel();
                    drop(task);
                }
                TriggerHandle::Watch { .. } => {}
                TriggerHandle::Webhook { path } => self.webhooks.remove(&path, flow_id, &trigger.node_id),
                TriggerHandle::Passive => {}
            }
            tracing::debug!("🛑 Stopped {} trigger {}:{}", trigger.kind, flow_id, trigger.node_id);
        }
    }

    /// Drop every active trigger of `flow_id`; returns whether any were registered
    pub async fn unregister_flow(&self, flow_id: &str) -> bool {
        let removed = self.active.lock().await.remove(flow_id);
        match removed {
            Some(flow) => {
                self.deactivate(flow_id, flow).await;
                tracing::info!("🗑️ Unregistered triggers for flow {}", flow_id);
                true
            }
            None => false,
        }
    }

    /// Reconcile active triggers with the enabled flows in the store
    ///
    /// Flows whose trigger nodes are unchanged keep their running triggers.
    pub async fn reload(&self) -> Result<ReloadReport> {
        if self.is_shutting_down() {
            return Err(SchedulingError::ShuttingDown.into());
        }
        let summaries = self.store.list_flows().await?;

        let mut active = self.active.lock().await;
        if self.is_shutting_down() {
            return Err(SchedulingError::ShuttingDown.into());
        }

        let mut report = ReloadReport::default();
        let mut keep = HashSet::new();
        for summary in summaries.iter().filter(|s| s.enabled) {
            keep.insert(summary.id.clone());
            let flow = match self.store.load_flow(&summary.id).await {
                Ok(flow) => flow,
                Err(e) => {
                    tracing::warn!("⚠️ Reload could not load flow {}: {}", summary.id, e);
                    report.errors.push(format!("{}: {}", summary.id, e));
                    continue;
                }
            };
            if !flow.enabled {
                keep.remove(&flow.id);
                continue;
            }
            let signature = trigger_signature(&flow);
            if active.get(&flow.id).is_some_and(|a| a.signature == signature) {
                report.unchanged += 1;
                continue;
            }
            let registration = self.register_locked(&mut active, &flow).await;
            report.errors.extend(registration.error_messages());
            report.registered.push(flow.id);
        }

        let stale: Vec<String> = active.keys().filter(|id| !keep.contains(*id)).cloned().collect();
        for flow_id in stale {
            if let Some(flow) = active.remove(&flow_id) {
                self.deactivate(&flow_id, flow).await;
                report.unregistered.push(flow_id);
            }
        }

        tracing::info!(
            "🔄 Trigger reload: {} registered, {} unregistered, {} unchanged",
            report.registered.len(),
            report.unregistered.len(),
            report.unchanged
        );
        Ok(report)
    }

    /// Submit a fire for one trigger node, as if its source had fired
    pub fn fire(&self, flow_id: &str, node_id: &str, data: Value) -> bool {
        self.sink.fire(FireRequest::new(flow_id, node_id, data))
    }

    /// Fire every webhook trigger on `path` accepting `method`; returns how many fired
    pub fn fire_webhook(&self, path: &str, method: &str, body: Value, query: Value) -> usize {
        self.webhooks
            .lookup(path, method)
            .into_iter()
            .filter(|target| {
                self.fire(
                    &target.flow_id,
                    &target.node_id,
                    fire_payload(
                        "webhook",
                        json!({
                            "path": path,
                            "method": method.to_uppercase(),
                            "body": body,
                            "query": query,
                        }),
                    ),
                )
            })
            .count()
    }

    pub fn publish_event(&self, name: &str, payload: Value) -> usize {
        self.events.publish(name, payload)
    }

    pub fn webhooks(&self) -> &WebhookRoutes {
        &self.webhooks
    }

    /// Token for a manual run; cancelled when shutdown gives up waiting
    pub fn execution_token(&self) -> CancellationToken {
        self.executions_cancel.child_token()
    }

    /// Task set shutdown waits on
    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Flows with registered triggers, sorted
    pub async fn active_flows(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.active.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// `(node id, kind)` of each active trigger of `flow_id`
    pub async fn active_triggers(&self, flow_id: &str) -> Vec<(String, &'static str)> {
        self.active
            .lock()
            .await
            .get(flow_id)
            .map(|flow| flow.triggers.iter().map(|t| (t.node_id.clone(), t.kind)).collect())
            .unwrap_or_default()
    }

    /// Stop all triggers, then drain in-flight executions within the grace period
    ///
    /// Returns `false` when shutdown had already run.
    pub async fn shutdown(&self) -> bool {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            tracing::debug!("⏹️ Trigger manager already shut down");
            return false;
        }
        tracing::info!("⏹️ Shutting down trigger manager");

        self.sink.close();
        let drained = std::mem::take(&mut *self.active.lock().await);
        for (flow_id, flow) in drained {
            self.deactivate(&flow_id, flow).await;
        }
        self.triggers_cancel.cancel();
        {
            let mut scheduler = self.scheduler.write().await;
            if let Err(e) = scheduler.shutdown().await {
                tracing::warn!("⚠️ Cron scheduler shutdown failed: {}", e);
            }
        }

        self.dispatcher_stop.cancel();
        let dropped = self.dispatcher.drain();
        if dropped > 0 {
            tracing::warn!("⚠️ Dropped {} queued fire(s) at shutdown", dropped);
        }

        self.tracker.close();
        let grace = self.config.shutdown_grace;
        if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
            tracing::warn!(
                "⚠️ {} execution(s) still running after {:?}, cancelling",
                self.tracker.len(),
                grace
            );
            self.executions_cancel.cancel();
            if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
                tracing::error!("❌ {} execution(s) ignored cancellation", self.tracker.len());
            }
        }
        self.executions_cancel.cancel();

        tracing::info!("✅ Trigger manager stopped");
        true
    }
}

impl std::fmt::Debug for TriggerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerManager")
            .field("config", &self.config)
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}

/// Identity of a trigger source, stamped into each fire
#[derive(Debug, Clone)]
struct RequestTemplate {
    flow_id: String,
    node_id: String,
}

impl RequestTemplate {
    fn with(&self, data: Value) -> FireRequest {
        FireRequest::new(self.flow_id.clone(), self.node_id.clone(), data)
    }
}

/// `{trigger, firedAt}` plus the source-specific fields
fn fire_payload(kind: &str, extra: Value) -> Value {
    let mut payload = json!({
        "trigger": kind,
        "firedAt": Utc::now().to_rfc3339(),
    });
    if let (Some(target), Value::Object(fields)) = (payload.as_object_mut(), extra) {
        target.extend(fields);
    }
    payload
}

/// Stable fingerprint of a flow's trigger nodes
fn trigger_signature(flow: &Flow) -> String {
    let triggers: Vec<Value> = flow
        .trigger_nodes()
        .map(|node| json!({"id": node.id, "type": node.node_type, "config": node.config}))
        .collect();
    Value::Array(triggers).to_string()
}
