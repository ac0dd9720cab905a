/// Fire dispatch
///
/// Trigger sources hand fires to a `FireSink`, which never blocks: it `try_send`s into
/// a bounded channel. The dispatcher drains that channel and applies the per-flow
/// policy: at most `per_flow` runs in flight per flow, then a bounded FIFO queue whose
/// oldest entry is dropped on overflow. Runs execute on a `TaskTracker` so shutdown can
/// wait for them.

use crate::runtime::engine::{ExecutionEngine, TriggerPayload};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};
use tokio::sync::mpsc;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

/// One trigger fire
#[derive(Debug, Clone, PartialEq)]
pub struct FireRequest {
    pub flow_id: String,
    pub node_id: String,
    pub data: Value,
    pub fired_at: DateTime<Utc>,
}

impl FireRequest {
    pub fn new(flow_id: impl Into<String>, node_id: impl Into<String>, data: Value) -> Self {
        Self {
            flow_id: flow_id.into(),
            node_id: node_id.into(),
            data,
            fired_at: Utc::now(),
        }
    }
}

/// Non-blocking submission handle held by every trigger source
#[derive(Debug, Clone)]
pub struct FireSink {
    tx: mpsc::Sender<FireRequest>,
    accepting: Arc<AtomicBool>,
}

impl FireSink {
    /// Submit a fire; returns whether it was accepted
    pub fn fire(&self, request: FireRequest) -> bool {
        if !self.accepting.load(Ordering::SeqCst) {
            tracing::debug!("⏹️ Ignoring fire for {}:{} during shutdown", request.flow_id, request.node_id);
            return false;
        }
        match self.tx.try_send(request) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(request)) => {
                tracing::warn!(
                    "⚠️ Dispatch queue full, dropping fire for {}:{}",
                    request.flow_id,
                    request.node_id
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub(crate) fn close(&self) {
        self.accepting.store(false, Ordering::SeqCst);
    }
}

/// Per-flow fire policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirePolicy {
    /// Executions allowed in flight per flow
    pub per_flow: usize,
    /// Fires allowed to wait per flow
    pub queue_depth: usize,
}

impl Default for FirePolicy {
    fn default() -> Self {
        Self {
            per_flow: 1,
            queue_depth: 1,
        }
    }
}

#[derive(Debug, Default)]
struct FlowSlot {
    running: usize,
    queue: VecDeque<FireRequest>,
}

/// Applies the fire policy and runs admitted fires
#[derive(Clone)]
pub struct Dispatcher {
    engine: ExecutionEngine,
    policy: FirePolicy,
    slots: Arc<Mutex<HashMap<String, FlowSlot>>>,
    tracker: TaskTracker,
    executions_cancel: CancellationToken,
    draining: Arc<AtomicBool>,
}

impl Dispatcher {
    pub fn new(
        engine: ExecutionEngine,
        policy: FirePolicy,
        tracker: TaskTracker,
        executions_cancel: CancellationToken,
    ) -> Self {
        Self {
            engine,
            policy: FirePolicy {
                per_flow: policy.per_flow.max(1),
                queue_depth: policy.queue_depth,
            },
            slots: Arc::new(Mutex::new(HashMap::new())),
            tracker,
            executions_cancel,
            draining: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Bounded channel plus its sink
    pub fn channel(capacity: usize) -> (FireSink, mpsc::Receiver<FireRequest>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let sink = FireSink {
            tx,
            accepting: Arc::new(AtomicBool::new(true)),
        };
        (sink, rx)
    }

    /// Drain fires until `stop` fires or every sink is dropped
    pub async fn run(self, mut rx: mpsc::Receiver<FireRequest>, stop: CancellationToken) {
        tracing::debug!("📬 Fire dispatcher started");
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                request = rx.recv() => match request {
                    Some(request) => self.admit(request),
                    None => break,
                },
            }
        }
        rx.close();
        tracing::debug!("📪 Fire dispatcher stopped");
    }

    fn slots(&self) -> std::sync::MutexGuard<'_, HashMap<String, FlowSlot>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start the fire now, queue it, or drop it
    pub fn admit(&self, request: FireRequest) {
        if self.draining.load(Ordering::SeqCst) {
            return;
        }

        let start = {
            let mut slots = self.slots();
            let slot = slots.entry(request.flow_id.clone()).or_default();
            if slot.running < self.policy.per_flow {
                slot.running += 1;
                Some(request)
            } else if self.policy.queue_depth == 0 {
                tracing::warn!(
                    "⚠️ Flow {} busy, dropping fire from '{}'",
                    request.flow_id,
                    request.node_id
                );
                None
            } else {
                if slot.queue.len() >= self.policy.queue_depth {
                    if let Some(dropped) = slot.queue.pop_front() {
                        tracing::warn!(
                            "⚠️ Flow {} queue full, dropping oldest fire from '{}' ({})",
                            dropped.flow_id,
                            dropped.node_id,
                            dropped.fired_at
                        );
                    }
                }
                tracing::debug!("⏳ Flow {} busy, queued fire from '{}'", request.flow_id, request.node_id);
                slot.queue.push_back(request);
                None
            }
        };

        if let Some(request) = start {
            self.spawn_run(request);
        }
    }

    fn spawn_run(&self, request: FireRequest) {
        let this = self.clone();
        self.tracker.spawn(async move {
            let flow_id = request.flow_id.clone();
            this.run_fire(request).await;
            this.finish(&flow_id);
        });
    }

    /// Release the flow's slot and start its next queued fire
    fn finish(&self, flow_id: &str) {
        let next = {
            let mut slots = self.slots();
            let Some(slot) = slots.get_mut(flow_id) else {
                return;
            };
            slot.running = slot.running.saturating_sub(1);
            let next = if self.draining.load(Ordering::SeqCst) {
                None
            } else {
                slot.queue.pop_front()
            };
            if next.is_some() {
                slot.running += 1;
            } else if slot.running == 0 && slot.queue.is_empty() {
                slots.remove(flow_id);
            }
            next
        };

        if let Some(request) = next {
            self.spawn_run(request);
        }
    }

    async fn run_fire(&self, request: FireRequest) {
        let flow = match self.engine.store().load_flow(&request.flow_id).await {
            Ok(flow) => flow,
            Err(e) if e.is_not_found() => {
                tracing::debug!("⏭️ Skipping fire for deleted flow {}", request.flow_id);
                return;
            }
            Err(e) => {
                tracing::error!("❌ Failed to load flow {} for fire: {}", request.flow_id, e);
                return;
            }
        };
        if !flow.enabled {
            tracing::debug!("⏭️ Skipping fire for disabled flow {}", request.flow_id);
            return;
        }

        tracing::info!("🔔 Trigger '{}' fired flow '{}'", request.node_id, flow.name);
        let payload = TriggerPayload::from_trigger(request.node_id.clone(), request.data);
        match self
            .engine
            .execute(&flow, payload, self.executions_cancel.child_token())
            .await
        {
            Ok(execution) => tracing::debug!(
                "📋 Fire from '{}' finished as {:?} ({})",
                request.node_id,
                execution.status,
                execution.id
            ),
            Err(e) => tracing::error!("❌ Flow {} failed validation on fire: {}", request.flow_id, e),
        }
    }

    /// Stop starting queued fires; returns how many were discarded
    pub fn drain(&self) -> usize {
        self.draining.store(true, Ordering::SeqCst);
        let mut slots = self.slots();
        let dropped = slots.values_mut().map(|slot| std::mem::take(&mut slot.queue).len()).sum();
        slots.retain(|_, slot| slot.running > 0);
        dropped
    }

    /// Executions currently running for `flow_id`
    pub fn running(&self, flow_id: &str) -> usize {
        self.slots().get(flow_id).map(|slot| slot.running).unwrap_or(0)
    }

    /// Fires waiting for `flow_id`
    pub fn queued(&self, flow_id: &str) -> usize {
        self.slots().get(flow_id).map(|slot| slot.queue.len()).unwrap_or(0)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("policy", &self.policy)
            .field("draining", &self.draining.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn full_channel_drops_without_blocking() {
        let (sink, mut rx) = Dispatcher::channel(1);
        assert!(sink.fire(FireRequest::new("f", "t", json!({}))));
        assert!(!sink.fire(FireRequest::new("f", "t", json!({}))));
        assert!(rx.recv().await.is_some());

        sink.close();
        assert!(!sink.fire(FireRequest::new("f", "t", json!({}))));
    }
}
