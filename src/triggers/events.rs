/// In-process event bus for `trigger.event` nodes
///
/// Events are published by the HTTP API (`POST /api/events/{name}`) or by embedders.
/// Subscribers that fall behind lose the oldest events and log the gap.

use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq)]
pub struct FlowEvent {
    pub name: String,
    pub payload: Value,
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Arc<FlowEvent>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish to every current subscriber; returns how many will see it
    pub fn publish(&self, name: impl Into<String>, payload: Value) -> usize {
        let name = name.into();
        let event = Arc::new(FlowEvent {
            name: name.clone(),
            payload,
        });
        match self.sender.send(event) {
            Ok(receivers) => {
                tracing::debug!("📣 Event '{}' published to {} subscribers", name, receivers);
                receivers
            }
            Err(_) => {
                tracing::debug!("📣 Event '{}' published with no subscribers", name);
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<FlowEvent>> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
