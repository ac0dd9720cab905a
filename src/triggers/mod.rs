/// Trigger Manager
///
/// Turns enabled flows' trigger nodes into live timers, subscriptions, watchers
/// and webhook routes, and feeds their fires to the execution engine through a
/// bounded, per-flow-limited dispatcher.

// Trigger node config parsing
pub mod spec;

// Active trigger supervision and shutdown
pub mod manager;

// Bounded fire channel and per-flow policy
pub mod dispatch;

// In-process event bus
pub mod events;

// Webhook route table
pub mod webhooks;

pub use dispatch::{Dispatcher, FirePolicy, FireRequest, FireSink};
pub use events::{EventBus, FlowEvent};
pub use manager::{RegistrationReport, ReloadReport, TriggerConfig, TriggerManager};
pub use spec::TriggerSpec;
pub use webhooks::{WebhookRoutes, WebhookTarget};
