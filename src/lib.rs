/// flowdeck: desktop automation core
///
/// This library provides trigger-driven flow execution: a petgraph-based DAG
/// engine with retries and cooperative cancellation, a registry of node
/// executors, a trigger manager for schedules, intervals, events, file watches
/// and webhooks, and a pluggable persistence port.

// Core configuration and setup
pub mod config;

// Error taxonomy shared by every layer
pub mod error;

// Flow data model and the persistence port
pub mod flow;

// Runtime execution engine - petgraph DAG execution and node orchestration
pub mod runtime;

// Trigger manager - timers, subscriptions and fire dispatch
pub mod triggers;

// Application service composing store, engine and triggers
pub mod service;

// HTTP API layer - REST endpoints for flow management and webhook triggers
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use error::{Error, Result};
pub use flow::{Edge, EdgeCondition, Execution, ExecutionStatus, Flow, FlowStore, Node, NodeStatus};
pub use runtime::{ExecutionEngine, NodeExecutor, NodeRegistry, TriggerPayload};
pub use server::start_server;
pub use service::FlowService;
pub use triggers::TriggerManager;
