/// Runtime Execution Engine
///
/// This module provides the petgraph-based DAG execution engine for flows.
/// It handles:
/// - Validating flows and planning reachable nodes in topological order
/// - Branch-parallel node execution on a shared worker pool
/// - Retries, timeouts, skip propagation and cooperative cancellation
/// - The node executor registry and the built-in node types

// Core execution engine
pub mod engine;

// Graph validation and execution planning
pub mod graph;

// Node executor capability trait and per-node policy
pub mod executor;

// Node type -> executor dispatch table
pub mod registry;

// Built-in node executors
pub mod nodes;

// OS action and spreadsheet collaborators
pub mod capabilities;

// Process-wide worker budget
pub mod pool;

// Sandboxed Lua for script nodes and expression edges
pub mod script;

// `{{path}}` config interpolation
pub mod template;

// Re-export main types
pub use capabilities::{ActionDispatcher, Capabilities, JsonWorkbookStore, SpreadsheetStore, SystemActions};
pub use engine::{EngineConfig, ExecutionEngine, TriggerPayload};
pub use executor::{NodeContext, NodeExecutor, NodePolicy};
pub use graph::ExecutionPlan;
pub use pool::WorkerPool;
pub use registry::NodeRegistry;
