/// Flow Management Layer
///
/// This module holds the flow data model and the Persistence Port:
/// - Type definitions (Flow, Node, Edge, Execution records)
/// - The `FlowStore` contract consumed by the engine and trigger manager
/// - Flat-file and in-memory store implementations

// Core flow and execution record types
pub mod types;

// Persistence Port contract and the flat-file store
pub mod storage;

// In-memory store for tests and embedding
pub mod memory;

pub use memory::InMemoryStore;
pub use storage::{FlowStore, JsonFileStore};
pub use types::{
    Edge, EdgeCondition, Execution, ExecutionStatus, Flow, FlowSummary, Node, NodeAttempt,
    NodeResult, NodeStatus, Position, SkipReason,
};
