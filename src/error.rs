/// Error taxonomy for the flow core
///
/// Validation and scheduling errors are scoped to a flow, node or trigger and never
/// take the engine or the trigger manager down. Node failures are recorded inside the
/// execution record; only manual runs surface them to a caller.

use std::time::Duration;

/// A flow graph or node configuration that cannot be executed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// An edge points at a node id that does not exist in the flow
    #[error("dangling edge: {from} -> {to} references missing node '{missing}'")]
    DanglingEdge {
        from: String,
        to: String,
        missing: String,
    },

    /// The reachable part of the graph contains a cycle through `node_id`
    #[error("cycle detected at node '{node_id}'")]
    CycleDetected { node_id: String },

    /// No executor is registered for the node's type
    #[error("unsupported node type {node_type} (node '{node_id}')")]
    UnsupportedNodeType { node_id: String, node_type: String },

    /// Two nodes share the same id
    #[error("duplicate node id '{node_id}'")]
    DuplicateNodeId { node_id: String },

    /// The executor rejected the node's config
    #[error("invalid config for node '{node_id}': {reason}")]
    InvalidConfig { node_id: String, reason: String },

    /// A run was requested from a node that is not part of the flow
    #[error("entry node '{node_id}' not found")]
    UnknownEntry { node_id: String },

    /// Nothing to start from
    #[error("flow has no entry node")]
    NoEntryNode,
}

/// Registration failure for a single trigger node
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulingError {
    /// The trigger config could not be parsed
    #[error("invalid trigger spec on node '{node_id}': {reason}")]
    InvalidSpec { node_id: String, reason: String },

    /// The underlying timer or subscription could not be created
    #[error("failed to start trigger '{node_id}': {reason}")]
    Backend { node_id: String, reason: String },

    /// The cron scheduler itself could not be started or stopped
    #[error("scheduler unavailable: {0}")]
    Scheduler(String),

    /// The manager no longer accepts registrations
    #[error("trigger manager is shutting down")]
    ShuttingDown,
}

/// Persistence Port failures
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No record with the given id
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// The record is malformed or from an unsupported schema version
    #[error("invalid {kind}: {reason}")]
    Invalid { kind: &'static str, reason: String },

    /// Records keyed by id need a non-empty id
    #[error("{kind} id is required")]
    MissingId { kind: &'static str },

    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Failure reported by a node executor
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecutorError {
    /// The node's config is unusable; retrying cannot help
    #[error("invalid node config: {0}")]
    Config(String),

    /// The capability failed; eligible for retry
    #[error("{0}")]
    Failed(String),

    /// The attempt exceeded the node's declared timeout
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Two predecessors produced the same output key
    #[error("input conflict: key '{key}' produced by both '{first}' and '{second}'")]
    InputConflict {
        key: String,
        first: String,
        second: String,
    },
}

impl ExecutorError {
    pub fn failed(message: impl Into<String>) -> Self {
        ExecutorError::Failed(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        ExecutorError::Config(message.into())
    }

    /// Whether the engine may retry the node after this error
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExecutorError::Failed(_) | ExecutorError::Timeout(_))
    }
}

/// Umbrella error surfaced by the service layer
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// A manual run ended without producing an execution record
    #[error("execution of flow {flow_id} aborted: {reason}")]
    Execution { flow_id: String, reason: String },

    #[error(transparent)]
    Scheduling(#[from] SchedulingError),

    #[error("persistence error: {0}")]
    Persistence(StoreError),
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { kind, id } => Error::NotFound { kind, id },
            other => Error::Persistence(other),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(ExecutorError::failed("boom").is_retryable());
        assert!(ExecutorError::Timeout(Duration::from_millis(5)).is_retryable());
        assert!(!ExecutorError::config("missing url").is_retryable());
        assert!(!ExecutorError::InputConflict {
            key: "a".into(),
            first: "x".into(),
            second: "y".into(),
        }
        .is_retryable());
    }

    #[test]
    fn store_not_found_maps_to_not_found() {
        let err: Error = StoreError::NotFound {
            kind: "flow",
            id: "flow-1".into(),
        }
        .into();
        assert!(matches!(err, Error::NotFound { kind: "flow", .. }));

        let err: Error = StoreError::MissingId { kind: "execution" }.into();
        assert!(matches!(err, Error::Persistence(_)));
    }

    #[test]
    fn validation_messages_name_the_problem() {
        let err = ValidationError::UnsupportedNodeType {
            node_id: "n1".into(),
            node_type: "action.teleport".into(),
        };
        assert_eq!(
            err.to_string(),
            "unsupported node type action.teleport (node 'n1')"
        );
        let err = ValidationError::CycleDetected { node_id: "b".into() };
        assert!(err.to_string().contains("cycle detected"));
    }
}
