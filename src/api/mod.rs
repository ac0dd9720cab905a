/// HTTP API Layer
///
/// This module provides the REST API for the desktop UI and external callers.
/// It handles:
/// - Flow CRUD, import/export, enable/disable and run-now
/// - Execution history and settings
/// - Trigger reload, in-process events and webhook triggers

use crate::{
    error::{Error, SchedulingError, StoreError},
    service::FlowService,
};
use axum::{http::StatusCode, Router};

// Flow management endpoints
pub mod flows;

// Execution history and settings endpoints
pub mod executions;

// Webhook and event trigger endpoints
pub mod webhooks;

/// Shared state for every handler
#[derive(Clone, Debug)]
pub struct AppState {
    pub service: FlowService,
}

/// All API routes, ready for `with_state`
pub fn create_api_routes() -> Router<AppState> {
    Router::new()
        .merge(flows::create_flow_routes())
        .merge(executions::create_execution_routes())
        .merge(webhooks::create_webhook_routes())
}

/// Map a service error onto an HTTP status, logging it
pub(crate) fn error_status(context: &str, err: &Error) -> StatusCode {
    let status = match err {
        Error::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        Error::NotFound { .. } => StatusCode::NOT_FOUND,
        Error::Scheduling(SchedulingError::ShuttingDown) => StatusCode::SERVICE_UNAVAILABLE,
        Error::Scheduling(_) => StatusCode::BAD_REQUEST,
        Error::Persistence(StoreError::Invalid { .. } | StoreError::MissingId { .. }) => StatusCode::BAD_REQUEST,
        Error::Persistence(_) | Error::Execution { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::error!("❌ {}: {}", context, err);
    } else {
        tracing::warn!("⚠️ {}: {}", context, err);
    }
    status
}

/// Parse an optional JSON body; an empty body is `null`
pub(crate) fn parse_body(body: &str) -> Result<serde_json::Value, StatusCode> {
    if body.trim().is_empty() {
        return Ok(serde_json::Value::Null);
    }
    serde_json::from_str(body).map_err(|e| {
        tracing::warn!("❌ Invalid JSON body: {}", e);
        StatusCode::BAD_REQUEST
    })
}
