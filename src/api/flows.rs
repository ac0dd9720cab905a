/// Flow management REST API endpoints
///
/// CRUD, import/export, enable/disable and run-now for flows. Every write goes
/// through `FlowService`, which keeps the flow's triggers registered.

use crate::{
    api::{error_status, parse_body, AppState},
    error::Error,
    flow::types::Flow,
    service::SavedFlow,
};
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};

/// Create flow management routes
pub fn create_flow_routes() -> Router<AppState> {
    Router::new()
        .route("/api/flows", get(list_flows).post(create_flow))
        .route("/api/flows/import", post(import_flow))
        .route("/api/flows/{id}", get(get_flow).put(update_flow).delete(delete_flow))
        .route("/api/flows/{id}/run", post(run_flow))
        .route("/api/flows/{id}/enable", post(enable_flow))
        .route("/api/flows/{id}/disable", post(disable_flow))
        .route("/api/flows/{id}/export", get(export_flow))
}

/// GET /api/flows
async fn list_flows(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    match state.service.list_flows().await {
        Ok(flows) => Ok(Json(json!({ "flows": flows }))),
        Err(e) => Err(error_status("Failed to list flows", &e)),
    }
}

/// POST /api/flows
///
/// Body: a flow document. An `id` in the body overwrites that flow; without one a
/// fresh id is minted.
async fn create_flow(
    State(state): State<AppState>,
    Json(flow): Json<Flow>,
) -> Result<(StatusCode, Json<SavedFlow>), StatusCode> {
    if flow.name.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let saved = state
        .service
        .save_flow(flow)
        .await
        .map_err(|e| error_status("Failed to create flow", &e))?;
    tracing::info!("🔥 Created flow {} with {} trigger(s)", saved.id, saved.triggers.len());
    Ok((StatusCode::CREATED, Json(saved)))
}

/// GET /api/flows/{id}
async fn get_flow(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Flow>, StatusCode> {
    state
        .service
        .get_flow(&id)
        .await
        .map(Json)
        .map_err(|e| error_status("Failed to get flow", &e))
}

/// PUT /api/flows/{id}
async fn update_flow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(flow): Json<Flow>,
) -> Result<Json<SavedFlow>, StatusCode> {
    if flow.name.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let saved = state
        .service
        .update_flow(&id, flow)
        .await
        .map_err(|e| error_status("Failed to update flow", &e))?;
    tracing::info!("🔥 Updated flow {}", saved.id);
    Ok(Json(saved))
}

/// DELETE /api/flows/{id}
async fn delete_flow(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, StatusCode> {
    state
        .service
        .delete_flow(&id)
        .await
        .map_err(|e| error_status("Failed to delete flow", &e))?;
    Ok(Json(json!({ "message": "Flow deleted successfully" })))
}

/// POST /api/flows/{id}/run
///
/// Optional JSON body becomes the entry nodes' input. Responds with the terminal
/// execution record, whatever its status; a flow that fails validation is 422.
async fn run_flow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: String,
) -> Result<(StatusCode, Json<Value>), StatusCode> {
    let input = parse_body(&body)?;
    match state.service.run_now(&id, input).await {
        Ok(execution) => {
            let record = serde_json::to_value(&execution).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
            Ok((StatusCode::OK, Json(record)))
        }
        Err(Error::Validation(e)) => {
            tracing::warn!("⚠️ Flow {} failed validation: {}", id, e);
            Ok((StatusCode::UNPROCESSABLE_ENTITY, Json(json!({ "error": e.to_string() }))))
        }
        Err(e) => Err(error_status("Failed to run flow", &e)),
    }
}

/// POST /api/flows/{id}/enable
async fn enable_flow(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<SavedFlow>, StatusCode> {
    state
        .service
        .set_enabled(&id, true)
        .await
        .map(Json)
        .map_err(|e| error_status("Failed to enable flow", &e))
}

/// POST /api/flows/{id}/disable
async fn disable_flow(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<SavedFlow>, StatusCode> {
    state
        .service
        .set_enabled(&id, false)
        .await
        .map(Json)
        .map_err(|e| error_status("Failed to disable flow", &e))
}

/// POST /api/flows/import
///
/// Body: an exported flow document. Always saved under a fresh id.
async fn import_flow(
    State(state): State<AppState>,
    body: String,
) -> Result<(StatusCode, Json<SavedFlow>), StatusCode> {
    let saved = state
        .service
        .import_flow(&body)
        .await
        .map_err(|e| error_status("Failed to import flow", &e))?;
    Ok((StatusCode::CREATED, Json(saved)))
}

/// GET /api/flows/{id}/export
async fn export_flow(State(state): State<AppState>, Path(id): Path<String>) -> Result<impl IntoResponse, StatusCode> {
    let blob = state
        .service
        .export_flow(&id)
        .await
        .map_err(|e| error_status("Failed to export flow", &e))?;
    Ok(([(header::CONTENT_TYPE, "application/json")], blob))
}
