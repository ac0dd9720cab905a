/// Execution history and settings endpoints

use crate::api::{error_status, AppState};
use crate::flow::types::Execution;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

/// Default page size for `GET /api/executions`
const DEFAULT_LIMIT: i64 = 50;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// `0` or negative lists everything
    pub limit: Option<i64>,
}

pub fn create_execution_routes() -> Router<AppState> {
    Router::new()
        .route("/api/executions", get(list_executions))
        .route("/api/executions/{id}", get(get_execution).delete(delete_execution))
        .route("/api/settings", get(get_settings).put(put_settings))
}

/// GET /api/executions?limit=
async fn list_executions(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, StatusCode> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
    match state.service.list_executions(limit).await {
        Ok(executions) => Ok(Json(json!({ "executions": executions }))),
        Err(e) => Err(error_status("Failed to list executions", &e)),
    }
}

/// GET /api/executions/{id}
async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Execution>, StatusCode> {
    state
        .service
        .get_execution(&id)
        .await
        .map(Json)
        .map_err(|e| error_status("Failed to get execution", &e))
}

/// DELETE /api/executions/{id}
async fn delete_execution(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, StatusCode> {
    state
        .service
        .delete_execution(&id)
        .await
        .map_err(|e| error_status("Failed to delete execution", &e))?;
    Ok(Json(json!({ "message": "Execution deleted successfully" })))
}

/// GET /api/settings
async fn get_settings(State(state): State<AppState>) -> Json<Value> {
    Json(state.service.settings().await)
}

/// PUT /api/settings
///
/// Body: any JSON object; replaces the stored settings.
async fn put_settings(State(state): State<AppState>, Json(settings): Json<Value>) -> Result<Json<Value>, StatusCode> {
    if !settings.is_object() {
        return Err(StatusCode::BAD_REQUEST);
    }
    state
        .service
        .save_settings(settings.clone())
        .await
        .map_err(|e| error_status("Failed to save settings", &e))?;
    Ok(Json(settings))
}
