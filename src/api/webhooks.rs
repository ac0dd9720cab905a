/// Webhook and event trigger endpoints
///
/// Webhook requests are matched against the live route table kept by the trigger
/// manager and turned into fires; the response only acknowledges the fire; the
/// execution runs in the background like any other trigger.

use crate::api::{error_status, parse_body, AppState};
use crate::triggers::ReloadReport;
use axum::{
    extract::{Path, Query, State},
    http::{Method, StatusCode},
    response::Json,
    routing::{any, post},
    Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;

pub fn create_webhook_routes() -> Router<AppState> {
    Router::new()
        // Format: /webhook/{path configured on a trigger.webhook node}
        .route("/webhook/{*path}", any(handle_webhook))
        .route("/api/events/{name}", post(publish_event))
        .route("/api/triggers/reload", post(reload_triggers))
}

/// ANY /webhook/{*path}
///
/// Body: optional JSON, handed to the flow as `body`; query parameters as `query`.
async fn handle_webhook(
    State(state): State<AppState>,
    method: Method,
    Path(path): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    body: String,
) -> Result<(StatusCode, Json<Value>), StatusCode> {
    tracing::info!("📥 Webhook request received: {} /webhook/{}", method, path);
    let triggers = state.service.triggers();
    if triggers.is_shutting_down() {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    let routes = triggers.webhooks();
    if !routes.has_path(&path) {
        tracing::warn!("❌ No webhook trigger listens on '{}'", path);
        return Err(StatusCode::NOT_FOUND);
    }
    if routes.lookup(&path, method.as_str()).is_empty() {
        return Err(StatusCode::METHOD_NOT_ALLOWED);
    }

    let payload = parse_body(&body)?;
    let query = serde_json::to_value(query).unwrap_or_default();
    let fired = triggers.fire_webhook(&path, method.as_str(), payload, query);
    if fired == 0 {
        tracing::warn!("⚠️ Webhook '{}' matched but no fire was accepted", path);
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    Ok((StatusCode::ACCEPTED, Json(json!({ "accepted": fired }))))
}

/// POST /api/events/{name}
///
/// Body: optional JSON payload delivered to `trigger.event` nodes listening on `name`.
async fn publish_event(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: String,
) -> Result<(StatusCode, Json<Value>), StatusCode> {
    let payload = parse_body(&body)?;
    let subscribers = state.service.publish_event(&name, payload);
    Ok((StatusCode::ACCEPTED, Json(json!({ "event": name, "subscribers": subscribers }))))
}

/// POST /api/triggers/reload
async fn reload_triggers(State(state): State<AppState>) -> Result<Json<ReloadReport>, StatusCode> {
    state
        .service
        .reload_triggers()
        .await
        .map(Json)
        .map_err(|e| error_status("Failed to reload triggers", &e))
}
