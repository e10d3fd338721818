use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use store::{build, build_log};

use crate::broadcast::{self, Broadcaster};
use crate::error::{ApiError, Result};
use crate::state::AppState;

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<build::Model>> {
    let build = state
        .store
        .get_build(id)
        .await
        .map_err(|_| ApiError::NotFound("Build not found".to_string()))?;
    Ok(Json(build))
}

pub async fn logs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<build_log::Model>>> {
    Ok(Json(state.store.get_build_logs(id).await?))
}

pub async fn clear_logs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>> {
    state.store.clear_build_logs(id).await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Deserialize)]
pub struct StatusUpdate {
    status: String,
}

/// Internal endpoint: the build worker reports status transitions here.
pub async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<StatusUpdate>,
) -> Result<Json<build::Model>> {
    let build = state.coordinator.handle_status_update(id, &req.status).await?;
    Ok(Json(build))
}

#[derive(Deserialize)]
pub struct AppendLog {
    logs: String,
    #[serde(default)]
    level: String,
}

/// Internal endpoint: the worker's log streamer posts batches here.
pub async fn append_log(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<AppendLog>,
) -> Result<Json<Value>> {
    let level = if req.level.is_empty() {
        "info"
    } else {
        req.level.as_str()
    };

    state.coordinator.append_build_log(id, &req.logs, level).await?;
    Ok(Json(json!({ "success": true })))
}

/// SSE stream of raw log lines for one build.
pub async fn stream(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let subscription = state
        .broadcaster
        .subscribe(Broadcaster::build_room(&id.to_string()))
        .await;
    broadcast::sse_response(subscription)
}
