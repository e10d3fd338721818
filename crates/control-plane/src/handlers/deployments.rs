use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};
use uuid::Uuid;

use store::deployment;

use crate::error::{ApiError, Result};
use crate::state::AppState;

pub async fn active(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<deployment::Model>> {
    let deployment = state
        .store
        .get_active_deployment(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("No active deployment".to_string()))?;
    Ok(Json(deployment))
}

pub async fn stop(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>> {
    let project = state
        .store
        .get_project(id)
        .await
        .map_err(|_| ApiError::NotFound("Project not found".to_string()))?;

    state.coordinator.stop(&project).await?;
    Ok(Json(json!({ "success": true })))
}

/// Manual promotion of a successful build.
pub async fn activate_build(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>> {
    state.coordinator.activate_build(id).await?;
    Ok(Json(json!({ "success": true })))
}
