use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{ApiError, Result};
use crate::state::AppState;
use crate::vault::MASKED_VALUE;

/// Masked listing for the UI: keys in the clear, every value replaced.
pub async fn list(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Value>>> {
    let rows = state.store.get_env_vars(id).await?;

    let masked = rows
        .into_iter()
        .map(|row| json!({ "key": row.key, "value": MASKED_VALUE }))
        .collect();

    Ok(Json(masked))
}

#[derive(Deserialize)]
pub struct SetEnvVar {
    key: String,
    value: String,
}

pub async fn set(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<SetEnvVar>,
) -> Result<Json<Value>> {
    if req.key.is_empty() {
        return Err(ApiError::BadRequest("Key is required".to_string()));
    }

    let ciphertext = state
        .vault
        .encrypt(&req.value)
        .map_err(|_| ApiError::Internal("failed to encrypt value".to_string()))?;

    state.store.upsert_env_var(id, &req.key, &ciphertext).await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn remove(
    State(state): State<AppState>,
    Path((id, key)): Path<(Uuid, String)>,
) -> Result<Json<Value>> {
    if key.is_empty() {
        return Err(ApiError::BadRequest("Key is required".to_string()));
    }

    state.store.delete_env_var(id, &key).await?;
    Ok(Json(json!({ "success": true })))
}
