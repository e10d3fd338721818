use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use store::{build, project, NewProject, ProjectPatch};

use crate::broadcast::{self, Broadcaster};
use crate::error::{ApiError, Result};
use crate::state::AppState;

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<project::Model>>> {
    Ok(Json(state.store.list_projects().await?))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<project::Model>> {
    let project = state
        .store
        .get_project(id)
        .await
        .map_err(|_| ApiError::NotFound("Project not found".to_string()))?;
    Ok(Json(project))
}

#[derive(Deserialize)]
pub struct CreateProject {
    name: String,
    repo_url: String,
    build_command: String,
    app_type: String,
    root_directory: Option<String>,
    domain: Option<String>,
    repo_id: Option<String>,
    repo_full_name: Option<String>,
    branch: Option<String>,
    installation_id: Option<String>,
    auto_deploy: Option<bool>,
}

/// Register a project. The next free port is allocated here; branch
/// defaults to `main` and auto-deploy to true.
pub async fn create(
    State(state): State<AppState>,
    Json(req): Json<CreateProject>,
) -> Result<(StatusCode, Json<project::Model>)> {
    if req.name.is_empty() || req.repo_url.is_empty() {
        return Err(ApiError::BadRequest(
            "name and repo_url are required".to_string(),
        ));
    }

    let project = state
        .store
        .create_project(NewProject {
            name: req.name,
            repo_url: req.repo_url,
            root_dir: req.root_directory.unwrap_or_else(|| "./".to_string()),
            build_command: req.build_command,
            app_type: req.app_type,
            domain: req.domain.filter(|d| !d.trim().is_empty()),
            repo_id: req.repo_id,
            repo_full_name: req.repo_full_name,
            branch: req.branch.unwrap_or_else(|| "main".to_string()),
            installation_id: req.installation_id,
            auto_deploy: req.auto_deploy.unwrap_or(true),
        })
        .await?;

    Ok((StatusCode::CREATED, Json(project)))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(patch): Json<ProjectPatch>,
) -> Result<Json<project::Model>> {
    Ok(Json(state.store.update_project(id, patch).await?))
}

pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>> {
    state.store.delete_project(id).await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn list_builds(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<build::Model>>> {
    Ok(Json(state.store.list_builds_by_project(id, 100).await?))
}

/// Manual build trigger: create the build row and hand it to the worker.
pub async fn trigger_build(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<build::Model>)> {
    let build = state.coordinator.trigger_manual_build(id).await?;
    Ok((StatusCode::CREATED, Json(build)))
}

/// SSE stream of build/deployment status changes for one project.
pub async fn stream(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let subscription = state
        .broadcaster
        .subscribe(Broadcaster::project_room(&id.to_string()))
        .await;
    broadcast::sse_response(subscription)
}
