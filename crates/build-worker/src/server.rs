//! HTTP ingress for the build worker.

use std::collections::HashMap;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::pipeline::BuildJob;
use crate::pool::JobSubmitter;

pub fn router(submitter: JobSubmitter) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/build", post(submit_build))
        .with_state(submitter)
}

async fn index() -> &'static str {
    "Build Worker is running"
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

#[derive(Deserialize)]
struct BuildRequest {
    #[serde(default)]
    build_id: String,
    #[serde(default)]
    project_id: String,
    #[serde(default)]
    repo_url: String,
    #[serde(default)]
    build_command: String,
    #[serde(default)]
    root_directory: String,
    #[serde(default)]
    app_type: String,
    #[serde(default)]
    env_vars: HashMap<String, String>,
    #[serde(default)]
    installation_id: Option<String>,
}

/// Fire-and-forget enqueue: the job is queued and the response returns
/// immediately; progress is observable through the control plane.
async fn submit_build(
    State(submitter): State<JobSubmitter>,
    Json(req): Json<BuildRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    if req.build_id.is_empty() || req.project_id.is_empty() || req.repo_url.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "Missing required fields: build_id, project_id, repo_url"
            })),
        ));
    }

    let job = BuildJob {
        build_id: req.build_id.clone(),
        project_id: req.project_id,
        repo_url: req.repo_url,
        build_command: if req.build_command.is_empty() {
            "bun run build".to_string()
        } else {
            req.build_command
        },
        root_directory: if req.root_directory.is_empty() {
            ".".to_string()
        } else {
            req.root_directory
        },
        app_type: if req.app_type.is_empty() {
            "vite".to_string()
        } else {
            req.app_type
        },
        env_vars: req.env_vars,
        installation_id: req.installation_id,
    };

    info!("Received build request for {}", job.build_id);

    if submitter.submit(job).await.is_err() {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "build queue is shutting down" })),
        ));
    }

    Ok(Json(json!({
        "success": true,
        "message": "Build started",
        "build_id": req.build_id,
    })))
}
