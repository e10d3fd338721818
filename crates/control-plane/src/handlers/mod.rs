//! HTTP surface of the control plane.

pub mod builds;
pub mod deployments;
pub mod env;
pub mod github;
pub mod projects;

use std::time::Duration;

use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::timeout::TimeoutLayer;

use crate::state::AppState;

const HANDLER_TIMEOUT: Duration = Duration::from_secs(60);

/// Build the full router. SSE endpoints live outside the handler timeout
/// layer; everything else is cut off after 60 s.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/github/webhook", post(github::webhook))
        .route("/github/installations", get(github::list_installations))
        .route(
            "/github/installations/{id}/repositories",
            get(github::list_repositories),
        )
        .route(
            "/github/installations/{id}/repositories/{owner}/{repo}/folders",
            get(github::list_folders),
        )
        .route("/projects", get(projects::list).post(projects::create))
        .route(
            "/projects/{id}",
            get(projects::get).put(projects::update).delete(projects::remove),
        )
        .route(
            "/projects/{id}/builds",
            get(projects::list_builds).post(projects::trigger_build),
        )
        .route("/projects/{id}/deployment", get(deployments::active))
        .route("/projects/{id}/stop", post(deployments::stop))
        .route("/projects/{id}/env", get(env::list).post(env::set))
        .route("/projects/{id}/env/{key}", delete(env::remove))
        .route("/builds/{id}", get(builds::get).put(builds::update_status))
        .route(
            "/builds/{id}/logs",
            get(builds::logs)
                .post(builds::append_log)
                .delete(builds::clear_logs),
        )
        .route("/deploy/build/{id}/activate", post(deployments::activate_build))
        .layer(TimeoutLayer::new(HANDLER_TIMEOUT))
        .with_state(state.clone());

    let sse = Router::new()
        .route("/builds/{id}/stream", get(builds::stream))
        .route("/projects/{id}/stream", get(projects::stream))
        .with_state(state);

    api.merge(sse)
}

async fn index() -> &'static str {
    "Control Plane"
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}
