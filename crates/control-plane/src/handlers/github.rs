use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};

use crate::coordinator::PushOutcome;
use crate::error::{ApiError, Result};
use crate::forge::detect::{detect_framework, display_info, is_monorepo_dir, FrameworkInfo};
use crate::forge::webhook::{translate, WebhookEvent};
use crate::forge::ForgeClient;
use crate::state::AppState;

/// Webhook entry point. `push` triggers (or dedups) a build; `installation`
/// upserts the installation binding; everything else is acknowledged and
/// ignored.
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Result<Json<Value>> {
    let event_name = headers
        .get("X-GitHub-Event")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    match translate(event_name, &payload)? {
        WebhookEvent::Push(push) => {
            let outcome = state.coordinator.handle_push(push).await?;
            let body = match outcome {
                PushOutcome::NoProject => json!({ "status": "no_project" }),
                PushOutcome::AutoDeployDisabled => json!({ "status": "auto_deploy_disabled" }),
                PushOutcome::Duplicate => json!({ "status": "duplicate" }),
                PushOutcome::Triggered { build_id } => {
                    json!({ "status": "triggered", "build_id": build_id })
                }
            };
            Ok(Json(body))
        }
        WebhookEvent::InstallationCreated(installation) => {
            state
                .store
                .upsert_installation(
                    &installation.installation_id,
                    &installation.account_login,
                    &installation.account_id,
                    &installation.account_type,
                )
                .await?;
            Ok(Json(json!({ "status": "installed" })))
        }
        WebhookEvent::Ignored { event } => {
            Ok(Json(json!({ "status": "ignored", "event": event })))
        }
    }
}

pub async fn list_installations(State(state): State<AppState>) -> Result<Json<Value>> {
    let rows = state.store.list_installations().await?;

    let installations: Vec<Value> = rows
        .into_iter()
        .map(|row| {
            json!({
                "id": row.installation_id.parse::<i64>().unwrap_or(0),
                "account": {
                    "login": row.account_login,
                    "id": row.account_id.parse::<i64>().unwrap_or(0),
                    "type": row.account_type,
                }
            })
        })
        .collect();

    Ok(Json(json!({ "installations": installations })))
}

pub async fn list_repositories(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let forge = require_forge(&state)?;
    let repositories = forge.list_repositories(&id).await?;
    Ok(Json(json!({ "repositories": repositories })))
}

#[derive(Serialize)]
struct Folder {
    path: String,
    name: String,
    framework: String,
    #[serde(rename = "frameworkInfo")]
    framework_info: FrameworkInfo,
    #[serde(rename = "hasPackageJson")]
    has_package_json: bool,
}

/// Enumerate deployable folders: the repository root plus direct children
/// of conventional monorepo directories, each with its detected framework.
pub async fn list_folders(
    State(state): State<AppState>,
    Path((id, owner, repo)): Path<(String, String, String)>,
) -> Result<Json<Value>> {
    let forge = require_forge(&state)?;

    let mut folders = Vec::new();

    if let Some(mut folder) = inspect_dir(&forge, &id, &owner, &repo, "", &repo).await? {
        folder.path = "./".to_string();
        folders.push(folder);
    }

    let root_contents = forge.list_contents(&id, &owner, &repo, "").await?;
    for item in &root_contents {
        if item.kind != "dir" || !is_monorepo_dir(&item.name) {
            continue;
        }

        let Ok(children) = forge.list_contents(&id, &owner, &repo, &item.name).await else {
            continue;
        };

        for child in children {
            if child.kind != "dir" {
                continue;
            }
            let path = format!("{}/{}", item.name, child.name);
            if let Some(folder) = inspect_dir(&forge, &id, &owner, &repo, &path, &child.name).await?
            {
                folders.push(folder);
            }
        }
    }

    Ok(Json(json!({ "folders": folders })))
}

/// Detect the framework of one directory; `None` when it holds no
/// `package.json` and therefore is not a project root.
async fn inspect_dir(
    forge: &Arc<ForgeClient>,
    installation_id: &str,
    owner: &str,
    repo: &str,
    path: &str,
    name: &str,
) -> Result<Option<Folder>> {
    let contents = match forge.list_contents(installation_id, owner, repo, path).await {
        Ok(contents) => contents,
        Err(_) => return Ok(None),
    };

    let file_names: Vec<String> = contents.iter().map(|c| c.name.clone()).collect();
    if !file_names.iter().any(|n| n == "package.json") {
        return Ok(None);
    }

    let manifest_path = if path.is_empty() {
        "package.json".to_string()
    } else {
        format!("{path}/package.json")
    };
    let package_json = forge
        .fetch_json_file(installation_id, owner, repo, &manifest_path)
        .await
        .unwrap_or_else(|_| json!({}));

    let detected = detect_framework(&file_names, &package_json);

    Ok(Some(Folder {
        path: path.to_string(),
        name: name.to_string(),
        framework: detected.framework.as_str().to_string(),
        framework_info: display_info(detected.framework),
        has_package_json: true,
    }))
}

fn require_forge(state: &AppState) -> Result<Arc<ForgeClient>> {
    state
        .forge
        .clone()
        .ok_or_else(|| ApiError::Upstream("GitHub service not configured".to_string()))
}
