//! Build/deployment coordination: webhook-triggered builds, status
//! transitions, automatic promotion on success, and uplink calls.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use store::{build, project, BuildStatus, Store};

use crate::broadcast::Broadcaster;
use crate::error::{ApiError, Result};
use crate::forge::webhook::PushEvent;
use crate::vault::Vault;

const TRIGGER_TIMEOUT: Duration = Duration::from_secs(10);
const ACTIVATE_TIMEOUT: Duration = Duration::from_secs(120);
const STOP_TIMEOUT: Duration = Duration::from_secs(30);

/// What a push webhook resolved to.
#[derive(Debug)]
pub enum PushOutcome {
    NoProject,
    AutoDeployDisabled,
    Duplicate,
    Triggered { build_id: Uuid },
}

#[derive(Clone)]
pub struct Coordinator {
    store: Store,
    broadcaster: Broadcaster,
    vault: Arc<Vault>,
    client: reqwest::Client,
    build_worker_url: String,
    deploy_engine_url: String,
}

impl Coordinator {
    pub fn new(
        store: Store,
        broadcaster: Broadcaster,
        vault: Arc<Vault>,
        build_worker_url: &str,
        deploy_engine_url: &str,
    ) -> Self {
        Self {
            store,
            broadcaster,
            vault,
            client: reqwest::Client::new(),
            build_worker_url: build_worker_url.to_string(),
            deploy_engine_url: deploy_engine_url.to_string(),
        }
    }

    /// Project env vars decrypted for internal use. A row that fails to
    /// open decrypts to the placeholder instead of failing the build.
    pub async fn decrypted_env_vars(&self, project_id: Uuid) -> Result<HashMap<String, String>> {
        let rows = self.store.get_env_vars(project_id).await?;

        let mut vars = HashMap::with_capacity(rows.len());
        for row in rows {
            vars.insert(row.key, self.vault.decrypt_or_placeholder(&row.value));
        }
        Ok(vars)
    }

    /// Resolve a push event: find the project, dedup on commit, create the
    /// build row and hand the job to the build worker.
    pub async fn handle_push(&self, push: PushEvent) -> Result<PushOutcome> {
        let Some(project) = self
            .store
            .find_project_by_repo(&push.repo_id, &push.branch)
            .await?
        else {
            return Ok(PushOutcome::NoProject);
        };

        if !project.auto_deploy {
            return Ok(PushOutcome::AutoDeployDisabled);
        }

        if let Some(sha) = &push.commit_sha {
            if self
                .store
                .find_build_by_commit(project.id, sha)
                .await?
                .is_some()
            {
                return Ok(PushOutcome::Duplicate);
            }
        }

        let build = self
            .store
            .create_build(project.id, push.commit_sha, push.commit_message)
            .await?;

        self.trigger_or_fail(&project, &build).await?;

        Ok(PushOutcome::Triggered { build_id: build.id })
    }

    /// Create and trigger a build outside the webhook path (manual trigger).
    pub async fn trigger_manual_build(&self, project_id: Uuid) -> Result<build::Model> {
        let project = self
            .store
            .get_project(project_id)
            .await
            .map_err(|_| ApiError::NotFound("Project not found".to_string()))?;

        let build = self.store.create_build(project.id, None, None).await?;
        self.trigger_or_fail(&project, &build).await?;

        Ok(build)
    }

    /// POST the job to the build worker; a trigger failure marks the build
    /// `failed` before the error propagates.
    async fn trigger_or_fail(&self, project: &project::Model, build: &build::Model) -> Result<()> {
        if let Err(e) = self.trigger_build_worker(project, build).await {
            warn!("Build trigger for {} failed: {}", build.id, e);
            if let Err(update_err) = self
                .store
                .update_build_status(build.id, BuildStatus::Failed)
                .await
            {
                warn!("Failed to mark build {} failed: {}", build.id, update_err);
            }
            return Err(e);
        }
        Ok(())
    }

    async fn trigger_build_worker(
        &self,
        project: &project::Model,
        build: &build::Model,
    ) -> Result<()> {
        let env_vars = self.decrypted_env_vars(project.id).await?;

        let payload = json!({
            "build_id": build.id,
            "project_id": project.id,
            "repo_url": project.repo_url,
            "build_command": project.build_command,
            "root_directory": project.root_dir,
            "app_type": project.app_type,
            "env_vars": env_vars,
            "installation_id": project.installation_id,
        });

        let response = self
            .client
            .post(format!("{}/build", self.build_worker_url))
            .timeout(TRIGGER_TIMEOUT)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ApiError::Upstream(format!("failed to trigger build worker: {e}")))?;

        if !response.status().is_success() {
            return Err(ApiError::Upstream(format!(
                "build worker returned {}",
                response.status()
            )));
        }

        Ok(())
    }

    /// Persist a status transition, fan it out, and promote on success.
    pub async fn handle_status_update(
        &self,
        build_id: Uuid,
        status: &str,
    ) -> Result<build::Model> {
        let next = BuildStatus::parse(status)
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;

        let build = self.store.update_build_status(build_id, next).await?;

        let project_id = build.project_id.to_string();
        self.broadcaster
            .broadcast_build_updated(&project_id, serde_json::to_value(&build).unwrap_or_default())
            .await;
        self.broadcaster
            .broadcast_build_log(&build_id.to_string(), &format!("Status: {status}"), "info")
            .await;

        if next == BuildStatus::Success {
            match self.store.get_project(build.project_id).await {
                Ok(project) => {
                    if let Err(e) = self.activate(&project, build.id).await {
                        // The build stays `success`; promotion can be retried
                        // manually.
                        warn!("Auto-activation of build {} failed: {}", build.id, e);
                    }
                }
                Err(e) => warn!("Project lookup for build {} failed: {}", build.id, e),
            }
        }

        Ok(build)
    }

    /// Promote a specific build (manual path).
    pub async fn activate_build(&self, build_id: Uuid) -> Result<()> {
        let build = self
            .store
            .get_build(build_id)
            .await
            .map_err(|_| ApiError::NotFound("Build not found".to_string()))?;
        let project = self
            .store
            .get_project(build.project_id)
            .await
            .map_err(|_| ApiError::NotFound("Project not found".to_string()))?;

        self.activate(&project, build.id).await
    }

    /// Ask the uplink to serve the build, then swap the deployment rows.
    async fn activate(&self, project: &project::Model, build_id: Uuid) -> Result<()> {
        let env_vars = self.decrypted_env_vars(project.id).await?;

        let payload = json!({
            "build_id": build_id,
            "project_id": project.id,
            "port": project.port,
            "subdomain": project.domain,
            "app_type": project.app_type,
            "env_vars": env_vars,
        });

        let response = self
            .client
            .post(format!("{}/activate", self.deploy_engine_url))
            .timeout(ACTIVATE_TIMEOUT)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ApiError::Upstream(format!("failed to activate deployment: {e}")))?;

        if !response.status().is_success() {
            return Err(ApiError::Upstream(format!(
                "deploy engine returned {}",
                response.status()
            )));
        }

        self.store.activate_deployment(project.id, build_id).await?;
        self.broadcaster
            .broadcast_deployment_updated(&project.id.to_string())
            .await;

        info!("Build {} activated for project {}", build_id, project.id);
        Ok(())
    }

    /// Stop serving the project and deactivate its deployment rows.
    pub async fn stop(&self, project: &project::Model) -> Result<()> {
        let payload = json!({
            "project_id": project.id,
            "port": project.port,
        });

        let response = self
            .client
            .post(format!("{}/stop", self.deploy_engine_url))
            .timeout(STOP_TIMEOUT)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ApiError::Upstream(format!("failed to stop deployment: {e}")))?;

        if !response.status().is_success() {
            return Err(ApiError::Upstream(format!(
                "deploy engine returned {}",
                response.status()
            )));
        }

        self.store.deactivate_deployments(project.id).await?;
        self.broadcaster
            .broadcast_deployment_updated(&project.id.to_string())
            .await;

        Ok(())
    }

    /// Persist a log batch from the worker and fan it out to subscribers.
    pub async fn append_build_log(&self, build_id: Uuid, logs: &str, level: &str) -> Result<()> {
        self.store.append_build_log(build_id, level, logs).await?;
        self.broadcaster
            .broadcast_build_log(&build_id.to_string(), logs, level)
            .await;
        Ok(())
    }
}
