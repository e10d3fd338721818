//! The build pipeline: authenticate, clone, install, build, package, upload.
//!
//! Stages run sequentially and the first failure aborts the remainder.
//! Workspace deletion and the final log flush run on every exit path.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tracing::{error, info, warn};

use crate::artifact;
use crate::command;
use crate::config::Config;
use crate::error::{Result, WorkerError};
use crate::git;
use crate::github::GithubAuth;
use crate::reporter::StatusClient;
use crate::streamer::{LogLevel, LogRouter};

/// One build request, as posted by the control plane.
#[derive(Debug, Clone, Deserialize)]
pub struct BuildJob {
    pub build_id: String,
    pub project_id: String,
    pub repo_url: String,
    #[serde(default)]
    pub build_command: String,
    #[serde(default)]
    pub root_directory: String,
    #[serde(default)]
    pub app_type: String,
    #[serde(default)]
    pub env_vars: HashMap<String, String>,
    #[serde(default)]
    pub installation_id: Option<String>,
}

/// Everything a worker needs to run jobs. Constructed once at the service
/// root and shared across the pool.
pub struct WorkerContext {
    pub config: Config,
    pub logs: LogRouter,
    pub status: StatusClient,
    pub github: Option<GithubAuth>,
    pub http: reqwest::Client,
}

/// Run the full pipeline for one job, reporting status transitions and
/// cleaning up the workspace regardless of outcome.
pub async fn execute_build(ctx: &WorkerContext, job: BuildJob) {
    let work_dir = ctx.config.workspace_dir.join(&job.build_id);

    monitoring::metrics::record_build_started();
    ctx.status.update_status(&job.build_id, "building").await;
    ctx.logs
        .stream(
            &job.build_id,
            &format!("Starting build for {}\n", job.build_id),
            LogLevel::Info,
        )
        .await;

    let result = run_stages(ctx, &job, &work_dir).await;

    match &result {
        Ok(()) => {
            ctx.status.update_status(&job.build_id, "success").await;
            monitoring::metrics::record_build_succeeded();
            info!("Build {} succeeded", job.build_id);
        }
        Err(e) => {
            ctx.status.update_status(&job.build_id, "failed").await;
            monitoring::metrics::record_build_failed();
            error!("Build {} failed: {}", job.build_id, e);
        }
    }

    ctx.logs.ensure_flushed(&job.build_id).await;

    if let Err(e) = tokio::fs::remove_dir_all(&work_dir).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to clean workspace {}: {}", work_dir.display(), e);
        }
    }
    info!("Cleaned up workspace: {}", work_dir.display());
}

async fn run_stages(ctx: &WorkerContext, job: &BuildJob, work_dir: &Path) -> Result<()> {
    let log = |message: String, level: LogLevel| async move {
        ctx.logs.stream(&job.build_id, &message, level).await;
    };

    // 1. Authenticate with the forge when the project is installation-backed
    let mut token = None;
    if let Some(installation_id) = job.installation_id.as_deref().filter(|s| !s.is_empty()) {
        log(
            "Authenticating with GitHub App...\n".to_string(),
            LogLevel::Info,
        )
        .await;

        match installation_token(ctx, installation_id).await {
            Ok(t) => token = Some(t),
            Err(e) => {
                log(format!("GitHub Auth Failed: {e}\n"), LogLevel::Error).await;
                return Err(e);
            }
        }
    }

    // 2. Clone
    log("Cloning repository...\n".to_string(), LogLevel::Info).await;
    if let Err(e) = git::clone_repository(&job.repo_url, work_dir, token.as_deref()).await {
        log(format!("Clone failed: {e}\n"), LogLevel::Error).await;
        return Err(e);
    }

    let project_dir = work_dir.join(&job.root_directory);

    // 3. Install and build
    let backend = artifact::is_backend_framework(&job.app_type);
    let compile_backend = backend
        && command::needs_compilation(&job.build_command)
        && command::has_script(&project_dir, "build");

    if backend && !compile_backend {
        log(
            "Backend project detected - skipping build step...\n".to_string(),
            LogLevel::Info,
        )
        .await;
        log(
            "Source code will be packaged and dependencies installed at deploy time.\n"
                .to_string(),
            LogLevel::Info,
        )
        .await;
    } else {
        if backend {
            log(
                "TypeScript backend detected - running build step...\n".to_string(),
                LogLevel::Info,
            )
            .await;
        }

        let logs = ctx.logs.clone();
        let build_id = job.build_id.clone();
        let on_line = move |line: String| {
            let logs = logs.clone();
            let build_id = build_id.clone();
            async move {
                logs.stream(&build_id, &line, LogLevel::Info).await;
            }
        };

        log("Installing dependencies...\n".to_string(), LogLevel::Info).await;
        let result = command::run_command(
            "bun install",
            &project_dir,
            &job.env_vars,
            &ctx.config.bun_path,
            on_line.clone(),
        )
        .await;
        if result.exit_code != 0 {
            log(
                format!("Install failed with exit code {}\n", result.exit_code),
                LogLevel::Error,
            )
            .await;
            return Err(WorkerError::InstallFailed(result.exit_code));
        }

        log("Building project...\n".to_string(), LogLevel::Info).await;
        let result = command::run_command(
            &job.build_command,
            &project_dir,
            &job.env_vars,
            &ctx.config.bun_path,
            on_line,
        )
        .await;
        if result.exit_code != 0 {
            log(
                format!("Build failed with exit code {}\n", result.exit_code),
                LogLevel::Error,
            )
            .await;
            return Err(WorkerError::BuildFailed(result.exit_code));
        }

        log(
            "Build completed successfully!\n".to_string(),
            LogLevel::Success,
        )
        .await;
    }

    // 4 & 5. Package and upload
    log(
        "Creating artifact package...\n".to_string(),
        LogLevel::Info,
    )
    .await;
    log(
        "Streaming artifact to Deploy Engine...\n".to_string(),
        LogLevel::Info,
    )
    .await;

    if let Err(e) = artifact::stream_artifact(
        &ctx.http,
        &ctx.config.deploy_engine_url,
        &job.build_id,
        &project_dir,
        &job.app_type,
    )
    .await
    {
        log(format!("Artifact upload failed: {e}\n"), LogLevel::Error).await;
        return Err(e);
    }

    log(
        "Artifact uploaded successfully!\n".to_string(),
        LogLevel::Success,
    )
    .await;

    Ok(())
}

async fn installation_token(ctx: &WorkerContext, installation_id: &str) -> Result<String> {
    let auth = ctx.github.as_ref().ok_or_else(|| {
        WorkerError::ForgeAuth("App credentials not configured".to_string())
    })?;
    auth.installation_token(installation_id).await
}
