//! Query surface of the [`Store`].

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ActiveValue::NotSet, ColumnTrait, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::entity::{build, build_log, deployment, env_var, installation, project};
use crate::error::{Result, StoreError};
use crate::status::{BuildStatus, DeploymentStatus};
use crate::Store;

/// Ports are handed out monotonically starting here.
const BASE_PORT: i32 = 8000;

/// Fields required to register a project.
#[derive(Debug, Clone)]
pub struct NewProject {
    pub name: String,
    pub repo_url: String,
    pub root_dir: String,
    pub build_command: String,
    pub app_type: String,
    pub domain: Option<String>,
    pub repo_id: Option<String>,
    pub repo_full_name: Option<String>,
    pub branch: String,
    pub installation_id: Option<String>,
    pub auto_deploy: bool,
}

/// Partial update of a project; `None` leaves the column untouched.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct ProjectPatch {
    pub name: Option<String>,
    pub root_dir: Option<String>,
    pub build_command: Option<String>,
    pub app_type: Option<String>,
    pub domain: Option<String>,
    pub branch: Option<String>,
    pub auto_deploy: Option<bool>,
}

impl Store {
    // ----- projects -----

    pub async fn create_project(&self, new: NewProject) -> Result<project::Model> {
        let port = self.next_port().await?;
        let now = Utc::now();

        let row = project::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(new.name),
            repo_url: Set(new.repo_url),
            root_dir: Set(new.root_dir),
            build_command: Set(new.build_command),
            app_type: Set(new.app_type),
            port: Set(port),
            domain: Set(new.domain),
            repo_id: Set(new.repo_id),
            repo_full_name: Set(new.repo_full_name),
            branch: Set(new.branch),
            installation_id: Set(new.installation_id),
            auto_deploy: Set(new.auto_deploy),
            created_at: Set(now),
            updated_at: Set(now),
        };

        Ok(row.insert(&self.db).await?)
    }

    pub async fn get_project(&self, id: Uuid) -> Result<project::Model> {
        project::Entity::find_by_id(id)
            .one(&self.db)
            .await?
            .ok_or(StoreError::NotFound)
    }

    pub async fn list_projects(&self) -> Result<Vec<project::Model>> {
        Ok(project::Entity::find()
            .order_by_desc(project::Column::CreatedAt)
            .all(&self.db)
            .await?)
    }

    /// Resolve the project a push webhook targets.
    pub async fn find_project_by_repo(
        &self,
        repo_id: &str,
        branch: &str,
    ) -> Result<Option<project::Model>> {
        Ok(project::Entity::find()
            .filter(project::Column::RepoId.eq(repo_id))
            .filter(project::Column::Branch.eq(branch))
            .one(&self.db)
            .await?)
    }

    pub async fn update_project(&self, id: Uuid, patch: ProjectPatch) -> Result<project::Model> {
        let row = self.get_project(id).await?;
        let mut active: project::ActiveModel = row.into();

        if let Some(name) = patch.name {
            active.name = Set(name);
        }
        if let Some(root_dir) = patch.root_dir {
            active.root_dir = Set(root_dir);
        }
        if let Some(build_command) = patch.build_command {
            active.build_command = Set(build_command);
        }
        if let Some(app_type) = patch.app_type {
            active.app_type = Set(app_type);
        }
        if let Some(domain) = patch.domain {
            active.domain = Set(Some(domain));
        }
        if let Some(branch) = patch.branch {
            active.branch = Set(branch);
        }
        if let Some(auto_deploy) = patch.auto_deploy {
            active.auto_deploy = Set(auto_deploy);
        }
        active.updated_at = Set(Utc::now());

        Ok(active.update(&self.db).await?)
    }

    /// Delete a project and everything it owns in one transaction.
    pub async fn delete_project(&self, id: Uuid) -> Result<()> {
        let txn = self.db.begin().await?;

        deployment::Entity::delete_many()
            .filter(deployment::Column::ProjectId.eq(id))
            .exec(&txn)
            .await?;

        let build_ids: Vec<Uuid> = build::Entity::find()
            .filter(build::Column::ProjectId.eq(id))
            .select_only()
            .column(build::Column::Id)
            .into_tuple()
            .all(&txn)
            .await?;

        if !build_ids.is_empty() {
            build_log::Entity::delete_many()
                .filter(build_log::Column::BuildId.is_in(build_ids))
                .exec(&txn)
                .await?;
        }

        build::Entity::delete_many()
            .filter(build::Column::ProjectId.eq(id))
            .exec(&txn)
            .await?;

        env_var::Entity::delete_many()
            .filter(env_var::Column::ProjectId.eq(id))
            .exec(&txn)
            .await?;

        project::Entity::delete_by_id(id).exec(&txn).await?;

        txn.commit().await?;
        Ok(())
    }

    /// Highest assigned port plus one, starting at the base port.
    async fn next_port(&self) -> Result<i32> {
        let highest = project::Entity::find()
            .order_by_desc(project::Column::Port)
            .one(&self.db)
            .await?;

        Ok(highest.map(|p| p.port + 1).unwrap_or(BASE_PORT))
    }

    // ----- builds -----

    pub async fn create_build(
        &self,
        project_id: Uuid,
        commit_sha: Option<String>,
        commit_message: Option<String>,
    ) -> Result<build::Model> {
        let row = build::ActiveModel {
            id: Set(Uuid::new_v4()),
            project_id: Set(project_id),
            status: Set(BuildStatus::Pending.as_str().to_string()),
            commit_sha: Set(commit_sha),
            commit_message: Set(commit_message),
            created_at: Set(Utc::now()),
        };

        Ok(row.insert(&self.db).await?)
    }

    pub async fn get_build(&self, id: Uuid) -> Result<build::Model> {
        build::Entity::find_by_id(id)
            .one(&self.db)
            .await?
            .ok_or(StoreError::NotFound)
    }

    pub async fn list_builds_by_project(
        &self,
        project_id: Uuid,
        limit: u64,
    ) -> Result<Vec<build::Model>> {
        Ok(build::Entity::find()
            .filter(build::Column::ProjectId.eq(project_id))
            .order_by_desc(build::Column::CreatedAt)
            .limit(limit)
            .all(&self.db)
            .await?)
    }

    /// Dedup lookup for repository-event-triggered builds.
    pub async fn find_build_by_commit(
        &self,
        project_id: Uuid,
        commit_sha: &str,
    ) -> Result<Option<build::Model>> {
        Ok(build::Entity::find()
            .filter(build::Column::ProjectId.eq(project_id))
            .filter(build::Column::CommitSha.eq(commit_sha))
            .one(&self.db)
            .await?)
    }

    /// Persist a status change, refusing reverse transitions.
    pub async fn update_build_status(
        &self,
        id: Uuid,
        next: BuildStatus,
    ) -> Result<build::Model> {
        let row = self.get_build(id).await?;
        let current = BuildStatus::parse(&row.status)?;

        if !current.can_transition_to(next) {
            return Err(StoreError::InvalidTransition {
                from: current.to_string(),
                to: next.to_string(),
            });
        }

        let mut active: build::ActiveModel = row.into();
        active.status = Set(next.as_str().to_string());
        Ok(active.update(&self.db).await?)
    }

    // ----- build logs -----

    pub async fn append_build_log(
        &self,
        build_id: Uuid,
        level: &str,
        message: &str,
    ) -> Result<build_log::Model> {
        let row = build_log::ActiveModel {
            id: NotSet,
            build_id: Set(build_id),
            level: Set(level.to_string()),
            message: Set(message.to_string()),
            created_at: Set(Utc::now()),
        };

        Ok(row.insert(&self.db).await?)
    }

    pub async fn get_build_logs(&self, build_id: Uuid) -> Result<Vec<build_log::Model>> {
        Ok(build_log::Entity::find()
            .filter(build_log::Column::BuildId.eq(build_id))
            .order_by_asc(build_log::Column::CreatedAt)
            .order_by_asc(build_log::Column::Id)
            .all(&self.db)
            .await?)
    }

    pub async fn clear_build_logs(&self, build_id: Uuid) -> Result<()> {
        build_log::Entity::delete_many()
            .filter(build_log::Column::BuildId.eq(build_id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    // ----- deployments -----

    /// Swap the active deployment for a project: the incumbent (if any) goes
    /// `inactive` and the new row is inserted `active`, atomically.
    pub async fn activate_deployment(
        &self,
        project_id: Uuid,
        build_id: Uuid,
    ) -> Result<deployment::Model> {
        let txn = self.db.begin().await?;

        deployment::Entity::update_many()
            .col_expr(
                deployment::Column::Status,
                Expr::value(DeploymentStatus::Inactive.as_str()),
            )
            .filter(deployment::Column::ProjectId.eq(project_id))
            .filter(deployment::Column::Status.eq(DeploymentStatus::Active.as_str()))
            .exec(&txn)
            .await?;

        let row = deployment::ActiveModel {
            id: Set(Uuid::new_v4()),
            project_id: Set(project_id),
            build_id: Set(build_id),
            status: Set(DeploymentStatus::Active.as_str().to_string()),
            created_at: Set(Utc::now()),
        };
        let inserted = row.insert(&txn).await?;

        txn.commit().await?;
        Ok(inserted)
    }

    pub async fn get_active_deployment(
        &self,
        project_id: Uuid,
    ) -> Result<Option<deployment::Model>> {
        Ok(deployment::Entity::find()
            .filter(deployment::Column::ProjectId.eq(project_id))
            .filter(deployment::Column::Status.eq(DeploymentStatus::Active.as_str()))
            .one(&self.db)
            .await?)
    }

    pub async fn list_deployments(&self, project_id: Uuid) -> Result<Vec<deployment::Model>> {
        Ok(deployment::Entity::find()
            .filter(deployment::Column::ProjectId.eq(project_id))
            .order_by_desc(deployment::Column::CreatedAt)
            .all(&self.db)
            .await?)
    }

    pub async fn deactivate_deployments(&self, project_id: Uuid) -> Result<()> {
        deployment::Entity::update_many()
            .col_expr(
                deployment::Column::Status,
                Expr::value(DeploymentStatus::Inactive.as_str()),
            )
            .filter(deployment::Column::ProjectId.eq(project_id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    // ----- env vars -----

    pub async fn upsert_env_var(
        &self,
        project_id: Uuid,
        key: &str,
        ciphertext: &str,
    ) -> Result<env_var::Model> {
        let existing = env_var::Entity::find()
            .filter(env_var::Column::ProjectId.eq(project_id))
            .filter(env_var::Column::Key.eq(key))
            .one(&self.db)
            .await?;

        let now = Utc::now();
        match existing {
            Some(row) => {
                let mut active: env_var::ActiveModel = row.into();
                active.value = Set(ciphertext.to_string());
                active.updated_at = Set(now);
                Ok(active.update(&self.db).await?)
            }
            None => {
                let row = env_var::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    project_id: Set(project_id),
                    key: Set(key.to_string()),
                    value: Set(ciphertext.to_string()),
                    created_at: Set(now),
                    updated_at: Set(now),
                };
                Ok(row.insert(&self.db).await?)
            }
        }
    }

    pub async fn get_env_vars(&self, project_id: Uuid) -> Result<Vec<env_var::Model>> {
        Ok(env_var::Entity::find()
            .filter(env_var::Column::ProjectId.eq(project_id))
            .order_by_asc(env_var::Column::Key)
            .all(&self.db)
            .await?)
    }

    pub async fn delete_env_var(&self, project_id: Uuid, key: &str) -> Result<()> {
        env_var::Entity::delete_many()
            .filter(env_var::Column::ProjectId.eq(project_id))
            .filter(env_var::Column::Key.eq(key))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    // ----- installations -----

    pub async fn upsert_installation(
        &self,
        installation_id: &str,
        account_login: &str,
        account_id: &str,
        account_type: &str,
    ) -> Result<installation::Model> {
        let existing = installation::Entity::find()
            .filter(installation::Column::InstallationId.eq(installation_id))
            .one(&self.db)
            .await?;

        let now = Utc::now();
        match existing {
            Some(row) => {
                let mut active: installation::ActiveModel = row.into();
                active.account_login = Set(account_login.to_string());
                active.account_id = Set(account_id.to_string());
                active.account_type = Set(account_type.to_string());
                active.updated_at = Set(now);
                Ok(active.update(&self.db).await?)
            }
            None => {
                let row = installation::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    installation_id: Set(installation_id.to_string()),
                    account_login: Set(account_login.to_string()),
                    account_id: Set(account_id.to_string()),
                    account_type: Set(account_type.to_string()),
                    created_at: Set(now),
                    updated_at: Set(now),
                };
                Ok(row.insert(&self.db).await?)
            }
        }
    }

    pub async fn list_installations(&self) -> Result<Vec<installation::Model>> {
        Ok(installation::Entity::find()
            .order_by_asc(installation::Column::AccountLogin)
            .all(&self.db)
            .await?)
    }
}
