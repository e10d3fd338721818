//! Typed Postgres store for the deployment platform.
//!
//! Sea-ORM entities live in [`entity`], one file per table. All access goes
//! through [`Store`], which owns the connection and exposes the query
//! surface the services need: registry CRUD, the monotonic build-status
//! guard, the transactional deployment swap, and cascade deletes.

pub mod entity;
mod error;
mod queries;
mod status;

pub use entity::{build, build_log, deployment, env_var, installation, project};
pub use error::{Result, StoreError};
pub use queries::{NewProject, ProjectPatch};
pub use status::{BuildStatus, DeploymentStatus};

use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::time::Duration;
use tracing::info;

/// Connection pool settings, mirroring the platform defaults.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    pub max_conns: u32,
    pub min_conns: u32,
    pub max_lifetime_mins: u64,
    pub idle_timeout_mins: u64,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_conns: 25,
            min_conns: 5,
            max_lifetime_mins: 60,
            idle_timeout_mins: 30,
        }
    }
}

#[derive(Clone)]
pub struct Store {
    db: DatabaseConnection,
}

impl Store {
    /// Connect to Postgres with the given pool settings.
    pub async fn connect(database_url: &str, pool: PoolOptions) -> Result<Self> {
        let mut options = ConnectOptions::new(database_url.to_string());
        options
            .max_connections(pool.max_conns)
            .min_connections(pool.min_conns)
            .max_lifetime(Duration::from_secs(pool.max_lifetime_mins * 60))
            .idle_timeout(Duration::from_secs(pool.idle_timeout_mins * 60))
            .sqlx_logging(false);

        let db = Database::connect(options).await?;
        info!(
            "Database connected (pool: min={}, max={})",
            pool.min_conns, pool.max_conns
        );

        Ok(Self { db })
    }

    /// Wrap an existing connection (tests).
    pub fn from_connection(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Create the platform tables when they do not exist yet.
    pub async fn init_schema(&self) -> Result<()> {
        use sea_orm::ConnectionTrait;

        let stmts = [
            "CREATE TABLE IF NOT EXISTS projects (\
                id UUID PRIMARY KEY,\
                name VARCHAR(255) NOT NULL,\
                repo_url TEXT NOT NULL,\
                root_dir TEXT NOT NULL DEFAULT './',\
                build_command TEXT NOT NULL,\
                app_type VARCHAR(50) NOT NULL,\
                port INTEGER NOT NULL UNIQUE,\
                domain VARCHAR(255) UNIQUE,\
                repo_id TEXT,\
                repo_full_name TEXT,\
                branch VARCHAR(255) NOT NULL DEFAULT 'main',\
                installation_id TEXT,\
                auto_deploy BOOLEAN NOT NULL DEFAULT TRUE,\
                created_at TIMESTAMPTZ NOT NULL,\
                updated_at TIMESTAMPTZ NOT NULL)",
            "CREATE TABLE IF NOT EXISTS builds (\
                id UUID PRIMARY KEY,\
                project_id UUID NOT NULL REFERENCES projects(id),\
                status VARCHAR(50) NOT NULL,\
                commit_sha VARCHAR(255),\
                commit_message TEXT,\
                created_at TIMESTAMPTZ NOT NULL)",
            "CREATE INDEX IF NOT EXISTS builds_project_id_idx ON builds(project_id)",
            "CREATE TABLE IF NOT EXISTS build_logs (\
                id BIGSERIAL PRIMARY KEY,\
                build_id UUID NOT NULL REFERENCES builds(id),\
                level VARCHAR(20) NOT NULL,\
                message TEXT NOT NULL,\
                created_at TIMESTAMPTZ NOT NULL)",
            "CREATE INDEX IF NOT EXISTS build_logs_build_id_idx ON build_logs(build_id)",
            "CREATE TABLE IF NOT EXISTS deployments (\
                id UUID PRIMARY KEY,\
                project_id UUID NOT NULL REFERENCES projects(id),\
                build_id UUID NOT NULL REFERENCES builds(id),\
                status VARCHAR(50) NOT NULL,\
                created_at TIMESTAMPTZ NOT NULL)",
            "CREATE INDEX IF NOT EXISTS deployments_status_idx ON deployments(status)",
            "CREATE TABLE IF NOT EXISTS env_vars (\
                id UUID PRIMARY KEY,\
                project_id UUID NOT NULL REFERENCES projects(id),\
                key VARCHAR(255) NOT NULL,\
                value TEXT NOT NULL,\
                created_at TIMESTAMPTZ NOT NULL,\
                updated_at TIMESTAMPTZ NOT NULL,\
                UNIQUE(project_id, key))",
            "CREATE TABLE IF NOT EXISTS installations (\
                id UUID PRIMARY KEY,\
                installation_id VARCHAR(255) NOT NULL UNIQUE,\
                account_login VARCHAR(255) NOT NULL,\
                account_id VARCHAR(255) NOT NULL,\
                account_type VARCHAR(50) NOT NULL,\
                created_at TIMESTAMPTZ NOT NULL,\
                updated_at TIMESTAMPTZ NOT NULL)",
        ];

        for stmt in stmts {
            self.db.execute_unprepared(stmt).await?;
        }

        Ok(())
    }
}
