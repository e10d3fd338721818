//! Control plane configuration, sourced from the environment.

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub encryption_key: String,
    pub build_worker_url: String,
    pub deploy_engine_url: String,
    pub github_app_id: String,
    pub github_key_path: String,

    pub db_max_conns: u32,
    pub db_min_conns: u32,
    pub db_max_conn_lifetime_mins: u64,
    pub db_max_conn_idle_mins: u64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: env_parsed("PORT", 4000),
            database_url: env_or("DATABASE_URL", ""),
            encryption_key: env_or("ENCRYPTION_KEY", ""),
            build_worker_url: env_or("BUILD_WORKER_URL", "http://localhost:4001"),
            deploy_engine_url: env_or("DEPLOY_ENGINE_URL", "http://localhost:4002"),
            github_app_id: env_or("GITHUB_APP_ID", ""),
            github_key_path: env_or("GITHUB_APP_PRIVATE_KEY_PATH", ""),

            db_max_conns: env_parsed("DB_MAX_CONNS", 25),
            db_min_conns: env_parsed("DB_MIN_CONNS", 5),
            db_max_conn_lifetime_mins: env_parsed("DB_MAX_CONN_LIFETIME_MIN", 60),
            db_max_conn_idle_mins: env_parsed("DB_MAX_CONN_IDLE_MIN", 30),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database_url.is_empty() {
            anyhow::bail!("DATABASE_URL is required");
        }
        if self.encryption_key.is_empty() {
            anyhow::bail!("ENCRYPTION_KEY is required");
        }
        Ok(())
    }
}

fn env_or(key: &str, fallback: &str) -> String {
    match std::env::var(key) {
        Ok(val) if !val.is_empty() => val,
        _ => fallback.to_string(),
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(fallback)
}
