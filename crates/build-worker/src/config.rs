//! Build worker configuration, sourced from the environment.

use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub control_api_url: String,
    pub deploy_engine_url: String,
    pub github_app_id: String,
    pub github_key_path: String,
    pub workspace_dir: PathBuf,
    pub build_workers: usize,
    pub bun_path: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: env_parsed("PORT", 4001),
            control_api_url: env_or("CONTROL_API_URL", "http://localhost:4000"),
            deploy_engine_url: env_or("DEPLOY_ENGINE_URL", "http://localhost:4002"),
            github_app_id: env_or("GITHUB_APP_ID", ""),
            github_key_path: env_or("GITHUB_APP_PRIVATE_KEY_PATH", ""),
            workspace_dir: PathBuf::from(env_or("WORKSPACE_DIR", "./workspace")),
            build_workers: env_parsed("BUILD_WORKERS", 3),
            bun_path: find_bun_path(),
        }
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

/// Resolve the absolute path of the `bun` binary.
///
/// Order: `BUN_PATH`, then `$PATH`, then well-known install locations, then
/// a scan of `/home` for per-user installs. Falls back to the bare name.
fn find_bun_path() -> String {
    if let Ok(path) = std::env::var("BUN_PATH") {
        if !path.is_empty() {
            return path;
        }
    }

    if let Some(path) = lookup_in_path("bun") {
        return path;
    }

    let mut candidates = vec![
        PathBuf::from("/root/.bun/bin/bun"),
        PathBuf::from("/usr/local/bin/bun"),
        PathBuf::from("/opt/bun/bin/bun"),
    ];

    if let Ok(home) = std::env::var("HOME") {
        candidates.push(Path::new(&home).join(".bun/bin/bun"));
    }

    for candidate in candidates {
        if candidate.exists() {
            return candidate.to_string_lossy().into_owned();
        }
    }

    if let Ok(entries) = std::fs::read_dir("/home") {
        for entry in entries.flatten() {
            let candidate = entry.path().join(".bun/bin/bun");
            if candidate.exists() {
                return candidate.to_string_lossy().into_owned();
            }
        }
    }

    "bun".to_string()
}

fn lookup_in_path(name: &str) -> Option<String> {
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Some(candidate.to_string_lossy().into_owned());
        }
    }
    None
}
