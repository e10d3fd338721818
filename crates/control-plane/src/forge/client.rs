//! Authenticated access to the forge API on behalf of App installations.
//!
//! Installation tokens are minted on demand and never cached; they are
//! short-lived and the call volume here is low.

use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ApiError, Result};

const API_BASE: &str = "https://api.github.com";
const TOKEN_TIMEOUT: Duration = Duration::from_secs(10);
const REPO_LIST_TIMEOUT: Duration = Duration::from_secs(30);
const CONTENTS_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct AppClaims {
    iat: u64,
    exp: u64,
    iss: String,
}

/// Repository summary, trimmed to the fields the registry UI needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub id: i64,
    pub name: String,
    pub full_name: String,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub default_branch: String,
    #[serde(default)]
    pub html_url: String,
}

/// One entry of a directory listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentEntry {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: String,
}

pub struct ForgeClient {
    app_id: String,
    encoding_key: EncodingKey,
    client: reqwest::Client,
}

impl ForgeClient {
    pub fn new(app_id: &str, key_path: &str) -> anyhow::Result<Self> {
        if app_id.is_empty() {
            anyhow::bail!("GITHUB_APP_ID not set");
        }

        let pem_path = resolve_key_path(key_path)
            .ok_or_else(|| anyhow::anyhow!("App private key not found"))?;
        info!("Found App private key at: {}", pem_path.display());

        let pem = std::fs::read(&pem_path)?;
        // Accepts PKCS#1 and PKCS#8, rejects non-RSA keys.
        let encoding_key = EncodingKey::from_rsa_pem(&pem)
            .map_err(|e| anyhow::anyhow!("invalid App private key: {e}"))?;

        Ok(Self {
            app_id: app_id.to_string(),
            encoding_key,
            client: reqwest::Client::new(),
        })
    }

    /// App JWT: issued 60 s in the past to absorb clock skew, valid 10 min.
    pub fn generate_app_jwt(&self) -> Result<String> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let claims = AppClaims {
            iat: now - 60,
            exp: now + 10 * 60,
            iss: self.app_id.clone(),
        };

        encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(|e| ApiError::Internal(format!("failed to sign App JWT: {e}")))
    }

    pub async fn installation_token(&self, installation_id: &str) -> Result<String> {
        if installation_id.is_empty() {
            return Err(ApiError::BadRequest("installation ID required".to_string()));
        }

        let app_jwt = self.generate_app_jwt()?;
        let url = format!("{API_BASE}/app/installations/{installation_id}/access_tokens");

        let response = self
            .client
            .post(&url)
            .timeout(TOKEN_TIMEOUT)
            .bearer_auth(app_jwt)
            .header("Accept", "application/vnd.github.v3+json")
            .header("User-Agent", "control-plane")
            .send()
            .await?;

        if response.status() != reqwest::StatusCode::CREATED {
            return Err(ApiError::Upstream(format!(
                "token exchange returned {}",
                response.status()
            )));
        }

        #[derive(Deserialize)]
        struct TokenResponse {
            token: String,
        }

        let body: TokenResponse = response.json().await?;
        Ok(body.token)
    }

    /// Repositories visible to an installation.
    pub async fn list_repositories(&self, installation_id: &str) -> Result<Vec<Repository>> {
        let token = self.installation_token(installation_id).await?;

        let response = self
            .client
            .get(format!("{API_BASE}/installation/repositories"))
            .timeout(REPO_LIST_TIMEOUT)
            .bearer_auth(token)
            .header("Accept", "application/vnd.github.v3+json")
            .header("User-Agent", "control-plane")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ApiError::Upstream(format!(
                "repository listing returned {}",
                response.status()
            )));
        }

        #[derive(Deserialize)]
        struct RepoList {
            repositories: Vec<Repository>,
        }

        let body: RepoList = response.json().await?;
        Ok(body.repositories)
    }

    /// Directory listing of a path inside a repository.
    pub async fn list_contents(
        &self,
        installation_id: &str,
        owner: &str,
        repo: &str,
        path: &str,
    ) -> Result<Vec<ContentEntry>> {
        let token = self.installation_token(installation_id).await?;
        let url = format!("{API_BASE}/repos/{owner}/{repo}/contents/{path}");

        let response = self
            .client
            .get(&url)
            .timeout(CONTENTS_TIMEOUT)
            .bearer_auth(token)
            .header("Accept", "application/vnd.github.v3+json")
            .header("User-Agent", "control-plane")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ApiError::Upstream(format!(
                "contents listing returned {}",
                response.status()
            )));
        }

        let body: Vec<ContentEntry> = response.json().await?;
        Ok(body)
    }

    /// Raw file content parsed as JSON (used for `package.json`).
    pub async fn fetch_json_file(
        &self,
        installation_id: &str,
        owner: &str,
        repo: &str,
        path: &str,
    ) -> Result<serde_json::Value> {
        let token = self.installation_token(installation_id).await?;
        let url = format!("{API_BASE}/repos/{owner}/{repo}/contents/{path}");

        let response = self
            .client
            .get(&url)
            .timeout(CONTENTS_TIMEOUT)
            .bearer_auth(token)
            .header("Accept", "application/vnd.github.v3.raw")
            .header("User-Agent", "control-plane")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ApiError::Upstream(format!(
                "file fetch returned {}",
                response.status()
            )));
        }

        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| ApiError::Upstream(format!("file is not valid JSON: {e}")))
    }
}

fn resolve_key_path(configured: &str) -> Option<PathBuf> {
    if !configured.is_empty() {
        return Some(PathBuf::from(configured));
    }

    let mut candidates = vec![
        PathBuf::from("github-app.pem"),
        PathBuf::from("../github-app.pem"),
        PathBuf::from("../../github-app.pem"),
    ];

    if let Ok(home) = std::env::var("HOME") {
        candidates.push(PathBuf::from(home).join("github-app.pem"));
    }

    candidates.into_iter().find(|p| p.exists())
}
