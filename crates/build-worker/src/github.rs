//! Forge App authentication: RS256 app JWT minting and installation token
//! exchange.

use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, WorkerError};

const TOKEN_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize, Deserialize)]
struct AppClaims {
    iat: u64,
    exp: u64,
    iss: String,
}

pub struct GithubAuth {
    app_id: String,
    encoding_key: EncodingKey,
    client: reqwest::Client,
}

impl GithubAuth {
    /// Load the App credentials. `key_path` may be empty, in which case the
    /// usual locations are searched for `github-app.pem`.
    pub fn new(app_id: &str, key_path: &str) -> Result<Self> {
        if app_id.is_empty() {
            return Err(WorkerError::ForgeAuth("GITHUB_APP_ID not set".to_string()));
        }

        let pem_path = resolve_key_path(key_path).ok_or_else(|| {
            WorkerError::ForgeAuth(
                "App private key not found; set GITHUB_APP_PRIVATE_KEY_PATH or place \
                 github-app.pem in the project root"
                    .to_string(),
            )
        })?;

        info!("Found App private key at: {}", pem_path.display());

        let pem = std::fs::read(&pem_path)?;
        // from_rsa_pem accepts PKCS#1 and PKCS#8 and rejects non-RSA keys.
        let encoding_key = EncodingKey::from_rsa_pem(&pem)
            .map_err(|e| WorkerError::ForgeAuth(format!("invalid App private key: {e}")))?;

        let client = reqwest::Client::builder()
            .timeout(TOKEN_EXCHANGE_TIMEOUT)
            .build()?;

        Ok(Self {
            app_id: app_id.to_string(),
            encoding_key,
            client,
        })
    }

    /// Mint a short-lived App JWT: issued 60 s in the past to absorb clock
    /// skew, valid for 10 minutes.
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

        Ok(encode(
            &Header::new(Algorithm::RS256),
            &claims,
            &self.encoding_key,
        )?)
    }

    /// Exchange the App JWT for an installation access token.
    pub async fn installation_token(&self, installation_id: &str) -> Result<String> {
        if installation_id.is_empty() {
            return Err(WorkerError::ForgeAuth(
                "installation ID required".to_string(),
            ));
        }

        let app_jwt = self.generate_app_jwt()?;

        let url = format!(
            "https://api.github.com/app/installations/{installation_id}/access_tokens"
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(app_jwt)
            .header("Accept", "application/vnd.github.v3+json")
            .header("User-Agent", "build-worker")
            .send()
            .await
            .map_err(|e| WorkerError::ForgeAuth(format!("token exchange failed: {e}")))?;

        if response.status() != reqwest::StatusCode::CREATED {
            return Err(WorkerError::ForgeAuth(format!(
                "token exchange returned {}",
                response.status()
            )));
        }

        #[derive(Deserialize)]
        struct TokenResponse {
            token: String,
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| WorkerError::ForgeAuth(format!("bad token response: {e}")))?;

        Ok(body.token)
    }
}

/// Resolve the PEM location: explicit path first, then well-known spots.
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
