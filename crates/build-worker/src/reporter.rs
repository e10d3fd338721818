//! Build status reporting back to the control plane.

use std::time::Duration;

use tracing::warn;

const STATUS_TIMEOUT: Duration = Duration::from_secs(10);

/// PUTs terminal and intermediate status transitions. Failures are logged
/// and never retried; the control plane owns the durable state and a missed
/// update surfaces there as a stuck build, not as a wedged worker.
#[derive(Clone)]
pub struct StatusClient {
    client: reqwest::Client,
    control_api_url: String,
}

impl StatusClient {
    pub fn new(control_api_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            control_api_url: control_api_url.to_string(),
        }
    }

    pub async fn update_status(&self, build_id: &str, status: &str) {
        let url = format!("{}/builds/{}", self.control_api_url, build_id);
        let payload = serde_json::json!({ "status": status });

        let result = self
            .client
            .put(&url)
            .timeout(STATUS_TIMEOUT)
            .json(&payload)
            .send()
            .await;

        match result {
            Ok(response) if !response.status().is_success() => {
                warn!(
                    "Status update for build {} returned {}",
                    build_id,
                    response.status()
                );
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Status update for build {} failed: {}", build_id, e);
            }
        }
    }
}
