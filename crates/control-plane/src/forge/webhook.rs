//! Webhook payload translation.
//!
//! Forge webhook bodies are genuinely open-shaped, so the dynamic access is
//! confined to this module; everything downstream works with typed events.

use serde_json::Value;

use crate::error::{ApiError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    Push(PushEvent),
    InstallationCreated(InstallationCreated),
    Ignored { event: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushEvent {
    pub repo_id: String,
    pub branch: String,
    pub commit_sha: Option<String>,
    pub commit_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallationCreated {
    pub installation_id: String,
    pub account_login: String,
    pub account_id: String,
    pub account_type: String,
}

/// Convert a raw webhook delivery into a typed event.
pub fn translate(event_name: &str, payload: &Value) -> Result<WebhookEvent> {
    match event_name {
        "push" => translate_push(payload),
        "installation" => translate_installation(payload),
        other => Ok(WebhookEvent::Ignored {
            event: other.to_string(),
        }),
    }
}

fn translate_push(payload: &Value) -> Result<WebhookEvent> {
    let repo_id = payload
        .get("repository")
        .and_then(|r| r.get("id"))
        .map(stringify_id)
        .ok_or_else(|| ApiError::BadRequest("push payload missing repository.id".to_string()))?;

    let git_ref = payload
        .get("ref")
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError::BadRequest("push payload missing ref".to_string()))?;
    let branch = git_ref.strip_prefix("refs/heads/").unwrap_or(git_ref);

    let head_commit = payload.get("head_commit");
    let commit_sha = head_commit
        .and_then(|c| c.get("id"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let commit_message = head_commit
        .and_then(|c| c.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(WebhookEvent::Push(PushEvent {
        repo_id,
        branch: branch.to_string(),
        commit_sha,
        commit_message,
    }))
}

fn translate_installation(payload: &Value) -> Result<WebhookEvent> {
    let action = payload
        .get("action")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if action != "created" {
        return Ok(WebhookEvent::Ignored {
            event: "installation".to_string(),
        });
    }

    let installation = payload
        .get("installation")
        .ok_or_else(|| ApiError::BadRequest("installation payload missing".to_string()))?;
    let account = installation
        .get("account")
        .ok_or_else(|| ApiError::BadRequest("installation account missing".to_string()))?;

    Ok(WebhookEvent::InstallationCreated(InstallationCreated {
        installation_id: installation
            .get("id")
            .map(stringify_id)
            .ok_or_else(|| ApiError::BadRequest("installation id missing".to_string()))?,
        account_login: account
            .get("login")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        account_id: account.get("id").map(stringify_id).unwrap_or_default(),
        account_type: account
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    }))
}

/// Forge ids arrive as numbers; the store keys them as strings.
fn stringify_id(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn push_payload_translates() {
        let payload = json!({
            "ref": "refs/heads/main",
            "repository": { "id": 123456, "full_name": "acme/web" },
            "head_commit": { "id": "abc123", "message": "fix: typo" }
        });

        let event = translate("push", &payload).unwrap();
        assert_eq!(
            event,
            WebhookEvent::Push(PushEvent {
                repo_id: "123456".to_string(),
                branch: "main".to_string(),
                commit_sha: Some("abc123".to_string()),
                commit_message: Some("fix: typo".to_string()),
            })
        );
    }

    #[test]
    fn push_without_head_commit() {
        let payload = json!({
            "ref": "refs/heads/develop",
            "repository": { "id": 1 }
        });

        let WebhookEvent::Push(push) = translate("push", &payload).unwrap() else {
            panic!("expected push event");
        };
        assert_eq!(push.branch, "develop");
        assert_eq!(push.commit_sha, None);
    }

    #[test]
    fn malformed_push_is_bad_request() {
        assert!(translate("push", &json!({ "ref": "refs/heads/main" })).is_err());
        assert!(translate("push", &json!({ "repository": { "id": 1 } })).is_err());
    }

    #[test]
    fn installation_created_translates() {
        let payload = json!({
            "action": "created",
            "installation": {
                "id": 42,
                "account": { "login": "acme", "id": 7, "type": "Organization" }
            }
        });

        let event = translate("installation", &payload).unwrap();
        assert_eq!(
            event,
            WebhookEvent::InstallationCreated(InstallationCreated {
                installation_id: "42".to_string(),
                account_login: "acme".to_string(),
                account_id: "7".to_string(),
                account_type: "Organization".to_string(),
            })
        );
    }

    #[test]
    fn installation_deleted_is_ignored() {
        let payload = json!({ "action": "deleted", "installation": { "id": 42 } });
        let event = translate("installation", &payload).unwrap();
        assert!(matches!(event, WebhookEvent::Ignored { .. }));
    }

    #[test]
    fn unknown_events_are_ignored() {
        let event = translate("star", &json!({})).unwrap();
        assert_eq!(
            event,
            WebhookEvent::Ignored {
                event: "star".to_string()
            }
        );
    }
}
