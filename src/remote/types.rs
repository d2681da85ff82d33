//! Devin v1 wire types.

use serde::{Deserialize, Serialize};

/// `POST /sessions` body.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CreateSessionRequest {
    pub prompt: String,
    pub idempotent: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CreatedSession {
    pub session_id: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub is_new_session: Option<bool>,
}

/// Coarse session state reported by `GET /session/{id}`.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Working,
    Blocked,
    Finished,
    Expired,
    SuspendRequested,
    SuspendRequestedFrontend,
    ResumeRequested,
    ResumeRequestedFrontend,
    Resumed,
    #[serde(other)]
    Other,
}

impl SessionStatus {
    pub fn parse(raw: &str) -> Self {
        serde_json::from_value(serde_json::Value::String(raw.trim().to_ascii_lowercase()))
            .unwrap_or(Self::Other)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SessionMessage {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub event_id: Option<String>,
}

impl SessionMessage {
    /// The prompt we sent, echoed back as the first message.
    pub fn is_initial_prompt(&self) -> bool {
        self.kind == "initial_user_message"
    }

    pub fn is_from_user(&self) -> bool {
        self.kind.contains("user")
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct PullRequest {
    #[serde(default)]
    pub url: Option<String>,
}

/// One `GET /session/{id}` response.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct SessionSnapshot {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub status_enum: Option<SessionStatus>,
    /// Free-form status; used when `status_enum` is absent.
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub messages: Vec<SessionMessage>,
    #[serde(default)]
    pub pull_request: Option<PullRequest>,
}

impl SessionSnapshot {
    pub fn status(&self) -> SessionStatus {
        self.status_enum.unwrap_or_else(|| {
            self.status
                .as_deref()
                .map(SessionStatus::parse)
                .unwrap_or(SessionStatus::Other)
        })
    }

    pub fn pull_request_url(&self) -> Option<&str> {
        self.pull_request
            .as_ref()
            .and_then(|pr| pr.url.as_deref())
            .filter(|url| !url.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct SendMessageRequest<'a> {
    pub message: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn snapshot_prefers_status_enum() {
        let snapshot: SessionSnapshot = serde_json::from_value(json!({
            "session_id": "devin-1",
            "status": "running",
            "status_enum": "blocked",
            "messages": [
                {"type": "initial_user_message", "message": "p", "event_id": "e0"},
                {"type": "devin_message", "message": "hi", "event_id": "e1"}
            ]
        }))
        .unwrap();
        assert_eq!(snapshot.status(), SessionStatus::Blocked);
        assert!(snapshot.messages[0].is_initial_prompt());
        assert!(!snapshot.messages[1].is_from_user());
    }

    #[test]
    fn unknown_status_values_map_to_other() {
        let snapshot: SessionSnapshot =
            serde_json::from_value(json!({"status_enum": "hibernating"})).unwrap();
        assert_eq!(snapshot.status(), SessionStatus::Other);
        let fallback: SessionSnapshot = serde_json::from_value(json!({"status": "Finished"})).unwrap();
        assert_eq!(fallback.status(), SessionStatus::Finished);
    }

    #[test]
    fn create_request_omits_empty_optionals() {
        let body = serde_json::to_value(CreateSessionRequest {
            prompt: "p".into(),
            idempotent: false,
            tags: Vec::new(),
            title: None,
        })
        .unwrap();
        assert_eq!(body, json!({"prompt": "p", "idempotent": false}));
    }

    #[test]
    fn pull_request_url_ignores_blank() {
        let snapshot: SessionSnapshot =
            serde_json::from_value(json!({"pull_request": {"url": " "}})).unwrap();
        assert_eq!(snapshot.pull_request_url(), None);
    }
}
