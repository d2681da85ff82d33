//! HTTP client for the Devin v1 session API.

use super::types::{
    CreateSessionRequest, CreatedSession, SendMessageRequest, SessionSnapshot,
};
use crate::error::ApiError;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::de::DeserializeOwned;
use std::time::{Duration, SystemTime};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Remote session operations the polling adapter depends on.
#[async_trait]
pub trait SessionApi: Send + Sync {
    async fn create_session(&self, request: &CreateSessionRequest) -> Result<CreatedSession, ApiError>;

    async fn get_session(&self, session_id: &str) -> Result<SessionSnapshot, ApiError>;

    async fn send_message(&self, session_id: &str, message: &str) -> Result<(), ApiError>;

    /// Upload one file and return the URL the session can fetch it from.
    async fn upload_attachment(&self, file_name: &str, content: String) -> Result<String, ApiError>;

    async fn terminate_session(&self, session_id: &str) -> Result<(), ApiError>;
}

#[derive(Clone)]
pub struct DevinClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl DevinClient {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self::with_timeout(base_url, api_key, REQUEST_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, api_key: &str, timeout: Duration) -> Self {
        // Fall back to reqwest defaults if builder creation fails for any reason.
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("Authorization", format!("Bearer {}", self.api_key))
    }
}

impl std::fmt::Debug for DevinClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DevinClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

/// Turn a non-2xx response into `ApiError::Status`, otherwise return its body.
async fn read_body(response: reqwest::Response) -> Result<String, ApiError> {
    if !response.status().is_success() {
        let status = response.status().as_u16();
        let retry_after_secs = parse_retry_after_secs(response.headers());
        let body = response.text().await.unwrap_or_default();
        return Err(ApiError::status(status, body, retry_after_secs));
    }
    Ok(response.text().await?)
}

fn decode<T: DeserializeOwned>(body: &str) -> Result<T, ApiError> {
    serde_json::from_str(body).map_err(|e| ApiError::InvalidResponse(e.to_string()))
}

#[async_trait]
impl SessionApi for DevinClient {
    async fn create_session(&self, request: &CreateSessionRequest) -> Result<CreatedSession, ApiError> {
        let req = self.authorized(self.http.post(self.url("/sessions")).json(request));
        decode(&read_body(req.send().await?).await?)
    }

    async fn get_session(&self, session_id: &str) -> Result<SessionSnapshot, ApiError> {
        let req = self.authorized(self.http.get(self.url(&format!("/session/{session_id}"))));
        decode(&read_body(req.send().await?).await?)
    }

    async fn send_message(&self, session_id: &str, message: &str) -> Result<(), ApiError> {
        let req = self.authorized(
            self.http
                .post(self.url(&format!("/session/{session_id}/message")))
                .json(&SendMessageRequest { message }),
        );
        read_body(req.send().await?).await.map(|_| ())
    }

    async fn upload_attachment(&self, file_name: &str, content: String) -> Result<String, ApiError> {
        let part = reqwest::multipart::Part::text(content).file_name(file_name.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);
        let req = self.authorized(self.http.post(self.url("/attachments")).multipart(form));
        parse_attachment_url(&read_body(req.send().await?).await?)
    }

    async fn terminate_session(&self, session_id: &str) -> Result<(), ApiError> {
        let req = self.authorized(self.http.delete(self.url(&format!("/session/{session_id}"))));
        read_body(req.send().await?).await.map(|_| ())
    }
}

/// Accept a bare URL, a JSON string, or an object with a `url` field.
pub fn parse_attachment_url(body: &str) -> Result<String, ApiError> {
    let trimmed = body.trim();
    let url = if trimmed.starts_with('"') {
        serde_json::from_str::<String>(trimmed)
            .map_err(|e| ApiError::InvalidResponse(format!("attachment url: {e}")))?
    } else if trimmed.starts_with('{') {
        let value: serde_json::Value = decode(trimmed)?;
        value
            .get("url")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ApiError::InvalidResponse("attachment response has no url".into()))?
    } else {
        trimmed.to_string()
    };
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(url)
    } else {
        Err(ApiError::InvalidResponse(format!(
            "attachment response is not a url: {}",
            crate::textutil::single_line_preview(trimmed, 80)
        )))
    }
}

/// Parse `Retry-After` as delta-seconds or an HTTP date.
pub fn parse_retry_after_secs(headers: &HeaderMap) -> Option<u64> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(secs);
    }
    let at = httpdate::parse_http_date(raw).ok()?;
    let wait = at.duration_since(SystemTime::now()).unwrap_or_default();
    // Round up so a sub-second wait is still honored.
    Some(wait.as_secs() + u64::from(wait.subsec_nanos() > 0))
}
