//! Remote submission of completed applications.

use crate::engine::FinalizeRequest;
use crate::forms::fields::{FieldValue, LocationValue};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Access tokens are valid for ten minutes after issue.
const TOKEN_LIFETIME: Duration = Duration::from_secs(10 * 60);
/// Refresh once fewer than two minutes remain.
const REFRESH_MARGIN: Duration = Duration::from_secs(2 * 60);

/// What the remote side said about an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionReceipt {
    pub reference: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmissionError {
    #[error("submission timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("remote rejected the request with HTTP {status}: {detail}")]
    Rejected { status: u16, detail: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("no submission endpoint configured")]
    NotConfigured,
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for SubmissionError {
    fn from(e: reqwest::Error) -> Self {
        SubmissionError::Transport(e.to_string())
    }
}

#[async_trait]
pub trait Submitter: Send + Sync {
    fn name(&self) -> &str;

    /// One attempt; the caller decides about retries.
    async fn submit(&self, request: &FinalizeRequest) -> Result<SubmissionReceipt, SubmissionError>;

    /// Remote status of a reference, `None` when the remote does not know it.
    async fn status(&self, reference: &str) -> Result<Option<String>, SubmissionError>;
}

/// Bounds every remote call with a timeout.
#[derive(Clone)]
pub struct SubmissionGateway {
    inner: Arc<dyn Submitter>,
    timeout: Duration,
}

impl SubmissionGateway {
    pub fn new(inner: Arc<dyn Submitter>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn backend(&self) -> &str {
        self.inner.name()
    }

    pub async fn submit(&self, request: &FinalizeRequest) -> Result<SubmissionReceipt, SubmissionError> {
        let started = std::time::Instant::now();
        let result = tokio::time::timeout(self.timeout, self.inner.submit(request))
            .await
            .unwrap_or(Err(SubmissionError::Timeout(self.timeout)));
        match &result {
            Ok(receipt) => tracing::info!(
                backend = self.inner.name(),
                form = %request.kind,
                reference = %receipt.reference,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "submission accepted"
            ),
            Err(e) => tracing::warn!(
                backend = self.inner.name(),
                form = %request.kind,
                "submission failed: {e}"
            ),
        }
        result
    }

    pub async fn status(&self, reference: &str) -> Result<Option<String>, SubmissionError> {
        tokio::time::timeout(self.timeout, self.inner.status(reference))
            .await
            .unwrap_or(Err(SubmissionError::Timeout(self.timeout)))
    }
}

// ── NC ex-gratia API ────────────────────────────────────────────

#[derive(Debug, Clone)]
struct AccessToken {
    access: String,
    refresh: Option<String>,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
}

/// Client for the state ex-gratia application service.
pub struct NcExgratiaClient {
    client: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    token: Mutex<Option<AccessToken>>,
}

impl NcExgratiaClient {
    pub fn new(base_url: &str, username: &str, password: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password: password.to_string(),
            token: Mutex::new(None),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn login(&self) -> Result<AccessToken, SubmissionError> {
        tracing::debug!("authenticating with ex-gratia service");
        let resp = self
            .client
            .post(self.url("/api/auth/login"))
            .json(&json!({ "username": self.username, "password": self.password }))
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(SubmissionError::Auth(format!("HTTP {status}: {body}")));
        }
        let body: TokenResponse = resp
            .json()
            .await
            .map_err(|e| SubmissionError::Malformed(e.to_string()))?;
        let access = body
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| SubmissionError::Auth("login response carried no access token".into()))?;
        Ok(AccessToken {
            access,
            refresh: body.refresh_token,
            expires_at: Instant::now() + TOKEN_LIFETIME,
        })
    }

    async fn refresh(&self, refresh_token: &str) -> Result<AccessToken, SubmissionError> {
        let resp = self
            .client
            .post(self.url("/api/auth/refresh"))
            .bearer_auth(refresh_token)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(SubmissionError::Auth(format!("refresh returned HTTP {}", resp.status().as_u16())));
        }
        let body: TokenResponse = resp
            .json()
            .await
            .map_err(|e| SubmissionError::Malformed(e.to_string()))?;
        let access = body
            .access_token
            .ok_or_else(|| SubmissionError::Auth("refresh response carried no access token".into()))?;
        Ok(AccessToken {
            access,
            refresh: body.refresh_token.or_else(|| Some(refresh_token.to_string())),
            expires_at: Instant::now() + TOKEN_LIFETIME,
        })
    }

    /// A token good for at least the refresh margin, refreshing or logging in
    /// again as needed.
    async fn access_token(&self) -> Result<String, SubmissionError> {
        let mut slot = self.token.lock().await;
        if let Some(token) = slot.as_ref() {
            if Instant::now() + REFRESH_MARGIN < token.expires_at {
                return Ok(token.access.clone());
            }
        }

        let refreshed = match slot.as_ref().and_then(|t| t.refresh.clone()) {
            Some(refresh_token) => match self.refresh(&refresh_token).await {
                Ok(token) => Some(token),
                Err(e) => {
                    tracing::warn!("token refresh failed, logging in again: {e}");
                    None
                }
            },
            None => None,
        };
        let token = match refreshed {
            Some(token) => token,
            None => self.login().await?,
        };
        let access = token.access.clone();
        *slot = Some(token);
        Ok(access)
    }
}

#[async_trait]
impl Submitter for NcExgratiaClient {
    fn name(&self) -> &str {
        "nc_exgratia"
    }

    async fn submit(&self, request: &FinalizeRequest) -> Result<SubmissionReceipt, SubmissionError> {
        let token = self.access_token().await?;
        let payload = build_payload(request);
        let resp = self
            .client
            .post(self.url("/api/exgratia/apply"))
            .bearer_auth(&token)
            .json(&payload)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            if status == reqwest::StatusCode::UNAUTHORIZED {
                *self.token.lock().await = None;
            }
            return Err(SubmissionError::Rejected {
                status: status.as_u16(),
                detail: body,
            });
        }
        parse_receipt(&body)
    }

    async fn status(&self, reference: &str) -> Result<Option<String>, SubmissionError> {
        let token = self.access_token().await?;
        let resp = self
            .client
            .get(self.url(&format!("/api/exgratia/status/{reference}")))
            .bearer_auth(&token)
            .send()
            .await?;
        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(SubmissionError::Rejected {
                status: status.as_u16(),
                detail: body,
            });
        }
        let value: Value = serde_json::from_str(&body).map_err(|e| SubmissionError::Malformed(e.to_string()))?;
        Ok(Some(
            value
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or("Unknown")
                .to_string(),
        ))
    }
}

/// Pull the remote reference and status out of an apply response.
fn parse_receipt(body: &str) -> Result<SubmissionReceipt, SubmissionError> {
    let value: Value = serde_json::from_str(body).map_err(|e| SubmissionError::Malformed(e.to_string()))?;
    let application = value
        .get("application")
        .ok_or_else(|| SubmissionError::Malformed("missing 'application' object".into()))?;
    let reference = application
        .get("application_refno")
        .and_then(Value::as_str)
        .filter(|r| !r.is_empty())
        .ok_or_else(|| SubmissionError::Malformed("missing 'application_refno'".into()))?;
    let status = application
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or("Pending");
    Ok(SubmissionReceipt {
        reference: reference.to_string(),
        status: status.to_string(),
    })
}

fn district_name(id: &str) -> String {
    match id {
        "east" => "East Sikkim".into(),
        "west" => "West Sikkim".into(),
        "north" => "North Sikkim".into(),
        "south" => "South Sikkim".into(),
        other => other.to_string(),
    }
}

/// Every run of digits in `text`, as numbers; `[1]` when there are none.
fn plot_numbers(text: &str) -> Vec<u64> {
    let numbers: Vec<u64> = text
        .split(|c: char| !c.is_ascii_digit())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse().ok())
        .collect();
    if numbers.is_empty() {
        vec![1]
    } else {
        numbers
    }
}

/// Map collected answers onto the remote application schema.
pub fn build_payload(request: &FinalizeRequest) -> Value {
    let text = |name: &str| -> String {
        request
            .value(name)
            .map(FieldValue::to_record_string)
            .unwrap_or_default()
    };

    let damage_type = match request.value("damage_type") {
        Some(FieldValue::Choice(id)) => vec![id.clone()],
        _ => vec!["crop".to_string()],
    };

    let mut payload = json!({
        "applicant_name": text("name"),
        "sodowo": text("father_name"),
        "village": text("village"),
        "ward": text("ward"),
        "gpu": text("gpu"),
        "district": district_name(&text("district")),
        "land_khatian_number": text("khatiyan_no"),
        "land_plot_nos": plot_numbers(&text("plot_no")),
        "ph_number": text("contact_number"),
        "voter_id": text("voter_id"),
        "damage_type": damage_type,
        "actual_nc_datetime": text("nc_datetime"),
    });

    if let Some(FieldValue::Location(LocationValue::Coordinates { latitude, longitude })) = request.value("location") {
        payload["latitude"] = json!(latitude);
        payload["longitude"] = json!(longitude);
    }
    payload
}
