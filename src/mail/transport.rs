//! Mail provider transport.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::RETRY_AFTER;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::auth::AccessToken;
use crate::error::TransportError;

/// Sends an encoded RFC 5322 message on behalf of the token holder.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Returns the provider's message id.
    async fn send(&self, token: &AccessToken, raw: &str) -> Result<String, TransportError>;
}

/// Gmail REST `users.messages.send`.
pub struct GmailTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl GmailTransport {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Network(format!("HTTP client setup failed: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl MailTransport for GmailTransport {
    async fn send(&self, token: &AccessToken, raw: &str) -> Result<String, TransportError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(token.expose())
            .json(&json!({ "raw": raw }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout
                } else {
                    TransportError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Network(e.to_string())
            }
        })?;

        if !status.is_success() {
            let err = classify_failure(status, retry_after, &body);
            warn!(status = status.as_u16(), error = %err, "Provider rejected send");
            return Err(err);
        }

        let id = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.get("id").and_then(Value::as_str).map(str::to_string))
            .ok_or_else(|| TransportError::Provider {
                status: status.as_u16(),
                message: "response had no message id".into(),
            })?;
        debug!(message_id = %id, "Provider accepted message");
        Ok(id)
    }
}

/// Map a non-success response to a transport error.
pub fn classify_failure(
    status: StatusCode,
    retry_after: Option<Duration>,
    body: &str,
) -> TransportError {
    match status {
        StatusCode::UNAUTHORIZED => TransportError::AuthExpired,
        StatusCode::TOO_MANY_REQUESTS => TransportError::RateLimited { retry_after },
        _ => TransportError::Provider {
            status: status.as_u16(),
            message: provider_message(body).unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("unknown error")
                    .to_string()
            }),
        },
    }
}

/// `error.message` from a Google API error body, or a bare `error` string.
fn provider_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    let error = value.get("error")?;
    error
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| error.as_str())
        .map(str::to_string)
}

/// `Retry-After` in delta-seconds form.
fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}
