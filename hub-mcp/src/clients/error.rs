//! Errors shared by the integration clients.

use hub_admission::Integration;
use reqwest::{Response, StatusCode};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::warn;

/// Integration client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The request did not complete within the configured timeout.
    #[error("Request timed out")]
    Timeout,

    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    RequestFailed(reqwest::Error),

    /// Credentials were rejected.
    #[error("Authentication failed")]
    AuthenticationFailed,

    /// Credentials lack access to the resource.
    #[error("Access forbidden: {0}")]
    Forbidden(String),

    /// The upstream API throttled the request.
    #[error("Upstream rate limit reached")]
    RateLimited {
        /// Value of the `Retry-After` header, when present.
        retry_after_secs: Option<u64>,
    },

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// API returned an error response.
    #[error("API error ({status}): {message}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Error message from the API.
        message: String,
    },

    /// Invalid response from the API.
    #[error("Invalid API response: {0}")]
    InvalidResponse(String),

    /// The integration has no credentials configured.
    #[error("Missing credentials: set {0}")]
    MissingCredentials(&'static str),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout
        } else if err.is_decode() {
            ClientError::InvalidResponse(err.to_string())
        } else {
            ClientError::RequestFailed(err)
        }
    }
}

impl ClientError {
    /// Whether retrying the same idempotent request could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Timeout | ClientError::RequestFailed(_) => true,
            ClientError::ApiError { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Structured error document returned to the MCP caller.
    pub fn payload(&self, integration: Integration) -> Value {
        let name = display_name(integration);

        match self {
            ClientError::Timeout => json!({
                "error": "Request timeout",
                "message": format!("{} API request timed out", name),
            }),
            ClientError::RequestFailed(err) => json!({
                "error": "Request failed",
                "message": err.to_string(),
            }),
            ClientError::AuthenticationFailed => json!({
                "error": "Authentication failed",
                "status_code": 401,
                "message": format!("Invalid {} API credentials", name),
            }),
            ClientError::Forbidden(message) => json!({
                "error": "Access forbidden",
                "status_code": 403,
                "message": message,
            }),
            ClientError::RateLimited { retry_after_secs } => json!({
                "error": "Rate limit exceeded",
                "status_code": 429,
                "message": format!("{} API rate limit reached", name),
                "retryAfterSeconds": retry_after_secs,
            }),
            ClientError::NotFound(message) => json!({
                "error": "Not found",
                "status_code": 404,
                "message": message,
            }),
            ClientError::ApiError { status, message } => json!({
                "error": "API request failed",
                "status_code": status,
                "message": message,
            }),
            ClientError::InvalidResponse(message) => json!({
                "error": "Invalid API response",
                "message": message,
            }),
            ClientError::MissingCredentials(vars) => json!({
                "error": format!("Missing {} API credentials", name),
                "message": format!("Please set {} environment variable(s)", vars),
            }),
        }
    }
}

/// Human-facing integration name.
pub fn display_name(integration: Integration) -> &'static str {
    match integration {
        Integration::Notion => "Notion",
        Integration::Slack => "Slack",
        Integration::GitHub => "GitHub",
        Integration::Amplitude => "Amplitude",
    }
}

/// Map a response to its JSON body or a [`ClientError`].
///
/// `not_found` is the message used for a 404.
pub(crate) async fn read_json(response: Response, not_found: &str) -> Result<Value, ClientError> {
    let status = response.status();

    // A body that stalls past the timeout is a timeout, not a bad payload.
    if status.is_success() {
        return response.json::<Value>().await.map_err(ClientError::from);
    }

    match status {
        StatusCode::UNAUTHORIZED => Err(ClientError::AuthenticationFailed),
        StatusCode::NOT_FOUND => Err(ClientError::NotFound(not_found.to_string())),
        StatusCode::TOO_MANY_REQUESTS => {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok());
            warn!(?retry_after_secs, "Upstream API rate limited the request");
            Err(ClientError::RateLimited { retry_after_secs })
        }
        StatusCode::FORBIDDEN => {
            let message = response.text().await.unwrap_or_default();
            Err(ClientError::Forbidden(if message.is_empty() {
                "Access forbidden".to_string()
            } else {
                message
            }))
        }
        _ => {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            warn!(status = status.as_u16(), "API returned an error response");
            Err(ClientError::ApiError {
                status: status.as_u16(),
                message,
            })
        }
    }
}
