//! Remote API error types
//!
//! Every remote collaborator (social API, object store) reports failures as an
//! [`ApiError`]. The call wrapper in [`crate::recovery`] classifies these.

use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

/// Fallback wait when a rate-limited response carries no reset hint
const DEFAULT_RATE_LIMIT_RESET: Duration = Duration::from_secs(15 * 60);

/// Error raised by a remote API call
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    /// Server asked us to back off ("too many requests")
    #[error("Too many requests: rate limit resets in {}s", reset_in.as_secs())]
    RateLimited { reset_in: Duration },

    /// Server refused the action (403/422), message is the server's explanation
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Any other non-success HTTP status
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Transport-level failure (DNS, connect, timeout)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Response body could not be decoded
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    /// Reset-after duration for rate limit errors
    pub fn reset_in(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { reset_in } => Some(*reset_in),
            _ => None,
        }
    }

    /// Map a non-success HTTP response onto the error taxonomy
    pub async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status();
        let reset_in = reset_after(response.headers());
        let body = response.text().await.unwrap_or_default();

        match status {
            StatusCode::TOO_MANY_REQUESTS => Self::RateLimited { reset_in },
            StatusCode::FORBIDDEN | StatusCode::UNPROCESSABLE_ENTITY => {
                Self::Forbidden(server_message(&body))
            }
            StatusCode::SERVICE_UNAVAILABLE => Self::Http {
                status: status.as_u16(),
                message: "service over capacity".to_string(),
            },
            StatusCode::GATEWAY_TIMEOUT => Self::Http {
                status: status.as_u16(),
                message: "gateway timed out".to_string(),
            },
            _ => Self::Http {
                status: status.as_u16(),
                message: server_message(&body),
            },
        }
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Extract the human-readable message from an error body
pub fn server_message(body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.error)
        .unwrap_or_else(|_| body.trim().chars().take(200).collect())
}

/// Time until the rate limit resets, from `X-RateLimit-Reset` (RFC 3339
/// timestamp) or `Retry-After` (seconds)
pub fn reset_after(headers: &HeaderMap) -> Duration {
    let from_reset = headers
        .get("x-ratelimit-reset")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| chrono::DateTime::parse_from_rfc3339(v).ok())
        .map(|at| (at.with_timezone(&chrono::Utc) - chrono::Utc::now()).to_std().unwrap_or_default());

    let from_retry_after = || {
        headers
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    };

    from_reset
        .or_else(from_retry_after)
        .unwrap_or(DEFAULT_RATE_LIMIT_RESET)
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Transport(format!("request timed out: {}", e))
        } else if e.is_decode() {
            Self::InvalidResponse(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}
