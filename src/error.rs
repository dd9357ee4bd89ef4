//! Error types for papo.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Result type alias for papo operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for papo.
///
/// Attempt-level failures (`Timeout`, `UpstreamStatus`, `EmptyResponse`,
/// `Transport`) are consumed inside the dispatch retry loop and never reach
/// the HTTP layer; callers always receive a fixed fallback reply instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("No upstream API keys configured")]
    PoolExhausted,

    #[error("Empty message")]
    EmptyInput,

    #[error("Upstream attempt timed out")]
    Timeout,

    #[error("Upstream returned status {0}")]
    UpstreamStatus(u16),

    #[error("Upstream response contained no message text")]
    EmptyResponse,

    #[error("Service is {0}")]
    ServiceUnavailable(crate::gateway::ServiceMode),

    #[error("Upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Error::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            Error::PoolExhausted => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            Error::EmptyInput => (StatusCode::BAD_REQUEST, self.to_string()),
            Error::Timeout => (StatusCode::GATEWAY_TIMEOUT, self.to_string()),
            Error::UpstreamStatus(_) => (StatusCode::BAD_GATEWAY, self.to_string()),
            Error::EmptyResponse => (StatusCode::BAD_GATEWAY, self.to_string()),
            Error::ServiceUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            Error::Transport(_) => (StatusCode::BAD_GATEWAY, self.to_string()),
        };

        let body = serde_json::json!({
            "error": {
                "message": message,
                "type": "papo_error",
                "code": status.as_u16()
            }
        });

        (status, axum::Json(body)).into_response()
    }
}
