use axum::{Json, http::StatusCode, response::IntoResponse};
use serde_json::json;
use thiserror::Error as ThisError;

use super::IsRetryable;
use super::oauth::OauthError;

/// Core-internal error type for the store, pool, ledgers and plumbing.
/// Dialect routes convert into their own error types before responding.
#[derive(Debug, ThisError)]
pub enum CastorError {
    #[error(transparent)]
    Oauth(#[from] OauthError),

    #[error("HTTP request error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("Store decrypt failed: {0}")]
    StoreDecrypt(String),

    #[error("Store corrupted: {0}")]
    StoreCorrupted(String),

    #[error("Upstream error with status: {0}")]
    UpstreamStatus(StatusCode),

    #[error("No available credential")]
    NoAvailableCredential,

    #[error("Ractor error: {0}")]
    Ractor(String),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl IntoResponse for CastorError {
    fn into_response(self) -> axum::response::Response {
        let (status, code, message) = match &self {
            CastorError::NoAvailableCredential => (
                StatusCode::SERVICE_UNAVAILABLE,
                "NO_CREDENTIAL",
                "No available credentials to process the request.".to_string(),
            ),
            CastorError::Reqwest(_) | CastorError::Json(_) | CastorError::Url(_) => (
                StatusCode::BAD_GATEWAY,
                "UPSTREAM_ERROR",
                "Upstream service error.".to_string(),
            ),
            CastorError::UpstreamStatus(code) => (
                *code,
                "UPSTREAM_ERROR",
                format!("Upstream returned {code}."),
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal server error occurred.".to_string(),
            ),
        };
        (
            status,
            Json(json!({"error": {"code": code, "message": message}})),
        )
            .into_response()
    }
}

impl IsRetryable for CastorError {
    fn is_retryable(&self) -> bool {
        match self {
            CastorError::Reqwest(_) => true,
            CastorError::UpstreamStatus(status) => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            CastorError::Oauth(oauth) => oauth.is_retryable(),
            _ => false,
        }
    }
}
