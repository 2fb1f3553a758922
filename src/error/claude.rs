use super::IsRetryable;
use crate::upstream::{DispatchError, UpstreamErrorKind, UpstreamFault};
use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum ClaudeError {
    #[error("Request rejected: {message}")]
    RequestRejected {
        status: StatusCode,
        message: String,
    },

    #[error("No available credential")]
    NoAvailableCredential,

    #[error("Upstream fault: status={}", .0.status)]
    Upstream(UpstreamFault),

    #[error("HTTP request error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Stream protocol error: {0}")]
    StreamProtocol(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<JsonRejection> for ClaudeError {
    fn from(rejection: JsonRejection) -> Self {
        ClaudeError::RequestRejected {
            status: StatusCode::BAD_REQUEST,
            message: rejection.to_string(),
        }
    }
}

impl From<DispatchError> for ClaudeError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::NoCredential => ClaudeError::NoAvailableCredential,
            DispatchError::Fault(fault) => ClaudeError::Upstream(fault),
            DispatchError::Transport(e) => ClaudeError::Transport(e),
            DispatchError::Internal(e) => ClaudeError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for ClaudeError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            ClaudeError::RequestRejected { status, message } => {
                tracing::warn!(status = %status, message = %message, "Claude request rejected");
                (status, "invalid_request_error", message)
            }

            ClaudeError::NoAvailableCredential => (
                StatusCode::SERVICE_UNAVAILABLE,
                "overloaded_error",
                "No available credentials to process the request.".to_string(),
            ),

            ClaudeError::Upstream(fault) => {
                tracing::warn!(
                    status = %fault.status,
                    kind = ?fault.kind,
                    "Claude upstream fault surfaced"
                );
                match fault.kind {
                    UpstreamErrorKind::RetryableRateLimit => (
                        StatusCode::TOO_MANY_REQUESTS,
                        "rate_limit_error",
                        "Upstream rate limit exceeded.".to_string(),
                    ),
                    UpstreamErrorKind::CapacityExhausted => (
                        StatusCode::SERVICE_UNAVAILABLE,
                        "overloaded_error",
                        "Upstream model capacity exhausted.".to_string(),
                    ),
                    UpstreamErrorKind::NoPermission => {
                        (StatusCode::BAD_GATEWAY, "api_error", fault.body)
                    }
                    UpstreamErrorKind::ContextTooLong => (
                        StatusCode::BAD_REQUEST,
                        "invalid_request_error",
                        "Request context is too long for the upstream model.".to_string(),
                    ),
                    UpstreamErrorKind::AuthNeeded | UpstreamErrorKind::Other => (
                        StatusCode::BAD_GATEWAY,
                        "api_error",
                        format!("Upstream returned {}.", fault.status),
                    ),
                }
            }

            ClaudeError::Transport(e) => {
                tracing::warn!(error = %e, "Claude transport error");
                (
                    StatusCode::BAD_GATEWAY,
                    "api_error",
                    "Upstream service error.".to_string(),
                )
            }

            ClaudeError::StreamProtocol(e) => {
                tracing::warn!(error = %e, "Claude stream protocol error");
                (
                    StatusCode::BAD_GATEWAY,
                    "api_error",
                    "Upstream stream protocol error.".to_string(),
                )
            }

            ClaudeError::Internal(e) => {
                tracing::error!(error = %e, "Claude internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "api_error",
                    "An internal server error occurred.".to_string(),
                )
            }
        };

        let body = ClaudeErrorBody {
            body_type: "error",
            inner: ClaudeErrorObject {
                error_type: error_type.to_string(),
                message,
            },
        };
        (status, Json(body)).into_response()
    }
}

impl IsRetryable for ClaudeError {
    fn is_retryable(&self) -> bool {
        match self {
            ClaudeError::Upstream(fault) => fault.kind.is_retryable(),
            _ => false,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ClaudeErrorBody {
    #[serde(rename = "type")]
    pub body_type: &'static str,
    #[serde(rename = "error")]
    pub inner: ClaudeErrorObject,
}

#[derive(Debug, Serialize)]
pub struct ClaudeErrorObject {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
}
