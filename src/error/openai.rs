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
pub enum OpenaiError {
    #[error("Request rejected: {message}")]
    RequestRejected {
        status: StatusCode,
        message: String,
    },

    /// No usable credential is currently available.
    #[error("No available credential")]
    NoAvailableCredential,

    /// Terminal upstream fault after the retry ladder is exhausted.
    #[error("Upstream fault: status={}", .0.status)]
    Upstream(UpstreamFault),

    /// Transport-level failure (DNS, connect, timeouts, etc).
    #[error("HTTP request error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Stream protocol error: {0}")]
    StreamProtocol(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<JsonRejection> for OpenaiError {
    fn from(rejection: JsonRejection) -> Self {
        OpenaiError::RequestRejected {
            status: StatusCode::BAD_REQUEST,
            message: rejection.to_string(),
        }
    }
}

impl From<DispatchError> for OpenaiError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::NoCredential => OpenaiError::NoAvailableCredential,
            DispatchError::Fault(fault) => OpenaiError::Upstream(fault),
            DispatchError::Transport(e) => OpenaiError::Transport(e),
            DispatchError::Internal(e) => OpenaiError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for OpenaiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            OpenaiError::RequestRejected { status, message } => {
                tracing::warn!(status = %status, message = %message, "OpenAI request rejected");
                (
                    status,
                    OpenaiErrorObject::new(message, "invalid_request_error", None),
                )
            }

            OpenaiError::NoAvailableCredential => (
                StatusCode::SERVICE_UNAVAILABLE,
                OpenaiErrorObject::new(
                    "No available credentials to process the request.",
                    "api_error",
                    Some("no_credentials_available"),
                ),
            ),

            OpenaiError::Upstream(fault) => {
                tracing::warn!(
                    status = %fault.status,
                    kind = ?fault.kind,
                    "OpenAI upstream fault surfaced"
                );
                surface_fault(&fault)
            }

            OpenaiError::Transport(e) => {
                tracing::warn!(error = %e, "OpenAI transport error");
                (
                    StatusCode::BAD_GATEWAY,
                    OpenaiErrorObject::new("Upstream service error.", "api_error", None),
                )
            }

            OpenaiError::StreamProtocol(e) => {
                tracing::warn!(error = %e, "OpenAI stream protocol error");
                (
                    StatusCode::BAD_GATEWAY,
                    OpenaiErrorObject::new("Upstream stream protocol error.", "api_error", None),
                )
            }

            OpenaiError::Internal(e) => {
                tracing::error!(error = %e, "OpenAI internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    OpenaiErrorObject::new("An internal server error occurred.", "api_error", None),
                )
            }
        };

        (status, Json(OpenaiErrorBody { inner: body })).into_response()
    }
}

fn surface_fault(fault: &UpstreamFault) -> (StatusCode, OpenaiErrorObject) {
    match fault.kind {
        UpstreamErrorKind::RetryableRateLimit => (
            StatusCode::TOO_MANY_REQUESTS,
            OpenaiErrorObject::new(
                "Upstream rate limit exceeded.",
                "rate_limit_error",
                Some("rate_limit_exceeded"),
            ),
        ),
        UpstreamErrorKind::CapacityExhausted => (
            StatusCode::SERVICE_UNAVAILABLE,
            OpenaiErrorObject::new(
                "Upstream model capacity exhausted.",
                "api_error",
                Some("model_capacity_exhausted"),
            ),
        ),
        UpstreamErrorKind::NoPermission => (
            StatusCode::BAD_GATEWAY,
            OpenaiErrorObject::new(fault.body.clone(), "api_error", Some("permission_denied")),
        ),
        UpstreamErrorKind::ContextTooLong => (
            StatusCode::BAD_REQUEST,
            OpenaiErrorObject::new(
                "Request context is too long for the upstream model.",
                "invalid_request_error",
                Some("context_length_exceeded"),
            ),
        ),
        UpstreamErrorKind::AuthNeeded | UpstreamErrorKind::Other => (
            StatusCode::BAD_GATEWAY,
            OpenaiErrorObject::new(
                format!("Upstream returned {}.", fault.status),
                "api_error",
                None,
            ),
        ),
    }
}

impl IsRetryable for OpenaiError {
    fn is_retryable(&self) -> bool {
        match self {
            OpenaiError::Upstream(fault) => fault.kind.is_retryable(),
            _ => false,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OpenaiErrorBody {
    #[serde(rename = "error")]
    pub inner: OpenaiErrorObject,
}

#[derive(Debug, Serialize)]
pub struct OpenaiErrorObject {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: String,
    pub code: Option<String>,
}

impl OpenaiErrorObject {
    pub fn new(
        message: impl Into<String>,
        error_type: &str,
        code: Option<&str>,
    ) -> Self {
        Self {
            message: message.into(),
            error_type: error_type.to_string(),
            code: code.map(str::to_string),
        }
    }
}
