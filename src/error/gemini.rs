use super::IsRetryable;
use crate::upstream::{DispatchError, UpstreamErrorEnvelope, UpstreamErrorKind, UpstreamFault};
use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum GeminiError {
    #[error("Request rejected")]
    RequestRejected {
        status: StatusCode,
        body: GeminiErrorObject,
        debug_message: Option<String>,
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

impl GeminiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        GeminiError::RequestRejected {
            status: StatusCode::BAD_REQUEST,
            body: GeminiErrorObject::for_status(
                StatusCode::BAD_REQUEST,
                "INVALID_ARGUMENT",
                message,
            ),
            debug_message: None,
        }
    }
}

impl From<JsonRejection> for GeminiError {
    fn from(rejection: JsonRejection) -> Self {
        let debug_message = rejection.to_string();
        GeminiError::RequestRejected {
            status: StatusCode::BAD_REQUEST,
            body: GeminiErrorObject::for_status(
                StatusCode::BAD_REQUEST,
                "INVALID_ARGUMENT",
                "invalid request",
            ),
            debug_message: Some(debug_message),
        }
    }
}

impl From<DispatchError> for GeminiError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::NoCredential => GeminiError::NoAvailableCredential,
            DispatchError::Fault(fault) => GeminiError::Upstream(fault),
            DispatchError::Transport(e) => GeminiError::Transport(e),
            DispatchError::Internal(e) => GeminiError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for GeminiError {
    fn into_response(self) -> Response {
        let (status, error_body) = match self {
            GeminiError::RequestRejected {
                status,
                body,
                debug_message,
            } => {
                tracing::warn!(
                    status = %status,
                    code = body.code,
                    err_status = %body.status,
                    message = %body.message,
                    debug_message = %debug_message.unwrap_or_default(),
                    "Gemini request rejected"
                );
                (status, body)
            }

            GeminiError::NoAvailableCredential => (
                StatusCode::SERVICE_UNAVAILABLE,
                GeminiErrorObject::for_status(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "UNAVAILABLE",
                    "No available credentials to process the request.",
                ),
            ),

            GeminiError::Upstream(fault) => {
                tracing::warn!(
                    status = %fault.status,
                    kind = ?fault.kind,
                    "Gemini upstream fault surfaced"
                );
                surface_fault(&fault)
            }

            GeminiError::Transport(e) => {
                tracing::warn!(error = %e, status = ?e.status(), "Gemini transport error");
                (
                    StatusCode::BAD_GATEWAY,
                    GeminiErrorObject::for_status(
                        StatusCode::BAD_GATEWAY,
                        "UNAVAILABLE",
                        "Upstream service error.",
                    ),
                )
            }

            GeminiError::StreamProtocol(e) => {
                tracing::warn!(error = %e, "Gemini stream protocol error");
                (
                    StatusCode::BAD_GATEWAY,
                    GeminiErrorObject::for_status(
                        StatusCode::BAD_GATEWAY,
                        "UNAVAILABLE",
                        "Upstream stream protocol error.",
                    ),
                )
            }

            GeminiError::Internal(e) => {
                tracing::error!(error = %e, "Gemini internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    GeminiErrorObject::for_status(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "INTERNAL",
                        "An internal server error occurred.",
                    ),
                )
            }
        };

        (status, Json(GeminiErrorBody { inner: error_body })).into_response()
    }
}

fn surface_fault(fault: &UpstreamFault) -> (StatusCode, GeminiErrorObject) {
    // Prefer the upstream's own structured error when it parses; the Gemini
    // dialect shares its wire shape.
    if let Ok(parsed) = serde_json::from_str::<UpstreamErrorEnvelope>(&fault.body) {
        let surfaced_status = surfaced_status(fault.kind, fault.status);
        return (
            surfaced_status,
            GeminiErrorObject {
                code: surfaced_status.as_u16(),
                message: parsed
                    .inner
                    .message
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| format!("Upstream returned {}", fault.status)),
                status: parsed
                    .inner
                    .status
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| "UNKNOWN".to_string()),
            },
        );
    }

    let status = surfaced_status(fault.kind, fault.status);
    let status_str = match fault.kind {
        UpstreamErrorKind::RetryableRateLimit => "RESOURCE_EXHAUSTED",
        UpstreamErrorKind::CapacityExhausted => "UNAVAILABLE",
        UpstreamErrorKind::NoPermission => "PERMISSION_DENIED",
        UpstreamErrorKind::ContextTooLong => "INVALID_ARGUMENT",
        UpstreamErrorKind::AuthNeeded | UpstreamErrorKind::Other => "UNKNOWN",
    };
    (
        status,
        GeminiErrorObject::for_status(
            status,
            status_str,
            format!("Upstream returned {}", fault.status),
        ),
    )
}

fn surfaced_status(kind: UpstreamErrorKind, _origin: StatusCode) -> StatusCode {
    match kind {
        UpstreamErrorKind::RetryableRateLimit => StatusCode::TOO_MANY_REQUESTS,
        UpstreamErrorKind::CapacityExhausted => StatusCode::SERVICE_UNAVAILABLE,
        UpstreamErrorKind::NoPermission => StatusCode::BAD_GATEWAY,
        UpstreamErrorKind::ContextTooLong => StatusCode::BAD_REQUEST,
        UpstreamErrorKind::AuthNeeded | UpstreamErrorKind::Other => StatusCode::BAD_GATEWAY,
    }
}

impl IsRetryable for GeminiError {
    fn is_retryable(&self) -> bool {
        match self {
            GeminiError::Upstream(fault) => fault.kind.is_retryable(),
            _ => false,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct GeminiErrorBody {
    #[serde(rename = "error")]
    pub inner: GeminiErrorObject,
}

#[derive(Debug, Serialize)]
pub struct GeminiErrorObject {
    pub code: u16,
    pub message: String,
    pub status: String,
}

impl GeminiErrorObject {
    pub(crate) fn for_status(
        code: StatusCode,
        status: &'static str,
        message: impl Into<String>,
    ) -> Self {
        GeminiErrorObject {
            code: code.as_u16(),
            message: message.into(),
            status: status.to_string(),
        }
    }
}
