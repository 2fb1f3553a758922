use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

pub const UPSTREAM_BODY_PREVIEW_CHARS: usize = 300;

/// Normalized upstream failure classes driving retry/failover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamErrorKind {
    /// 429: retry on another credential; cool the previous one down.
    RetryableRateLimit,
    /// 503 with a `MODEL_CAPACITY_EXHAUSTED` marker: retry on another
    /// credential; mark the previous one quota-exhausted.
    CapacityExhausted,
    /// 403 "caller does not have permission": disable the credential.
    NoPermission,
    /// Any other 403; the upstream signals an over-long context this way.
    ContextTooLong,
    /// 401 or missing authorization.
    AuthNeeded,
    Other,
}

impl UpstreamErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            UpstreamErrorKind::RetryableRateLimit | UpstreamErrorKind::CapacityExhausted
        )
    }
}

/// A non-2xx upstream outcome, normalized for the pipeline.
#[derive(Debug)]
pub struct UpstreamFault {
    pub status: StatusCode,
    pub body: String,
    pub kind: UpstreamErrorKind,
    /// Cooldown hint extracted from the structured body, when present.
    pub retry_after: Option<Duration>,
}

const CAPACITY_MARKER: &str = "MODEL_CAPACITY_EXHAUSTED";
const NO_PERMISSION_MARKER: &str = "does not have permission";

/// Classify a non-success upstream response body.
pub fn classify(status: StatusCode, body: &str) -> UpstreamErrorKind {
    match status {
        StatusCode::TOO_MANY_REQUESTS => UpstreamErrorKind::RetryableRateLimit,
        StatusCode::SERVICE_UNAVAILABLE if body.contains(CAPACITY_MARKER) => {
            UpstreamErrorKind::CapacityExhausted
        }
        StatusCode::FORBIDDEN if body.to_ascii_lowercase().contains(NO_PERMISSION_MARKER) => {
            UpstreamErrorKind::NoPermission
        }
        StatusCode::FORBIDDEN => UpstreamErrorKind::ContextTooLong,
        StatusCode::UNAUTHORIZED => UpstreamErrorKind::AuthNeeded,
        _ => UpstreamErrorKind::Other,
    }
}

/// Drain a failed upstream response into an [`UpstreamFault`].
pub async fn fault_from_response(resp: reqwest::Response) -> UpstreamFault {
    let status = resp.status();
    let bytes = resp.bytes().await.unwrap_or_default();
    let body = String::from_utf8_lossy(&bytes).into_owned();

    let kind = classify(status, &body);
    let retry_after = serde_json::from_str::<UpstreamErrorEnvelope>(&body)
        .ok()
        .and_then(|parsed| parsed.quota_reset_delay());

    tracing::debug!(
        %status,
        ?kind,
        body = %format!("{:.len$}", body, len = UPSTREAM_BODY_PREVIEW_CHARS),
        "Upstream error classified"
    );

    UpstreamFault {
        status,
        body,
        kind,
        retry_after,
    }
}

/// Google-style structured error envelope as the upstream ships it.
#[derive(Debug, Deserialize, Serialize)]
pub struct UpstreamErrorEnvelope {
    #[serde(rename = "error")]
    pub inner: UpstreamErrorObject,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct UpstreamErrorObject {
    /// Numeric error code (often equals the HTTP status, e.g. `429`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,

    /// Human-readable message, e.g.
    /// `"You have exhausted your capacity on this model. ..."`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Canonical status name, e.g. `"RESOURCE_EXHAUSTED"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    /// Structured details; `google.rpc.ErrorInfo` entries may carry a
    /// `metadata.quotaResetTimeStamp` RFC3339 timestamp used for cooldowns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<Value>>,

    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl UpstreamErrorEnvelope {
    /// Seconds until the reported quota reset, when the body carries one.
    pub fn quota_reset_delay(&self) -> Option<Duration> {
        let details = self.inner.details.as_ref()?;

        details
            .iter()
            .filter_map(|detail| {
                detail
                    .get("metadata")
                    .and_then(|m| m.get("quotaResetTimeStamp"))
                    .and_then(Value::as_str)
                    .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            })
            .filter_map(|reset_dt| {
                let reset = reset_dt.with_timezone(&Utc);
                let diff_secs = (reset - Utc::now()).num_seconds();
                u64::try_from(diff_secs)
                    .ok()
                    .filter(|s| *s > 0)
                    .map(|s| Duration::from_secs(s.saturating_add(1)))
            })
            .next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classify_maps_status_and_body_markers() {
        assert_eq!(
            classify(StatusCode::TOO_MANY_REQUESTS, ""),
            UpstreamErrorKind::RetryableRateLimit
        );
        assert_eq!(
            classify(
                StatusCode::SERVICE_UNAVAILABLE,
                r#"{"error":{"details":[{"reason":"MODEL_CAPACITY_EXHAUSTED"}]}}"#
            ),
            UpstreamErrorKind::CapacityExhausted
        );
        assert_eq!(
            classify(StatusCode::SERVICE_UNAVAILABLE, "upstream melting"),
            UpstreamErrorKind::Other
        );
        assert_eq!(
            classify(
                StatusCode::FORBIDDEN,
                "The caller does not have permission"
            ),
            UpstreamErrorKind::NoPermission
        );
        assert_eq!(
            classify(StatusCode::FORBIDDEN, "request entity too large"),
            UpstreamErrorKind::ContextTooLong
        );
        assert_eq!(classify(StatusCode::UNAUTHORIZED, ""), UpstreamErrorKind::AuthNeeded);
        assert_eq!(classify(StatusCode::BAD_GATEWAY, ""), UpstreamErrorKind::Other);
    }

    #[test]
    fn quota_reset_delay_uses_timestamp() {
        // Far-future timestamp keeps the test stable regardless of clock.
        let raw = json!({
            "error": {
                "code": 429,
                "message": "quota",
                "status": "RESOURCE_EXHAUSTED",
                "details": [
                    {"metadata": {"quotaResetTimeStamp": "2999-01-01T00:00:00Z"}}
                ]
            }
        });

        let parsed: UpstreamErrorEnvelope = serde_json::from_value(raw).unwrap();
        assert!(parsed.quota_reset_delay().is_some());
    }

    #[test]
    fn quota_reset_delay_ignores_past_timestamps() {
        let raw = json!({
            "error": {
                "details": [
                    {"metadata": {"quotaResetTimeStamp": "2001-01-01T00:00:00Z"}}
                ]
            }
        });

        let parsed: UpstreamErrorEnvelope = serde_json::from_value(raw).unwrap();
        assert!(parsed.quota_reset_delay().is_none());
    }
}
