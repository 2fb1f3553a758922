use super::ip::client_ip;
use crate::bootstrap::Gateway;
use crate::guard::ViolationKind;
use axum::{
    Json,
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};
use serde_json::json;
use subtle::ConstantTimeEq;

fn extract_header_token(headers: &HeaderMap) -> Option<String> {
    if let Some(key) = headers.get("x-goog-api-key").and_then(|v| v.to_str().ok()) {
        return Some(key.to_string());
    }
    headers
        .typed_get::<Authorization<Bearer>>()
        .map(|auth| auth.token().to_string())
}

fn extract_query_token(query: Option<&str>) -> Option<String> {
    query.and_then(|q| {
        url::form_urlencoded::parse(q.as_bytes())
            .find(|(k, _)| k == "key")
            .map(|(_, v)| v.into_owned())
    })
}

/// Caller key check for the dialect surfaces. Accepts `Authorization:
/// Bearer`, `x-goog-api-key`, or `?key=`; failures count as guard
/// violations.
pub async fn require_key_auth(
    State(gateway): State<Gateway>,
    req: Request,
    next: Next,
) -> Response {
    let token =
        extract_header_token(req.headers()).or_else(|| extract_query_token(req.uri().query()));

    let reason = match token {
        Some(key) => {
            let expected = gateway.cfg.basic.api_key.as_bytes();
            if bool::from(key.as_bytes().ct_eq(expected)) {
                return next.run(req).await;
            }
            "Invalid API key"
        }
        None => "Missing API key",
    };

    let ip = client_ip(&req);
    gateway.guard.record_violation(ip, ViolationKind::BadApiKey);

    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "unauthorized", "reason": reason })),
    )
        .into_response()
}
