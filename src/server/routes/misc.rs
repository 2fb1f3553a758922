use crate::bootstrap::Gateway;
use crate::guard::ViolationKind;
use crate::server::guards::client_ip;
use axum::{
    Json,
    extract::{Request, State},
    http::StatusCode,
    response::IntoResponse,
};
use castor_schema::gemini::GeminiModelList;
use castor_schema::openai::OpenaiModelList;
use serde_json::json;
use tracing::debug;

/// Paths that 404 without counting as probe violations.
const PATH_WHITELIST: &[&str] = &[
    "/favicon.ico",
    "/robots.txt",
    "/.well-known",
    "/ws/logs",
    "/v1/models",
    "/v1/complete",
    "/v1/files",
    "/v1/fine_tuning",
    "/v1/assistants",
    "/v1/threads",
    "/v1/batches",
    "/v1/uploads",
    "/v1/organization",
    "/v1/usage",
    "/v1beta/models",
];

fn path_is_whitelisted(path: &str) -> bool {
    PATH_WHITELIST
        .iter()
        .any(|entry| path == *entry || path.starts_with(&format!("{entry}/")))
}

pub async fn health(State(gateway): State<Gateway>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "uptime": gateway.uptime_secs()
    }))
}

pub async fn openai_models(State(gateway): State<Gateway>) -> impl IntoResponse {
    Json(OpenaiModelList::from_model_names(
        gateway.cfg.upstream.model_list.iter().cloned(),
        "castor",
    ))
}

pub async fn gemini_models(State(gateway): State<Gateway>) -> impl IntoResponse {
    Json(GeminiModelList::from_model_names(
        gateway.cfg.upstream.model_list.iter().cloned(),
    ))
}

/// Any path outside the whitelist 404s *and* counts as a probe violation.
pub async fn fallback_404(State(gateway): State<Gateway>, req: Request) -> StatusCode {
    let path = req.uri().path().to_string();
    if !path_is_whitelisted(&path) {
        let ip = client_ip(&req);
        debug!(%ip, path = %path, "Unknown path probe");
        gateway.guard.record_violation(ip, ViolationKind::UnknownPath);
    }
    StatusCode::NOT_FOUND
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitelist_matches_exact_and_nested() {
        assert!(path_is_whitelisted("/v1/models"));
        assert!(path_is_whitelisted("/v1/files/file-123"));
        assert!(path_is_whitelisted("/.well-known/openid-configuration"));
        assert!(!path_is_whitelisted("/wp-admin"));
        assert!(!path_is_whitelisted("/v1/modelsque"));
    }
}
