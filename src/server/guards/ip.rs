use crate::bootstrap::Gateway;
use crate::guard::BlockReason;
use axum::{
    Json,
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Client IP for guard purposes: first `X-Forwarded-For` hop when present
/// (the gateway commonly sits behind a reverse proxy), else the socket peer.
pub fn client_ip(req: &Request) -> IpAddr {
    let forwarded = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(|first| first.trim().parse::<IpAddr>().ok());

    forwarded
        .or_else(|| {
            req.extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|info| info.0.ip())
        })
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

/// Outermost middleware: blocked IPs are rejected before anything else runs.
/// Permanent blocks answer 403, temporary ones 429 with their expiry.
pub async fn ip_guard(State(gateway): State<Gateway>, req: Request, next: Next) -> Response {
    let ip = client_ip(&req);
    let status = gateway.guard.check(ip);

    if status.blocked {
        return match status.reason {
            Some(BlockReason::Permanent) => (
                StatusCode::FORBIDDEN,
                Json(json!({
                    "error": {
                        "type": "ip_blocked",
                        "message": "This IP address is permanently blocked."
                    }
                })),
            )
                .into_response(),
            _ => (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({
                    "error": {
                        "type": "ip_blocked",
                        "message": "This IP address is temporarily blocked.",
                        "expiresAt": status.expires_at.map(|t| t.timestamp_millis())
                    }
                })),
            )
                .into_response(),
        };
    }

    next.run(req).await
}
