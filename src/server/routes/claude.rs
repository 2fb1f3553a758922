use crate::bootstrap::Gateway;
use crate::convert::claude::{ClaudeEmitter, convert_request, final_response};
use crate::error::ClaudeError;
use crate::relay::{Emitter, PumpContext, collect_response, heartbeat_stream, spawn_sse_pump};
use crate::utils::logging::with_pretty_json_debug;
use axum::{
    Json,
    extract::{FromRequest, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response, Sse},
};
use castor_schema::claude::ClaudeMessagesRequest;
use futures::StreamExt;
use std::convert::Infallible;
use std::time::Duration;
use tracing::debug;

pub struct ClaudeBody(pub ClaudeMessagesRequest);

impl<S> FromRequest<S> for ClaudeBody
where
    S: Send + Sync,
{
    type Rejection = ClaudeError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(body) = Json::<ClaudeMessagesRequest>::from_request(req, state).await?;
        Ok(Self(body))
    }
}

pub async fn messages(
    State(gateway): State<Gateway>,
    ClaudeBody(body): ClaudeBody,
) -> Result<Response, ClaudeError> {
    let model = body.model.clone();
    if !gateway.cfg.upstream.model_list.contains(&model) {
        return Err(ClaudeError::RequestRejected {
            status: StatusCode::BAD_REQUEST,
            message: format!("unsupported model: {model}"),
        });
    }

    let upstream_request = convert_request(&body, &gateway.cfg.convert, &gateway.names)
        .map_err(|message| ClaudeError::RequestRejected {
            status: StatusCode::BAD_REQUEST,
            message,
        })?;

    if gateway.cfg.basic.debug_dump {
        with_pretty_json_debug(&upstream_request, |pretty| {
            debug!(channel = "claude", req.model = %model, body = %pretty, "Converted upstream request");
        });
    }

    let upstream_streamed = body.stream || gateway.cfg.relay.fake_non_stream;
    let (lease, upstream_resp) = gateway
        .dispatcher
        .dispatch(&model, upstream_streamed, &upstream_request)
        .await?;

    let ctx = PumpContext {
        names: gateway.names.clone(),
        sigcache: gateway.sigcache.clone(),
        quota: gateway.quota.clone(),
        cred_id: lease.id.clone(),
        session_id: lease.session_id.clone(),
        model: model.clone(),
        sink: Some(gateway.sink.clone()),
        idle_timeout: Duration::from_secs(gateway.cfg.upstream.idle_timeout_secs),
    };

    if body.stream {
        let events = spawn_sse_pump(
            upstream_resp,
            Emitter::Claude(ClaudeEmitter::new(&model)),
            ctx,
        );
        let stream = heartbeat_stream(
            events.map(Ok::<_, Infallible>),
            gateway.cfg.relay.heartbeat_ms,
            ClaudeEmitter::heartbeat,
        );
        return Ok(Sse::new(stream).into_response());
    }

    let state = collect_response(upstream_resp, upstream_streamed, &ctx)
        .await
        .map_err(ClaudeError::StreamProtocol)?;
    Ok(Json(final_response(&model, &state)).into_response())
}
