use crate::bootstrap::Gateway;
use crate::convert::openai::{OpenaiEmitter, convert_request, final_response};
use crate::error::OpenaiError;
use crate::relay::{Emitter, PumpContext, collect_response, heartbeat_stream, spawn_sse_pump};
use crate::utils::logging::with_pretty_json_debug;
use axum::{
    Json,
    extract::{FromRequest, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response, Sse},
};
use castor_schema::openai::ChatCompletionsRequest;
use futures::StreamExt;
use std::convert::Infallible;
use std::time::Duration;
use tracing::debug;

pub struct OpenaiBody(pub ChatCompletionsRequest);

impl<S> FromRequest<S> for OpenaiBody
where
    S: Send + Sync,
{
    type Rejection = OpenaiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(body) = Json::<ChatCompletionsRequest>::from_request(req, state).await?;
        Ok(Self(body))
    }
}

pub async fn chat_completions(
    State(gateway): State<Gateway>,
    OpenaiBody(body): OpenaiBody,
) -> Result<Response, OpenaiError> {
    let model = body.model.clone();
    if !gateway.cfg.upstream.model_list.contains(&model) {
        return Err(OpenaiError::RequestRejected {
            status: StatusCode::BAD_REQUEST,
            message: format!("unsupported model: {model}"),
        });
    }

    let upstream_request = convert_request(&body, &gateway.cfg.convert, &gateway.names)
        .map_err(|message| OpenaiError::RequestRejected {
            status: StatusCode::BAD_REQUEST,
            message,
        })?;

    if gateway.cfg.basic.debug_dump {
        with_pretty_json_debug(&upstream_request, |pretty| {
            debug!(channel = "openai", req.model = %model, body = %pretty, "Converted upstream request");
        });
    }

    // Non-stream callers still ride the stream path when the shim is on;
    // long unary upstream calls time out otherwise.
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
            Emitter::Openai(OpenaiEmitter::new(&model)),
            ctx,
        );
        let stream = heartbeat_stream(
            events.map(Ok::<_, Infallible>),
            gateway.cfg.relay.heartbeat_ms,
            OpenaiEmitter::heartbeat,
        );
        return Ok(Sse::new(stream).into_response());
    }

    let state = collect_response(upstream_resp, upstream_streamed, &ctx)
        .await
        .map_err(OpenaiError::StreamProtocol)?;
    Ok(Json(final_response(&model, &state)).into_response())
}
