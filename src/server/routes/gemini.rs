use crate::bootstrap::Gateway;
use crate::convert::gemini::{GeminiEmitter, convert_request, final_response};
use crate::error::GeminiError;
use crate::relay::{Emitter, PumpContext, collect_response, heartbeat_stream, spawn_sse_pump};
use crate::utils::logging::with_pretty_json_debug;
use axum::{
    Json, RequestExt,
    extract::{FromRequest, Path, Request, State},
    response::{IntoResponse, Response, Sse},
};
use castor_schema::gemini::GeminiGenerateContentRequest;
use futures::StreamExt;
use std::convert::Infallible;
use std::time::Duration;
use tracing::debug;

/// Model and streaming mode parsed from `/v1beta/models/{model}:{rpc}`.
#[derive(Debug, Clone)]
pub struct GeminiContext {
    pub model: String,
    pub stream: bool,
}

pub struct GeminiPreprocess(pub GeminiGenerateContentRequest, pub GeminiContext);

impl<S> FromRequest<S> for GeminiPreprocess
where
    S: Send + Sync,
{
    type Rejection = GeminiError;

    async fn from_request(mut req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Path(path) = req
            .extract_parts::<Path<String>>()
            .await
            .map_err(|rejection| GeminiError::bad_request(rejection.to_string()))?;

        // Model and rpc live in the last path segment as `model:rpc`.
        let last_seg = path
            .split('/')
            .next_back()
            .ok_or_else(|| GeminiError::bad_request("model not found in path"))?;
        let (model, rpc) = match last_seg.split_once(':') {
            Some((model, rpc)) => (model.to_string(), rpc),
            None => (last_seg.to_string(), "generateContent"),
        };
        if !matches!(rpc, "generateContent" | "streamGenerateContent") {
            return Err(GeminiError::bad_request(format!("unsupported rpc: {rpc}")));
        }
        let stream = rpc == "streamGenerateContent";

        let Json(body) = Json::<GeminiGenerateContentRequest>::from_request(req, state).await?;

        Ok(GeminiPreprocess(body, GeminiContext { model, stream }))
    }
}

pub async fn generate(
    State(gateway): State<Gateway>,
    GeminiPreprocess(body, ctx): GeminiPreprocess,
) -> Result<Response, GeminiError> {
    let GeminiContext { model, stream } = ctx;
    if !gateway.cfg.upstream.model_list.contains(&model) {
        return Err(GeminiError::bad_request(format!(
            "unsupported model: {model}"
        )));
    }

    let upstream_request = convert_request(body, &gateway.cfg.convert, &gateway.names)
        .map_err(GeminiError::bad_request)?;

    if gateway.cfg.basic.debug_dump {
        with_pretty_json_debug(&upstream_request, |pretty| {
            debug!(channel = "gemini", req.model = %model, req.stream = stream, body = %pretty, "Converted upstream request");
        });
    }

    let upstream_streamed = stream || gateway.cfg.relay.fake_non_stream;
    let (lease, upstream_resp) = gateway
        .dispatcher
        .dispatch(&model, upstream_streamed, &upstream_request)
        .await?;

    let pump_ctx = PumpContext {
        names: gateway.names.clone(),
        sigcache: gateway.sigcache.clone(),
        quota: gateway.quota.clone(),
        cred_id: lease.id.clone(),
        session_id: lease.session_id.clone(),
        model: model.clone(),
        // The Gemini dialect passes inlineData parts through untouched.
        sink: None,
        idle_timeout: Duration::from_secs(gateway.cfg.upstream.idle_timeout_secs),
    };

    if stream {
        let events = spawn_sse_pump(upstream_resp, Emitter::Gemini(GeminiEmitter::new()), pump_ctx);
        let stream = heartbeat_stream(
            events.map(Ok::<_, Infallible>),
            gateway.cfg.relay.heartbeat_ms,
            GeminiEmitter::heartbeat,
        );
        return Ok(Sse::new(stream).into_response());
    }

    let state = collect_response(upstream_resp, upstream_streamed, &pump_ctx)
        .await
        .map_err(GeminiError::StreamProtocol)?;
    Ok(Json(final_response(&state)).into_response())
}
