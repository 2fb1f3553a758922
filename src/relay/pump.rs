use super::{Delta, ImageSink, RelayState};
use crate::convert::claude::ClaudeEmitter;
use crate::convert::gemini::GeminiEmitter;
use crate::convert::openai::OpenaiEmitter;
use crate::convert::ToolNameCache;
use crate::ledgers::{ModelGroup, QuotaLedger};
use crate::sigcache::SignatureCache;
use axum::response::sse::Event;
use castor_schema::codeassist::CodeAssistResponseBody;
use castor_schema::gemini::GeminiResponseBody;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

/// Per-dialect event emitter driven by the shared pump.
pub enum Emitter {
    Openai(OpenaiEmitter),
    Claude(ClaudeEmitter),
    Gemini(GeminiEmitter),
}

impl Emitter {
    fn start(&mut self) -> Vec<Event> {
        match self {
            Emitter::Openai(e) => e.start(),
            Emitter::Claude(e) => e.start(),
            Emitter::Gemini(_) => Vec::new(),
        }
    }

    fn on_event(
        &mut self,
        body: &GeminiResponseBody,
        deltas: &[Delta],
        state: &RelayState,
        names: &ToolNameCache,
    ) -> Vec<Event> {
        match self {
            Emitter::Openai(e) => e.on_deltas(deltas, state),
            Emitter::Claude(e) => e.on_deltas(deltas, state),
            Emitter::Gemini(e) => e.on_event(body, names),
        }
    }

    fn finish(&mut self, state: &RelayState) -> Vec<Event> {
        match self {
            Emitter::Openai(e) => e.finish(state),
            Emitter::Claude(e) => e.finish(state),
            Emitter::Gemini(e) => e.finish(state),
        }
    }

    pub fn heartbeat(&self) -> Event {
        match self {
            Emitter::Openai(_) => OpenaiEmitter::heartbeat(),
            Emitter::Claude(_) => ClaudeEmitter::heartbeat(),
            Emitter::Gemini(_) => GeminiEmitter::heartbeat(),
        }
    }
}

/// Everything the pump needs besides the upstream response itself.
pub struct PumpContext {
    pub names: Arc<ToolNameCache>,
    pub sigcache: SignatureCache,
    pub quota: Arc<QuotaLedger>,
    pub cred_id: String,
    pub session_id: String,
    pub model: String,
    pub sink: Option<Arc<dyn ImageSink>>,
    pub idle_timeout: Duration,
}

impl PumpContext {
    fn is_image_model(&self) -> bool {
        ModelGroup::for_model(&self.model) == ModelGroup::Banana
    }

    /// Signature write-back under the active policy. Runs at stream end and
    /// after caller aborts alike: the upstream has already committed to the
    /// captured continuation.
    fn write_back(&self, state: &RelayState) {
        if !self
            .sigcache
            .should_store(state.had_tool_calls(), self.is_image_model())
        {
            return;
        }
        if let Some(signature) = state.signature_for_writeback() {
            self.sigcache.store(
                &self.session_id,
                &self.model,
                signature,
                &state.reasoning_text,
            );
        }
    }

    fn record_success(&self) {
        self.quota
            .record_request(&self.cred_id, ModelGroup::for_model(&self.model));
    }
}

/// Spawn the per-request SSE pump task and hand back the caller-side event
/// stream. Dropping the returned stream (caller abort) stops the pump and
/// the upstream read on its next send.
pub fn spawn_sse_pump(
    resp: reqwest::Response,
    mut emitter: Emitter,
    ctx: PumpContext,
) -> ReceiverStream<Event> {
    let (tx, rx) = mpsc::channel::<Event>(32);

    tokio::spawn(async move {
        let mut state = RelayState::new();
        let mut caller_connected = true;

        'pump: {
            for event in emitter.start() {
                if tx.send(event).await.is_err() {
                    caller_connected = false;
                    break 'pump;
                }
            }

            let stream = resp.bytes_stream().eventsource();
            tokio::pin!(stream);

            loop {
                let next = tokio::time::timeout(ctx.idle_timeout, stream.next()).await;
                let upstream_event = match next {
                    // Idle timeout after bytes have flowed is terminal; close
                    // with the dialect's terminal event, never retry.
                    Err(_) => {
                        warn!(model = %ctx.model, "Upstream stream idle timeout");
                        break;
                    }
                    Ok(None) => break,
                    Ok(Some(Err(e))) => {
                        warn!(error = %e, model = %ctx.model, "Upstream stream read failed");
                        break;
                    }
                    Ok(Some(Ok(event))) => event,
                };

                if upstream_event.data.is_empty() {
                    continue;
                }
                let body: GeminiResponseBody =
                    match serde_json::from_str::<CodeAssistResponseBody>(&upstream_event.data) {
                        Ok(envelope) => envelope.into(),
                        Err(e) => {
                            debug!(error = %e, "Skipping unparseable SSE data frame");
                            continue;
                        }
                    };

                let deltas = state.absorb(&body, &ctx.names, ctx.sink.as_deref()).await;
                for event in emitter.on_event(&body, &deltas, &state, &ctx.names) {
                    if tx.send(event).await.is_err() {
                        caller_connected = false;
                        break 'pump;
                    }
                }
            }

            for event in emitter.finish(&state) {
                if tx.send(event).await.is_err() {
                    caller_connected = false;
                    break 'pump;
                }
            }
        }

        // Partial signatures survive an abort; the success counter does not.
        ctx.write_back(&state);
        if caller_connected {
            ctx.record_success();
        } else {
            debug!(model = %ctx.model, "Caller aborted; upstream pump stopped");
        }
    });

    ReceiverStream::new(rx)
}

/// Collect a full upstream response into relay state: either by draining the
/// SSE stream (the fake-non-stream shim) or by parsing the unary body.
pub async fn collect_response(
    resp: reqwest::Response,
    streamed: bool,
    ctx: &PumpContext,
) -> Result<RelayState, String> {
    let mut state = RelayState::new();

    if streamed {
        let stream = resp.bytes_stream().eventsource();
        tokio::pin!(stream);

        loop {
            let next = tokio::time::timeout(ctx.idle_timeout, stream.next()).await;
            let upstream_event = match next {
                Err(_) => return Err("stream idle timeout".to_string()),
                Ok(None) => break,
                Ok(Some(Err(e))) => return Err(e.to_string()),
                Ok(Some(Ok(event))) => event,
            };
            if upstream_event.data.is_empty() {
                continue;
            }
            let body: GeminiResponseBody =
                match serde_json::from_str::<CodeAssistResponseBody>(&upstream_event.data) {
                    Ok(envelope) => envelope.into(),
                    Err(e) => {
                        debug!(error = %e, "Skipping unparseable SSE data frame");
                        continue;
                    }
                };
            state.absorb(&body, &ctx.names, ctx.sink.as_deref()).await;
        }
    } else {
        let body: CodeAssistResponseBody = resp.json().await.map_err(|e| e.to_string())?;
        let body: GeminiResponseBody = body.into();
        state.absorb(&body, &ctx.names, ctx.sink.as_deref()).await;
    }

    ctx.write_back(&state);
    ctx.record_success();
    Ok(state)
}
