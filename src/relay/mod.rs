//! Stream relay: a pump over the upstream SSE stream that folds events into
//! per-request state, feeds per-dialect emitters, injects heartbeats, and
//! shims non-stream callers by collecting the stream.

mod heartbeat;
mod images;
mod pump;

pub use heartbeat::heartbeat_stream;
pub use images::{FsImageSink, ImageSink};
pub use pump::{Emitter, PumpContext, collect_response, spawn_sse_pump};

use crate::convert::ToolNameCache;
use base64::Engine as _;
use castor_schema::gemini::{GeminiResponseBody, UsageMetadata};
use tracing::warn;

/// One in-flight tool call being assembled from stream fragments.
#[derive(Debug, Clone)]
pub struct ToolCallAccum {
    /// Call id as surfaced to the caller.
    pub id: String,
    /// Inbound-dialect tool name (recovered through the name cache).
    pub name: String,
    /// Concatenated argument JSON fragments.
    pub args: String,
    pub signature: Option<String>,
}

/// Ordered increment extracted from one upstream event.
#[derive(Debug, Clone)]
pub enum Delta {
    Reasoning(String),
    Content(String),
    /// A new tool-call accumulator opened at `index`.
    ToolCallStart { index: usize },
    ToolCallArgs { index: usize, fragment: String },
    /// An inline image was persisted; emitters surface it as markdown.
    Image { url: String },
}

/// Accumulated response state for one caller request.
#[derive(Debug, Default)]
pub struct RelayState {
    pub reasoning_text: String,
    pub content_text: String,
    pub reasoning_signature: Option<String>,
    /// Last tool-call signature seen; takes precedence at write-back.
    pub tool_signature: Option<String>,
    pub tool_calls: Vec<ToolCallAccum>,
    pub image_urls: Vec<String>,
    pub usage: Option<UsageMetadata>,
    pub finish_reason: Option<String>,
    synthesized_call_ids: usize,
}

impl RelayState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one upstream event into the state, returning the ordered deltas
    /// it contributed. Only the first candidate is relayed.
    pub async fn absorb(
        &mut self,
        body: &GeminiResponseBody,
        names: &ToolNameCache,
        sink: Option<&dyn ImageSink>,
    ) -> Vec<Delta> {
        if let Some(usage) = body.usage_metadata {
            self.usage = Some(usage);
        }

        let mut deltas = Vec::new();
        let Some(candidate) = body.candidates.first() else {
            return deltas;
        };
        if let Some(reason) = &candidate.finish_reason {
            self.finish_reason = Some(reason.clone());
        }
        let Some(content) = &candidate.content else {
            return deltas;
        };

        for part in &content.parts {
            if part.thought == Some(true) {
                if let Some(signature) = &part.thought_signature {
                    self.reasoning_signature = Some(signature.clone());
                }
                if let Some(text) = &part.text {
                    if !text.is_empty() {
                        self.reasoning_text.push_str(text);
                        deltas.push(Delta::Reasoning(text.clone()));
                    }
                }
                continue;
            }

            if let Some(text) = &part.text {
                if !text.is_empty() {
                    self.content_text.push_str(text);
                    deltas.push(Delta::Content(text.clone()));
                }
                continue;
            }

            if let Some(call) = &part.function_call {
                if let Some(signature) = &part.thought_signature {
                    self.tool_signature = Some(signature.clone());
                }
                let fragment = match &call.args {
                    serde_json::Value::String(s) => s.clone(),
                    serde_json::Value::Null => String::new(),
                    other => serde_json::to_string(other).unwrap_or_default(),
                };

                let call_id = call.id.clone().unwrap_or_else(|| {
                    self.synthesized_call_ids += 1;
                    format!("call_{:04}", self.synthesized_call_ids)
                });

                let index = match self.tool_calls.iter().position(|tc| tc.id == call_id) {
                    Some(index) => index,
                    None => {
                        self.tool_calls.push(ToolCallAccum {
                            id: call_id,
                            name: names.restore(&call.name),
                            args: String::new(),
                            signature: part.thought_signature.clone(),
                        });
                        let index = self.tool_calls.len() - 1;
                        deltas.push(Delta::ToolCallStart { index });
                        index
                    }
                };

                if let Some(signature) = &part.thought_signature {
                    self.tool_calls[index].signature = Some(signature.clone());
                }
                if !fragment.is_empty() {
                    self.tool_calls[index].args.push_str(&fragment);
                    deltas.push(Delta::ToolCallArgs {
                        index,
                        fragment,
                    });
                }
                continue;
            }

            if let Some(inline) = &part.inline_data {
                if inline.mime_type.starts_with("image/") {
                    let Some(sink) = sink else {
                        continue;
                    };
                    match base64::engine::general_purpose::STANDARD.decode(&inline.data) {
                        Ok(bytes) => match sink.save(&inline.mime_type, bytes).await {
                            Ok(url) => {
                                self.image_urls.push(url.clone());
                                deltas.push(Delta::Image { url });
                            }
                            Err(e) => warn!(error = %e, "Image sink save failed"),
                        },
                        Err(e) => warn!(error = %e, "Inline image base64 decode failed"),
                    }
                }
            }
        }

        deltas
    }

    pub fn had_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// The signature to write back: tool signatures beat reasoning ones.
    pub fn signature_for_writeback(&self) -> Option<&str> {
        self.tool_signature
            .as_deref()
            .or(self.reasoning_signature.as_deref())
    }

    /// Visible text plus markdown for any saved images; image-only
    /// responses synthesize `![image](URL)` content.
    pub fn final_content(&self) -> String {
        let mut out = self.content_text.clone();
        for url in &self.image_urls {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&format!("![image]({url})"));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(value: serde_json::Value) -> GeminiResponseBody {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn absorb_orders_reasoning_content_and_tools() {
        let names = ToolNameCache::new();
        let mut state = RelayState::new();

        let deltas = state
            .absorb(
                &body(json!({
                    "candidates": [{
                        "content": {"role": "model", "parts": [
                            {"thought": true, "text": "thinking… ", "thoughtSignature": "sig_r"},
                            {"text": "Hello"},
                            {"functionCall": {"name": "get_weather", "args": {"city": "Berlin"}}}
                        ]},
                        "finishReason": "STOP"
                    }],
                    "usageMetadata": {"promptTokenCount": 5, "candidatesTokenCount": 7, "totalTokenCount": 12}
                })),
                &names,
                None,
            )
            .await;

        assert_eq!(deltas.len(), 4);
        assert!(matches!(&deltas[0], Delta::Reasoning(t) if t == "thinking… "));
        assert!(matches!(&deltas[1], Delta::Content(t) if t == "Hello"));
        assert!(matches!(deltas[2], Delta::ToolCallStart { index: 0 }));
        assert!(matches!(&deltas[3], Delta::ToolCallArgs { index: 0, fragment } if fragment.contains("Berlin")));

        assert_eq!(state.reasoning_signature.as_deref(), Some("sig_r"));
        assert_eq!(state.finish_reason.as_deref(), Some("STOP"));
        assert_eq!(state.usage.unwrap().total_token_count, 12);
        assert!(state.had_tool_calls());
    }

    #[tokio::test]
    async fn tool_fragments_grow_one_accumulator() {
        let names = ToolNameCache::new();
        let mut state = RelayState::new();

        state
            .absorb(
                &body(json!({"candidates": [{"content": {"parts": [
                    {"functionCall": {"id": "c1", "name": "t", "args": "{\"a\":"}}
                ]}}]})),
                &names,
                None,
            )
            .await;
        state
            .absorb(
                &body(json!({"candidates": [{"content": {"parts": [
                    {"functionCall": {"id": "c1", "name": "t", "args": "1}"}}
                ]}}]})),
                &names,
                None,
            )
            .await;

        assert_eq!(state.tool_calls.len(), 1);
        assert_eq!(state.tool_calls[0].args, "{\"a\":1}");
    }

    #[tokio::test]
    async fn tool_signature_wins_writeback() {
        let names = ToolNameCache::new();
        let mut state = RelayState::new();

        state
            .absorb(
                &body(json!({"candidates": [{"content": {"parts": [
                    {"thought": true, "text": "r", "thoughtSignature": "sig_reasoning"},
                    {"functionCall": {"name": "t", "args": {}}, "thoughtSignature": "sig_tool"}
                ]}}]})),
                &names,
                None,
            )
            .await;

        assert_eq!(state.signature_for_writeback(), Some("sig_tool"));
    }

    #[tokio::test]
    async fn restored_names_flow_through() {
        let names = ToolNameCache::new();
        let upstream = names.register("repo.search/files");
        let mut state = RelayState::new();

        state
            .absorb(
                &body(json!({"candidates": [{"content": {"parts": [
                    {"functionCall": {"name": upstream, "args": {}}}
                ]}}]})),
                &names,
                None,
            )
            .await;

        assert_eq!(state.tool_calls[0].name, "repo.search/files");
    }

    #[test]
    fn image_only_response_synthesizes_markdown() {
        let mut state = RelayState::new();
        state.image_urls.push("/images/a.png".to_string());
        assert_eq!(state.final_content(), "![image](/images/a.png)");

        state.content_text = "caption".to_string();
        assert_eq!(state.final_content(), "caption\n![image](/images/a.png)");
    }
}
