use super::{ToolNameCache, merge_system_instruction, resolve_thinking};
use crate::config::ConvertConfig;
use crate::relay::{Delta, RelayState};
use axum::response::sse::Event;
use castor_schema::claude::{
    ClaudeContentBlock, ClaudeMessagesRequest, ClaudeMessagesResponse, ClaudeStreamDelta,
    ClaudeStreamEvent, ClaudeSystem, ClaudeToolResultContent, ClaudeUsage, ResponseContentBlock,
    StartContentBlock,
};
use castor_schema::gemini::{
    Content, FunctionCall, FunctionDeclaration, FunctionResponse, GeminiGenerateContentRequest,
    InlineData, Part, Tool,
};
use serde_json::{Value, json};
use std::collections::HashMap;
use tracing::{debug, warn};
use uuid::Uuid;

/// Convert a Claude messages request into the canonical upstream request
/// body.
pub fn convert_request(
    req: &ClaudeMessagesRequest,
    cfg: &ConvertConfig,
    names: &ToolNameCache,
) -> Result<GeminiGenerateContentRequest, String> {
    if req.model.trim().is_empty() {
        return Err("model is required".to_string());
    }

    let caller_system = match &req.system {
        Some(system) => vec![system.text()],
        None => Vec::new(),
    };

    let mut out = GeminiGenerateContentRequest {
        system_instruction: merge_system_instruction(cfg, &caller_system),
        ..GeminiGenerateContentRequest::default()
    };

    let mut call_names: HashMap<String, String> = HashMap::new();
    let mut images_used = 0usize;

    for msg in &req.messages {
        let parts = match &msg.content {
            ClaudeSystem::Text(text) => vec![Part::from_text(text.clone())],
            ClaudeSystem::Blocks(blocks) => convert_blocks(
                blocks,
                names,
                &mut call_names,
                cfg.max_inline_images,
                &mut images_used,
            )?,
        };
        let parts = if parts.is_empty() {
            vec![Part::from_text(String::new())]
        } else {
            parts
        };
        out.contents.push(match msg.role.as_str() {
            "assistant" => Content::model(parts),
            _ => Content::user(parts),
        });
    }

    if let Some(tools) = &req.tools {
        let declarations: Vec<FunctionDeclaration> = tools
            .iter()
            .map(|tool| FunctionDeclaration {
                name: names.register(&tool.name),
                description: tool.description.clone(),
                parameters: tool.input_schema.clone(),
                parameters_json_schema: None,
                extra: std::collections::BTreeMap::new(),
            })
            .collect();
        if !declarations.is_empty() {
            out.tools = Some(vec![Tool::from_declarations(declarations)]);
        }
    }

    let explicit_budget = req.thinking.as_ref().map(|thinking| {
        if thinking.thinking_type == "enabled" {
            thinking.budget_tokens.unwrap_or(cfg.default_thinking_budget)
        } else {
            0
        }
    });

    let gc = out.generation_config_mut();
    gc.temperature = req.temperature;
    gc.top_p = req.top_p;
    gc.top_k = req.top_k;
    gc.max_output_tokens = (req.max_tokens > 0).then_some(req.max_tokens);
    gc.thinking_config = Some(resolve_thinking(
        None,
        explicit_budget,
        cfg.default_thinking_budget,
    ));

    Ok(out)
}

fn convert_blocks(
    blocks: &[ClaudeContentBlock],
    names: &ToolNameCache,
    call_names: &mut HashMap<String, String>,
    max_images: usize,
    images_used: &mut usize,
) -> Result<Vec<Part>, String> {
    let mut parts = Vec::new();
    for block in blocks {
        match block.block_type.as_str() {
            "text" => {
                if let Some(text) = &block.text {
                    parts.push(Part::from_text(text.clone()));
                }
            }
            "thinking" => {
                if let Some(thinking) = &block.thinking {
                    parts.push(Part::thought_text(thinking.clone(), block.signature.clone()));
                }
            }
            "redacted_thinking" => {
                // Opaque; nothing the upstream can reuse.
                debug!("Dropping redacted_thinking block");
            }
            "image" => {
                let Some(source) = &block.source else {
                    continue;
                };
                if source.source_type != "base64" {
                    debug!("Skipping non-base64 image source");
                    continue;
                }
                if *images_used >= max_images {
                    debug!(max_images, "Inline image cap reached; dropping image");
                    continue;
                }
                let (Some(media_type), Some(data)) = (&source.media_type, &source.data) else {
                    continue;
                };
                *images_used += 1;
                parts.push(Part {
                    inline_data: Some(InlineData {
                        mime_type: media_type.clone(),
                        data: data.clone(),
                    }),
                    ..Part::default()
                });
            }
            "tool_use" => {
                let (Some(id), Some(name)) = (&block.id, &block.name) else {
                    return Err("tool_use block missing id or name".to_string());
                };
                let upstream_name = names.register(name);
                call_names.insert(id.clone(), upstream_name.clone());
                parts.push(Part {
                    function_call: Some(FunctionCall {
                        id: Some(id.clone()),
                        name: upstream_name,
                        args: block.input.clone().unwrap_or(Value::Null),
                    }),
                    ..Part::default()
                });
            }
            "tool_result" => {
                let Some(call_id) = &block.tool_use_id else {
                    return Err("tool_result block missing tool_use_id".to_string());
                };
                let Some(upstream_name) = call_names.get(call_id).cloned() else {
                    return Err(format!("tool_result references unknown call id {call_id}"));
                };
                let text = block
                    .content
                    .as_ref()
                    .map(ClaudeToolResultContent::text)
                    .unwrap_or_default();
                let response = match serde_json::from_str::<Value>(&text) {
                    Ok(Value::Object(map)) => Value::Object(map),
                    _ => json!({"result": text}),
                };
                parts.push(Part {
                    function_response: Some(FunctionResponse {
                        id: Some(call_id.clone()),
                        name: upstream_name,
                        response,
                    }),
                    ..Part::default()
                });
            }
            other => {
                warn!(block_type = %other, "Unsupported Claude content block");
            }
        }
    }
    Ok(parts)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Thinking,
    Text,
    Tool,
}

/// Streaming emitter for the Claude dialect: manages `content_block_*`
/// indices over relay deltas.
pub struct ClaudeEmitter {
    id: String,
    model: String,
    next_index: u32,
    current: Option<(u32, BlockKind)>,
}

impl ClaudeEmitter {
    pub fn new(model: &str) -> Self {
        Self {
            id: format!("msg_{}", Uuid::new_v4().simple()),
            model: model.to_string(),
            next_index: 0,
            current: None,
        }
    }

    fn event(payload: &ClaudeStreamEvent) -> Event {
        match Event::default().event(payload.event_name()).json_data(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Claude SSE payload serialization failed");
                Event::default().comment("serialization-error")
            }
        }
    }

    pub fn start(&mut self) -> Vec<Event> {
        vec![Self::event(&ClaudeStreamEvent::MessageStart {
            message: json!({
                "id": self.id,
                "type": "message",
                "role": "assistant",
                "model": self.model,
                "content": [],
                "stop_reason": null,
                "stop_sequence": null,
                "usage": {"input_tokens": 0, "output_tokens": 0}
            }),
        })]
    }

    fn open_block(&mut self, kind: BlockKind, block: StartContentBlock, out: &mut Vec<Event>) -> u32 {
        let index = self.next_index;
        self.next_index += 1;
        self.current = Some((index, kind));
        out.push(Self::event(&ClaudeStreamEvent::ContentBlockStart {
            index,
            content_block: block,
        }));
        index
    }

    fn close_current(&mut self, state: &RelayState, out: &mut Vec<Event>) {
        let Some((index, kind)) = self.current.take() else {
            return;
        };
        if kind == BlockKind::Thinking {
            if let Some(signature) = &state.reasoning_signature {
                out.push(Self::event(&ClaudeStreamEvent::ContentBlockDelta {
                    index,
                    delta: ClaudeStreamDelta::SignatureDelta {
                        signature: signature.clone(),
                    },
                }));
            }
        }
        out.push(Self::event(&ClaudeStreamEvent::ContentBlockStop { index }));
    }

    fn ensure_block(
        &mut self,
        kind: BlockKind,
        state: &RelayState,
        out: &mut Vec<Event>,
        block: impl FnOnce() -> StartContentBlock,
    ) -> u32 {
        match self.current {
            Some((index, current_kind)) if current_kind == kind && kind != BlockKind::Tool => index,
            _ => {
                self.close_current(state, out);
                self.open_block(kind, block(), out)
            }
        }
    }

    pub fn on_deltas(&mut self, deltas: &[Delta], state: &RelayState) -> Vec<Event> {
        let mut out = Vec::new();
        for delta in deltas {
            match delta {
                Delta::Reasoning(text) => {
                    let index = self.ensure_block(BlockKind::Thinking, state, &mut out, || {
                        StartContentBlock {
                            block_type: "thinking".to_string(),
                            thinking: Some(String::new()),
                            ..StartContentBlock::default()
                        }
                    });
                    out.push(Self::event(&ClaudeStreamEvent::ContentBlockDelta {
                        index,
                        delta: ClaudeStreamDelta::ThinkingDelta {
                            thinking: text.clone(),
                        },
                    }));
                }
                Delta::Content(text) => {
                    let index = self.ensure_block(BlockKind::Text, state, &mut out, || {
                        StartContentBlock {
                            block_type: "text".to_string(),
                            text: Some(String::new()),
                            ..StartContentBlock::default()
                        }
                    });
                    out.push(Self::event(&ClaudeStreamEvent::ContentBlockDelta {
                        index,
                        delta: ClaudeStreamDelta::TextDelta { text: text.clone() },
                    }));
                }
                Delta::Image { url } => {
                    let index = self.ensure_block(BlockKind::Text, state, &mut out, || {
                        StartContentBlock {
                            block_type: "text".to_string(),
                            text: Some(String::new()),
                            ..StartContentBlock::default()
                        }
                    });
                    out.push(Self::event(&ClaudeStreamEvent::ContentBlockDelta {
                        index,
                        delta: ClaudeStreamDelta::TextDelta {
                            text: format!("![image]({url})"),
                        },
                    }));
                }
                Delta::ToolCallStart { index } => {
                    let accum = &state.tool_calls[*index];
                    self.close_current(state, &mut out);
                    self.open_block(
                        BlockKind::Tool,
                        StartContentBlock {
                            block_type: "tool_use".to_string(),
                            id: Some(accum.id.clone()),
                            name: Some(accum.name.clone()),
                            input: Some(json!({})),
                            ..StartContentBlock::default()
                        },
                        &mut out,
                    );
                }
                Delta::ToolCallArgs { fragment, .. } => {
                    if let Some((index, BlockKind::Tool)) = self.current {
                        out.push(Self::event(&ClaudeStreamEvent::ContentBlockDelta {
                            index,
                            delta: ClaudeStreamDelta::InputJsonDelta {
                                partial_json: fragment.clone(),
                            },
                        }));
                    }
                }
            }
        }
        out
    }

    /// Close the open block, emit `message_delta` + `message_stop`.
    pub fn finish(&mut self, state: &RelayState) -> Vec<Event> {
        let mut out = Vec::new();
        self.close_current(state, &mut out);
        out.push(Self::event(&ClaudeStreamEvent::MessageDelta {
            delta: json!({
                "stop_reason": stop_reason(state),
                "stop_sequence": null
            }),
            usage: usage_from_state(state),
        }));
        out.push(Self::event(&ClaudeStreamEvent::MessageStop));
        out
    }

    pub fn heartbeat() -> Event {
        Self::event(&ClaudeStreamEvent::Ping)
    }
}

/// Build the single non-stream response from collected state.
pub fn final_response(model: &str, state: &RelayState) -> ClaudeMessagesResponse {
    let mut content = Vec::new();
    if !state.reasoning_text.is_empty() {
        content.push(ResponseContentBlock::thinking(
            state.reasoning_text.clone(),
            state.reasoning_signature.clone(),
        ));
    }
    let text = state.final_content();
    if !text.is_empty() {
        content.push(ResponseContentBlock::text(text));
    }
    for accum in &state.tool_calls {
        let input = serde_json::from_str::<Value>(&accum.args).unwrap_or(json!({}));
        content.push(ResponseContentBlock::tool_use(
            accum.id.clone(),
            accum.name.clone(),
            input,
        ));
    }

    ClaudeMessagesResponse {
        id: format!("msg_{}", Uuid::new_v4().simple()),
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        model: model.to_string(),
        content,
        stop_reason: Some(stop_reason(state).to_string()),
        stop_sequence: None,
        usage: usage_from_state(state),
    }
}

fn stop_reason(state: &RelayState) -> &'static str {
    if state.had_tool_calls() {
        "tool_use"
    } else if state.finish_reason.as_deref() == Some("MAX_TOKENS") {
        "max_tokens"
    } else {
        "end_turn"
    }
}

fn usage_from_state(state: &RelayState) -> ClaudeUsage {
    state.usage.map_or(ClaudeUsage::default(), |usage| ClaudeUsage {
        input_tokens: usage.prompt_token_count,
        output_tokens: usage
            .candidates_token_count
            .saturating_add(usage.thoughts_token_count.unwrap_or(0)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::ToolNameCache;
    use serde_json::json;

    fn cfg() -> ConvertConfig {
        ConvertConfig::default()
    }

    fn parse(req: serde_json::Value) -> ClaudeMessagesRequest {
        serde_json::from_value(req).unwrap()
    }

    #[test]
    fn system_and_turns_convert() {
        let names = ToolNameCache::new();
        let req = parse(json!({
            "model": "gemini-2.5-pro",
            "max_tokens": 512,
            "system": "be terse",
            "messages": [
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": "hello"}
            ]
        }));

        let out = convert_request(&req, &cfg(), &names).unwrap();
        assert_eq!(
            out.system_instruction.unwrap().parts[0].text.as_deref(),
            Some("be terse")
        );
        assert_eq!(out.contents[0].role.as_deref(), Some("user"));
        assert_eq!(out.contents[1].role.as_deref(), Some("model"));
        assert_eq!(
            out.generation_config.unwrap().max_output_tokens,
            Some(512)
        );
    }

    #[test]
    fn thinking_blocks_keep_their_signature() {
        let names = ToolNameCache::new();
        let req = parse(json!({
            "model": "gemini-2.5-pro",
            "max_tokens": 1,
            "messages": [{"role": "assistant", "content": [
                {"type": "thinking", "thinking": "hmm", "signature": "sig_1"},
                {"type": "text", "text": "answer"}
            ]}]
        }));

        let out = convert_request(&req, &cfg(), &names).unwrap();
        let parts = &out.contents[0].parts;
        assert_eq!(parts[0].thought, Some(true));
        assert_eq!(parts[0].thought_signature.as_deref(), Some("sig_1"));
    }

    #[test]
    fn tool_use_and_result_roundtrip() {
        let names = ToolNameCache::new();
        let req = parse(json!({
            "model": "gemini-2.5-pro",
            "max_tokens": 1,
            "messages": [
                {"role": "assistant", "content": [
                    {"type": "tool_use", "id": "toolu_1", "name": "get weather", "input": {"city": "Berlin"}}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "toolu_1", "content": "15C"}
                ]}
            ]
        }));

        let out = convert_request(&req, &cfg(), &names).unwrap();
        let call = out.contents[0].parts[0].function_call.as_ref().unwrap();
        assert_eq!(call.name, "get_weather");

        let response = out.contents[1].parts[0].function_response.as_ref().unwrap();
        assert_eq!(response.name, "get_weather");
        assert_eq!(response.response, json!({"result": "15C"}));
    }

    #[test]
    fn disabled_thinking_maps_to_zero_budget() {
        let names = ToolNameCache::new();
        let req = parse(json!({
            "model": "gemini-2.5-pro",
            "max_tokens": 1,
            "messages": [],
            "thinking": {"type": "disabled"}
        }));

        let out = convert_request(&req, &cfg(), &names).unwrap();
        let tc = out.generation_config.unwrap().thinking_config.unwrap();
        assert_eq!(tc.thinking_budget, Some(0));
        assert_eq!(tc.include_thoughts, Some(false));
    }

    #[test]
    fn emitter_event_sequence_is_wellformed() {
        let mut emitter = ClaudeEmitter::new("gemini-2.5-pro");
        let mut state = RelayState::new();

        let start = emitter.start();
        assert_eq!(start.len(), 1);

        state.reasoning_text = "hmm".to_string();
        let thinking = emitter.on_deltas(&[Delta::Reasoning("hmm".to_string())], &state);
        // content_block_start + thinking delta
        assert_eq!(thinking.len(), 2);

        state.content_text = "hi".to_string();
        state.reasoning_signature = Some("sig".to_string());
        let text = emitter.on_deltas(&[Delta::Content("hi".to_string())], &state);
        // signature_delta + stop + start + text delta
        assert_eq!(text.len(), 4);

        let finish = emitter.finish(&state);
        // stop + message_delta + message_stop
        assert_eq!(finish.len(), 3);
    }

    #[test]
    fn final_response_orders_blocks() {
        let mut state = RelayState::new();
        state.reasoning_text = "why".to_string();
        state.reasoning_signature = Some("sig".to_string());
        state.content_text = "answer".to_string();
        state.tool_calls.push(crate::relay::ToolCallAccum {
            id: "toolu_1".to_string(),
            name: "lookup".to_string(),
            args: "{\"q\":1}".to_string(),
            signature: None,
        });

        let resp = final_response("gemini-2.5-pro", &state);
        assert_eq!(resp.content.len(), 3);
        assert_eq!(resp.content[0].block_type, "thinking");
        assert_eq!(resp.content[1].block_type, "text");
        assert_eq!(resp.content[2].block_type, "tool_use");
        assert_eq!(resp.stop_reason.as_deref(), Some("tool_use"));
    }
}
