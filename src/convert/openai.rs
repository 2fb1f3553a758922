use super::{
    ToolNameCache, json_mime_for_model, merge_system_instruction, resolve_thinking, sse_json,
};
use crate::config::ConvertConfig;
use crate::relay::{Delta, RelayState};
use axum::response::sse::Event;
use base64::Engine as _;
use castor_schema::gemini::{
    Content, FunctionCall, FunctionDeclaration, FunctionResponse, GeminiGenerateContentRequest,
    InlineData, Part, Tool,
};
use castor_schema::openai::{
    ChatChoice, ChatCompletion, ChatCompletionChunk, ChatCompletionsRequest, ChatContent,
    ChatDelta, ChatMessage, ChatUsage, DeltaToolCall, DeltaToolCallFunction, ResponseMessage,
    ToolCall, ToolCallFunction,
};
use chrono::Utc;
use serde_json::{Value, json};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

/// Convert an OpenAI chat-completions request into the canonical upstream
/// request body.
pub fn convert_request(
    req: &ChatCompletionsRequest,
    cfg: &ConvertConfig,
    names: &ToolNameCache,
) -> Result<GeminiGenerateContentRequest, String> {
    if req.model.trim().is_empty() {
        return Err("model is required".to_string());
    }

    // Contiguous head run of system/developer messages merges into the
    // system instruction; later system messages become user turns.
    let head_len = req
        .messages
        .iter()
        .take_while(|msg| is_system_role(&msg.role))
        .count();
    let caller_system: Vec<String> = req.messages[..head_len]
        .iter()
        .map(ChatMessage::text)
        .collect();

    let mut out = GeminiGenerateContentRequest {
        system_instruction: merge_system_instruction(cfg, &caller_system),
        ..GeminiGenerateContentRequest::default()
    };

    let mut call_names: HashMap<String, String> = HashMap::new();
    let mut images_used = 0usize;

    for msg in &req.messages[head_len..] {
        match msg.role.as_str() {
            "assistant" => {
                out.contents
                    .push(convert_assistant(msg, names, &mut call_names));
            }
            "tool" => {
                out.contents.push(convert_tool_result(msg, &call_names, names)?);
            }
            // user, plus stray system messages mid-conversation.
            _ => {
                out.contents.push(convert_user(
                    msg,
                    cfg.max_inline_images,
                    &mut images_used,
                )?);
            }
        }
    }

    if let Some(tools) = &req.tools {
        let declarations: Vec<FunctionDeclaration> = tools
            .iter()
            .filter(|tool| tool.tool_type == "function")
            .map(|tool| FunctionDeclaration {
                name: names.register(&tool.function.name),
                description: tool.function.description.clone(),
                parameters: tool.function.parameters.clone(),
                parameters_json_schema: None,
                extra: std::collections::BTreeMap::new(),
            })
            .collect();
        if !declarations.is_empty() {
            out.tools = Some(vec![Tool::from_declarations(declarations)]);
        }
    }

    let gc = out.generation_config_mut();
    gc.temperature = req.temperature;
    gc.top_p = req.top_p;
    gc.max_output_tokens = req.max_completion_tokens.or(req.max_tokens);
    gc.thinking_config = Some(resolve_thinking(
        req.reasoning_effort.as_deref(),
        req.thinking_budget,
        cfg.default_thinking_budget,
    ));
    if req
        .response_format
        .as_ref()
        .is_some_and(|format| format.format_type == "json_object")
    {
        gc.response_mime_type = json_mime_for_model(&req.model);
    }

    Ok(out)
}

fn is_system_role(role: &str) -> bool {
    role == "system" || role == "developer"
}

fn convert_user(
    msg: &ChatMessage,
    max_images: usize,
    images_used: &mut usize,
) -> Result<Content, String> {
    let mut parts = Vec::new();
    match &msg.content {
        None => {}
        Some(ChatContent::Text(text)) => {
            parts.push(Part::from_text(text.clone()));
        }
        Some(ChatContent::Parts(content_parts)) => {
            for part in content_parts {
                match part.part_type.as_str() {
                    "text" => {
                        if let Some(text) = &part.text {
                            parts.push(Part::from_text(text.clone()));
                        }
                    }
                    "image_url" => {
                        let Some(image) = &part.image_url else {
                            continue;
                        };
                        if *images_used >= max_images {
                            debug!(max_images, "Inline image cap reached; dropping image");
                            continue;
                        }
                        let Some((mime, data)) = parse_data_url(&image.url) else {
                            debug!("Skipping non-data image URL");
                            continue;
                        };
                        *images_used += 1;
                        parts.push(Part {
                            inline_data: Some(InlineData {
                                mime_type: mime,
                                data,
                            }),
                            ..Part::default()
                        });
                    }
                    other => {
                        return Err(format!("unsupported content part type: {other}"));
                    }
                }
            }
        }
    }
    if parts.is_empty() {
        parts.push(Part::from_text(String::new()));
    }
    Ok(Content::user(parts))
}

fn convert_assistant(
    msg: &ChatMessage,
    names: &ToolNameCache,
    call_names: &mut HashMap<String, String>,
) -> Content {
    let mut parts = Vec::new();

    if let Some(reasoning) = &msg.reasoning_content {
        if !reasoning.is_empty() {
            // Signature reattachment happens after credential selection.
            parts.push(Part::thought_text(reasoning.clone(), None));
        }
    }

    let text = msg.text();
    if !text.is_empty() {
        parts.push(Part::from_text(text));
    }

    for call in msg.tool_calls.iter().flatten() {
        let upstream_name = names.register(&call.function.name);
        call_names.insert(call.id.clone(), upstream_name.clone());
        let args = serde_json::from_str::<Value>(&call.function.arguments)
            .unwrap_or_else(|_| Value::String(call.function.arguments.clone()));
        parts.push(Part {
            function_call: Some(FunctionCall {
                id: Some(call.id.clone()),
                name: upstream_name,
                args,
            }),
            ..Part::default()
        });
    }

    if parts.is_empty() {
        parts.push(Part::from_text(String::new()));
    }
    Content::model(parts)
}

fn convert_tool_result(
    msg: &ChatMessage,
    call_names: &HashMap<String, String>,
    names: &ToolNameCache,
) -> Result<Content, String> {
    let call_id = msg
        .tool_call_id
        .clone()
        .ok_or_else(|| "tool message missing tool_call_id".to_string())?;

    let upstream_name = call_names
        .get(&call_id)
        .cloned()
        .or_else(|| msg.name.as_deref().map(|name| names.register(name)))
        .ok_or_else(|| format!("tool result references unknown call id {call_id}"))?;

    let text = msg.text();
    let response = match serde_json::from_str::<Value>(&text) {
        Ok(Value::Object(map)) => Value::Object(map),
        _ => json!({"result": text}),
    };

    Ok(Content::user(vec![Part {
        function_response: Some(FunctionResponse {
            id: Some(call_id),
            name: upstream_name,
            response,
        }),
        ..Part::default()
    }]))
}

/// `data:<mime>;base64,<payload>` → (mime, payload). Validates the payload
/// decodes so garbage never reaches the upstream.
fn parse_data_url(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix("data:")?;
    let (mime, payload) = rest.split_once(";base64,")?;
    base64::engine::general_purpose::STANDARD
        .decode(payload)
        .ok()?;
    Some((mime.to_string(), payload.to_string()))
}

/// Streaming emitter for the OpenAI dialect.
pub struct OpenaiEmitter {
    id: String,
    created: i64,
    model: String,
}

impl OpenaiEmitter {
    pub fn new(model: &str) -> Self {
        Self {
            id: format!("chatcmpl-{}", Uuid::new_v4().simple()),
            created: Utc::now().timestamp(),
            model: model.to_string(),
        }
    }

    fn chunk(&self, delta: ChatDelta) -> Event {
        sse_json(&ChatCompletionChunk::delta(
            &self.id,
            self.created,
            &self.model,
            delta,
        ))
    }

    /// Opening role chunk.
    pub fn start(&mut self) -> Vec<Event> {
        vec![self.chunk(ChatDelta {
            role: Some("assistant".to_string()),
            ..ChatDelta::default()
        })]
    }

    pub fn on_deltas(&mut self, deltas: &[Delta], state: &RelayState) -> Vec<Event> {
        deltas
            .iter()
            .map(|delta| match delta {
                Delta::Reasoning(text) => self.chunk(ChatDelta {
                    reasoning_content: Some(text.clone()),
                    ..ChatDelta::default()
                }),
                Delta::Content(text) => self.chunk(ChatDelta {
                    content: Some(text.clone()),
                    ..ChatDelta::default()
                }),
                Delta::Image { url } => self.chunk(ChatDelta {
                    content: Some(format!("![image]({url})")),
                    ..ChatDelta::default()
                }),
                Delta::ToolCallStart { index } => {
                    let accum = &state.tool_calls[*index];
                    self.chunk(ChatDelta {
                        tool_calls: Some(vec![DeltaToolCall {
                            index: u32::try_from(*index).unwrap_or(0),
                            id: Some(accum.id.clone()),
                            call_type: Some("function".to_string()),
                            function: DeltaToolCallFunction {
                                name: Some(accum.name.clone()),
                                arguments: None,
                            },
                        }]),
                        ..ChatDelta::default()
                    })
                }
                Delta::ToolCallArgs { index, fragment } => self.chunk(ChatDelta {
                    tool_calls: Some(vec![DeltaToolCall {
                        index: u32::try_from(*index).unwrap_or(0),
                        id: None,
                        call_type: None,
                        function: DeltaToolCallFunction {
                            name: None,
                            arguments: Some(fragment.clone()),
                        },
                    }]),
                    ..ChatDelta::default()
                }),
            })
            .collect()
    }

    /// Finish chunk with usage, then the `[DONE]` sentinel.
    pub fn finish(&mut self, state: &RelayState) -> Vec<Event> {
        let finish = sse_json(&ChatCompletionChunk::finish(
            &self.id,
            self.created,
            &self.model,
            finish_reason(state),
            state.usage.map(usage_from_metadata),
        ));
        vec![finish, Event::default().data("[DONE]")]
    }

    /// SSE comment heartbeat.
    pub fn heartbeat() -> Event {
        Event::default().comment("heartbeat")
    }
}

/// Build the single non-stream response from collected state.
pub fn final_response(model: &str, state: &RelayState) -> ChatCompletion {
    let tool_calls: Option<Vec<ToolCall>> = state.had_tool_calls().then(|| {
        state
            .tool_calls
            .iter()
            .map(|accum| ToolCall {
                id: accum.id.clone(),
                call_type: "function".to_string(),
                function: ToolCallFunction {
                    name: accum.name.clone(),
                    arguments: accum.args.clone(),
                },
            })
            .collect()
    });

    let reasoning = (!state.reasoning_text.is_empty()).then(|| state.reasoning_text.clone());

    ChatCompletion {
        id: format!("chatcmpl-{}", Uuid::new_v4().simple()),
        object: "chat.completion".to_string(),
        created: Utc::now().timestamp(),
        model: model.to_string(),
        choices: vec![ChatChoice {
            index: 0,
            message: ResponseMessage {
                role: "assistant".to_string(),
                content: Some(state.final_content()),
                reasoning_content: reasoning,
                tool_calls,
            },
            finish_reason: Some(finish_reason(state).to_string()),
        }],
        usage: state.usage.map(usage_from_metadata),
    }
}

fn finish_reason(state: &RelayState) -> &'static str {
    if state.had_tool_calls() {
        "tool_calls"
    } else if state.finish_reason.as_deref() == Some("MAX_TOKENS") {
        "length"
    } else {
        "stop"
    }
}

fn usage_from_metadata(usage: castor_schema::gemini::UsageMetadata) -> ChatUsage {
    ChatUsage {
        prompt_tokens: usage.prompt_token_count,
        completion_tokens: usage
            .candidates_token_count
            .saturating_add(usage.thoughts_token_count.unwrap_or(0)),
        total_tokens: usage.total_token_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cfg() -> ConvertConfig {
        ConvertConfig::default()
    }

    fn parse(req: serde_json::Value) -> ChatCompletionsRequest {
        serde_json::from_value(req).unwrap()
    }

    #[test]
    fn head_system_run_merges_into_instruction() {
        let names = ToolNameCache::new();
        let req = parse(json!({
            "model": "gemini-2.5-pro",
            "messages": [
                {"role": "system", "content": "one"},
                {"role": "system", "content": "two"},
                {"role": "user", "content": "hi"},
                {"role": "system", "content": "late"}
            ]
        }));

        let out = convert_request(&req, &cfg(), &names).unwrap();
        let si = out.system_instruction.unwrap();
        assert_eq!(si.parts[0].text.as_deref(), Some("one\n\ntwo"));
        // The late system message became a conversation turn instead.
        assert_eq!(out.contents.len(), 2);
        assert_eq!(out.contents[1].parts[0].text.as_deref(), Some("late"));
    }

    #[test]
    fn tool_roundtrip_preserves_names_and_arguments() {
        let names = ToolNameCache::new();
        let req = parse(json!({
            "model": "gemini-2.5-pro",
            "messages": [
                {"role": "user", "content": "weather?"},
                {"role": "assistant", "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": {"name": "repo.search/files", "arguments": "{\"q\":\"main\"}"}
                }]},
                {"role": "tool", "tool_call_id": "call_1", "content": "{\"hits\":3}"}
            ],
            "tools": [{"type": "function", "function": {
                "name": "repo.search/files",
                "description": "search",
                "parameters": {"type": "object"}
            }}]
        }));

        let out = convert_request(&req, &cfg(), &names).unwrap();

        let call = out.contents[1].parts[0].function_call.as_ref().unwrap();
        assert_eq!(call.name, "repo_search_files");
        assert_eq!(call.args, json!({"q": "main"}));

        let response = out.contents[2].parts[0].function_response.as_ref().unwrap();
        assert_eq!(response.name, "repo_search_files");
        assert_eq!(response.response, json!({"hits": 3}));

        let decls = out.tools.unwrap()[0].function_declarations.clone().unwrap();
        assert_eq!(decls[0].name, "repo_search_files");
    }

    #[test]
    fn image_parts_become_inline_data_up_to_cap() {
        let names = ToolNameCache::new();
        let mut cfg = cfg();
        cfg.max_inline_images = 1;

        let data_url = format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(b"img")
        );
        let req = parse(json!({
            "model": "gemini-2.5-pro",
            "messages": [{"role": "user", "content": [
                {"type": "text", "text": "look"},
                {"type": "image_url", "image_url": {"url": data_url}},
                {"type": "image_url", "image_url": {"url": data_url}}
            ]}]
        }));

        let out = convert_request(&req, &cfg, &names).unwrap();
        let inline_count = out.contents[0]
            .parts
            .iter()
            .filter(|part| part.inline_data.is_some())
            .count();
        assert_eq!(inline_count, 1);
    }

    #[test]
    fn reasoning_effort_maps_to_budget() {
        let names = ToolNameCache::new();
        let req = parse(json!({
            "model": "gemini-2.5-pro",
            "messages": [{"role": "user", "content": "hi"}],
            "reasoning_effort": "medium"
        }));

        let out = convert_request(&req, &cfg(), &names).unwrap();
        let tc = out
            .generation_config
            .unwrap()
            .thinking_config
            .unwrap();
        assert_eq!(tc.thinking_budget, Some(16_000));
    }

    #[test]
    fn json_mode_sets_mime_for_gemini_models_only() {
        let names = ToolNameCache::new();
        let base = json!({
            "messages": [{"role": "user", "content": "hi"}],
            "response_format": {"type": "json_object"}
        });

        let mut gemini = base.clone();
        gemini["model"] = json!("gemini-2.5-flash");
        let out = convert_request(&parse(gemini), &cfg(), &names).unwrap();
        assert_eq!(
            out.generation_config.unwrap().response_mime_type.as_deref(),
            Some("application/json")
        );

        let mut other = base;
        other["model"] = json!("claude-sonnet-4");
        let out = convert_request(&parse(other), &cfg(), &names).unwrap();
        assert!(out.generation_config.unwrap().response_mime_type.is_none());
    }

    #[test]
    fn emitter_produces_role_then_content_then_done() {
        let mut emitter = OpenaiEmitter::new("gemini-2.5-pro");
        let mut state = RelayState::new();
        state.content_text = "hi".to_string();

        let start = emitter.start();
        assert_eq!(start.len(), 1);

        let events = emitter.on_deltas(&[Delta::Content("hi".to_string())], &state);
        assert_eq!(events.len(), 1);

        let finish = emitter.finish(&state);
        assert_eq!(finish.len(), 2);
    }

    #[test]
    fn final_response_carries_reasoning_and_usage() {
        let mut state = RelayState::new();
        state.reasoning_text = "thought".to_string();
        state.content_text = "answer".to_string();
        state.usage = Some(castor_schema::gemini::UsageMetadata {
            prompt_token_count: 10,
            candidates_token_count: 4,
            total_token_count: 16,
            thoughts_token_count: Some(2),
        });

        let resp = final_response("gemini-2.5-pro", &state);
        let message = &resp.choices[0].message;
        assert_eq!(message.content.as_deref(), Some("answer"));
        assert_eq!(message.reasoning_content.as_deref(), Some("thought"));
        let usage = resp.usage.unwrap();
        assert_eq!(usage.completion_tokens, 6);
        assert_eq!(usage.total_tokens, 16);
    }
}
