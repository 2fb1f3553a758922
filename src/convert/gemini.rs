use super::{ToolNameCache, merge_system_instruction, resolve_thinking, sse_json};
use crate::config::ConvertConfig;
use crate::relay::RelayState;
use axum::response::sse::Event;
use castor_schema::gemini::{
    Candidate, Content, GeminiGenerateContentRequest, GeminiResponseBody, Part,
};
use std::collections::BTreeMap;
use tracing::debug;

/// Normalize an inbound Gemini request into the canonical upstream body.
///
/// The shape is already native; the work is merging the operator system
/// instruction, routing tool names through the reversible cache, applying
/// thinking defaults, and enforcing the inline-image cap.
pub fn convert_request(
    mut req: GeminiGenerateContentRequest,
    cfg: &ConvertConfig,
    names: &ToolNameCache,
) -> Result<GeminiGenerateContentRequest, String> {
    let caller_system: Vec<String> = req
        .system_instruction
        .take()
        .into_iter()
        .flat_map(|content| content.parts)
        .filter_map(|part| part.text)
        .collect();
    req.system_instruction = merge_system_instruction(cfg, &caller_system);

    if let Some(tools) = &mut req.tools {
        for tool in tools {
            for decl in tool.function_declarations.iter_mut().flatten() {
                decl.name = names.register(&decl.name);
            }
        }
    }

    let mut images_used = 0usize;
    for content in &mut req.contents {
        for part in &mut content.parts {
            if let Some(call) = &mut part.function_call {
                call.name = names.register(&call.name);
            }
            if let Some(response) = &mut part.function_response {
                response.name = names.register(&response.name);
            }
            if part
                .inline_data
                .as_ref()
                .is_some_and(|inline| inline.mime_type.starts_with("image/"))
            {
                images_used += 1;
                if images_used > cfg.max_inline_images {
                    debug!(
                        max_images = cfg.max_inline_images,
                        "Inline image cap reached; dropping image"
                    );
                    part.inline_data = None;
                    part.text = Some(String::new());
                }
            }
        }
    }

    let default_budget = cfg.default_thinking_budget;
    let gc = req.generation_config_mut();
    if gc.thinking_config.is_none() {
        gc.thinking_config = Some(resolve_thinking(None, None, default_budget));
    }

    Ok(req)
}

/// Streaming emitter for the Gemini dialect: candidates pass through with
/// thought parts preserved; only tool names are mapped back.
pub struct GeminiEmitter {
    emitted_finish: bool,
}

impl GeminiEmitter {
    pub fn new() -> Self {
        Self {
            emitted_finish: false,
        }
    }

    pub fn on_event(&mut self, body: &GeminiResponseBody, names: &ToolNameCache) -> Vec<Event> {
        let mut body = body.clone();
        for candidate in &mut body.candidates {
            if candidate.finish_reason.is_some() {
                self.emitted_finish = true;
            }
            if let Some(content) = &mut candidate.content {
                restore_names(content, names);
            }
        }
        vec![sse_json(&body)]
    }

    /// Exactly one terminal event: synthesize the final `finishReason`
    /// chunk only when the upstream never sent one.
    pub fn finish(&mut self, state: &RelayState) -> Vec<Event> {
        if self.emitted_finish {
            return Vec::new();
        }
        let body = GeminiResponseBody {
            candidates: vec![Candidate {
                content: Some(Content::model(Vec::new())),
                index: Some(0),
                finish_reason: Some(
                    state
                        .finish_reason
                        .clone()
                        .unwrap_or_else(|| "STOP".to_string()),
                ),
                extra: BTreeMap::new(),
            }],
            usage_metadata: state.usage,
            ..GeminiResponseBody::default()
        };
        vec![sse_json(&body)]
    }

    /// Empty-candidate keep-alive chunk.
    pub fn heartbeat() -> Event {
        sse_json(&GeminiResponseBody::default())
    }
}

impl Default for GeminiEmitter {
    fn default() -> Self {
        Self::new()
    }
}

fn restore_names(content: &mut Content, names: &ToolNameCache) {
    for part in &mut content.parts {
        if let Some(call) = &mut part.function_call {
            call.name = names.restore(&call.name);
        }
        if let Some(response) = &mut part.function_response {
            response.name = names.restore(&response.name);
        }
    }
}

/// Build the single non-stream response from collected state.
pub fn final_response(state: &RelayState) -> GeminiResponseBody {
    let mut parts = Vec::new();
    if !state.reasoning_text.is_empty() {
        parts.push(Part::thought_text(
            state.reasoning_text.clone(),
            state.reasoning_signature.clone(),
        ));
    }
    let text = state.final_content();
    if !text.is_empty() {
        parts.push(Part::from_text(text));
    }
    for accum in &state.tool_calls {
        parts.push(Part {
            thought_signature: accum.signature.clone(),
            function_call: Some(castor_schema::gemini::FunctionCall {
                id: Some(accum.id.clone()),
                name: accum.name.clone(),
                args: serde_json::from_str(&accum.args)
                    .unwrap_or(serde_json::Value::Null),
            }),
            ..Part::default()
        });
    }

    GeminiResponseBody {
        candidates: vec![Candidate {
            content: Some(Content::model(parts)),
            index: Some(0),
            finish_reason: Some(
                state
                    .finish_reason
                    .clone()
                    .unwrap_or_else(|| "STOP".to_string()),
            ),
            extra: BTreeMap::new(),
        }],
        usage_metadata: state.usage,
        ..GeminiResponseBody::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cfg() -> ConvertConfig {
        ConvertConfig {
            system_instruction: "operator says".to_string(),
            ..ConvertConfig::default()
        }
    }

    #[test]
    fn inbound_system_merges_with_operator_instruction() {
        let names = ToolNameCache::new();
        let req: GeminiGenerateContentRequest = serde_json::from_value(json!({
            "contents": [{"role": "user", "parts": [{"text": "hi"}]}],
            "systemInstruction": {"parts": [{"text": "caller says"}]}
        }))
        .unwrap();

        let out = convert_request(req, &cfg(), &names).unwrap();
        assert_eq!(
            out.system_instruction.unwrap().parts[0].text.as_deref(),
            Some("operator says\n\ncaller says")
        );
    }

    #[test]
    fn tool_names_are_sanitized_and_restored() {
        let names = ToolNameCache::new();
        let req: GeminiGenerateContentRequest = serde_json::from_value(json!({
            "contents": [
                {"role": "model", "parts": [{"functionCall": {"name": "my.tool", "args": {}}}]},
                {"role": "user", "parts": [{"functionResponse": {"name": "my.tool", "response": {"ok": true}}}]}
            ],
            "tools": [{"functionDeclarations": [{"name": "my.tool", "description": "d"}]}]
        }))
        .unwrap();

        let out = convert_request(req, &cfg(), &names).unwrap();
        let decl_name = out.tools.as_ref().unwrap()[0]
            .function_declarations
            .as_ref()
            .unwrap()[0]
            .name
            .clone();
        assert_eq!(decl_name, "my_tool");
        assert_eq!(
            out.contents[0].parts[0].function_call.as_ref().unwrap().name,
            "my_tool"
        );

        // Emitter restores the original names on the way back.
        let mut emitter = GeminiEmitter::new();
        let body: GeminiResponseBody = serde_json::from_value(json!({
            "candidates": [{"content": {"role": "model", "parts": [
                {"functionCall": {"name": "my_tool", "args": {}}}
            ]}}]
        }))
        .unwrap();
        let events = emitter.on_event(&body, &names);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn thinking_defaults_are_applied_when_absent() {
        let names = ToolNameCache::new();
        let req: GeminiGenerateContentRequest =
            serde_json::from_value(json!({"contents": []})).unwrap();

        let out = convert_request(req, &cfg(), &names).unwrap();
        assert!(
            out.generation_config
                .unwrap()
                .thinking_config
                .is_some()
        );
    }

    #[test]
    fn caller_thinking_config_is_preserved() {
        let names = ToolNameCache::new();
        let req: GeminiGenerateContentRequest = serde_json::from_value(json!({
            "contents": [],
            "generationConfig": {"thinkingConfig": {"thinkingBudget": 777}}
        }))
        .unwrap();

        let out = convert_request(req, &cfg(), &names).unwrap();
        assert_eq!(
            out.generation_config
                .unwrap()
                .thinking_config
                .unwrap()
                .thinking_budget,
            Some(777)
        );
    }

    #[test]
    fn finish_synthesized_only_without_upstream_finish() {
        let names = ToolNameCache::new();
        let mut state = RelayState::new();
        state.finish_reason = Some("STOP".to_string());

        let mut emitter = GeminiEmitter::new();
        let body: GeminiResponseBody = serde_json::from_value(json!({
            "candidates": [{"content": {"parts": [{"text": "hi"}]}, "finishReason": "STOP"}]
        }))
        .unwrap();
        emitter.on_event(&body, &names);
        assert!(emitter.finish(&state).is_empty());

        let mut emitter = GeminiEmitter::new();
        let body: GeminiResponseBody = serde_json::from_value(json!({
            "candidates": [{"content": {"parts": [{"text": "hi"}]}}]
        }))
        .unwrap();
        emitter.on_event(&body, &names);
        assert_eq!(emitter.finish(&state).len(), 1);
    }
}
