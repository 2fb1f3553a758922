use castor::config::ConvertConfig;
use castor::convert::{ToolNameCache, claude, openai};
use castor::relay::RelayState;
use castor_schema::gemini::GeminiResponseBody;
use serde_json::json;

fn upstream_event(value: serde_json::Value) -> GeminiResponseBody {
    serde_json::from_value(value).unwrap()
}

/// Round-trip property: visible content segments and tool name+arguments
/// survive convert-in followed by convert-out.
#[tokio::test]
async fn openai_tool_conversation_round_trips() {
    let cfg = ConvertConfig::default();
    let names = ToolNameCache::new();

    let request: castor_schema::openai::ChatCompletionsRequest = serde_json::from_value(json!({
        "model": "gemini-2.5-pro",
        "messages": [
            {"role": "system", "content": "be helpful"},
            {"role": "user", "content": "what's the weather in Berlin?"}
        ],
        "tools": [{"type": "function", "function": {
            "name": "weather.lookup/v2",
            "description": "fetch weather",
            "parameters": {"type": "object", "properties": {"city": {"type": "string"}}}
        }}]
    }))
    .unwrap();

    let upstream = openai::convert_request(&request, &cfg, &names).unwrap();
    let upstream_tool_name = upstream.tools.as_ref().unwrap()[0]
        .function_declarations
        .as_ref()
        .unwrap()[0]
        .name
        .clone();
    assert_ne!(upstream_tool_name, "weather.lookup/v2");

    // The upstream answers with a thought, text, and a tool call using its
    // sanitized name.
    let mut state = RelayState::new();
    state
        .absorb(
            &upstream_event(json!({
                "candidates": [{
                    "content": {"role": "model", "parts": [
                        {"thought": true, "text": "user wants weather", "thoughtSignature": "sig_1"},
                        {"text": "Checking the weather."},
                        {"functionCall": {"name": upstream_tool_name, "args": {"city": "Berlin"}}}
                    ]},
                    "finishReason": "STOP"
                }],
                "usageMetadata": {"promptTokenCount": 12, "candidatesTokenCount": 9, "totalTokenCount": 21}
            })),
            &names,
            None,
        )
        .await;

    let response = openai::final_response("gemini-2.5-pro", &state);
    let message = &response.choices[0].message;

    assert_eq!(message.content.as_deref(), Some("Checking the weather."));
    assert_eq!(message.reasoning_content.as_deref(), Some("user wants weather"));

    let calls = message.tool_calls.as_ref().unwrap();
    assert_eq!(calls.len(), 1);
    // The caller sees its original tool name back.
    assert_eq!(calls[0].function.name, "weather.lookup/v2");
    let args: serde_json::Value = serde_json::from_str(&calls[0].function.arguments).unwrap();
    assert_eq!(args, json!({"city": "Berlin"}));

    assert_eq!(response.choices[0].finish_reason.as_deref(), Some("tool_calls"));
    assert_eq!(response.usage.unwrap().total_tokens, 21);
}

#[tokio::test]
async fn claude_thinking_conversation_round_trips() {
    let cfg = ConvertConfig::default();
    let names = ToolNameCache::new();

    let request: castor_schema::claude::ClaudeMessagesRequest = serde_json::from_value(json!({
        "model": "gemini-2.5-pro",
        "max_tokens": 1024,
        "system": "answer briefly",
        "messages": [{"role": "user", "content": "why is the sky blue?"}],
        "thinking": {"type": "enabled", "budget_tokens": 4096}
    }))
    .unwrap();

    let upstream = claude::convert_request(&request, &cfg, &names).unwrap();
    assert_eq!(
        upstream
            .generation_config
            .as_ref()
            .unwrap()
            .thinking_config
            .as_ref()
            .unwrap()
            .thinking_budget,
        Some(4096)
    );

    let mut state = RelayState::new();
    // Two stream events; the signature arrives on the second.
    state
        .absorb(
            &upstream_event(json!({
                "candidates": [{"content": {"role": "model", "parts": [
                    {"thought": true, "text": "rayleigh "}
                ]}}]
            })),
            &names,
            None,
        )
        .await;
    state
        .absorb(
            &upstream_event(json!({
                "candidates": [{
                    "content": {"role": "model", "parts": [
                        {"thought": true, "text": "scattering", "thoughtSignature": "sig_sky"},
                        {"text": "Rayleigh scattering."}
                    ]},
                    "finishReason": "STOP"
                }],
                "usageMetadata": {"promptTokenCount": 7, "candidatesTokenCount": 4, "totalTokenCount": 11, "thoughtsTokenCount": 2}
            })),
            &names,
            None,
        )
        .await;

    let response = claude::final_response("gemini-2.5-pro", &state);

    assert_eq!(response.content.len(), 2);
    assert_eq!(response.content[0].block_type, "thinking");
    assert_eq!(
        response.content[0].thinking.as_deref(),
        Some("rayleigh scattering")
    );
    assert_eq!(response.content[0].signature.as_deref(), Some("sig_sky"));
    assert_eq!(
        response.content[1].text.as_deref(),
        Some("Rayleigh scattering.")
    );
    assert_eq!(response.stop_reason.as_deref(), Some("end_turn"));
    assert_eq!(response.usage.input_tokens, 7);
    assert_eq!(response.usage.output_tokens, 6);
}

/// The non-stream shim yields exactly one response object with concatenated
/// text, non-empty reasoning when thoughts were emitted, and populated
/// usage.
#[tokio::test]
async fn collected_stream_produces_one_complete_response() {
    let names = ToolNameCache::new();
    let mut state = RelayState::new();

    for fragment in ["Hel", "lo ", "world"] {
        state
            .absorb(
                &upstream_event(json!({
                    "candidates": [{"content": {"parts": [{"text": fragment}]}}]
                })),
                &names,
                None,
            )
            .await;
    }
    state
        .absorb(
            &upstream_event(json!({
                "candidates": [{
                    "content": {"parts": [{"thought": true, "text": "done"}]},
                    "finishReason": "STOP"
                }],
                "usageMetadata": {"promptTokenCount": 3, "candidatesTokenCount": 5, "totalTokenCount": 8}
            })),
            &names,
            None,
        )
        .await;

    let response = openai::final_response("gemini-2.5-pro", &state);
    assert_eq!(response.choices.len(), 1);
    let message = &response.choices[0].message;
    assert_eq!(message.content.as_deref(), Some("Hello world"));
    assert_eq!(message.reasoning_content.as_deref(), Some("done"));
    assert!(response.usage.is_some());
}
