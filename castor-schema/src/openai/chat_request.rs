use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// OpenAI `POST /v1/chat/completions` request body.
///
/// Schema reference:
/// <https://platform.openai.com/docs/api-reference/chat/create>
///
/// `extra` collects unknown/new fields so deserialization doesn't break when
/// OpenAI extends the schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionsRequest {
    /// OpenAI docs: `string`, required.
    #[serde(default)]
    pub model: String,

    /// Ordered conversation turns.
    #[serde(default)]
    pub messages: Vec<ChatMessage>,

    #[serde(default)]
    pub stream: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,

    /// Legacy cap; superseded by `max_completion_tokens`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_completion_tokens: Option<u32>,

    /// `low` | `medium` | `high`; mapped onto upstream thinking budgets.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,

    /// Explicit thinking budget override (DeepSeek/vendor extension).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_budget: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,

    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,

    /// `string | array | null`. Assistant tool-call turns may omit it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<ChatContent>,

    /// DeepSeek-convention reasoning text on assistant turns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,

    /// Present on `tool` role messages; links the result to its call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ChatMessage {
    /// All text content of this message, parts joined in order.
    pub fn text(&self) -> String {
        match &self.content {
            None => String::new(),
            Some(ChatContent::Text(text)) => text.clone(),
            Some(ChatContent::Parts(parts)) => parts
                .iter()
                .filter_map(|part| part.text.as_deref())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// `content` in either the plain-string or the content-parts form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatContent {
    Text(String),
    Parts(Vec<ChatContentPart>),
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChatContentPart {
    /// `text` | `image_url` | future types.
    #[serde(rename = "type")]
    pub part_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<ImageUrl>,

    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageUrl {
    /// `https://…` or a `data:<mime>;base64,<payload>` URL.
    pub url: String,

    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,

    #[serde(rename = "type", default = "default_tool_type")]
    pub call_type: String,

    pub function: ToolCallFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallFunction {
    pub name: String,

    /// JSON-encoded arguments string, as OpenAI ships them.
    #[serde(default)]
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(rename = "type", default = "default_tool_type")]
    pub tool_type: String,

    pub function: ToolFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolFunction {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,

    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseFormat {
    /// `text` | `json_object` | `json_schema`.
    #[serde(rename = "type")]
    pub format_type: String,

    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

fn default_tool_type() -> String {
    "function".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_and_parts_content_both_parse() {
        let req: ChatCompletionsRequest = serde_json::from_value(json!({
            "model": "gemini-2.5-pro",
            "messages": [
                {"role": "system", "content": "be terse"},
                {"role": "user", "content": [
                    {"type": "text", "text": "what is this?"},
                    {"type": "image_url", "image_url": {"url": "data:image/png;base64,aaaa"}}
                ]}
            ]
        }))
        .unwrap();

        assert_eq!(req.messages[0].text(), "be terse");
        assert_eq!(req.messages[1].text(), "what is this?");
        match req.messages[1].content.as_ref().unwrap() {
            ChatContent::Parts(parts) => {
                assert_eq!(parts[1].part_type, "image_url");
                assert!(parts[1].image_url.as_ref().unwrap().url.starts_with("data:"));
            }
            ChatContent::Text(_) => panic!("expected parts content"),
        }
    }

    #[test]
    fn assistant_tool_calls_parse_without_content() {
        let msg: ChatMessage = serde_json::from_value(json!({
            "role": "assistant",
            "tool_calls": [{
                "id": "call_1",
                "type": "function",
                "function": {"name": "get_weather", "arguments": "{\"city\":\"Berlin\"}"}
            }]
        }))
        .unwrap();

        assert!(msg.content.is_none());
        let call = &msg.tool_calls.as_ref().unwrap()[0];
        assert_eq!(call.function.name, "get_weather");
    }

    #[test]
    fn unknown_request_fields_collect_in_extra() {
        let req: ChatCompletionsRequest = serde_json::from_value(json!({
            "model": "m",
            "messages": [],
            "presence_penalty": 0.5,
            "some_future_flag": true
        }))
        .unwrap();
        assert_eq!(req.extra.get("presence_penalty"), Some(&json!(0.5)));
        assert_eq!(req.extra.get("some_future_flag"), Some(&json!(true)));
    }
}
