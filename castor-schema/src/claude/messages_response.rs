use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Non-streaming Claude messages response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaudeMessagesResponse {
    pub id: String,

    #[serde(rename = "type")]
    pub response_type: String,

    pub role: String,

    pub model: String,

    pub content: Vec<ResponseContentBlock>,

    pub stop_reason: Option<String>,

    pub stop_sequence: Option<String>,

    pub usage: ClaudeUsage,
}

/// Output content block: `text`, `thinking` or `tool_use`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ResponseContentBlock {
    #[serde(rename = "type")]
    pub block_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
}

impl ResponseContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            block_type: "text".to_string(),
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn thinking(thinking: impl Into<String>, signature: Option<String>) -> Self {
        Self {
            block_type: "thinking".to_string(),
            thinking: Some(thinking.into()),
            signature,
            ..Self::default()
        }
    }

    pub fn tool_use(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        Self {
            block_type: "tool_use".to_string(),
            id: Some(id.into()),
            name: Some(name.into()),
            input: Some(input),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ClaudeUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn response_serializes_in_wire_shape() {
        let resp = ClaudeMessagesResponse {
            id: "msg_1".to_string(),
            response_type: "message".to_string(),
            role: "assistant".to_string(),
            model: "gemini-2.5-pro".to_string(),
            content: vec![
                ResponseContentBlock::thinking("hmm", Some("c2ln".to_string())),
                ResponseContentBlock::text("answer"),
            ],
            stop_reason: Some("end_turn".to_string()),
            stop_sequence: None,
            usage: ClaudeUsage {
                input_tokens: 3,
                output_tokens: 9,
            },
        };

        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["type"], "message");
        assert_eq!(value["content"][0]["type"], "thinking");
        assert_eq!(value["content"][1]["text"], "answer");
        assert_eq!(value["usage"], json!({"input_tokens": 3, "output_tokens": 9}));
    }
}
