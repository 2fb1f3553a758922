use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Claude `POST /v1/messages` request body.
///
/// Schema reference:
/// <https://docs.anthropic.com/en/api/messages>
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaudeMessagesRequest {
    #[serde(default)]
    pub model: String,

    #[serde(default)]
    pub messages: Vec<ClaudeMessage>,

    /// `string | array of text blocks`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<ClaudeSystem>,

    #[serde(default)]
    pub max_tokens: u32,

    #[serde(default)]
    pub stream: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ClaudeTool>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,

    /// Extended-thinking switch: `{"type": "enabled", "budget_tokens": N}`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<ClaudeThinking>,

    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClaudeSystem {
    Text(String),
    Blocks(Vec<ClaudeContentBlock>),
}

impl ClaudeSystem {
    /// Flatten into one newline-joined instruction string.
    pub fn text(&self) -> String {
        match self {
            ClaudeSystem::Text(text) => text.clone(),
            ClaudeSystem::Blocks(blocks) => blocks
                .iter()
                .filter_map(|block| block.text.as_deref())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaudeMessage {
    pub role: String,

    pub content: ClaudeMessageContent,

    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

pub type ClaudeMessageContent = ClaudeSystem;

/// One content block. `block_type` discriminates: `text`, `image`,
/// `thinking`, `tool_use`, `tool_result`, `redacted_thinking`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClaudeContentBlock {
    #[serde(rename = "type")]
    pub block_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<ClaudeImageSource>,

    // thinking block
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,

    // tool_use block
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,

    // tool_result block
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_use_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<ClaudeToolResultContent>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,

    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClaudeToolResultContent {
    Text(String),
    Blocks(Vec<ClaudeContentBlock>),
}

impl ClaudeToolResultContent {
    pub fn text(&self) -> String {
        match self {
            ClaudeToolResultContent::Text(text) => text.clone(),
            ClaudeToolResultContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|block| block.text.as_deref())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaudeImageSource {
    /// `base64` or `url`.
    #[serde(rename = "type")]
    pub source_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaudeTool {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,

    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaudeThinking {
    /// `enabled` | `disabled`.
    #[serde(rename = "type")]
    pub thinking_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget_tokens: Option<i64>,
}
