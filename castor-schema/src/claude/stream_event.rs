use super::messages_response::ClaudeUsage;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One Claude SSE event payload. The wire `event:` name always equals the
/// `type` field, which axum's `Event::event(..)` sets separately.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClaudeStreamEvent {
    MessageStart {
        message: Value,
    },
    ContentBlockStart {
        index: u32,
        content_block: StartContentBlock,
    },
    ContentBlockDelta {
        index: u32,
        delta: ClaudeStreamDelta,
    },
    ContentBlockStop {
        index: u32,
    },
    MessageDelta {
        delta: Value,
        usage: ClaudeUsage,
    },
    MessageStop,
    Ping,
}

impl ClaudeStreamEvent {
    /// The wire event name matching this payload.
    pub fn event_name(&self) -> &'static str {
        match self {
            ClaudeStreamEvent::MessageStart { .. } => "message_start",
            ClaudeStreamEvent::ContentBlockStart { .. } => "content_block_start",
            ClaudeStreamEvent::ContentBlockDelta { .. } => "content_block_delta",
            ClaudeStreamEvent::ContentBlockStop { .. } => "content_block_stop",
            ClaudeStreamEvent::MessageDelta { .. } => "message_delta",
            ClaudeStreamEvent::MessageStop => "message_stop",
            ClaudeStreamEvent::Ping => "ping",
        }
    }
}

/// Skeleton content block announced by `content_block_start`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StartContentBlock {
    #[serde(rename = "type")]
    pub block_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
}

/// Delta payload inside `content_block_delta`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClaudeStreamDelta {
    TextDelta { text: String },
    ThinkingDelta { thinking: String },
    SignatureDelta { signature: String },
    InputJsonDelta { partial_json: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn events_serialize_with_type_tag() {
        let ev = ClaudeStreamEvent::ContentBlockDelta {
            index: 0,
            delta: ClaudeStreamDelta::TextDelta {
                text: "hi".to_string(),
            },
        };
        let value = serde_json::to_value(&ev).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "content_block_delta",
                "index": 0,
                "delta": {"type": "text_delta", "text": "hi"}
            })
        );
        assert_eq!(ev.event_name(), "content_block_delta");
    }

    #[test]
    fn message_stop_is_bare() {
        let value = serde_json::to_value(ClaudeStreamEvent::MessageStop).unwrap();
        assert_eq!(value, json!({"type": "message_stop"}));
    }

    #[test]
    fn input_json_delta_shape() {
        let ev = ClaudeStreamEvent::ContentBlockDelta {
            index: 1,
            delta: ClaudeStreamDelta::InputJsonDelta {
                partial_json: "{\"city\":".to_string(),
            },
        };
        let value = serde_json::to_value(&ev).unwrap();
        assert_eq!(value["delta"]["type"], "input_json_delta");
        assert_eq!(value["delta"]["partial_json"], "{\"city\":");
    }
}
