use serde::{Deserialize, Serialize, de::Error};
use serde_json::Value;
use std::collections::BTreeMap;

/// A single conversation turn or system instruction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Content {
    /// Usually `"user"` or `"model"`. Absent for `systemInstruction`.
    ///
    /// Kept as raw string for transparent pass-through.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    /// Ordered parts that constitute a single message.
    #[serde(default, deserialize_with = "deserialize_parts")]
    pub parts: Vec<Part>,

    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Content {
    pub fn user(parts: Vec<Part>) -> Self {
        Self {
            role: Some("user".to_string()),
            parts,
            extra: BTreeMap::new(),
        }
    }

    pub fn model(parts: Vec<Part>) -> Self {
        Self {
            role: Some("model".to_string()),
            parts,
            extra: BTreeMap::new(),
        }
    }
}

/// One atomic piece of content inside a `Content` turn.
///
/// `text` is the most common variant; the part types the gateway manipulates
/// (inlineData, functionCall, functionResponse) are explicitly modeled, while
/// unrecognized fields are preserved in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    /// Optional model-thought marker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thought: Option<bool>,

    /// Opaque reusable thought signature (base64 string).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thought_signature: Option<String>,

    /// Inline text data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Inline media bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,

    /// Function call produced by the model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,

    /// Function response used as context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_response: Option<FunctionResponse>,

    /// URI-based file data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_data: Option<Value>,

    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Part {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn thought_text(text: impl Into<String>, signature: Option<String>) -> Self {
        Self {
            thought: Some(true),
            thought_signature: signature,
            text: Some(text.into()),
            ..Self::default()
        }
    }
}

/// Inline media payload (`mimeType` + base64 `data`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Upstream-visible call id; absent on some models.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub args: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub response: Value,
}

fn deserialize_parts<'de, D>(deserializer: D) -> Result<Vec<Part>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let parts = Vec::<Part>::deserialize(deserializer)?;

    for (index, part) in parts.iter().enumerate() {
        let data_fields_count = usize::from(part.text.is_some())
            + usize::from(part.inline_data.is_some())
            + usize::from(part.function_call.is_some())
            + usize::from(part.function_response.is_some())
            + usize::from(part.file_data.is_some());

        if data_fields_count > 1 {
            return Err(D::Error::custom(format!(
                "parts[{index}] must contain at most one data field among text, inlineData, functionCall, functionResponse, fileData"
            )));
        }
    }

    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn role_is_transparent_string() {
        let input = json!({
            "role": "SYSTEM",
            "parts": [{"text": "x"}]
        });

        let content: Content = serde_json::from_value(input.clone()).unwrap();
        assert_eq!(content.role.as_deref(), Some("SYSTEM"));
        assert_eq!(serde_json::to_value(&content).unwrap(), input);
    }

    #[test]
    fn part_rejects_multiple_data_fields() {
        let err = serde_json::from_value::<Content>(json!({
            "role": "user",
            "parts": [{
                "text": "hello",
                "inlineData": {"mimeType": "text/plain", "data": "aGVsbG8="}
            }]
        }))
        .unwrap_err();
        let err_msg = err.to_string();
        assert!(err_msg.contains("parts[0]"));
        assert!(err_msg.contains("at most one data field"));
    }

    #[test]
    fn function_call_and_response_parts_roundtrip() {
        let input = json!([
            {
                "role": "model",
                "parts": [{
                    "functionCall": {
                        "name": "get_weather",
                        "args": {"city": "London"}
                    }
                }]
            },
            {
                "role": "user",
                "parts": [{
                    "functionResponse": {
                        "name": "get_weather",
                        "response": {"temperature": 15}
                    }
                }]
            }
        ]);

        let contents: Vec<Content> = serde_json::from_value(input.clone()).unwrap();
        assert_eq!(contents[0].parts[0].function_call.as_ref().unwrap().name, "get_weather");
        let output = serde_json::to_value(&contents).unwrap();
        assert_eq!(output, input);
    }

    #[test]
    fn thought_part_keeps_signature() {
        let content: Content = serde_json::from_value(json!({
            "role": "model",
            "parts": [{
                "thought": true,
                "text": "internal reasoning",
                "thoughtSignature": "c2ln"
            }]
        }))
        .unwrap();

        let part = &content.parts[0];
        assert_eq!(part.thought, Some(true));
        assert_eq!(part.thought_signature.as_deref(), Some("c2ln"));
    }

    #[test]
    fn inline_data_is_typed() {
        let content: Content = serde_json::from_value(json!({
            "role": "user",
            "parts": [{
                "inlineData": {"mimeType": "image/png", "data": "abc123"}
            }]
        }))
        .unwrap();

        let inline = content.parts[0].inline_data.as_ref().unwrap();
        assert_eq!(inline.mime_type, "image/png");
        assert_eq!(inline.data, "abc123");
    }
}
