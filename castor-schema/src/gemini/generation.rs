use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// `generationConfig` object.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_temperature"
    )]
    pub temperature: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,

    /// MIME type for the response body (`application/json` enables JSON mode).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_mime_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_config: Option<ThinkingConfig>,

    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// `generationConfig.thinkingConfig` object.
///
/// A budget of `0` disables thinking entirely.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ThinkingConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_thoughts: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_budget: Option<i64>,

    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ThinkingConfig {
    pub fn with_budget(budget: i64) -> Self {
        Self {
            include_thoughts: Some(budget != 0),
            thinking_budget: Some(budget),
            extra: BTreeMap::new(),
        }
    }
}

fn deserialize_temperature<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<f64>::deserialize(deserializer)?;
    Ok(raw.map(|value| value.clamp(0.0, 2.0)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn temperature_is_clamped_into_supported_range() {
        let high: GenerationConfig = serde_json::from_value(json!({"temperature": 9.9})).unwrap();
        let low: GenerationConfig = serde_json::from_value(json!({"temperature": -1.0})).unwrap();

        assert_eq!(high.temperature, Some(2.0));
        assert_eq!(low.temperature, Some(0.0));
    }

    #[test]
    fn generation_config_extra_captures_unknown_fields() {
        let input = json!({
            "temperature": 1.0,
            "candidateCount": 2,
            "responseModalities": ["TEXT"],
            "newFutureField": true,
            "thinkingConfig": {
                "includeThoughts": true,
                "thinkingBudget": 1024
            }
        });

        let gc: GenerationConfig = serde_json::from_value(input).unwrap();
        assert_eq!(gc.temperature, Some(1.0));
        assert_eq!(gc.extra.get("candidateCount"), Some(&json!(2)));
        assert_eq!(gc.extra.get("responseModalities"), Some(&json!(["TEXT"])));
        assert_eq!(gc.extra.get("newFutureField"), Some(&json!(true)));

        let tc = gc.thinking_config.unwrap();
        assert_eq!(tc.include_thoughts, Some(true));
        assert_eq!(tc.thinking_budget, Some(1024));
    }

    #[test]
    fn thinking_config_preserves_vendor_fields() {
        let input = json!({
            "thinkingConfig": {
                "thinkingBudget": 2048,
                "thinkingLevel": "high"
            }
        });

        let gc: GenerationConfig = serde_json::from_value(input.clone()).unwrap();
        assert_eq!(serde_json::to_value(&gc).unwrap(), input);
    }

    #[test]
    fn with_budget_zero_disables_thoughts() {
        let tc = ThinkingConfig::with_budget(0);
        assert_eq!(tc.include_thoughts, Some(false));
        assert_eq!(tc.thinking_budget, Some(0));
    }
}
