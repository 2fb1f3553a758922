use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// `v1internal:fetchAvailableModels` response.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FetchAvailableModelsResponse {
    #[serde(default)]
    pub models: Vec<AvailableModel>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AvailableModel {
    /// Model id as used in generate requests (e.g. `gemini-2.5-pro`).
    #[serde(alias = "name", default)]
    pub model_id: String,

    #[serde(default)]
    pub display_name: Option<String>,

    pub quota_info: Option<QuotaInfo>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Per-model remaining quota for one credential.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuotaInfo {
    /// Fraction of the budget still available, in `[0, 1]`.
    #[serde(default)]
    pub remaining_fraction: f64,

    /// When the budget rolls over.
    pub reset_time: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn catalog_parses_quota_info() {
        let resp: FetchAvailableModelsResponse = serde_json::from_value(json!({
            "models": [
                {
                    "modelId": "gemini-2.5-pro",
                    "displayName": "Gemini 2.5 Pro",
                    "quotaInfo": {
                        "remainingFraction": 0.42,
                        "resetTime": "2026-01-01T00:00:00Z"
                    }
                },
                {"modelId": "gemini-2.5-flash"}
            ]
        }))
        .unwrap();

        assert_eq!(resp.models.len(), 2);
        let quota = resp.models[0].quota_info.as_ref().unwrap();
        assert!((quota.remaining_fraction - 0.42).abs() < f64::EPSILON);
        assert!(quota.reset_time.is_some());
        assert!(resp.models[1].quota_info.is_none());
    }

    #[test]
    fn name_alias_accepted() {
        let model: AvailableModel =
            serde_json::from_value(json!({"name": "gemini-3-pro-image"})).unwrap();
        assert_eq!(model.model_id, "gemini-3-pro-image");
    }
}
