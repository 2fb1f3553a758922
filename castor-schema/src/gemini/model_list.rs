use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct GeminiModelList {
    pub models: Vec<GeminiModelEntry>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GeminiModelEntry {
    pub name: String,
    pub version: Option<String>,
    pub display_name: String,
    pub description: Option<String>,
    pub input_token_limit: Option<u64>,
    pub output_token_limit: Option<u64>,
    pub supported_generation_methods: Option<Vec<String>>,
}

impl GeminiModelList {
    pub fn from_model_names<I, S>(model_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let models = model_names
            .into_iter()
            .map(|model| {
                let name = model.into();
                GeminiModelEntry {
                    name: format!("models/{name}"),
                    display_name: name,
                    supported_generation_methods: Some(vec![
                        "generateContent".to_string(),
                        "streamGenerateContent".to_string(),
                    ]),
                    ..Default::default()
                }
            })
            .collect();
        Self { models }
    }
}
