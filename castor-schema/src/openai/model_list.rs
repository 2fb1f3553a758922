use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OpenaiModelList {
    pub object: String,
    pub data: Vec<OpenaiModel>,
}

impl Default for OpenaiModelList {
    fn default() -> Self {
        Self {
            object: "list".to_string(),
            data: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OpenaiModel {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub owned_by: String,
}

impl Default for OpenaiModel {
    fn default() -> Self {
        Self {
            id: String::new(),
            object: "model".to_string(),
            created: 0,
            owned_by: String::new(),
        }
    }
}

impl OpenaiModelList {
    pub fn from_model_names<I, S>(models_list: I, owned_by: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let data = models_list
            .into_iter()
            .map(|model| OpenaiModel {
                id: model.into(),
                owned_by: owned_by.to_string(),
                ..Default::default()
            })
            .collect();

        Self {
            data,
            ..Default::default()
        }
    }
}
