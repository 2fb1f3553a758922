use super::{Content, Part};
use serde::Deserialize;
use std::collections::BTreeMap;

pub fn deserialize_system_instruction<'de, D>(deserializer: D) -> Result<Option<Content>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let Some(content) = Option::<Content>::deserialize(deserializer)? else {
        return Ok(None);
    };

    let merged_text = content
        .parts
        .into_iter()
        .filter_map(|part| part.text.filter(|text| !text.trim().is_empty()))
        .collect::<Vec<_>>()
        .join("\n\n");

    Ok((!merged_text.is_empty()).then(|| Content {
        role: None,
        parts: vec![Part {
            text: Some(merged_text),
            ..Default::default()
        }],
        extra: BTreeMap::new(),
    }))
}
