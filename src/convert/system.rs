use crate::config::ConvertConfig;
use castor_schema::gemini::{Content, Part};
use std::collections::BTreeMap;

/// Merge the operator-configured instruction halves with the caller's
/// contiguous head run of system messages into one `systemInstruction`.
///
/// Block order: official prompt and operator instruction per
/// `official_prompt_first`, then the caller's text. Empty strings disable
/// their half; an all-empty merge yields `None`.
pub fn merge_system_instruction(cfg: &ConvertConfig, caller_system: &[String]) -> Option<Content> {
    let operator = cfg.system_instruction.trim();
    let official = cfg.official_prompt.trim();

    let mut blocks: Vec<&str> = Vec::new();
    if cfg.official_prompt_first {
        blocks.push(official);
        blocks.push(operator);
    } else {
        blocks.push(operator);
        blocks.push(official);
    }
    let mut merged: Vec<&str> = blocks.into_iter().filter(|s| !s.is_empty()).collect();
    for text in caller_system {
        let text = text.trim();
        if !text.is_empty() {
            merged.push(text);
        }
    }

    if merged.is_empty() {
        return None;
    }

    Some(Content {
        role: None,
        parts: vec![Part::from_text(merged.join("\n\n"))],
        extra: BTreeMap::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(system: &str, official: &str, official_first: bool) -> ConvertConfig {
        ConvertConfig {
            system_instruction: system.to_string(),
            official_prompt: official.to_string(),
            official_prompt_first: official_first,
            ..ConvertConfig::default()
        }
    }

    fn text_of(content: &Content) -> String {
        content.parts[0].text.clone().unwrap()
    }

    #[test]
    fn caller_run_joins_with_blank_lines() {
        let merged = merge_system_instruction(
            &cfg("", "", true),
            &["be terse".to_string(), "answer in French".to_string()],
        )
        .unwrap();
        assert_eq!(text_of(&merged), "be terse\n\nanswer in French");
    }

    #[test]
    fn official_prompt_placement_follows_config() {
        let first = merge_system_instruction(&cfg("operator", "official", true), &[]).unwrap();
        assert_eq!(text_of(&first), "official\n\noperator");

        let last = merge_system_instruction(&cfg("operator", "official", false), &[]).unwrap();
        assert_eq!(text_of(&last), "operator\n\nofficial");
    }

    #[test]
    fn empty_halves_are_disabled() {
        let merged =
            merge_system_instruction(&cfg("operator", "", true), &["caller".to_string()]).unwrap();
        assert_eq!(text_of(&merged), "operator\n\ncaller");
    }

    #[test]
    fn nothing_to_merge_yields_none() {
        assert!(merge_system_instruction(&cfg("", "", true), &[]).is_none());
        assert!(merge_system_instruction(&cfg(" ", "", true), &["  ".to_string()]).is_none());
    }
}
