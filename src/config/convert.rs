use serde::{Deserialize, Serialize};

/// Dialect conversion configuration managed by Figment.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConvertConfig {
    /// Operator system instruction merged ahead of caller system messages.
    /// Env: `SYSTEM_INSTRUCTION`. Empty disables.
    #[serde(default)]
    pub system_instruction: String,

    /// Optional "official" prompt placed before or after the operator
    /// instruction. Env: `OFFICIAL_SYSTEM_PROMPT`. Empty disables.
    #[serde(default)]
    pub official_prompt: String,

    /// Place the official prompt before the operator instruction.
    /// TOML: `convert.official_prompt_first`. Default: `true`.
    #[serde(default = "default_official_prompt_first")]
    pub official_prompt_first: bool,

    /// Cap on inline images forwarded per request. Default: `8`.
    #[serde(default = "default_max_inline_images")]
    pub max_inline_images: usize,

    /// Thinking budget applied when the caller specifies neither an effort
    /// level nor an explicit budget. Default: `-1` (model decides).
    #[serde(default = "default_thinking_budget")]
    pub default_thinking_budget: i64,

    /// Attach known signatures to outgoing `functionCall` parts.
    /// TOML: `convert.cache_tool_signatures`. Default: `true`.
    #[serde(default = "default_cache_tool_signatures")]
    pub cache_tool_signatures: bool,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            system_instruction: String::new(),
            official_prompt: String::new(),
            official_prompt_first: default_official_prompt_first(),
            max_inline_images: default_max_inline_images(),
            default_thinking_budget: default_thinking_budget(),
            cache_tool_signatures: default_cache_tool_signatures(),
        }
    }
}

fn default_official_prompt_first() -> bool {
    true
}

fn default_max_inline_images() -> usize {
    8
}

fn default_thinking_budget() -> i64 {
    -1
}

fn default_cache_tool_signatures() -> bool {
    true
}
