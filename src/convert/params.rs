use castor_schema::gemini::ThinkingConfig;

const EFFORT_LOW_BUDGET: i64 = 1024;
const EFFORT_MEDIUM_BUDGET: i64 = 16_000;
const EFFORT_HIGH_BUDGET: i64 = 32_000;

/// Resolve the upstream thinking config from dialect-level knobs.
///
/// Precedence: an explicit budget (0 disables thinking) beats the effort
/// level, which beats the configured default.
pub fn resolve_thinking(
    effort: Option<&str>,
    explicit_budget: Option<i64>,
    default_budget: i64,
) -> ThinkingConfig {
    if let Some(budget) = explicit_budget {
        return ThinkingConfig::with_budget(budget);
    }

    match effort.map(str::to_ascii_lowercase).as_deref() {
        Some("low") => ThinkingConfig::with_budget(EFFORT_LOW_BUDGET),
        Some("medium") => ThinkingConfig::with_budget(EFFORT_MEDIUM_BUDGET),
        Some("high") => ThinkingConfig::with_budget(EFFORT_HIGH_BUDGET),
        _ => ThinkingConfig::with_budget(default_budget),
    }
}

/// JSON response mode maps to `responseMimeType` for Gemini-family models
/// only; other models ignore it.
pub fn json_mime_for_model(model: &str) -> Option<String> {
    model
        .to_ascii_lowercase()
        .contains("gemini")
        .then(|| "application/json".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effort_levels_map_to_fixed_budgets() {
        assert_eq!(
            resolve_thinking(Some("low"), None, -1).thinking_budget,
            Some(1024)
        );
        assert_eq!(
            resolve_thinking(Some("medium"), None, -1).thinking_budget,
            Some(16_000)
        );
        assert_eq!(
            resolve_thinking(Some("HIGH"), None, -1).thinking_budget,
            Some(32_000)
        );
    }

    #[test]
    fn explicit_budget_overrides_effort() {
        let tc = resolve_thinking(Some("high"), Some(2048), -1);
        assert_eq!(tc.thinking_budget, Some(2048));
    }

    #[test]
    fn zero_budget_disables_thinking() {
        let tc = resolve_thinking(Some("high"), Some(0), -1);
        assert_eq!(tc.include_thoughts, Some(false));
        assert_eq!(tc.thinking_budget, Some(0));
    }

    #[test]
    fn missing_knobs_fall_back_to_default() {
        let tc = resolve_thinking(None, None, -1);
        assert_eq!(tc.thinking_budget, Some(-1));
        assert_eq!(tc.include_thoughts, Some(true));
    }

    #[test]
    fn json_mime_only_for_gemini_models() {
        assert_eq!(
            json_mime_for_model("gemini-2.5-pro").as_deref(),
            Some("application/json")
        );
        assert!(json_mime_for_model("claude-sonnet-4").is_none());
    }
}
