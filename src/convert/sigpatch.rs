use crate::sigcache::SignatureCache;
use castor_schema::gemini::GeminiGenerateContentRequest;

/// Accepted by the upstream's validator when no real signature is known for
/// a thought part that must carry one.
const SKIP_VALIDATOR_SIGNATURE: &str = "skip_thought_signature_validator";

/// Re-attach cached thought signatures to an outgoing request.
///
/// Runs after credential selection, since the cache is keyed by the lease's
/// session id. Thought parts get the cached reasoning signature (or the
/// validator skip marker on a miss); `functionCall` parts get it only when
/// tool-signature caching is enabled.
pub fn patch_request(
    request: &mut GeminiGenerateContentRequest,
    cache: &SignatureCache,
    session_id: &str,
    model: &str,
    cache_tool_signatures: bool,
) {
    let cached = cache.get(session_id, model);

    for content in &mut request.contents {
        if content.role.as_deref() != Some("model") {
            continue;
        }
        for part in &mut content.parts {
            if part.thought == Some(true) && part.thought_signature.is_none() {
                part.thought_signature = Some(
                    cached
                        .as_ref()
                        .map_or(SKIP_VALIDATOR_SIGNATURE.to_string(), |entry| {
                            entry.signature.to_string()
                        }),
                );
            }
            if cache_tool_signatures
                && part.function_call.is_some()
                && part.thought_signature.is_none()
            {
                if let Some(entry) = &cached {
                    part.thought_signature = Some(entry.signature.to_string());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SignaturePolicy;
    use serde_json::json;

    fn request_with_thought() -> GeminiGenerateContentRequest {
        serde_json::from_value(json!({
            "contents": [
                {"role": "user", "parts": [{"text": "hi"}]},
                {"role": "model", "parts": [
                    {"thought": true, "text": "internal reasoning"},
                    {"functionCall": {"name": "get_weather", "args": {"city": "Berlin"}}}
                ]}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn cache_miss_fills_skip_marker_on_thoughts_only() {
        let cache = SignatureCache::new(SignaturePolicy::Always);
        let mut req = request_with_thought();

        patch_request(&mut req, &cache, "sess", "model", true);

        let parts = &req.contents[1].parts;
        assert_eq!(
            parts[0].thought_signature.as_deref(),
            Some(SKIP_VALIDATOR_SIGNATURE)
        );
        assert!(parts[1].thought_signature.is_none());
    }

    #[test]
    fn cache_hit_attaches_to_thought_and_tool_call() {
        let cache = SignatureCache::new(SignaturePolicy::Always);
        cache.store("sess", "model", "sig_123", "reasoning");
        let mut req = request_with_thought();

        patch_request(&mut req, &cache, "sess", "model", true);

        let parts = &req.contents[1].parts;
        assert_eq!(parts[0].thought_signature.as_deref(), Some("sig_123"));
        assert_eq!(parts[1].thought_signature.as_deref(), Some("sig_123"));
    }

    #[test]
    fn tool_signature_attachment_is_gated() {
        let cache = SignatureCache::new(SignaturePolicy::Always);
        cache.store("sess", "model", "sig_123", "reasoning");
        let mut req = request_with_thought();

        patch_request(&mut req, &cache, "sess", "model", false);

        let parts = &req.contents[1].parts;
        assert!(parts[1].thought_signature.is_none());
    }

    #[test]
    fn existing_signatures_are_preserved() {
        let cache = SignatureCache::new(SignaturePolicy::Always);
        cache.store("sess", "model", "sig_new", "reasoning");

        let mut req: GeminiGenerateContentRequest = serde_json::from_value(json!({
            "contents": [
                {"role": "model", "parts": [
                    {"thought": true, "text": "t", "thoughtSignature": "sig_original"}
                ]}
            ]
        }))
        .unwrap();

        patch_request(&mut req, &cache, "sess", "model", true);
        assert_eq!(
            req.contents[0].parts[0].thought_signature.as_deref(),
            Some("sig_original")
        );
    }

    #[test]
    fn user_turns_are_untouched() {
        let cache = SignatureCache::new(SignaturePolicy::Always);
        cache.store("sess", "model", "sig", "r");
        let mut req: GeminiGenerateContentRequest = serde_json::from_value(json!({
            "contents": [{"role": "user", "parts": [{"text": "hello"}]}]
        }))
        .unwrap();

        patch_request(&mut req, &cache, "sess", "model", true);
        assert!(req.contents[0].parts[0].thought_signature.is_none());
    }
}
