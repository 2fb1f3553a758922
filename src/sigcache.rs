//! Thought-signature cache.
//!
//! Stores the most recent upstream "thought signature" per (session, model),
//! together with one non-empty placeholder of the accompanying reasoning
//! text. Re-supplying both on the next request lets the upstream continue its
//! hidden reasoning trace.

use crate::config::SignaturePolicy;
use ahash::RandomState;
use moka::sync::Cache;
use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_TTL_SECS: u64 = 60 * 60;
const DEFAULT_MAX_CAPACITY: u64 = 100_000;

/// Placeholder reasoning text when a signature arrived with none; the
/// upstream only requires the paired thought part to be non-empty.
const EMPTY_THOUGHT_PLACEHOLDER: &str = "…";

type CacheKey = u64;

#[derive(Debug, Clone)]
pub struct SignatureEntry {
    pub signature: Arc<str>,
    pub thought_text: Arc<str>,
}

/// Last-writer-wins signature store with TTL and size bounds.
#[derive(Clone)]
pub struct SignatureCache {
    cache: Cache<CacheKey, SignatureEntry>,
    hasher: RandomState,
    policy: SignaturePolicy,
}

impl SignatureCache {
    pub fn new(policy: SignaturePolicy) -> Self {
        Self::with_bounds(policy, DEFAULT_TTL_SECS, DEFAULT_MAX_CAPACITY)
    }

    pub fn with_bounds(policy: SignaturePolicy, ttl_secs: u64, max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .time_to_live(Duration::from_secs(ttl_secs.max(1)))
            .max_capacity(max_capacity.max(1))
            .build();
        Self {
            cache,
            hasher: RandomState::new(),
            policy,
        }
    }

    pub fn policy(&self) -> SignaturePolicy {
        self.policy
    }

    /// Whether a finished response should be cached under the active policy.
    pub fn should_store(&self, had_tool_calls: bool, is_image_model: bool) -> bool {
        match self.policy {
            SignaturePolicy::Always => true,
            SignaturePolicy::ToolsOrImage => had_tool_calls || is_image_model,
            SignaturePolicy::Never => false,
        }
    }

    pub fn store(&self, session: &str, model: &str, signature: &str, thought_text: &str) {
        if signature.is_empty() {
            return;
        }
        let text = if thought_text.trim().is_empty() {
            EMPTY_THOUGHT_PLACEHOLDER
        } else {
            thought_text
        };
        self.cache.insert(
            self.key(session, model),
            SignatureEntry {
                signature: Arc::from(signature),
                thought_text: Arc::from(text),
            },
        );
    }

    pub fn get(&self, session: &str, model: &str) -> Option<SignatureEntry> {
        self.cache.get(&self.key(session, model))
    }

    /// Cleanup hook for the periodic memory-tidy timer.
    pub fn tidy(&self) {
        self.cache.run_pending_tasks();
    }

    fn key(&self, session: &str, model: &str) -> CacheKey {
        let mut hasher = self.hasher.build_hasher();
        session.hash(&mut hasher);
        model.hash(&mut hasher);
        hasher.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_returns_none_on_miss() {
        let cache = SignatureCache::new(SignaturePolicy::Always);
        assert!(cache.get("sess", "model").is_none());
    }

    #[test]
    fn store_then_get_hits_per_session_and_model() {
        let cache = SignatureCache::new(SignaturePolicy::Always);
        cache.store("sess", "model-a", "sig-1", "reasoning text");

        let entry = cache.get("sess", "model-a").unwrap();
        assert_eq!(entry.signature.as_ref(), "sig-1");
        assert_eq!(entry.thought_text.as_ref(), "reasoning text");

        assert!(cache.get("sess", "model-b").is_none());
        assert!(cache.get("other", "model-a").is_none());
    }

    #[test]
    fn last_writer_wins() {
        let cache = SignatureCache::new(SignaturePolicy::Always);
        cache.store("sess", "m", "sig-1", "a");
        cache.store("sess", "m", "sig-2", "b");
        assert_eq!(cache.get("sess", "m").unwrap().signature.as_ref(), "sig-2");
    }

    #[test]
    fn empty_thought_text_gets_placeholder() {
        let cache = SignatureCache::new(SignaturePolicy::Always);
        cache.store("sess", "m", "sig", "   ");
        let entry = cache.get("sess", "m").unwrap();
        assert!(!entry.thought_text.is_empty());
    }

    #[test]
    fn empty_signature_is_rejected() {
        let cache = SignatureCache::new(SignaturePolicy::Always);
        cache.store("sess", "m", "", "text");
        assert!(cache.get("sess", "m").is_none());
    }

    #[test]
    fn policy_gates_store_decision() {
        let always = SignatureCache::new(SignaturePolicy::Always);
        assert!(always.should_store(false, false));

        let tools = SignatureCache::new(SignaturePolicy::ToolsOrImage);
        assert!(!tools.should_store(false, false));
        assert!(tools.should_store(true, false));
        assert!(tools.should_store(false, true));

        let never = SignatureCache::new(SignaturePolicy::Never);
        assert!(!never.should_store(true, true));
    }
}
