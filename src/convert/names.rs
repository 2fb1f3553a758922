use std::collections::HashMap;
use std::sync::Mutex;

/// Upstream function names: start with a letter or underscore, then
/// `[A-Za-z0-9_]`, at most this long.
const MAX_NAME_LEN: usize = 63;

/// Reversible tool-name mapping so inbound-dialect name restrictions never
/// leak upstream and vice versa.
///
/// Registration is idempotent; collisions after sanitization get a numeric
/// suffix. The cache only ever grows within a process lifetime, which keeps
/// restores stable for long-lived conversations.
#[derive(Default)]
pub struct ToolNameCache {
    inner: Mutex<Maps>,
}

#[derive(Default)]
struct Maps {
    forward: HashMap<String, String>,
    reverse: HashMap<String, String>,
}

impl ToolNameCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map an inbound tool name to its upstream-safe form.
    pub fn register(&self, original: &str) -> String {
        let mut maps = self.inner.lock().expect("name cache lock poisoned");
        if let Some(existing) = maps.forward.get(original) {
            return existing.clone();
        }

        let base = sanitize(original);
        let mut candidate = base.clone();
        let mut suffix = 2usize;
        while maps.reverse.contains_key(&candidate) {
            let tail = format!("_{suffix}");
            let keep = MAX_NAME_LEN.saturating_sub(tail.len()).min(base.len());
            candidate = format!("{}{tail}", &base[..keep]);
            suffix += 1;
        }

        maps.forward.insert(original.to_string(), candidate.clone());
        maps.reverse.insert(candidate.clone(), original.to_string());
        candidate
    }

    /// Recover the inbound name for an upstream one. Unknown names pass
    /// through untouched.
    pub fn restore(&self, upstream: &str) -> String {
        let maps = self.inner.lock().expect("name cache lock poisoned");
        maps.reverse
            .get(upstream)
            .cloned()
            .unwrap_or_else(|| upstream.to_string())
    }
}

fn sanitize(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .take(MAX_NAME_LEN)
        .collect();

    let starts_ok = out
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !starts_ok {
        out.insert(0, '_');
        out.truncate(MAX_NAME_LEN);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_names_pass_through() {
        let cache = ToolNameCache::new();
        assert_eq!(cache.register("get_weather"), "get_weather");
        assert_eq!(cache.restore("get_weather"), "get_weather");
    }

    #[test]
    fn unsafe_names_roundtrip() {
        let cache = ToolNameCache::new();
        let upstream = cache.register("repo.search/files");
        assert_eq!(upstream, "repo_search_files");
        assert_eq!(cache.restore(&upstream), "repo.search/files");
    }

    #[test]
    fn registration_is_idempotent() {
        let cache = ToolNameCache::new();
        let a = cache.register("my-tool");
        let b = cache.register("my-tool");
        assert_eq!(a, b);
    }

    #[test]
    fn collisions_get_suffixes() {
        let cache = ToolNameCache::new();
        let a = cache.register("my-tool");
        let b = cache.register("my.tool");
        assert_ne!(a, b);
        assert_eq!(cache.restore(&a), "my-tool");
        assert_eq!(cache.restore(&b), "my.tool");
    }

    #[test]
    fn leading_digit_gets_prefixed() {
        let cache = ToolNameCache::new();
        let upstream = cache.register("1password_lookup");
        assert!(upstream.starts_with('_'));
    }

    #[test]
    fn long_names_truncate() {
        let cache = ToolNameCache::new();
        let upstream = cache.register(&"x".repeat(200));
        assert!(upstream.len() <= 63);
    }

    #[test]
    fn unknown_upstream_names_pass_through_restore() {
        let cache = ToolNameCache::new();
        assert_eq!(cache.restore("never_registered"), "never_registered");
    }
}
