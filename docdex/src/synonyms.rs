//! Synonym expansion
//!
//! Term emission widens each query term to its known synonyms. Providers are
//! pluggable; the bundled implementations are a static map (configuration or
//! tests) and a TTL cache wrapper for providers that hit slower backends.

use crate::normalize::normalize;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Expands a term into an ordered, deduplicated candidate list.
pub trait SynonymProvider: Send + Sync {
    /// Expand `term` for `language`. The result always contains the
    /// normalized original (first), is deduplicated case-insensitively, and
    /// preserves provider order. Empty input yields an empty list.
    fn expand(&self, language: &str, term: &str) -> Vec<String>;
}

/// Normalize, dedupe, and prepend the original term to raw expansions.
#[must_use]
pub fn canonical_expansions(term: &str, raw: &[String]) -> Vec<String> {
    let original = normalize(term);
    if original.is_empty() {
        return Vec::new();
    }

    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(raw.len() + 1);
    seen.insert(original.clone());
    out.push(original);

    for candidate in raw {
        let normalized = normalize(candidate);
        if normalized.is_empty() {
            continue;
        }
        if seen.insert(normalized.clone()) {
            out.push(normalized);
        }
    }
    out
}

/// Map-backed provider for configured synonym lists.
#[derive(Debug, Default)]
pub struct StaticSynonymProvider {
    // (language, normalized term) -> expansions
    entries: HashMap<(String, String), Vec<String>>,
}

impl StaticSynonymProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register expansions for `(language, term)`.
    pub fn insert(
        &mut self,
        language: impl Into<String>,
        term: &str,
        expansions: impl IntoIterator<Item = impl Into<String>>,
    ) {
        let key = (language.into().to_lowercase(), normalize(term));
        let values: Vec<String> = expansions.into_iter().map(Into::into).collect();
        self.entries.insert(key, values);
    }
}

impl SynonymProvider for StaticSynonymProvider {
    fn expand(&self, language: &str, term: &str) -> Vec<String> {
        let normalized = normalize(term);
        if normalized.is_empty() {
            return Vec::new();
        }
        let key = (language.to_lowercase(), normalized);
        let raw = self.entries.get(&key).cloned().unwrap_or_default();
        canonical_expansions(term, &raw)
    }
}

struct CacheEntry {
    expansions: Vec<String>,
    stored_at: DateTime<Utc>,
}

/// TTL cache in front of another provider.
///
/// Reads are concurrent; expiry rewrites happen under the single write lock.
pub struct CachedSynonymProvider {
    inner: Arc<dyn SynonymProvider>,
    ttl: Duration,
    cache: RwLock<HashMap<(String, String), CacheEntry>>,
}

impl CachedSynonymProvider {
    #[must_use]
    pub fn new(inner: Arc<dyn SynonymProvider>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            cache: RwLock::new(HashMap::new()),
        }
    }

    #[cfg(test)]
    fn cached_len(&self) -> usize {
        self.cache.read().len()
    }
}

impl SynonymProvider for CachedSynonymProvider {
    fn expand(&self, language: &str, term: &str) -> Vec<String> {
        let normalized = normalize(term);
        if normalized.is_empty() {
            return Vec::new();
        }
        let key = (language.to_lowercase(), normalized);
        let now = Utc::now();

        {
            let cache = self.cache.read();
            if let Some(entry) = cache.get(&key) {
                if now - entry.stored_at < self.ttl {
                    return entry.expansions.clone();
                }
            }
        }

        let expansions = self.inner.expand(language, term);
        self.cache.write().insert(
            key,
            CacheEntry {
                expansions: expansions.clone(),
                stored_at: now,
            },
        );
        expansions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> StaticSynonymProvider {
        let mut p = StaticSynonymProvider::new();
        p.insert("en", "report", ["summary", "Write-Up", "REPORT"]);
        p.insert("en", "car", ["automobile"]);
        p
    }

    #[test]
    fn expansion_includes_original_first() {
        let p = provider();
        let out = p.expand("en", "Report");
        assert_eq!(out[0], "report");
        assert!(out.contains(&"summary".to_string()));
    }

    #[test]
    fn dedupes_case_insensitively() {
        let p = provider();
        let out = p.expand("en", "report");
        // "REPORT" normalizes to the original and is absorbed.
        assert_eq!(
            out,
            vec!["report".to_string(), "summary".into(), "write-up".into()]
        );
    }

    #[test]
    fn unknown_term_expands_to_itself() {
        let p = provider();
        assert_eq!(p.expand("en", "ledger"), vec!["ledger".to_string()]);
    }

    #[test]
    fn empty_input_yields_empty_list() {
        let p = provider();
        assert!(p.expand("en", "").is_empty());
        assert!(p.expand("en", "   ").is_empty());
    }

    #[test]
    fn language_is_part_of_the_key() {
        let p = provider();
        assert_eq!(p.expand("de", "car"), vec!["car".to_string()]);
        assert_eq!(
            p.expand("en", "car"),
            vec!["car".to_string(), "automobile".into()]
        );
    }

    #[test]
    fn cache_serves_and_stores() {
        let cached = CachedSynonymProvider::new(Arc::new(provider()), Duration::minutes(5));
        let first = cached.expand("en", "report");
        let second = cached.expand("en", "report");
        assert_eq!(first, second);
        assert_eq!(cached.cached_len(), 1);
    }

    #[test]
    fn expired_entries_are_refreshed() {
        let cached = CachedSynonymProvider::new(Arc::new(provider()), Duration::zero());
        cached.expand("en", "report");
        // TTL of zero expires immediately; the next call re-resolves.
        let out = cached.expand("en", "report");
        assert_eq!(out[0], "report");
    }
}
