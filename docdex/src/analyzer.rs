//! Analyzer profiles
//!
//! A profile bundles the per-language switches the query compiler consults
//! when turning raw text into index terms: stemming, number handling,
//! stopwords, and filename splitting. Profiles are registered by id and the
//! registry falls back to a configured default on lookup miss.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// A named analyzer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerProfile {
    pub name: String,
    pub enable_stemming: bool,
    pub keep_numbers: bool,
    pub stopwords: HashSet<String>,
    /// Split `._-` inside tokens before trigram generation, so that
    /// `annual_report.pdf` also matches on its parts.
    pub split_filenames: bool,
    pub custom_tokenizer_id: Option<String>,
    pub custom_filter_ids: Vec<String>,
}

impl AnalyzerProfile {
    /// A permissive profile: no stemming, numbers kept, no stopwords.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enable_stemming: false,
            keep_numbers: true,
            stopwords: HashSet::new(),
            split_filenames: false,
            custom_tokenizer_id: None,
            custom_filter_ids: Vec::new(),
        }
    }

    /// Whether `token` (already normalized) is a stopword for this profile.
    #[must_use]
    pub fn is_stopword(&self, token: &str) -> bool {
        self.stopwords.contains(token)
    }
}

impl Default for AnalyzerProfile {
    fn default() -> Self {
        Self::named("default")
    }
}

/// Registry of analyzer profiles keyed by case-insensitive id.
#[derive(Debug, Clone)]
pub struct AnalyzerRegistry {
    profiles: HashMap<String, AnalyzerProfile>,
    default_id: String,
}

impl AnalyzerRegistry {
    /// Create a registry whose fallback is `default_profile`.
    #[must_use]
    pub fn new(default_profile: AnalyzerProfile) -> Self {
        let default_id = default_profile.name.to_lowercase();
        let mut profiles = HashMap::new();
        profiles.insert(default_id.clone(), default_profile);
        Self {
            profiles,
            default_id,
        }
    }

    /// Register a profile under its own (case-insensitive) name.
    pub fn register(&mut self, profile: AnalyzerProfile) {
        self.profiles.insert(profile.name.to_lowercase(), profile);
    }

    /// Look up a profile by id; a miss falls back to the default profile.
    #[must_use]
    pub fn get(&self, id: &str) -> &AnalyzerProfile {
        self.profiles
            .get(&id.trim().to_lowercase())
            .unwrap_or_else(|| &self.profiles[&self.default_id])
    }

    /// The id of the default profile.
    #[must_use]
    pub fn default_id(&self) -> &str {
        &self.default_id
    }
}

impl Default for AnalyzerRegistry {
    fn default() -> Self {
        Self::new(AnalyzerProfile::default())
    }
}
