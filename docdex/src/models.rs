//! Core data models for the search core

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// A row of the document mirror table — the indexed projection of a stored
/// file. The mirror is the source of truth for the FTS index; its triggers
/// keep the index in sync.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentRecord {
    /// Stable file identifier (BLOB primary key).
    pub file_id: Vec<u8>,
    pub title: String,
    pub author: Option<String>,
    pub mime: String,
    /// Extracted text used for full-text matching and snippets.
    pub metadata_text: Option<String>,
    /// Raw metadata payload, indexed under the `metadata` FTS column.
    pub metadata_json: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub modified_utc: DateTime<Utc>,
    pub content_hash: String,
    pub stored_content_hash: Option<String>,
    pub stored_token_hash: Option<String>,
}

impl DocumentRecord {
    /// The text fed to the trigram index for this document.
    #[must_use]
    pub fn trigram_source(&self) -> String {
        let mut parts: Vec<&str> = vec![&self.title];
        if let Some(author) = &self.author {
            parts.push(author);
        }
        if let Some(text) = &self.metadata_text {
            parts.push(text);
        }
        parts.join(" ")
    }
}

/// Render a timestamp the way the store columns and range parameters expect
/// it: ISO-8601 round-trip UTC, second precision, `+00:00` offset.
#[must_use]
pub fn format_utc(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, false)
}

/// Parse a stored ISO-8601 timestamp; `None` for unparseable values.
#[must_use]
pub fn parse_utc(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// A highlighted character range within a snippet (char indices, not bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighlightRange {
    pub start: u64,
    pub end: u64,
}

/// A hydrated snippet for a hit: normalized text plus highlight ranges
/// adjusted into it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnippetData {
    pub text: String,
    pub highlights: Vec<HighlightRange>,
}

/// Which index produced (or co-produced) a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitSource {
    Lexical,
    Trigram,
    Both,
}

/// One ranked search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub file_id: Vec<u8>,
    pub title: String,
    pub author: Option<String>,
    pub mime: String,
    /// Final score after merging, direction-normalized (higher is better).
    pub score: f64,
    /// Raw BM25 value from the lexical pass, when that pass produced the hit.
    pub bm25: Option<f64>,
    /// Value of the `custom_similarity` SQL column, when configured.
    pub custom_similarity: Option<f64>,
    pub modified_utc: Option<DateTime<Utc>>,
    pub source: HitSource,
    pub snippet: SnippetData,
}

/// A page of hits plus the execution facts the parse policy consumed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchPage {
    pub hits: Vec<SearchHit>,
    /// Hits the lexical pass produced before merging and paging.
    pub lexical_hit_count: usize,
    /// Whether the trigram fallback ran for this query.
    pub used_trigram_fallback: bool,
}
