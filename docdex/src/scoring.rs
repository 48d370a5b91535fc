//! Scoring plan
//!
//! Pure data describing how hits are ranked: per-field BM25 weights, the
//! optional TF-IDF-style alternative, custom rank/similarity hooks, and the
//! hybrid merge configuration. The builder mutates its live plan (boosts,
//! overrides); `build()` emits a clone into the immutable query plan.

use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Code-side similarity hook: `(bm25, custom_similarity, modified_utc)` to a
/// replacement score. Pure function, applied post-hoc per hit.
pub type SimilarityFn =
    Arc<dyn Fn(f64, Option<f64>, Option<DateTime<Utc>>) -> f64 + Send + Sync>;

/// How lexical and trigram result sets are merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// Max of the weighted normalized scores.
    Max,
    /// Sum of the unweighted normalized scores.
    Sum,
    /// `lexical_weight * L + (1 - lexical_weight) * T`.
    Weighted,
}

/// Per-field BM25 weights, in index column order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldWeights {
    pub title: f64,
    pub author: f64,
    pub mime: f64,
    pub metadata_text: f64,
    pub metadata: f64,
}

impl Default for FieldWeights {
    fn default() -> Self {
        Self {
            title: 4.0,
            author: 2.0,
            mime: 0.1,
            metadata_text: 0.8,
            metadata: 0.2,
        }
    }
}

impl FieldWeights {
    /// Multiply the weight of `field` by `factor`. Returns false for a field
    /// outside the weighted set.
    pub fn boost(&mut self, field: &str, factor: f64) -> bool {
        let slot = match field {
            "title" => &mut self.title,
            "author" => &mut self.author,
            "mime" => &mut self.mime,
            "metadata_text" => &mut self.metadata_text,
            "metadata" => &mut self.metadata,
            _ => return false,
        };
        *slot *= factor;
        true
    }
}

/// The full ranking configuration carried by a plan.
#[derive(Clone)]
pub struct ScorePlan {
    pub weights: FieldWeights,
    pub score_multiplier: f64,
    /// Rank hits by `1 / (tfidf_damping + bm25)` instead of raw BM25.
    pub use_tfidf_alternative: bool,
    pub tfidf_damping: f64,
    /// BM25 is cost-like (lower is better); custom expressions may invert.
    pub higher_is_better: bool,
    pub custom_rank_expr: Option<String>,
    pub custom_similarity_sql: Option<String>,
    pub custom_similarity_fn: Option<SimilarityFn>,
    pub merge_mode: MergeMode,
    /// Weight of the lexical source in hybrid merges.
    pub lexical_weight: f64,
    /// Each source is asked for `take * oversample_multiplier` rows.
    pub oversample_multiplier: u32,
    /// Normalized trigram scores are scaled by this factor...
    pub trigram_scale: f64,
    /// ...and floored at this value before merging.
    pub trigram_floor: f64,
}

impl Default for ScorePlan {
    fn default() -> Self {
        Self {
            weights: FieldWeights::default(),
            score_multiplier: 1.0,
            use_tfidf_alternative: false,
            tfidf_damping: 0.5,
            higher_is_better: false,
            custom_rank_expr: None,
            custom_similarity_sql: None,
            custom_similarity_fn: None,
            merge_mode: MergeMode::Max,
            lexical_weight: 0.7,
            oversample_multiplier: 3,
            trigram_scale: 0.45,
            trigram_floor: 0.30,
        }
    }
}

impl std::fmt::Debug for ScorePlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScorePlan")
            .field("weights", &self.weights)
            .field("score_multiplier", &self.score_multiplier)
            .field("use_tfidf_alternative", &self.use_tfidf_alternative)
            .field("tfidf_damping", &self.tfidf_damping)
            .field("higher_is_better", &self.higher_is_better)
            .field("custom_rank_expr", &self.custom_rank_expr)
            .field("custom_similarity_sql", &self.custom_similarity_sql)
            .field(
                "custom_similarity_fn",
                &self.custom_similarity_fn.as_ref().map(|_| "<fn>"),
            )
            .field("merge_mode", &self.merge_mode)
            .field("lexical_weight", &self.lexical_weight)
            .field("oversample_multiplier", &self.oversample_multiplier)
            .field("trigram_scale", &self.trigram_scale)
            .field("trigram_floor", &self.trigram_floor)
            .finish()
    }
}
