//! docdex - search core for document management
//!
//! Compiles structured search intent into an executable plan against a
//! SQLite FTS5 index (plus a trigram index for fuzzy/wildcard fallback),
//! scores and ranks hits with hybrid merging, and owns the schema lifecycle
//! of both indexes.

pub mod analyzer;
pub mod ast;
pub mod builder;
pub mod database;
pub mod error;
pub mod executor;
pub mod history;
pub mod models;
pub mod normalize;
pub mod plan;
pub mod policy;
pub mod schema;
pub mod scoring;
pub mod snippet;
pub mod synonyms;
pub mod trigram;

pub use analyzer::{AnalyzerProfile, AnalyzerRegistry};
pub use ast::{BoolOp, QueryNode};
pub use builder::{QueryBuilder, RangeValue};
pub use database::Database;
pub use error::{DatabaseError, SearchError, SearchResult};
pub use executor::SearchExecutor;
pub use history::{FavoriteEntry, HistoryEntry, SearchHistory};
pub use models::{
    DocumentRecord, HighlightRange, HitSource, SearchHit, SearchPage, SnippetData,
};
pub use plan::{ParamValue, PlanParam, SearchQueryPlan};
pub use policy::FallbackPolicy;
pub use schema::{
    probe_fts_capability, reset_capability_probe, FtsCapability, HealthStatus,
    SchemaHealthReport, SchemaManager, SchemaSnapshot, SchemaState,
};
pub use scoring::{FieldWeights, MergeMode, ScorePlan, SimilarityFn};
pub use synonyms::{CachedSynonymProvider, StaticSynonymProvider, SynonymProvider};
