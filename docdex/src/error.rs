//! Error types for the search core

use thiserror::Error;

/// Result type alias for search operations
pub type SearchResult<T> = std::result::Result<T, SearchError>;

/// Errors surfaced by the query compiler, executor, and schema manager
#[derive(Error, Debug)]
pub enum SearchError {
    /// The compiled plan had neither a MATCH expression nor a trigram
    /// expression. Callers typically recover by showing zero results.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// A caller-supplied value was rejected (unsafe SQL fragment, empty
    /// required input, out-of-range factor).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The FTS module or required tokenizer is not available in the host
    /// store. Queries may still be served trigram-only where possible.
    #[error("Full-text search unavailable: {0}")]
    FeatureUnavailable(String),

    /// Schema repair failed, or the schema is still invalid after repair.
    /// Fatal for the query path until the next successful repair.
    #[error("Search schema error: {0}")]
    Schema(String),

    /// The caller's cancellation token fired. No partial rows are returned.
    #[error("Operation cancelled")]
    Cancelled,

    /// Underlying store failure, propagated with context.
    #[error("Store error: {0}")]
    Store(#[from] DatabaseError),
}

impl SearchError {
    /// Returns whether the error is transient and the operation can be
    /// retried (the trigram fallback and schema repair paths key off this).
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Schema(_) | Self::Store(_))
    }
}

/// Errors from the pooled SQLite layer
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
}

pub type DatabaseResult<T> = Result<T, DatabaseError>;

impl From<rusqlite::Error> for SearchError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Store(DatabaseError::Sqlite(e))
    }
}

impl From<r2d2::Error> for SearchError {
    fn from(e: r2d2::Error) -> Self {
        Self::Store(DatabaseError::Pool(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_non_empty() {
        let errors: Vec<SearchError> = vec![
            SearchError::InvalidQuery("empty match".into()),
            SearchError::InvalidArgument("bad fragment".into()),
            SearchError::FeatureUnavailable("fts5 missing".into()),
            SearchError::Schema("still invalid".into()),
            SearchError::Cancelled,
        ];
        for err in &errors {
            assert!(!err.to_string().is_empty());
        }
    }

    #[test]
    fn retryable_classification() {
        assert!(SearchError::Schema("x".into()).is_retryable());
        assert!(!SearchError::InvalidQuery("x".into()).is_retryable());
        assert!(!SearchError::Cancelled.is_retryable());
    }

    #[test]
    fn store_error_from_conversion() {
        let err: SearchError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, SearchError::Store(DatabaseError::Sqlite(_))));
    }
}
