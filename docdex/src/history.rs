//! Search history and saved favorites
//!
//! Recent MATCH queries are recorded with execution counts; favorites are
//! named saved queries with an explicit ordering position.

use crate::database::Database;
use crate::error::{SearchError, SearchResult};
use crate::models::{format_utc, parse_utc};
use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};

/// One recorded search execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub query_text: Option<String>,
    pub match_expr: String,
    pub created_utc: Option<DateTime<Utc>>,
    pub executions: i64,
    pub last_total_hits: Option<i64>,
    pub is_fuzzy: bool,
}

/// A named saved query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FavoriteEntry {
    pub id: i64,
    pub name: String,
    pub query_text: Option<String>,
    pub match_expr: String,
    pub position: i64,
    pub created_utc: Option<DateTime<Utc>>,
    pub is_fuzzy: bool,
}

/// CRUD over the history and favorite tables (created by the schema
/// manager).
pub struct SearchHistory {
    db: Database,
}

impl SearchHistory {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Record one execution of a match expression. Re-running the same
    /// expression bumps `executions` and refreshes `last_total_hits`
    /// instead of inserting a duplicate row.
    pub fn record(
        &self,
        query_text: Option<&str>,
        match_expr: &str,
        total_hits: Option<i64>,
        is_fuzzy: bool,
    ) -> SearchResult<()> {
        if match_expr.trim().is_empty() {
            return Err(SearchError::InvalidArgument(
                "match expression must not be empty".into(),
            ));
        }
        let conn = self.db.get_conn().map_err(SearchError::Store)?;
        let updated = conn.execute(
            "UPDATE search_history
             SET executions = executions + 1,
                 last_total_hits = ?2,
                 created_utc = ?3
             WHERE match_expr = ?1",
            params![match_expr, total_hits, format_utc(Utc::now())],
        )?;
        if updated == 0 {
            conn.execute(
                "INSERT INTO search_history
                 (query_text, match_expr, created_utc, executions, last_total_hits, is_fuzzy)
                 VALUES (?1, ?2, ?3, 1, ?4, ?5)",
                params![
                    query_text,
                    match_expr,
                    format_utc(Utc::now()),
                    total_hits,
                    is_fuzzy
                ],
            )?;
        }
        Ok(())
    }

    /// Most recent entries, newest first.
    pub fn recent(&self, limit: usize) -> SearchResult<Vec<HistoryEntry>> {
        let conn = self.db.get_conn().map_err(SearchError::Store)?;
        let mut stmt = conn.prepare(
            "SELECT id, query_text, match_expr, created_utc, executions, last_total_hits, is_fuzzy
             FROM search_history
             ORDER BY created_utc DESC, id DESC
             LIMIT ?1",
        )?;
        let entries = stmt
            .query_map([limit as i64], |row| {
                Ok(HistoryEntry {
                    id: row.get(0)?,
                    query_text: row.get(1)?,
                    match_expr: row.get(2)?,
                    created_utc: row
                        .get::<_, String>(3)
                        .map(|s| parse_utc(&s))
                        .unwrap_or(None),
                    executions: row.get(4)?,
                    last_total_hits: row.get(5)?,
                    is_fuzzy: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Delete all history rows.
    pub fn clear(&self) -> SearchResult<()> {
        let conn = self.db.get_conn().map_err(SearchError::Store)?;
        conn.execute("DELETE FROM search_history", [])?;
        Ok(())
    }

    // ── Favorites ────────────────────────────────────────────────────────

    /// Save (or replace) a named favorite, appending it at the end of the
    /// ordering.
    pub fn save_favorite(
        &self,
        name: &str,
        query_text: Option<&str>,
        match_expr: &str,
        is_fuzzy: bool,
    ) -> SearchResult<i64> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(SearchError::InvalidArgument(
                "favorite name must not be empty".into(),
            ));
        }
        if match_expr.trim().is_empty() {
            return Err(SearchError::InvalidArgument(
                "match expression must not be empty".into(),
            ));
        }
        let conn = self.db.get_conn().map_err(SearchError::Store)?;
        let next_position: i64 = conn.query_row(
            "SELECT COALESCE(MAX(position) + 1, 0) FROM search_favorite",
            [],
            |row| row.get(0),
        )?;
        conn.execute(
            "INSERT INTO search_favorite
             (name, query_text, match_expr, position, created_utc, is_fuzzy)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(name) DO UPDATE SET
                query_text = excluded.query_text,
                match_expr = excluded.match_expr,
                is_fuzzy = excluded.is_fuzzy",
            params![
                trimmed,
                query_text,
                match_expr,
                next_position,
                format_utc(Utc::now()),
                is_fuzzy
            ],
        )?;
        let id = conn.query_row(
            "SELECT id FROM search_favorite WHERE name = ?1",
            [trimmed],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Favorites ordered by position.
    pub fn favorites(&self) -> SearchResult<Vec<FavoriteEntry>> {
        let conn = self.db.get_conn().map_err(SearchError::Store)?;
        let mut stmt = conn.prepare(
            "SELECT id, name, query_text, match_expr, position, created_utc, is_fuzzy
             FROM search_favorite
             ORDER BY position ASC, id ASC",
        )?;
        let entries = stmt
            .query_map([], |row| {
                Ok(FavoriteEntry {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    query_text: row.get(2)?,
                    match_expr: row.get(3)?,
                    position: row.get(4)?,
                    created_utc: row
                        .get::<_, String>(5)
                        .map(|s| parse_utc(&s))
                        .unwrap_or(None),
                    is_fuzzy: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Move a favorite to a new position, shifting the others.
    pub fn move_favorite(&self, id: i64, new_position: i64) -> SearchResult<()> {
        let mut entries = self.favorites()?;
        let Some(index) = entries.iter().position(|e| e.id == id) else {
            return Err(SearchError::InvalidArgument(format!(
                "no favorite with id {id}"
            )));
        };
        let entry = entries.remove(index);
        let clamped = usize::try_from(new_position.max(0)).unwrap_or(0).min(entries.len());
        entries.insert(clamped, entry);

        let conn = self.db.get_conn().map_err(SearchError::Store)?;
        for (position, entry) in entries.iter().enumerate() {
            conn.execute(
                "UPDATE search_favorite SET position = ?1 WHERE id = ?2",
                params![position as i64, entry.id],
            )?;
        }
        Ok(())
    }

    /// Delete a favorite by name; returns whether a row was removed.
    pub fn delete_favorite(&self, name: &str) -> SearchResult<bool> {
        let conn = self.db.get_conn().map_err(SearchError::Store)?;
        let deleted = conn.execute(
            "DELETE FROM search_favorite WHERE name = ?1",
            [name.trim()],
        )?;
        Ok(deleted > 0)
    }
}
