//! FTS schema lifecycle
//!
//! Owns the contentless FTS index, its document mirror table, the triggers
//! keeping them in sync, and the companion trigram index. Provides
//! inspection, diffing against the expected layout, repair, reindex, health
//! probing, and capability detection.

use crate::database::Database;
use crate::error::{SearchError, SearchResult};
use crate::models::{format_utc, DocumentRecord};
use crate::trigram;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

// ─────────────────────────────────────────────────────────────────────────────
// Expected layout
// ─────────────────────────────────────────────────────────────────────────────

pub const FTS_TABLE: &str = "search_document_fts";
pub const DOCUMENT_TABLE: &str = "search_document";
pub const TRIGRAM_TABLE: &str = "search_trigram";
pub const TRIGRAM_MAP_TABLE: &str = "search_trigram_map";

pub const EXPECTED_FTS_COLUMNS: &[&str] =
    &["title", "author", "mime", "metadata_text", "metadata"];

pub const EXPECTED_DOCUMENT_COLUMNS: &[&str] = &[
    "file_id",
    "title",
    "author",
    "mime",
    "metadata_text",
    "metadata_json",
    "created_utc",
    "modified_utc",
    "content_hash",
    "stored_content_hash",
    "stored_token_hash",
];

pub const EXPECTED_TRIGGERS: &[&str] = &[
    "search_document_ai",
    "search_document_au",
    "search_document_ad",
];

const CREATE_DOCUMENT_TABLE_SQL: &str = "
CREATE TABLE IF NOT EXISTS search_document (
    file_id BLOB PRIMARY KEY,
    title TEXT NOT NULL DEFAULT '',
    author TEXT,
    mime TEXT NOT NULL,
    metadata_text TEXT,
    metadata_json TEXT,
    created_utc TEXT NOT NULL,
    modified_utc TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    stored_content_hash TEXT,
    stored_token_hash TEXT
)";

const CREATE_FTS_TABLE_SQL: &str = "
CREATE VIRTUAL TABLE IF NOT EXISTS search_document_fts USING fts5(
    title, author, mime, metadata_text, metadata,
    content='', contentless_delete=1,
    tokenize='unicode61 remove_diacritics 2'
)";

const CREATE_TRIGGER_AI_SQL: &str = "
CREATE TRIGGER IF NOT EXISTS search_document_ai AFTER INSERT ON search_document BEGIN
    INSERT INTO search_document_fts(rowid, title, author, mime, metadata_text, metadata)
    VALUES (new.rowid, new.title, new.author, new.mime, new.metadata_text, new.metadata_json);
END";

const CREATE_TRIGGER_AU_SQL: &str = "
CREATE TRIGGER IF NOT EXISTS search_document_au AFTER UPDATE ON search_document BEGIN
    DELETE FROM search_document_fts WHERE rowid = old.rowid;
    INSERT INTO search_document_fts(rowid, title, author, mime, metadata_text, metadata)
    VALUES (new.rowid, new.title, new.author, new.mime, new.metadata_text, new.metadata_json);
END";

const CREATE_TRIGGER_AD_SQL: &str = "
CREATE TRIGGER IF NOT EXISTS search_document_ad AFTER DELETE ON search_document BEGIN
    DELETE FROM search_document_fts WHERE rowid = old.rowid;
END";

const CREATE_TRIGRAM_TABLE_SQL: &str = "
CREATE VIRTUAL TABLE IF NOT EXISTS search_trigram USING fts5(
    trgm, content='', contentless_delete=1, tokenize='unicode61'
)";

const CREATE_TRIGRAM_MAP_SQL: &str = "
CREATE TABLE IF NOT EXISTS search_trigram_map (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_id BLOB NOT NULL UNIQUE
)";

const CREATE_HISTORY_TABLE_SQL: &str = "
CREATE TABLE IF NOT EXISTS search_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    query_text TEXT,
    match_expr TEXT NOT NULL,
    created_utc TEXT NOT NULL,
    executions INTEGER NOT NULL DEFAULT 1,
    last_total_hits INTEGER,
    is_fuzzy INTEGER NOT NULL DEFAULT 0
)";

const CREATE_FAVORITE_TABLE_SQL: &str = "
CREATE TABLE IF NOT EXISTS search_favorite (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    query_text TEXT,
    match_expr TEXT NOT NULL,
    position INTEGER NOT NULL,
    created_utc TEXT NOT NULL,
    is_fuzzy INTEGER NOT NULL DEFAULT 0
)";

const POPULATE_FTS_SQL: &str = "
INSERT INTO search_document_fts(rowid, title, author, mime, metadata_text, metadata)
SELECT rowid, title, author, mime, metadata_text, metadata_json FROM search_document";

// ─────────────────────────────────────────────────────────────────────────────
// Capability probe
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome of the one-shot FTS capability check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FtsCapability {
    pub available: bool,
    pub reason: Option<String>,
}

static CAPABILITY: Lazy<RwLock<Option<FtsCapability>>> = Lazy::new(|| RwLock::new(None));

/// Serializes schema repair and health checks process-wide; at most one
/// repair runs at a time, and health checks never overlap a repair.
static REPAIR_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Verify that the FTS module and the `unicode61 remove_diacritics 2`
/// tokenizer are available, creating a throwaway virtual table on a scratch
/// connection. The result is cached process-wide.
pub fn probe_fts_capability() -> FtsCapability {
    if let Some(cached) = CAPABILITY.read().as_ref() {
        return cached.clone();
    }

    let outcome = rusqlite::Connection::open_in_memory().and_then(|conn| {
        conn.execute_batch(
            "CREATE VIRTUAL TABLE fts_probe USING fts5(
                probe, tokenize='unicode61 remove_diacritics 2'
             );
             DROP TABLE fts_probe;",
        )
    });
    let capability = match outcome {
        Ok(()) => FtsCapability {
            available: true,
            reason: None,
        },
        Err(e) => FtsCapability {
            available: false,
            reason: Some(e.to_string()),
        },
    };

    *CAPABILITY.write() = Some(capability.clone());
    capability
}

/// Forget the cached probe result so the next bootstrap re-probes
/// (the `Unavailable -> Unknown` transition).
pub fn reset_capability_probe() {
    *CAPABILITY.write() = None;
}

// ─────────────────────────────────────────────────────────────────────────────
// Snapshot & health types
// ─────────────────────────────────────────────────────────────────────────────

/// Immutable result of a schema inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    /// CREATE SQL of the FTS virtual table, if it exists.
    pub table_sql: Option<String>,
    pub fts_columns: Vec<String>,
    pub document_columns: Vec<String>,
    /// Trigger name to its CREATE SQL.
    pub triggers: BTreeMap<String, Option<String>>,
    pub is_contentless: bool,
    pub has_triggers: bool,
    pub checked_at: DateTime<Utc>,
}

impl SchemaSnapshot {
    #[must_use]
    pub fn missing_fts_columns(&self) -> Vec<String> {
        missing(EXPECTED_FTS_COLUMNS, &self.fts_columns)
    }

    #[must_use]
    pub fn missing_document_columns(&self) -> Vec<String> {
        missing(EXPECTED_DOCUMENT_COLUMNS, &self.document_columns)
    }

    #[must_use]
    pub fn missing_triggers(&self) -> Vec<String> {
        let present: Vec<String> = self.triggers.keys().cloned().collect();
        missing(EXPECTED_TRIGGERS, &present)
    }

    /// All expected pieces present and the FTS table is contentless.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.table_sql.is_some()
            && self.is_contentless
            && self.missing_fts_columns().is_empty()
            && self.missing_document_columns().is_empty()
            && self.missing_triggers().is_empty()
    }
}

fn missing(expected: &[&str], present: &[String]) -> Vec<String> {
    expected
        .iter()
        .filter(|name| !present.iter().any(|p| p.eq_ignore_ascii_case(name)))
        .map(|name| (*name).to_string())
        .collect()
}

/// Whether a CREATE VIRTUAL TABLE statement declares a contentless table:
/// either no `content=` option, or `content=''` / `content=""`.
fn is_contentless_sql(sql: &str) -> bool {
    let lowered = sql.to_lowercase();
    let compact: String = lowered.chars().filter(|c| !c.is_whitespace()).collect();
    let mut search_from = 0;
    while let Some(rel) = compact[search_from..].find("content=") {
        let idx = search_from + rel;
        let rest = &compact[idx + "content=".len()..];
        // Guard against matching inside a longer option name.
        let preceded_ok = idx == 0
            || !compact[..idx]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_alphanumeric() || c == '_');
        if preceded_ok && !(rest.starts_with("''") || rest.starts_with("\"\"")) {
            return false;
        }
        search_from = idx + "content=".len();
    }
    true
}

/// Health classification reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Health-check output with the drift details.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaHealthReport {
    pub status: HealthStatus,
    pub missing_fts_columns: Vec<String>,
    pub missing_document_columns: Vec<String>,
    pub missing_triggers: Vec<String>,
    pub is_contentless: bool,
}

/// Lifecycle state of the search schema.
///
/// Only `Valid` allows query execution; `Degraded` is repaired on the next
/// bootstrap or health check; `Unavailable` surfaces as
/// [`SearchError::FeatureUnavailable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchemaState {
    Unknown,
    Valid,
    Degraded,
    Unavailable,
}

// ─────────────────────────────────────────────────────────────────────────────
// SchemaManager
// ─────────────────────────────────────────────────────────────────────────────

/// Owns the search schema of one store: inspection, repair, reindex, and the
/// document/trigram write path that keeps both indexes current.
pub struct SchemaManager {
    db: Database,
    state: RwLock<SchemaState>,
    snapshot: RwLock<Option<Arc<SchemaSnapshot>>>,
}

impl SchemaManager {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self {
            db,
            state: RwLock::new(SchemaState::Unknown),
            snapshot: RwLock::new(None),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SchemaState {
        *self.state.read()
    }

    /// Last committed schema snapshot, if any.
    #[must_use]
    pub fn cached_snapshot(&self) -> Option<Arc<SchemaSnapshot>> {
        self.snapshot.read().clone()
    }

    /// Probe capability, then validate or repair the schema. Runs at
    /// bootstrap before any query executes.
    pub fn bootstrap(&self) -> SearchResult<()> {
        let capability = probe_fts_capability();
        if !capability.available {
            *self.state.write() = SchemaState::Unavailable;
            return Err(SearchError::FeatureUnavailable(
                capability
                    .reason
                    .unwrap_or_else(|| "FTS module unavailable".to_string()),
            ));
        }
        self.enforce_unified_schema()
    }

    /// Gather the CREATE SQL, column lists, and trigger map of the current
    /// schema.
    pub fn inspect(&self) -> SearchResult<SchemaSnapshot> {
        let conn = self.db.get_conn().map_err(SearchError::Store)?;

        let table_sql: Option<String> = conn
            .query_row(
                "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [FTS_TABLE],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?
            .flatten();

        let fts_columns = table_columns(&conn, FTS_TABLE)?;
        let document_columns = table_columns(&conn, DOCUMENT_TABLE)?;

        let mut triggers = BTreeMap::new();
        let mut stmt = conn.prepare(
            "SELECT name, sql FROM sqlite_master WHERE type = 'trigger' AND tbl_name = ?1",
        )?;
        let rows = stmt.query_map([DOCUMENT_TABLE], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
        })?;
        for row in rows {
            let (name, sql) = row?;
            triggers.insert(name, sql);
        }

        let is_contentless = table_sql
            .as_deref()
            .map(is_contentless_sql)
            .unwrap_or(false);
        let has_triggers = !triggers.is_empty();

        Ok(SchemaSnapshot {
            table_sql,
            fts_columns,
            document_columns,
            triggers,
            is_contentless,
            has_triggers,
            checked_at: Utc::now(),
        })
    }

    /// Validate the schema and repair it when it drifted.
    ///
    /// Repair drops the FTS table and triggers, recreates the unified
    /// layout, adds any missing mirror columns, repopulates the index from
    /// the mirror rows, and optimizes. A schema still invalid after repair
    /// transitions to `Unavailable` and fails with [`SearchError::Schema`].
    pub fn enforce_unified_schema(&self) -> SearchResult<()> {
        let _guard = REPAIR_LOCK.lock();

        let snapshot = self.inspect()?;
        if snapshot.is_valid() {
            debug!(target: "docdex.schema", "search schema valid, nothing to repair");
            self.commit(SchemaState::Valid, snapshot);
            return Ok(());
        }

        warn!(
            target: "docdex.schema",
            missing_fts = snapshot.missing_fts_columns().len(),
            missing_columns = snapshot.missing_document_columns().len(),
            missing_triggers = snapshot.missing_triggers().len(),
            contentless = snapshot.is_contentless,
            "search schema drifted, repairing"
        );
        *self.state.write() = SchemaState::Degraded;

        if let Err(e) = self.repair() {
            *self.state.write() = SchemaState::Unavailable;
            return Err(e);
        }

        let verified = self.inspect()?;
        if verified.is_valid() {
            self.commit(SchemaState::Valid, verified);
            Ok(())
        } else {
            *self.state.write() = SchemaState::Unavailable;
            Err(SearchError::Schema(
                "schema still invalid after repair".into(),
            ))
        }
    }

    /// Inspect without repairing; classifies drift and updates the state
    /// machine (`Valid -> Degraded` on detected drift).
    pub fn health_check(&self) -> SearchResult<SchemaHealthReport> {
        let _guard = REPAIR_LOCK.lock();

        let capability = probe_fts_capability();
        if !capability.available {
            *self.state.write() = SchemaState::Unavailable;
            return Ok(SchemaHealthReport {
                status: HealthStatus::Unhealthy,
                missing_fts_columns: EXPECTED_FTS_COLUMNS.iter().map(|s| (*s).to_string()).collect(),
                missing_document_columns: Vec::new(),
                missing_triggers: Vec::new(),
                is_contentless: false,
            });
        }

        let snapshot = self.inspect()?;
        let report = SchemaHealthReport {
            status: if snapshot.is_valid() {
                HealthStatus::Healthy
            } else if snapshot.table_sql.is_some() {
                HealthStatus::Degraded
            } else {
                HealthStatus::Unhealthy
            },
            missing_fts_columns: snapshot.missing_fts_columns(),
            missing_document_columns: snapshot.missing_document_columns(),
            missing_triggers: snapshot.missing_triggers(),
            is_contentless: snapshot.is_contentless,
        };

        let state = match report.status {
            HealthStatus::Healthy => SchemaState::Valid,
            HealthStatus::Degraded | HealthStatus::Unhealthy => SchemaState::Degraded,
        };
        self.commit(state, snapshot);
        Ok(report)
    }

    /// Rebuild both index contents from the mirror rows.
    pub fn reindex(&self) -> SearchResult<()> {
        let conn = self.db.get_conn().map_err(SearchError::Store)?;
        conn.execute(
            "INSERT INTO search_document_fts(search_document_fts) VALUES('delete-all')",
            [],
        )?;
        conn.execute(POPULATE_FTS_SQL, [])?;
        conn.execute(
            "INSERT INTO search_document_fts(search_document_fts) VALUES('optimize')",
            [],
        )?;
        drop(conn);
        self.rebuild_trigrams()?;
        Ok(())
    }

    /// Drop and recreate the search tables from scratch (maintenance path).
    /// Saved history and favorites survive.
    pub fn apply_full_reset(&self) -> SearchResult<()> {
        let _guard = REPAIR_LOCK.lock();
        let conn = self.db.get_conn().map_err(SearchError::Store)?;
        for sql in [
            "DROP TRIGGER IF EXISTS search_document_ai",
            "DROP TRIGGER IF EXISTS search_document_au",
            "DROP TRIGGER IF EXISTS search_document_ad",
            "DROP TABLE IF EXISTS search_document_fts",
            "DROP TABLE IF EXISTS search_trigram",
            "DROP TABLE IF EXISTS search_trigram_map",
            "DROP TABLE IF EXISTS search_document",
        ] {
            conn.execute(sql, [])?;
        }
        drop(conn);
        self.create_all()?;
        let verified = self.inspect()?;
        if verified.is_valid() {
            self.commit(SchemaState::Valid, verified);
            Ok(())
        } else {
            *self.state.write() = SchemaState::Unavailable;
            Err(SearchError::Schema("full reset left schema invalid".into()))
        }
    }

    // ── Document write path ──────────────────────────────────────────────

    /// Upsert a mirror row (the triggers propagate into the FTS index) and
    /// refresh the document's trigram row.
    pub fn index_document(&self, doc: &DocumentRecord) -> SearchResult<()> {
        let conn = self.db.get_conn().map_err(SearchError::Store)?;
        conn.execute(
            "INSERT INTO search_document (
                file_id, title, author, mime, metadata_text, metadata_json,
                created_utc, modified_utc, content_hash,
                stored_content_hash, stored_token_hash
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(file_id) DO UPDATE SET
                title = excluded.title,
                author = excluded.author,
                mime = excluded.mime,
                metadata_text = excluded.metadata_text,
                metadata_json = excluded.metadata_json,
                created_utc = excluded.created_utc,
                modified_utc = excluded.modified_utc,
                content_hash = excluded.content_hash,
                stored_content_hash = excluded.stored_content_hash,
                stored_token_hash = excluded.stored_token_hash",
            params![
                doc.file_id,
                doc.title,
                doc.author,
                doc.mime,
                doc.metadata_text,
                doc.metadata_json,
                format_utc(doc.created_utc),
                format_utc(doc.modified_utc),
                doc.content_hash,
                doc.stored_content_hash,
                doc.stored_token_hash,
            ],
        )?;

        upsert_trigram_row(&conn, &doc.file_id, &doc.trigram_source())?;
        Ok(())
    }

    /// Remove a document from the mirror (triggers clean the FTS index) and
    /// from the trigram index.
    pub fn remove_document(&self, file_id: &[u8]) -> SearchResult<()> {
        let conn = self.db.get_conn().map_err(SearchError::Store)?;
        conn.execute(
            "DELETE FROM search_document WHERE file_id = ?1",
            params![file_id],
        )?;
        if let Some(map_id) = trigram_map_id(&conn, file_id)? {
            conn.execute(
                "DELETE FROM search_trigram WHERE rowid = ?1",
                params![map_id],
            )?;
            conn.execute(
                "DELETE FROM search_trigram_map WHERE id = ?1",
                params![map_id],
            )?;
        }
        Ok(())
    }

    /// Repopulate the trigram index from every mirror row. Returns the
    /// number of documents indexed.
    pub fn rebuild_trigrams(&self) -> SearchResult<usize> {
        let conn = self.db.get_conn().map_err(SearchError::Store)?;
        conn.execute(
            "INSERT INTO search_trigram(search_trigram) VALUES('delete-all')",
            [],
        )?;
        conn.execute("DELETE FROM search_trigram_map", [])?;

        let mut stmt = conn.prepare(
            "SELECT file_id, title, author, metadata_text FROM search_document",
        )?;
        let rows: Vec<(Vec<u8>, String)> = stmt
            .query_map([], |row| {
                let file_id: Vec<u8> = row.get(0)?;
                let title: String = row.get(1)?;
                let author: Option<String> = row.get(2)?;
                let metadata_text: Option<String> = row.get(3)?;
                let mut source = title;
                if let Some(author) = author {
                    source.push(' ');
                    source.push_str(&author);
                }
                if let Some(text) = metadata_text {
                    source.push(' ');
                    source.push_str(&text);
                }
                Ok((file_id, source))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);

        let count = rows.len();
        for (file_id, source) in rows {
            upsert_trigram_row(&conn, &file_id, &source)?;
        }
        Ok(count)
    }

    // ── Internals ────────────────────────────────────────────────────────

    fn commit(&self, state: SchemaState, snapshot: SchemaSnapshot) {
        *self.state.write() = state;
        *self.snapshot.write() = Some(Arc::new(snapshot));
    }

    /// Reset + recreate + repopulate + optimize, as idempotent individual
    /// statements (virtual tables reject transactional DDL on some builds).
    fn repair(&self) -> SearchResult<()> {
        let conn = self.db.get_conn().map_err(SearchError::Store)?;
        for sql in [
            "DROP TRIGGER IF EXISTS search_document_ai",
            "DROP TRIGGER IF EXISTS search_document_au",
            "DROP TRIGGER IF EXISTS search_document_ad",
            "DROP TABLE IF EXISTS search_document_fts",
        ] {
            conn.execute(sql, [])?;
        }
        drop(conn);

        self.create_all()?;

        let conn = self.db.get_conn().map_err(SearchError::Store)?;
        conn.execute(POPULATE_FTS_SQL, [])?;
        conn.execute(
            "INSERT INTO search_document_fts(search_document_fts) VALUES('optimize')",
            [],
        )?;
        Ok(())
    }

    fn create_all(&self) -> SearchResult<()> {
        let conn = self.db.get_conn().map_err(SearchError::Store)?;
        conn.execute(CREATE_DOCUMENT_TABLE_SQL, [])?;
        for column in ["stored_content_hash TEXT", "stored_token_hash TEXT"] {
            add_column_if_missing(&conn, DOCUMENT_TABLE, column)?;
        }
        conn.execute(CREATE_FTS_TABLE_SQL, [])?;
        conn.execute(CREATE_TRIGGER_AI_SQL, [])?;
        conn.execute(CREATE_TRIGGER_AU_SQL, [])?;
        conn.execute(CREATE_TRIGGER_AD_SQL, [])?;
        conn.execute(CREATE_TRIGRAM_TABLE_SQL, [])?;
        conn.execute(CREATE_TRIGRAM_MAP_SQL, [])?;
        conn.execute(CREATE_HISTORY_TABLE_SQL, [])?;
        conn.execute(CREATE_FAVORITE_TABLE_SQL, [])?;
        Ok(())
    }
}

fn table_columns(conn: &rusqlite::Connection, table: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(columns)
}

/// SQLite has no `IF NOT EXISTS` for ALTER TABLE; the duplicate-column
/// failure is treated as success.
fn add_column_if_missing(
    conn: &rusqlite::Connection,
    table: &str,
    column_def: &str,
) -> rusqlite::Result<()> {
    let sql = format!("ALTER TABLE {table} ADD COLUMN {column_def}");
    match conn.execute(&sql, []) {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(_, Some(msg)))
            if msg.contains("duplicate column name") =>
        {
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn trigram_map_id(conn: &rusqlite::Connection, file_id: &[u8]) -> rusqlite::Result<Option<i64>> {
    match conn.query_row(
        "SELECT id FROM search_trigram_map WHERE file_id = ?1",
        params![file_id],
        |row| row.get(0),
    ) {
        Ok(id) => Ok(Some(id)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

fn upsert_trigram_row(
    conn: &rusqlite::Connection,
    file_id: &[u8],
    source: &str,
) -> rusqlite::Result<()> {
    let map_id = match trigram_map_id(conn, file_id)? {
        Some(id) => {
            conn.execute("DELETE FROM search_trigram WHERE rowid = ?1", params![id])?;
            id
        }
        None => {
            conn.execute(
                "INSERT INTO search_trigram_map (file_id) VALUES (?1)",
                params![file_id],
            )?;
            conn.last_insert_rowid()
        }
    };
    conn.execute(
        "INSERT INTO search_trigram(rowid, trgm) VALUES (?1, ?2)",
        params![map_id, trigram::index_text(source)],
    )?;
    Ok(())
}
