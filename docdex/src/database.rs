//! Pooled SQLite access
//!
//! Uses r2d2 connection pooling to allow concurrent reads without mutex
//! blocking; WAL mode lets readers proceed while the single writer commits.
//! Long-running queries can be aborted through the SQLite C-level interrupt,
//! wired to a cancellation token.

use crate::error::{DatabaseError, DatabaseResult, SearchError, SearchResult};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Thread-safe database handle backed by a connection pool.
#[derive(Clone)]
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

impl Database {
    /// Open or create a database at the given path with connection pooling.
    pub fn open<P: AsRef<Path>>(path: P) -> DatabaseResult<Self> {
        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.execute_batch(
                "
                PRAGMA journal_mode=WAL;
                PRAGMA synchronous=NORMAL;
                PRAGMA mmap_size=67108864;
                PRAGMA cache_size=-32000;
            ",
            )?;
            Ok(())
        });

        let pool = Pool::builder().max_size(8).build(manager)?;
        Ok(Self { pool })
    }

    /// Open an in-memory database (tests and benches).
    ///
    /// A single pooled connection keeps all readers on the same in-memory
    /// database.
    pub fn open_in_memory() -> DatabaseResult<Self> {
        let manager = SqliteConnectionManager::memory().with_init(|conn| {
            conn.execute_batch(
                "
                PRAGMA journal_mode=WAL;
                PRAGMA synchronous=NORMAL;
            ",
            )?;
            Ok(())
        });

        let pool = Pool::builder().max_size(1).build(manager)?;
        Ok(Self { pool })
    }

    /// Borrow a connection from the pool.
    pub(crate) fn get_conn(&self) -> DatabaseResult<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    /// Database size in bytes (page_count * page_size).
    pub fn database_size(&self) -> DatabaseResult<i64> {
        let conn = self.get_conn()?;
        let page_count: i64 = conn.query_row("PRAGMA page_count", [], |row| row.get(0))?;
        let page_size: i64 = conn.query_row("PRAGMA page_size", [], |row| row.get(0))?;
        Ok(page_count * page_size)
    }

    /// Run `f` on a pooled connection with SQLite C-level interrupt support.
    ///
    /// When the cancellation token fires, the SQLite query is interrupted at
    /// the C level, aborting long-running disk reads immediately; the caller
    /// observes [`SearchError::Cancelled`] and no partial result.
    ///
    /// The watcher task is wrapped in `AbortOnDropHandle` to prevent pool
    /// poisoning: if it outlived this scope, it could interrupt a different
    /// query on a reused pooled connection.
    pub(crate) fn with_interrupt<T>(
        &self,
        token: &CancellationToken,
        runtime: &tokio::runtime::Handle,
        f: impl FnOnce(&rusqlite::Connection) -> rusqlite::Result<T>,
    ) -> SearchResult<T> {
        use tokio_util::task::AbortOnDropHandle;

        if token.is_cancelled() {
            return Err(SearchError::Cancelled);
        }

        let conn = self.get_conn()?;
        let interrupt_handle = conn.get_interrupt_handle();

        let token_clone = token.clone();
        let watcher = runtime.spawn(async move {
            token_clone.cancelled().await;
            interrupt_handle.interrupt();
        });
        let _abort_guard = AbortOnDropHandle::new(watcher);

        match f(&conn) {
            Ok(value) => {
                if token.is_cancelled() {
                    Err(SearchError::Cancelled)
                } else {
                    Ok(value)
                }
            }
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::OperationInterrupted =>
            {
                Err(SearchError::Cancelled)
            }
            Err(e) => Err(SearchError::Store(DatabaseError::Sqlite(e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap()
    }

    #[test]
    fn open_in_memory_works() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.database_size().unwrap() > 0);
    }

    #[test]
    fn open_on_disk_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dex.db");
        let db = Database::open(&path).unwrap();
        let conn = db.get_conn().unwrap();
        conn.execute("CREATE TABLE t (x INTEGER)", []).unwrap();
        drop(conn);
        drop(db);
        assert!(path.exists());
    }

    #[test]
    fn with_interrupt_runs_query() {
        let db = Database::open_in_memory().unwrap();
        let rt = runtime();
        let token = CancellationToken::new();
        let value: i64 = db
            .with_interrupt(&token, rt.handle(), |conn| {
                conn.query_row("SELECT 41 + 1", [], |row| row.get(0))
            })
            .unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn precancelled_token_short_circuits() {
        let db = Database::open_in_memory().unwrap();
        let rt = runtime();
        let token = CancellationToken::new();
        token.cancel();
        let result = db.with_interrupt(&token, rt.handle(), |conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
        });
        assert!(matches!(result, Err(SearchError::Cancelled)));
    }

    #[test]
    fn cancellation_during_query_discards_result() {
        let db = Database::open_in_memory().unwrap();
        let rt = runtime();
        let token = CancellationToken::new();
        let result = db.with_interrupt(&token, rt.handle(), |conn| {
            token.cancel();
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
        });
        // The row may have been read before the interrupt landed; either
        // way no partial result escapes.
        assert!(matches!(result, Err(SearchError::Cancelled)));
    }
}
