//! SQLite-backed store gateway.
//!
//! One row per business tag in `segment_alloc`. Every process that opens the
//! same database file shares the table, and bumps are serialized by SQLite's
//! write lock (`BEGIN IMMEDIATE`), so ranges granted to different processes
//! never overlap.
//!
//! ## Table
//!
//! - `tag` - business tag, primary key
//! - `max_id` - exclusive upper bound of the last granted range
//! - `step` - size of the last granted range
//! - `updated_at` - unix seconds of the last bump

use core::time::Duration;
use std::{
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

use parking_lot::Mutex;
use rusqlite::{Connection, ErrorCode, OptionalExtension, TransactionBehavior, params};

use crate::store::{SegmentStore, StoreError};

/// How long a bump waits on a database locked by another writer.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS segment_alloc (
        tag TEXT PRIMARY KEY NOT NULL,
        max_id INTEGER NOT NULL CHECK (max_id >= 0),
        step INTEGER NOT NULL CHECK (step > 0),
        updated_at INTEGER NOT NULL
    );
"#;

/// A [`SegmentStore`] over a SQLite database.
///
/// The connection is not `Sync`, so it lives behind a mutex. Bumps are short
/// transactions and happen off the allocator's hot path, so the mutex is never
/// contended by ID readers.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (or creates) the database at `path` with the
    /// [`DEFAULT_BUSY_TIMEOUT`].
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the schema cannot be
    /// created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open_with_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    /// Opens (or creates) the database at `path`.
    ///
    /// `busy_timeout` bounds how long any operation waits for another
    /// process's write lock before failing with [`StoreError::Busy`].
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the schema cannot be
    /// created.
    pub fn open_with_timeout(
        path: impl AsRef<Path>,
        busy_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .map_err(|e| classify(format!("open {}", path.display()), e))?;
        Self::from_connection(conn, busy_timeout)
    }

    /// Opens a private in-memory database (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if SQLite cannot allocate the database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| classify("open in-memory", e))?;
        Self::from_connection(conn, DEFAULT_BUSY_TIMEOUT)
    }

    fn from_connection(conn: Connection, busy_timeout: Duration) -> Result<Self, StoreError> {
        conn.busy_timeout(busy_timeout)
            .map_err(|e| classify("set busy timeout", e))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| classify("create schema", e))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Inserts or replaces the row for `tag`.
    ///
    /// # Errors
    ///
    /// Returns an error if the values do not fit SQLite's signed integers or
    /// the write fails.
    pub fn seed_tag(&self, tag: &str, max_id: u64, step: u64) -> Result<(), StoreError> {
        let max_id = to_sql(tag, max_id)?;
        let step = to_sql(tag, step)?;
        self.conn
            .lock()
            .execute(
                "INSERT OR REPLACE INTO segment_alloc (tag, max_id, step, updated_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![tag, max_id, step, unix_now()],
            )
            .map_err(|e| classify(format!("seed {tag}"), e))?;
        Ok(())
    }

    /// Deletes the row for `tag`. Returns `true` if it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn remove_tag(&self, tag: &str) -> Result<bool, StoreError> {
        let deleted = self
            .conn
            .lock()
            .execute("DELETE FROM segment_alloc WHERE tag = ?1", params![tag])
            .map_err(|e| classify(format!("remove {tag}"), e))?;
        Ok(deleted > 0)
    }
}

impl SegmentStore for SqliteStore {
    fn bump_max_id(&self, tag: &str, step: u64) -> Result<u64, StoreError> {
        let step_sql = to_sql(tag, step)?;
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| classify(format!("begin bump {tag}"), e))?;

        let current: Option<i64> = tx
            .query_row(
                "SELECT max_id FROM segment_alloc WHERE tag = ?1",
                params![tag],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| classify(format!("read {tag}"), e))?;

        let next = match current {
            Some(raw) => from_sql(tag, raw)?
                .checked_add(step)
                .ok_or_else(|| StoreError::Overflow {
                    tag: tag.to_string(),
                })?,
            None => step,
        };
        let next_sql = to_sql(tag, next)?;

        tx.execute(
            "INSERT INTO segment_alloc (tag, max_id, step, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(tag) DO UPDATE SET
                 max_id = excluded.max_id,
                 step = excluded.step,
                 updated_at = excluded.updated_at",
            params![tag, next_sql, step_sql, unix_now()],
        )
        .map_err(|e| classify(format!("bump {tag}"), e))?;
        tx.commit()
            .map_err(|e| classify(format!("commit bump {tag}"), e))?;

        Ok(next)
    }

    fn max_id(&self, tag: &str) -> Result<Option<u64>, StoreError> {
        let raw: Option<i64> = self
            .conn
            .lock()
            .query_row(
                "SELECT max_id FROM segment_alloc WHERE tag = ?1",
                params![tag],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| classify(format!("read {tag}"), e))?;
        raw.map(|raw| from_sql(tag, raw)).transpose()
    }

    fn list_tags(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT tag FROM segment_alloc ORDER BY tag")
            .map_err(|e| classify("list tags", e))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| classify("list tags", e))?;

        let mut tags = Vec::new();
        for row in rows {
            tags.push(row.map_err(|e| classify("list tags", e))?);
        }
        Ok(tags)
    }
}

/// Sorts driver errors into busy (retryable) and everything else.
fn classify(context: impl Into<String>, err: rusqlite::Error) -> StoreError {
    let context = context.into();
    match err.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => StoreError::Busy {
            context,
            source: Box::new(err),
        },
        _ => StoreError::Backend {
            context,
            source: Box::new(err),
        },
    }
}

fn to_sql(tag: &str, value: u64) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::Overflow {
        tag: tag.to_string(),
    })
}

fn from_sql(tag: &str, raw: i64) -> Result<u64, StoreError> {
    u64::try_from(raw).map_err(|_| StoreError::Corrupt {
        tag: tag.to_string(),
        reason: format!("negative max_id {raw}"),
    })
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
