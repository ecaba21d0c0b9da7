//! Storage access layer.
//!
//! [`QueueStore`] is the narrow contract the engine consumes: one store
//! round-trip per call, bound to a single queue table. [`SqliteStore`] is the
//! embedded single-file implementation; the Postgres one lives in `crate::db`.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, warn};

use crate::config::QueueOptions;
use crate::error::Result;
use crate::model::{Record, from_unix_secs, to_unix_secs};
use crate::ordering::HeadOrder;

/// Row CRUD over one queue table.
///
/// Implementations differ only in SQL text. A write is durable once a later
/// select on the same store can see it.
pub trait QueueStore: Send + Sync {
    /// Name of the table this store is bound to.
    fn table(&self) -> &str;

    /// Idempotent. `unique_payload` adds a uniqueness constraint on the payload.
    fn create_table_if_absent(&self, unique_payload: bool) -> Result<()>;

    /// Returns the store-assigned id. Fails with `ConstraintViolation` on a
    /// duplicate payload in a unique table.
    fn insert(&self, payload: &[u8], enqueued_at: DateTime<Utc>) -> Result<i64>;

    fn select_head(&self, order: HeadOrder) -> Result<Option<Record>>;

    fn select_by_id(&self, id: i64) -> Result<Option<Record>>;

    /// Smallest id strictly greater than `cursor`.
    fn select_after_cursor(&self, cursor: i64) -> Result<Option<Record>>;

    /// Returns the number of rows changed (0 when the id is absent).
    fn update(&self, id: i64, payload: &[u8]) -> Result<u64>;

    /// Deleting an already-deleted row is a no-op.
    fn delete_by_id(&self, id: i64) -> Result<u64>;

    /// Deletes every row with id <= `cursor`.
    fn delete_up_to(&self, cursor: i64) -> Result<u64>;

    fn count(&self) -> Result<i64>;

    /// Every present row, ascending by id.
    fn select_all(&self) -> Result<Vec<Record>>;

    /// Reclaims space left behind by deleted rows.
    fn vacuum(&self) -> Result<()>;

    fn ping(&self) -> Result<()>;
}

/// SQLite-backed queue table. Owns its connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    table: String,
}

impl SqliteStore {
    /// Open or create a database file at the given path.
    pub fn open(path: impl AsRef<Path>, table: impl Into<String>) -> Result<Self> {
        Self::open_with_timeout(path, table, Duration::from_secs(10))
    }

    /// Like [`SqliteStore::open`] but with an explicit busy timeout for
    /// contended writes from other processes.
    pub fn open_with_timeout(
        path: impl AsRef<Path>,
        table: impl Into<String>,
        busy_timeout: Duration,
    ) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        // WAL mode for concurrent readers
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::from_connection(conn, table)
    }

    /// Open `<dir>/<db_file_name>` for the queue described by `options`,
    /// creating the directory if needed.
    pub fn open_dir(dir: impl AsRef<Path>, options: &QueueOptions) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let busy = Duration::try_from_secs_f64(options.busy_timeout_secs).map_err(|e| {
            crate::error::Error::InvalidArgument(format!("busy_timeout_secs: {e}"))
        })?;
        Self::open_with_timeout(dir.join(&options.db_file_name), options.table_name()?, busy)
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory(table: impl Into<String>) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, table)
    }

    fn from_connection(conn: Connection, table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        crate::config::validate_identifier(&table)?;
        Ok(Self {
            conn: Mutex::new(conn),
            table,
        })
    }

    fn select_one(&self, sql: &str, params: impl rusqlite::Params) -> Result<Option<Record>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(sql, params, |row| {
                Ok((
                    row.get::<_, Option<i64>>(0)?,
                    row.get::<_, Option<Vec<u8>>>(1)?,
                    row.get::<_, Option<f64>>(2)?,
                ))
            })
            .optional()?;
        Ok(row.and_then(|raw| row_to_record(&self.table, raw)))
    }
}

impl QueueStore for SqliteStore {
    fn table(&self) -> &str {
        &self.table
    }

    fn create_table_if_absent(&self, unique_payload: bool) -> Result<()> {
        let unique = if unique_payload { ", UNIQUE (data)" } else { "" };
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                _id         INTEGER PRIMARY KEY AUTOINCREMENT,
                data        BLOB,
                timestamp   FLOAT{unique}
            )",
            self.table
        );
        self.conn.lock().execute_batch(&sql)?;
        Ok(())
    }

    fn insert(&self, payload: &[u8], enqueued_at: DateTime<Utc>) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            &format!("INSERT INTO {} (data, timestamp) VALUES (?1, ?2)", self.table),
            params![payload, to_unix_secs(enqueued_at)],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn select_head(&self, order: HeadOrder) -> Result<Option<Record>> {
        self.select_one(
            &format!(
                "SELECT _id, data, timestamp FROM {} ORDER BY _id {} LIMIT 1",
                self.table,
                order.as_sql()
            ),
            params![],
        )
    }

    fn select_by_id(&self, id: i64) -> Result<Option<Record>> {
        self.select_one(
            &format!("SELECT _id, data, timestamp FROM {} WHERE _id = ?1", self.table),
            params![id],
        )
    }

    fn select_after_cursor(&self, cursor: i64) -> Result<Option<Record>> {
        self.select_one(
            &format!(
                "SELECT _id, data, timestamp FROM {} WHERE _id > ?1 ORDER BY _id ASC LIMIT 1",
                self.table
            ),
            params![cursor],
        )
    }

    fn update(&self, id: i64, payload: &[u8]) -> Result<u64> {
        let n = self.conn.lock().execute(
            &format!("UPDATE {} SET data = ?1 WHERE _id = ?2", self.table),
            params![payload, id],
        )?;
        Ok(n as u64)
    }

    fn delete_by_id(&self, id: i64) -> Result<u64> {
        let n = self.conn.lock().execute(
            &format!("DELETE FROM {} WHERE _id = ?1", self.table),
            params![id],
        )?;
        Ok(n as u64)
    }

    fn delete_up_to(&self, cursor: i64) -> Result<u64> {
        let n = self.conn.lock().execute(
            &format!("DELETE FROM {} WHERE _id <= ?1", self.table),
            params![cursor],
        )?;
        debug!(table = %self.table, cursor, deleted = n, "batch delete");
        Ok(n as u64)
    }

    fn count(&self) -> Result<i64> {
        let n = self.conn.lock().query_row(
            &format!("SELECT COUNT(_id) FROM {}", self.table),
            [],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    fn select_all(&self) -> Result<Vec<Record>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT _id, data, timestamp FROM {} ORDER BY _id ASC",
            self.table
        ))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, Option<i64>>(0)?,
                    row.get::<_, Option<Vec<u8>>>(1)?,
                    row.get::<_, Option<f64>>(2)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows
            .into_iter()
            .filter_map(|raw| row_to_record(&self.table, raw))
            .collect())
    }

    fn vacuum(&self) -> Result<()> {
        self.conn.lock().execute_batch("VACUUM;")?;
        Ok(())
    }

    fn ping(&self) -> Result<()> {
        self.conn.lock().query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row parsing helpers
// ---------------------------------------------------------------------------

type RawRow = (Option<i64>, Option<Vec<u8>>, Option<f64>);

/// Rows without an id are skipped; the caller sees "no row" and retries.
pub(crate) fn row_to_record(table: &str, (id, payload, ts): RawRow) -> Option<Record> {
    let Some(id) = id else {
        warn!(table, "skipping row with null id");
        return None;
    };
    Some(Record {
        id,
        payload: payload.unwrap_or_default(),
        enqueued_at: ts.map(from_unix_secs).unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
    })
}
