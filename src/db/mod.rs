//! Postgres queue store.
//!
//! sqlx is async while [`QueueStore`] is blocking, so [`PgStore`] owns a small
//! tokio runtime and drives every query to completion on it. Do not call it
//! from inside another tokio runtime.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio::runtime::Runtime;
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::{Record, to_unix_secs};
use crate::ordering::HeadOrder;
use crate::storage::{QueueStore, row_to_record};

type PgRow = (Option<i64>, Option<Vec<u8>>, Option<f64>);

/// Postgres-backed queue table. Owns the connection pool.
pub struct PgStore {
    pool: PgPool,
    runtime: Runtime,
    table: String,
}

impl PgStore {
    /// Connect to Postgres and bind the store to `table`.
    pub fn connect(url: &str, table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        crate::config::validate_identifier(&table)?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("sqlq-pg")
            .enable_all()
            .build()
            .map_err(|e| Error::Other(format!("failed to build tokio runtime: {e}")))?;

        let pool = runtime.block_on(
            PgPoolOptions::new()
                .max_connections(4)
                .connect(url),
        )?;
        debug!(table = %table, "connected to postgres");

        Ok(Self {
            pool,
            runtime,
            table,
        })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Drop the backing table. For tearing down scratch queues.
    pub fn drop_table(&self) -> Result<()> {
        let sql = format!("DROP TABLE IF EXISTS {}", self.table);
        self.runtime
            .block_on(sqlx::query(&sql).execute(&self.pool))?;
        debug!(table = %self.table, "dropped table");
        Ok(())
    }

    fn fetch_one_record(&self, sql: &str, bind: Option<i64>) -> Result<Option<Record>> {
        let row: Option<PgRow> = self.runtime.block_on(async {
            let query = sqlx::query_as::<_, PgRow>(sql);
            let query = match bind {
                Some(value) => query.bind(value),
                None => query,
            };
            query.fetch_optional(&self.pool).await
        })?;
        Ok(row.and_then(|raw| row_to_record(&self.table, raw)))
    }

    fn execute(&self, sql: &str, bind: i64) -> Result<u64> {
        let done = self
            .runtime
            .block_on(sqlx::query(sql).bind(bind).execute(&self.pool))?;
        Ok(done.rows_affected())
    }
}

impl QueueStore for PgStore {
    fn table(&self) -> &str {
        &self.table
    }

    fn create_table_if_absent(&self, unique_payload: bool) -> Result<()> {
        let unique = if unique_payload { ", UNIQUE (data)" } else { "" };
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                _id         BIGSERIAL PRIMARY KEY,
                data        BYTEA,
                timestamp   DOUBLE PRECISION{unique}
            )",
            self.table
        );
        self.runtime
            .block_on(sqlx::query(&sql).execute(&self.pool))?;
        Ok(())
    }

    fn insert(&self, payload: &[u8], enqueued_at: DateTime<Utc>) -> Result<i64> {
        let sql = format!(
            "INSERT INTO {} (data, timestamp) VALUES ($1, $2) RETURNING _id",
            self.table
        );
        let row: (i64,) = self.runtime.block_on(
            sqlx::query_as(&sql)
                .bind(payload)
                .bind(to_unix_secs(enqueued_at))
                .fetch_one(&self.pool),
        )?;
        Ok(row.0)
    }

    fn select_head(&self, order: HeadOrder) -> Result<Option<Record>> {
        self.fetch_one_record(
            &format!(
                "SELECT _id, data, timestamp FROM {} ORDER BY _id {} LIMIT 1",
                self.table,
                order.as_sql()
            ),
            None,
        )
    }

    fn select_by_id(&self, id: i64) -> Result<Option<Record>> {
        self.fetch_one_record(
            &format!("SELECT _id, data, timestamp FROM {} WHERE _id = $1", self.table),
            Some(id),
        )
    }

    fn select_after_cursor(&self, cursor: i64) -> Result<Option<Record>> {
        self.fetch_one_record(
            &format!(
                "SELECT _id, data, timestamp FROM {} WHERE _id > $1 ORDER BY _id ASC LIMIT 1",
                self.table
            ),
            Some(cursor),
        )
    }

    fn update(&self, id: i64, payload: &[u8]) -> Result<u64> {
        let sql = format!("UPDATE {} SET data = $1 WHERE _id = $2", self.table);
        let done = self.runtime.block_on(
            sqlx::query(&sql)
                .bind(payload)
                .bind(id)
                .execute(&self.pool),
        )?;
        Ok(done.rows_affected())
    }

    fn delete_by_id(&self, id: i64) -> Result<u64> {
        self.execute(&format!("DELETE FROM {} WHERE _id = $1", self.table), id)
    }

    fn delete_up_to(&self, cursor: i64) -> Result<u64> {
        let deleted = self.execute(&format!("DELETE FROM {} WHERE _id <= $1", self.table), cursor)?;
        debug!(table = %self.table, cursor, deleted, "batch delete");
        Ok(deleted)
    }

    fn count(&self) -> Result<i64> {
        let sql = format!("SELECT COUNT(_id) FROM {}", self.table);
        let row: (i64,) = self
            .runtime
            .block_on(sqlx::query_as(&sql).fetch_one(&self.pool))?;
        Ok(row.0)
    }

    fn select_all(&self) -> Result<Vec<Record>> {
        let sql = format!(
            "SELECT _id, data, timestamp FROM {} ORDER BY _id ASC",
            self.table
        );
        let rows: Vec<PgRow> = self
            .runtime
            .block_on(sqlx::query_as(&sql).fetch_all(&self.pool))?;
        Ok(rows
            .into_iter()
            .filter_map(|raw| row_to_record(&self.table, raw))
            .collect())
    }

    fn vacuum(&self) -> Result<()> {
        // VACUUM refuses to run inside the extended protocol's implicit
        // transaction, so send it as a simple query.
        let sql = format!("VACUUM {}", self.table);
        self.runtime
            .block_on(sqlx::raw_sql(&sql).execute(&self.pool))?;
        Ok(())
    }

    fn ping(&self) -> Result<()> {
        self.runtime
            .block_on(sqlx::query("SELECT 1").execute(&self.pool))?;
        Ok(())
    }
}
