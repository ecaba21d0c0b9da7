//! Queue engine. The public API for enqueueing and consuming work.
//!
//! A [`Queue`] owns its store and a per-handle [`QueueState`]. Every
//! read-then-mutate step (dequeue, unique insert, batch delete) runs under a
//! single process-local lock, so two threads sharing a handle never consume
//! the same row. Other processes sharing the table are only kept apart by the
//! store's own row-level delete semantics.
//!
//! Two commit modes:
//!
//! - `auto_commit = true`: `get` deletes the row it returns.
//! - `auto_commit = false`: `get` advances an in-memory cursor and leaves the
//!   row in place; [`Queue::task_done`] deletes everything up to the cursor.
//!   Reopening the queue recomputes the cursor from the store, so work that
//!   was handed out but never acknowledged is offered again.

mod wake;

use std::marker::PhantomData;
use std::path::Path;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use secrecy::ExposeSecret;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::config::{Backend, Config, QueueOptions};
use crate::db::PgStore;
use crate::error::{Error, Result};
use crate::model::{QueueState, RawItem, Record};
use crate::ordering::{DuplicatePolicy, HeadOrder, OrderingStrategy};
use crate::serializer::{JsonSerializer, Serializer};
use crate::storage::{QueueStore, SqliteStore};
use crate::telemetry::metrics;
use crate::telemetry::queue::{record_item_id, start_queue_span};
use self::wake::WakeSignal;

// ---------------------------------------------------------------------------
// Get options
// ---------------------------------------------------------------------------

/// Blocking policy and target for [`Queue::get`].
///
/// The default blocks until an item arrives, with no deadline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GetOptions {
    pub block: bool,
    /// Seconds. Only consulted when `block` is set; negative is rejected.
    pub timeout: Option<f64>,
    /// Fetch exactly this row instead of the head.
    pub id: Option<i64>,
}

impl Default for GetOptions {
    fn default() -> Self {
        Self {
            block: true,
            timeout: None,
            id: None,
        }
    }
}

impl GetOptions {
    pub fn blocking() -> Self {
        Self::default()
    }

    pub fn nowait() -> Self {
        Self {
            block: false,
            ..Self::default()
        }
    }

    pub fn timeout(mut self, secs: f64) -> Self {
        self.timeout = Some(secs);
        self
    }

    pub fn timeout_duration(self, timeout: Duration) -> Self {
        self.timeout(timeout.as_secs_f64())
    }

    pub fn id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    /// Absolute deadline for a blocking get. `None` means wait forever.
    fn deadline(&self, now: Instant) -> Result<Option<Instant>> {
        let Some(secs) = self.timeout else {
            return Ok(None);
        };
        if secs.is_nan() || secs < 0.0 {
            return Err(Error::InvalidArgument(format!(
                "timeout must be a non-negative number, got {secs}"
            )));
        }
        // Timeouts too large to represent behave as no timeout.
        Ok(Duration::try_from_secs_f64(secs)
            .ok()
            .and_then(|d| now.checked_add(d)))
    }
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// A persistent, thread-safe work queue over one table.
///
/// Share it between threads with `Arc<Queue<..>>`.
pub struct Queue<T, S = JsonSerializer> {
    store: Box<dyn QueueStore>,
    strategy: Box<dyn OrderingStrategy>,
    serializer: S,
    auto_commit: bool,
    poll_interval: Duration,
    /// Also the action lock: held across every read-then-mutate sequence.
    state: Mutex<QueueState>,
    wake: WakeSignal,
    _item: PhantomData<fn() -> T>,
}

impl<T> Queue<T, JsonSerializer>
where
    T: Serialize + DeserializeOwned,
{
    /// Open (or create) a JSON queue in `<dir>/<db_file_name>`.
    pub fn open(dir: impl AsRef<Path>, options: &QueueOptions) -> Result<Self> {
        let store = SqliteStore::open_dir(dir, options)?;
        Self::with_store(store, options, JsonSerializer)
    }

    /// Non-durable JSON queue (for testing).
    pub fn in_memory(options: &QueueOptions) -> Result<Self> {
        let store = SqliteStore::in_memory(options.table_name()?)?;
        Self::with_store(store, options, JsonSerializer)
    }

    /// Open the queue described by process configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        match &config.backend {
            Backend::Sqlite { dir } => Self::open(dir, &config.queue),
            Backend::Postgres { url } => {
                let store = PgStore::connect(url.expose_secret(), config.queue.table_name()?)?;
                Self::with_store(store, &config.queue, JsonSerializer)
            }
        }
    }
}

impl<T, S> Queue<T, S>
where
    S: Serializer<T>,
{
    /// Open a queue over an existing store using the ordering named in `options`.
    pub fn with_store(
        store: impl QueueStore + 'static,
        options: &QueueOptions,
        serializer: S,
    ) -> Result<Self> {
        Self::with_strategy(store, options.kind.strategy(), options, serializer)
    }

    /// Open a queue with a caller-supplied ordering strategy.
    ///
    /// Creates the table if absent and rebuilds `total` and `cursor` from
    /// what the store holds right now. The table is whatever `store` is bound
    /// to; build it with [`QueueOptions::table_name_for`] so a custom strategy
    /// gets its own prefix. `options.kind` is ignored here.
    pub fn with_strategy(
        store: impl QueueStore + 'static,
        strategy: Box<dyn OrderingStrategy>,
        options: &QueueOptions,
        serializer: S,
    ) -> Result<Self> {
        let poll_interval = options.poll_interval_duration()?;
        let store: Box<dyn QueueStore> = Box::new(store);
        if !store.table().starts_with(&format!("{}_", strategy.table_prefix())) {
            warn!(
                table = store.table(),
                prefix = strategy.table_prefix(),
                "table name does not carry the strategy's prefix"
            );
        }
        store.create_table_if_absent(strategy.unique_payload())?;

        let mut state = QueueState::default();
        if !options.auto_commit {
            if strategy.head_order() == HeadOrder::Descending {
                warn!(
                    table = store.table(),
                    kind = strategy.name(),
                    "deferred commit consumes in ascending id order"
                );
            }
            // Rows from the lowest remaining id onward are re-offered.
            state.cursor = match store.select_head(HeadOrder::Ascending)? {
                Some(head) => head.id - 1,
                None => 0,
            };
        }
        state.total = store.count()?;

        info!(
            table = store.table(),
            kind = strategy.name(),
            auto_commit = options.auto_commit,
            total = state.total,
            cursor = state.cursor,
            "queue opened"
        );

        Ok(Self {
            store,
            strategy,
            serializer,
            auto_commit: options.auto_commit,
            poll_interval,
            state: Mutex::new(state),
            wake: WakeSignal::new(),
            _item: PhantomData,
        })
    }

    // -----------------------------------------------------------------------
    // Producers
    // -----------------------------------------------------------------------

    /// Enqueue an item. Returns the new row id.
    ///
    /// On a unique queue, an item whose encoded bytes are already present is
    /// dropped and `Ok(None)` is returned; nothing is counted or signalled.
    pub fn put(&self, item: &T) -> Result<Option<i64>> {
        let span = start_queue_span(self.store.table(), "put");
        let _enter = span.enter();

        let payload = self.serializer.encode(item)?;
        let mut state = self.state.lock();
        match self.store.insert(&payload, Utc::now()) {
            Ok(id) => {
                state.total += 1;
                drop(state);
                self.wake.notify();
                record_item_id(&span, id);
                metrics::record_operation(self.store.table(), "put");
                debug!(id, "enqueued");
                Ok(Some(id))
            }
            Err(Error::ConstraintViolation)
                if self.strategy.on_duplicate() == DuplicatePolicy::Ignore =>
            {
                metrics::record_operation(self.store.table(), "put_duplicate");
                debug!("duplicate payload ignored");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Same as [`Queue::put`]; inserts never block.
    pub fn put_nowait(&self, item: &T) -> Result<Option<i64>> {
        self.put(item)
    }

    /// Overwrite the payload of row `id` in place.
    ///
    /// Fails with `InvalidArgument` when no id is given and `NotFound` when
    /// the row is gone.
    pub fn update(&self, item: &T, id: Option<i64>) -> Result<i64> {
        let id = id.ok_or_else(|| Error::InvalidArgument("provide an id or raw item".into()))?;
        let span = start_queue_span(self.store.table(), "update");
        let _enter = span.enter();
        record_item_id(&span, id);

        let payload = self.serializer.encode(item)?;
        if self.store.update(id, &payload)? == 0 {
            return Err(Error::NotFound(id));
        }
        metrics::record_operation(self.store.table(), "update");
        debug!(id, "updated");
        Ok(id)
    }

    /// [`Queue::update`] taking the id from a raw item unless `id` overrides it.
    pub fn update_raw(&self, raw: &RawItem<T>, id: Option<i64>) -> Result<i64> {
        self.update(&raw.data, id.or(Some(raw.id)))
    }

    // -----------------------------------------------------------------------
    // Consumers
    // -----------------------------------------------------------------------

    /// Dequeue one item under the given blocking policy.
    pub fn get(&self, options: GetOptions) -> Result<T> {
        self.get_raw(options).map(RawItem::into_data)
    }

    /// Like [`Queue::get`] but also returns the row id and enqueue time.
    pub fn get_raw(&self, options: GetOptions) -> Result<RawItem<T>> {
        let span = start_queue_span(self.store.table(), "get");
        let _enter = span.enter();

        let started = Instant::now();
        let deadline = if options.block {
            options.deadline(started)?
        } else {
            None
        };

        let mut waited = false;
        loop {
            // Read before the attempt so a put racing with it still wakes us.
            let seen = self.wake.epoch();
            if let Some(item) = self.pop(options.id)? {
                record_item_id(&span, item.id);
                metrics::record_operation(self.store.table(), "get");
                if waited {
                    metrics::queue_wait_ms().record(
                        started.elapsed().as_secs_f64() * 1000.0,
                        &[opentelemetry::KeyValue::new("queue", self.store.table().to_string())],
                    );
                }
                return Ok(item);
            }

            if !options.block {
                metrics::record_operation(self.store.table(), "get_empty");
                return Err(Error::Empty);
            }

            let slice = match deadline {
                None => self.poll_interval,
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        metrics::record_operation(self.store.table(), "get_empty");
                        return Err(Error::Empty);
                    }
                    remaining.min(self.poll_interval)
                }
            };
            waited = true;
            self.wake.wait_past(seen, slice);
        }
    }

    /// Non-blocking [`Queue::get`]: fails with `Empty` immediately.
    pub fn get_nowait(&self) -> Result<T> {
        self.get(GetOptions::nowait())
    }

    /// One dequeue attempt. `None` means nothing is available right now.
    ///
    /// The row is consumed before it is decoded, so a payload that fails to
    /// decode costs only its own `get` and never blocks the rows behind it.
    fn pop(&self, id: Option<i64>) -> Result<Option<RawItem<T>>> {
        let mut state = self.state.lock();

        if !self.auto_commit {
            let row = match id {
                Some(id) => self.store.select_by_id(id)?,
                None => self.store.select_after_cursor(state.cursor)?,
            };
            let Some(row) = row else {
                return Ok(None);
            };
            // Re-reading a row at or below the cursor does not consume it again.
            if row.id > state.cursor {
                state.cursor = row.id;
                state.total -= 1;
            }
            debug!(id = row.id, cursor = state.cursor, "consumed");
            return self.decode(row).map(Some);
        }

        loop {
            let row = match id {
                Some(id) => self.store.select_by_id(id)?,
                None => self.store.select_head(self.strategy.head_order())?,
            };
            let Some(row) = row else {
                return Ok(None);
            };
            if self.store.delete_by_id(row.id)? == 0 {
                // Another handle sharing the table took it first.
                debug!(id = row.id, "row already taken, retrying");
                if id.is_some() {
                    return Ok(None);
                }
                continue;
            }
            state.total -= 1;
            debug!(id = row.id, "dequeued");
            return self.decode(row).map(Some);
        }
    }

    fn decode(&self, row: Record) -> Result<RawItem<T>> {
        Ok(RawItem {
            id: row.id,
            data: self.serializer.decode(&row.payload)?,
            timestamp: row.enqueued_at,
        })
    }

    /// Acknowledge everything handed out so far.
    ///
    /// No-op with `auto_commit`; otherwise deletes every row up to the cursor
    /// in one batch.
    pub fn task_done(&self) -> Result<()> {
        if self.auto_commit {
            return Ok(());
        }
        let span = start_queue_span(self.store.table(), "task_done");
        let _enter = span.enter();

        let state = self.state.lock();
        let deleted = self.store.delete_up_to(state.cursor)?;
        metrics::record_operation(self.store.table(), "task_done");
        debug!(cursor = state.cursor, deleted, "task done");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    /// Items this handle believes are waiting, clamped at zero.
    pub fn size(&self) -> usize {
        usize::try_from(self.state.lock().total).unwrap_or(0)
    }

    pub fn qsize(&self) -> usize {
        self.size()
    }

    pub fn len(&self) -> usize {
        self.size()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Every row still in the table, decoded, without consuming anything.
    ///
    /// In deferred mode this includes rows handed out but not yet acknowledged.
    pub fn list_all(&self) -> Result<Vec<RawItem<T>>> {
        self.store
            .select_all()?
            .into_iter()
            .map(|row| self.decode(row))
            .collect()
    }

    /// Snapshot of the handle's counters.
    pub fn state(&self) -> QueueState {
        *self.state.lock()
    }

    pub fn table(&self) -> &str {
        self.store.table()
    }

    pub fn auto_commit(&self) -> bool {
        self.auto_commit
    }

    pub fn strategy(&self) -> &dyn OrderingStrategy {
        self.strategy.as_ref()
    }

    /// Reclaim disk space left by deleted rows.
    pub fn shrink_disk_usage(&self) -> Result<()> {
        let _state = self.state.lock();
        self.store.vacuum()
    }

    pub fn health_check(&self) -> Result<()> {
        self.store.ping()
    }
}

impl<T, S> std::fmt::Debug for Queue<T, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("table", &self.store.table())
            .field("kind", &self.strategy.name())
            .field("auto_commit", &self.auto_commit)
            .field("state", &*self.state.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ordering::QueueKind;

    fn queue(kind: QueueKind, auto_commit: bool) -> Queue<String> {
        let options = QueueOptions::new(kind).auto_commit(auto_commit);
        Queue::in_memory(&options).unwrap()
    }

    #[test]
    fn deadline_validation() {
        let now = Instant::now();
        assert!(GetOptions::blocking().deadline(now).unwrap().is_none());
        assert!(GetOptions::blocking().timeout(-1.0).deadline(now).is_err());
        assert!(GetOptions::blocking().timeout(f64::NAN).deadline(now).is_err());
        assert!(GetOptions::blocking().timeout(f64::INFINITY).deadline(now).unwrap().is_none());
        let d = GetOptions::blocking().timeout(1.5).deadline(now).unwrap().unwrap();
        assert_eq!(d - now, Duration::from_millis(1500));
    }

    #[test]
    fn deferred_cursor_tracks_consumption() {
        let q = queue(QueueKind::Fifo, false);
        let a = q.put(&"a".to_string()).unwrap().unwrap();
        let b = q.put(&"b".to_string()).unwrap().unwrap();
        assert_eq!(q.state(), QueueState { total: 2, cursor: 0 });

        q.get_nowait().unwrap();
        assert_eq!(q.state(), QueueState { total: 1, cursor: a });

        // Re-reading a consumed row leaves the counters alone.
        let again = q.get_raw(GetOptions::nowait().id(a)).unwrap();
        assert_eq!(again.data, "a");
        assert_eq!(q.state(), QueueState { total: 1, cursor: a });

        q.get_nowait().unwrap();
        assert_eq!(q.state().cursor, b);
        assert_eq!(q.list_all().unwrap().len(), 2);

        q.task_done().unwrap();
        assert!(q.list_all().unwrap().is_empty());
    }

    #[test]
    fn task_done_is_noop_with_auto_commit() {
        let q = queue(QueueKind::Fifo, true);
        q.put(&"a".to_string()).unwrap();
        q.task_done().unwrap();
        assert_eq!(q.size(), 1);
        assert_eq!(q.state().cursor, 0);
    }

    fn queue_with_bad_head(options: &QueueOptions) -> Queue<String> {
        let store = SqliteStore::in_memory(options.table_name().unwrap()).unwrap();
        store.create_table_if_absent(false).unwrap();
        store.insert(b"{not json", Utc::now()).unwrap();
        store.insert(br#""good""#, Utc::now()).unwrap();
        Queue::with_store(store, options, JsonSerializer).unwrap()
    }

    #[test]
    fn undecodable_row_is_consumed_and_does_not_block_the_next() {
        let q = queue_with_bad_head(&QueueOptions::default());
        assert_eq!(q.size(), 2);

        let err = q.get_nowait().unwrap_err();
        assert!(matches!(err, Error::Serialization(_)), "got {err:?}");
        assert_eq!(q.size(), 1);

        assert_eq!(q.get(GetOptions::blocking().timeout(1.0)).unwrap(), "good");
        assert!(q.list_all().unwrap().is_empty());
    }

    #[test]
    fn undecodable_row_advances_deferred_cursor() {
        let q = queue_with_bad_head(&QueueOptions::default().auto_commit(false));

        assert!(matches!(q.get_nowait(), Err(Error::Serialization(_))));
        assert_eq!(q.get_nowait().unwrap(), "good");
        q.task_done().unwrap();
        assert!(q.list_all().unwrap().is_empty());
    }

    #[derive(Debug)]
    struct Newest;

    impl OrderingStrategy for Newest {
        fn name(&self) -> &'static str {
            "newest"
        }

        fn table_prefix(&self) -> &'static str {
            "newest_queue"
        }

        fn head_order(&self) -> HeadOrder {
            HeadOrder::Descending
        }
    }

    #[test]
    fn custom_strategy_gets_its_own_table() {
        let options = QueueOptions::default().name("jobs");
        let store = SqliteStore::in_memory(options.table_name_for(&Newest).unwrap()).unwrap();
        let q: Queue<String> =
            Queue::with_strategy(store, Box::new(Newest), &options, JsonSerializer).unwrap();
        assert_eq!(q.table(), "newest_queue_jobs");
        assert_eq!(q.strategy().name(), "newest");

        q.put(&"a".to_string()).unwrap();
        q.put(&"b".to_string()).unwrap();
        assert_eq!(q.get_nowait().unwrap(), "b");
    }

    #[test]
    fn debug_names_table_and_kind() {
        let q = queue(QueueKind::Filo, true);
        let dbg = format!("{q:?}");
        assert!(dbg.contains("filo_queue_default"));
        assert!(dbg.contains("filo"));
    }
}
