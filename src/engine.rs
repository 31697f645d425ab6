//! Generic write-behind archive engine.
//!
//! One [`DataArchive`] instance exists per record kind. The engine owns:
//!
//! - the bounded write queue and its flush discipline (time trigger and
//!   high-water size trigger),
//! - the retrieval planner (by id, time-anchored, time range, record-anchored
//!   pagination, latest-state snapshot),
//! - purge and remove,
//! - the per-kind instrumentation sampler.
//!
//! A background thread multiplexes the flush deadline and the sampling
//! deadline; size-triggered flushes run synchronously on the producing
//! thread. One mutex guards both database connections: flushes, retrievals,
//! purge and remove all serialize on it, scoped per kind — an explicit
//! simplicity-over-throughput trade-off. Producers only touch the queue lock
//! unless their store crosses the high-water mark.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction};

use crate::error::ArchiveError;
use crate::filter::{ItemFilter, QueryBuilder};
use crate::provider::ConnectionProvider;
use crate::types::{
    clamp_micros, from_micros, ArchiveItem, DebugInformation, RetrievalDirection, UniqueId,
};

// =============================================================================
// Constants
// =============================================================================

/// Maximum items held in the write queue.
pub const QUEUE_CAPACITY: usize = 10_000;

/// Queue occupancy that forces a synchronous flush before admitting more.
pub const QUEUE_HIGH_WATER: usize = QUEUE_CAPACITY - 100;

/// Extra rows fetched by record-anchored pagination to relocate the anchor
/// among generation-time ties.
const LOOK_AHEAD_SPAN: usize = 100;

/// Default time trigger for the write-behind flush.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(1000);

/// Instrumentation sampling period.
const SAMPLE_INTERVAL: Duration = Duration::from_secs(2);

/// System label carried by every instrumentation gauge.
pub const ARCHIVE_SYSTEM: &str = "archive";

// =============================================================================
// Per-kind persistence strategy
// =============================================================================

/// Persistence strategy of one record kind.
///
/// Append-only kinds implement the statement binding and row decoding and
/// inherit everything else. Evolving-entity kinds override [`persist`] with
/// their upsert logic; the hybrid activity kind additionally overrides the
/// fetch methods to reassemble its nested structure.
///
/// [`persist`]: RecordKind::persist
pub trait RecordKind: Send + Sync + 'static {
    type Item: ArchiveItem;
    type Filter: ItemFilter;

    /// Human-readable name used in logs, gauges and unsupported-operation errors.
    const DISPLAY_NAME: &'static str;

    /// Main table, one row per record (the occurrence table for the hybrid kind).
    const TABLE: &'static str;

    /// `SELECT ... FROM ...` prefix producing the columns [`decode`] expects.
    ///
    /// [`decode`]: RecordKind::decode
    fn select_clause() -> String;

    /// Column qualifier for predicates the engine generates on
    /// `generation_time`/`unique_id` (non-empty when the select clause joins
    /// tables, e.g. `"a."`).
    fn qualifier() -> &'static str {
        ""
    }

    /// Decode one result row into an item.
    fn decode(row: &rusqlite::Row<'_>) -> Result<Self::Item, ArchiveError>;

    /// Persist one drained batch inside the given transaction.
    fn persist(tx: &Transaction<'_>, items: &[Self::Item]) -> Result<(), ArchiveError>;

    /// Fetch one record by id.
    fn fetch_by_id(conn: &Connection, id: UniqueId) -> Result<Option<Self::Item>, ArchiveError> {
        let sql = format!(
            "{} WHERE {}unique_id = ?",
            Self::select_clause(),
            Self::qualifier()
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query([id])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::decode(row)?)),
            None => Ok(None),
        }
    }

    /// Execute an assembled query and decode every row.
    fn fetch_query(
        conn: &Connection,
        query: &QueryBuilder,
    ) -> Result<Vec<Self::Item>, ArchiveError> {
        tracing::trace!(sql = query.sql(), "retrieve statement");
        let mut stmt = conn.prepare(query.sql())?;
        let mut rows = stmt.query(query.param_refs().as_slice())?;
        let mut result = Vec::new();
        while let Some(row) = rows.next()? {
            result.push(Self::decode(row)?);
        }
        Ok(result)
    }

    /// Time-anchored range fetch, ordered on `(generation_time, unique_id)`.
    fn fetch_range(
        conn: &Connection,
        start_micros: i64,
        count: usize,
        direction: RetrievalDirection,
        filter: Option<&Self::Filter>,
    ) -> Result<Vec<Self::Item>, ArchiveError> {
        let q = Self::qualifier();
        let mut query = QueryBuilder::new(format!(
            "{} WHERE {q}generation_time {} ?",
            Self::select_clause(),
            direction.time_op()
        ));
        query.push_param(start_micros);
        if let Some(f) = filter {
            f.apply(&mut query);
        }
        let ord = direction.order();
        query.push_sql(&format!(
            " ORDER BY {q}generation_time {ord}, {q}unique_id {ord} LIMIT {count}"
        ));
        Self::fetch_query(conn, &query)
    }

    /// Tie-aware fetch for record-anchored pagination: strictly past the
    /// anchor time, or at the anchor time with an id at/past the anchor id.
    fn fetch_anchored(
        conn: &Connection,
        start_micros: i64,
        anchor: UniqueId,
        count: usize,
        direction: RetrievalDirection,
        filter: Option<&Self::Filter>,
    ) -> Result<Vec<Self::Item>, ArchiveError> {
        let q = Self::qualifier();
        let mut query = QueryBuilder::new(format!(
            "{} WHERE ({q}generation_time {} ? OR ({q}generation_time = ? AND {q}unique_id {} ?))",
            Self::select_clause(),
            direction.strict_op(),
            direction.time_op()
        ));
        query.push_param(start_micros);
        query.push_param(start_micros);
        query.push_param(anchor);
        if let Some(f) = filter {
            f.apply(&mut query);
        }
        let ord = direction.order();
        query.push_sql(&format!(
            " ORDER BY {q}generation_time {ord}, {q}unique_id {ord} LIMIT {count}"
        ));
        Self::fetch_query(conn, &query)
    }

    /// Inclusive time-range fetch, unbounded count. `lo_micros <= hi_micros`;
    /// `ascending` selects the sort direction.
    fn fetch_between(
        conn: &Connection,
        lo_micros: i64,
        hi_micros: i64,
        ascending: bool,
        filter: Option<&Self::Filter>,
    ) -> Result<Vec<Self::Item>, ArchiveError> {
        let q = Self::qualifier();
        let mut query = QueryBuilder::new(format!(
            "{} WHERE {q}generation_time >= ? AND {q}generation_time <= ?",
            Self::select_clause()
        ));
        query.push_param(lo_micros);
        query.push_param(hi_micros);
        if let Some(f) = filter {
            f.apply(&mut query);
        }
        let ord = if ascending { "ASC" } else { "DESC" };
        query.push_sql(&format!(
            " ORDER BY {q}generation_time {ord}, {q}unique_id {ord}"
        ));
        Self::fetch_query(conn, &query)
    }

    /// Latest-record-per-identity snapshot at a reference time.
    ///
    /// Only meaningful for append-only kinds whose records carry current
    /// state; everything else reports the operation as unsupported.
    fn fetch_latest_state(
        _conn: &Connection,
        _reference_micros: i64,
        _filter: Option<&Self::Filter>,
        _lookback_micros: Option<i64>,
    ) -> Result<Vec<Self::Item>, ArchiveError> {
        Err(ArchiveError::Unsupported(Self::DISPLAY_NAME))
    }

    /// DELETE statements implementing a purge, executed in order inside one
    /// transaction. Each takes the reference time (micros) as parameter 1.
    fn purge_statements(direction: RetrievalDirection) -> Vec<String> {
        vec![format!(
            "DELETE FROM {} WHERE generation_time {} ?",
            Self::TABLE,
            direction.strict_op()
        )]
    }

    /// DELETE for one record by id; `None` when the kind does not support removal.
    fn remove_by_id_statement() -> Option<String> {
        None
    }

    /// DELETE for a filter-driven batch removal; `None` when unsupported.
    fn remove_by_filter_query(_filter: &Self::Filter) -> Option<QueryBuilder> {
        None
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Write connection and retrieval connection of one archive instance.
struct IoState {
    store: Connection,
    retrieve: Connection,
}

struct Inner<K: RecordKind> {
    provider: ConnectionProvider,
    queue: Mutex<VecDeque<K::Item>>,
    /// The write-side exclusion domain: flushes, retrievals, purge, remove.
    io: Mutex<Option<IoState>>,
    disposed: AtomicBool,
    committed_in_window: AtomicU64,
    stats: Mutex<Vec<DebugInformation>>,
    shutdown: Mutex<Option<Sender<()>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Write-behind archive of one record kind.
///
/// Cheap to clone; clones share the same queue, connections and worker.
pub struct DataArchive<K: RecordKind> {
    inner: Arc<Inner<K>>,
}

impl<K: RecordKind> Clone for DataArchive<K> {
    fn clone(&self) -> Self {
        DataArchive {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: RecordKind> std::fmt::Debug for DataArchive<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataArchive")
            .field("kind", &K::DISPLAY_NAME)
            .finish_non_exhaustive()
    }
}

impl<K: RecordKind> DataArchive<K> {
    /// Create the archive for one kind: two connections from the provider and
    /// a background worker driving the flush and sampling deadlines.
    pub fn new(
        provider: &ConnectionProvider,
        flush_interval: Duration,
    ) -> Result<Self, ArchiveError> {
        let store = provider.create_connection(true)?;
        let retrieve = provider.create_connection(false)?;
        let (tx, rx) = mpsc::channel();

        let inner = Arc::new(Inner::<K> {
            provider: provider.clone(),
            queue: Mutex::new(VecDeque::with_capacity(QUEUE_CAPACITY)),
            io: Mutex::new(Some(IoState { store, retrieve })),
            disposed: AtomicBool::new(false),
            committed_in_window: AtomicU64::new(0),
            stats: Mutex::new(initial_stats::<K>()),
            shutdown: Mutex::new(Some(tx)),
            worker: Mutex::new(None),
        });

        let worker_inner = Arc::clone(&inner);
        let handle = std::thread::Builder::new()
            .name(format!("{}-archive", K::TABLE))
            .spawn(move || run_worker(worker_inner, rx, flush_interval))
            .map_err(|e| ArchiveError::Internal(format!("cannot spawn archive worker: {e}")))?;
        *inner.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        Ok(DataArchive { inner })
    }

    // =========================================================================
    // Store
    // =========================================================================

    /// Queue one record for storage.
    ///
    /// Never blocks on the database unless the queue is near capacity, in
    /// which case the pending batch is flushed on this thread first.
    pub fn store(&self, item: K::Item) -> Result<(), ArchiveError> {
        self.inner.check_disposed()?;
        self.inner.ensure_room(1);
        self.inner.lock_queue().push_back(item);
        Ok(())
    }

    /// Queue a batch of records. A batch larger than the queue is admitted in
    /// slices, each slice forcing its own flush.
    pub fn store_batch(&self, items: Vec<K::Item>) -> Result<(), ArchiveError> {
        if items.is_empty() {
            return Ok(());
        }
        self.inner.check_disposed()?;
        self.inner.ensure_room(items.len());

        let remaining = QUEUE_CAPACITY - self.inner.lock_queue().len();
        if items.len() < remaining {
            self.inner.lock_queue().extend(items);
        } else {
            let mut rest = items;
            while !rest.is_empty() {
                let take = rest.len().min(QUEUE_HIGH_WATER);
                let chunk: Vec<K::Item> = rest.drain(..take).collect();
                self.inner.lock_queue().extend(chunk);
                self.inner.flush();
            }
        }
        Ok(())
    }

    // =========================================================================
    // Retrieval
    // =========================================================================

    /// Fetch one record by id; `None` when no such record is durable.
    pub fn retrieve(&self, id: UniqueId) -> Result<Option<K::Item>, ArchiveError> {
        self.inner.check_disposed()?;
        let mut guard = self.inner.lock_io();
        let io = guard.as_mut().ok_or(ArchiveError::Disposed)?;
        K::fetch_by_id(&io.retrieve, id)
    }

    /// Fetch up to `count` records from a time anchor in the given direction,
    /// ordered on `(generation_time, unique_id)`.
    pub fn retrieve_from(
        &self,
        start_time: DateTime<Utc>,
        count: usize,
        direction: RetrievalDirection,
        filter: Option<&K::Filter>,
    ) -> Result<Vec<K::Item>, ArchiveError> {
        self.inner.check_disposed()?;
        let mut guard = self.inner.lock_io();
        let io = guard.as_mut().ok_or(ArchiveError::Disposed)?;
        K::fetch_range(&io.retrieve, clamp_micros(start_time), count, direction, filter)
    }

    /// Fetch every record in the inclusive time range; ascending when
    /// `start_time < end_time`, descending otherwise.
    pub fn retrieve_between(
        &self,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        filter: Option<&K::Filter>,
    ) -> Result<Vec<K::Item>, ArchiveError> {
        self.inner.check_disposed()?;
        let mut guard = self.inner.lock_io();
        let io = guard.as_mut().ok_or(ArchiveError::Disposed)?;
        let ascending = start_time < end_time;
        let a = clamp_micros(start_time);
        let b = clamp_micros(end_time);
        let (lo, hi) = if ascending { (a, b) } else { (b, a) };
        K::fetch_between(&io.retrieve, lo, hi, ascending, filter)
    }

    /// Pagination anchored on a previously returned record.
    ///
    /// Over-fetches `count + 100` rows with a tie-aware predicate, relocates
    /// the anchor in the window and returns the slice strictly after it. When
    /// the anchor is not found (purged, or displaced past the look-ahead by
    /// ties) the first `count` rows of the window are returned instead — a
    /// documented approximation.
    pub fn retrieve_from_item(
        &self,
        start_item: &K::Item,
        count: usize,
        direction: RetrievalDirection,
        filter: Option<&K::Filter>,
    ) -> Result<Vec<K::Item>, ArchiveError> {
        self.inner.check_disposed()?;
        let mut guard = self.inner.lock_io();
        let io = guard.as_mut().ok_or(ArchiveError::Disposed)?;
        let window = K::fetch_anchored(
            &io.retrieve,
            clamp_micros(start_item.generation_time()),
            start_item.unique_id(),
            count + LOOK_AHEAD_SPAN,
            direction,
            filter,
        )?;
        let anchor = start_item.unique_id();
        let result = match window.iter().position(|it| it.unique_id() == anchor) {
            Some(pos) => window.into_iter().skip(pos + 1).take(count).collect(),
            None => {
                tracing::debug!(
                    archive = K::DISPLAY_NAME,
                    anchor = %anchor,
                    "pagination anchor not found in look-ahead window, returning window head"
                );
                window.into_iter().take(count).collect()
            }
        };
        Ok(result)
    }

    /// Latest record per identity with `generation_time <= reference_time`
    /// (and `>= reference_time - lookback` bound when given).
    pub fn retrieve_at(
        &self,
        reference_time: DateTime<Utc>,
        filter: Option<&K::Filter>,
        lookback: Option<DateTime<Utc>>,
    ) -> Result<Vec<K::Item>, ArchiveError> {
        self.inner.check_disposed()?;
        let mut guard = self.inner.lock_io();
        let io = guard.as_mut().ok_or(ArchiveError::Disposed)?;
        K::fetch_latest_state(
            &io.retrieve,
            clamp_micros(reference_time),
            filter,
            lookback.map(clamp_micros),
        )
    }

    /// Highest durable record id, `None` on an empty archive.
    pub fn retrieve_last_id(&self) -> Result<Option<UniqueId>, ArchiveError> {
        self.inner.check_disposed()?;
        let mut guard = self.inner.lock_io();
        let io = guard.as_mut().ok_or(ArchiveError::Disposed)?;
        let sql = format!(
            "SELECT unique_id FROM {} ORDER BY unique_id DESC LIMIT 1",
            K::TABLE
        );
        let id = io
            .retrieve
            .query_row(&sql, [], |row| row.get(0))
            .optional()?;
        Ok(id)
    }

    /// Most recent durable generation time, `None` on an empty archive.
    pub fn retrieve_last_generation_time(&self) -> Result<Option<DateTime<Utc>>, ArchiveError> {
        self.inner.check_disposed()?;
        let mut guard = self.inner.lock_io();
        let io = guard.as_mut().ok_or(ArchiveError::Disposed)?;
        let sql = format!("SELECT MAX(generation_time) FROM {}", K::TABLE);
        let micros: Option<i64> = io.retrieve.query_row(&sql, [], |row| row.get(0))?;
        Ok(micros.map(from_micros))
    }

    // =========================================================================
    // Purge / remove
    // =========================================================================

    /// Irreversibly delete all records with `generation_time` strictly before
    /// (`ToPast`) or after (`ToFuture`) the reference time.
    ///
    /// Items still queued for storage are not affected and persist after the
    /// purge commits.
    pub fn purge(
        &self,
        reference_time: DateTime<Utc>,
        direction: RetrievalDirection,
    ) -> Result<(), ArchiveError> {
        self.inner.check_disposed()?;
        let mut guard = self.inner.lock_io();
        let io = guard.as_mut().ok_or(ArchiveError::Disposed)?;
        let micros = clamp_micros(reference_time);
        let tx = io.store.transaction()?;
        for sql in K::purge_statements(direction) {
            tracing::debug!(archive = K::DISPLAY_NAME, sql = %sql, "purge statement");
            tx.execute(&sql, [micros])?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Delete one record by id, for kinds that support removal.
    pub fn remove(&self, id: UniqueId) -> Result<(), ArchiveError> {
        self.inner.check_disposed()?;
        let sql = K::remove_by_id_statement().ok_or(ArchiveError::Unsupported(K::DISPLAY_NAME))?;
        let mut guard = self.inner.lock_io();
        let io = guard.as_mut().ok_or(ArchiveError::Disposed)?;
        let tx = io.store.transaction()?;
        tx.execute(&sql, [id])?;
        tx.commit()?;
        Ok(())
    }

    /// Delete every record matching the filter, for kinds that support it
    /// (used to invalidate stale schedule entries).
    pub fn remove_matching(&self, filter: &K::Filter) -> Result<(), ArchiveError> {
        self.inner.check_disposed()?;
        let query =
            K::remove_by_filter_query(filter).ok_or(ArchiveError::Unsupported(K::DISPLAY_NAME))?;
        let mut guard = self.inner.lock_io();
        let io = guard.as_mut().ok_or(ArchiveError::Disposed)?;
        let tx = io.store.transaction()?;
        tracing::debug!(archive = K::DISPLAY_NAME, sql = query.sql(), "remove statement");
        tx.execute(query.sql(), query.param_refs().as_slice())?;
        tx.commit()?;
        Ok(())
    }

    // =========================================================================
    // Lifecycle / instrumentation
    // =========================================================================

    /// Flush residual queued items, stop the background worker and close both
    /// connections. Every subsequent call fails with [`ArchiveError::Disposed`].
    pub fn dispose(&self) -> Result<(), ArchiveError> {
        self.inner.check_disposed()?;
        self.inner.disposed.store(true, Ordering::Release);
        // Residual queue contents are persisted before teardown.
        self.inner.flush();
        // Dropping the sender wakes and ends the worker loop.
        drop(
            self.inner
                .shutdown
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );
        let handle = self
            .inner
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
        *self.inner.lock_io() = None;
        self.inner.lock_queue().clear();
        tracing::debug!(archive = K::DISPLAY_NAME, "archive disposed");
        Ok(())
    }

    /// True once `dispose()` has run.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Latest instrumentation snapshot: queue occupancy and commit rate.
    pub fn current_debug_info(&self) -> Vec<DebugInformation> {
        self.inner
            .stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Current write queue occupancy.
    pub fn queue_len(&self) -> usize {
        self.inner.lock_queue().len()
    }
}

impl<K: RecordKind> Inner<K> {
    fn lock_io(&self) -> MutexGuard<'_, Option<IoState>> {
        self.io.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_queue(&self) -> MutexGuard<'_, VecDeque<K::Item>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_disposed(&self) -> Result<(), ArchiveError> {
        if self.disposed.load(Ordering::Acquire) {
            Err(ArchiveError::Disposed)
        } else {
            Ok(())
        }
    }

    /// Flush before admitting `incoming` items if that would cross the
    /// high-water mark. Runs on the producing thread.
    fn ensure_room(&self, incoming: usize) {
        let over = self.lock_queue().len() + incoming > QUEUE_HIGH_WATER;
        if over {
            tracing::debug!(
                archive = K::DISPLAY_NAME,
                "queue near capacity, synchronous flush"
            );
            self.flush();
        }
    }

    /// Drain the queue and commit the batch. No-op when empty or disposed.
    fn flush(&self) {
        let mut guard = self.lock_io();
        let Some(io) = guard.as_mut() else {
            return;
        };
        let batch: Vec<K::Item> = {
            let mut queue = self.lock_queue();
            queue.drain(..).collect()
        };
        if batch.is_empty() {
            return;
        }
        match self.persist_batch(io, &batch) {
            Ok(()) => {
                self.committed_in_window
                    .fetch_add(batch.len() as u64, Ordering::Relaxed);
                tracing::trace!(
                    archive = K::DISPLAY_NAME,
                    count = batch.len(),
                    "batch committed"
                );
            }
            Err(e) => {
                // The failed batch is dropped, not retried: retrying would let
                // the queue grow without bound during a database outage.
                tracing::error!(
                    archive = K::DISPLAY_NAME,
                    error = %e,
                    count = batch.len(),
                    "batch dropped after failed commit"
                );
            }
        }
    }

    fn persist_batch(&self, io: &mut IoState, batch: &[K::Item]) -> Result<(), ArchiveError> {
        let tx = io.store.transaction()?;
        match K::persist(&tx, batch) {
            Ok(()) => {
                tx.commit()?;
                Ok(())
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback() {
                    tracing::error!(
                        archive = K::DISPLAY_NAME,
                        error = %rollback_err,
                        "rollback failed, recreating store connection"
                    );
                    match self.provider.create_connection(true) {
                        Ok(fresh) => io.store = fresh,
                        Err(conn_err) => tracing::error!(
                            archive = K::DISPLAY_NAME,
                            error = %conn_err,
                            "store connection recreation failed"
                        ),
                    }
                }
                Err(err)
            }
        }
    }

    /// Refresh the instrumentation snapshot for the elapsed window.
    fn sample(&self, elapsed: Duration) {
        let items = self.committed_in_window.swap(0, Ordering::Relaxed);
        let secs = elapsed.as_secs_f64();
        let rate = if secs > 0.0 {
            (items as f64 / secs).round() as i64
        } else {
            0
        };
        let occupancy = self.lock_queue().len() as i64;
        let stats = vec![
            DebugInformation::of(
                ARCHIVE_SYSTEM,
                format!("{} input queue", K::DISPLAY_NAME),
                occupancy,
                Some(QUEUE_CAPACITY as i64),
                "",
            ),
            DebugInformation::of(
                ARCHIVE_SYSTEM,
                format!("{} storage rate", K::DISPLAY_NAME),
                rate,
                None,
                "items/second",
            ),
        ];
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner) = stats;
    }
}

fn initial_stats<K: RecordKind>() -> Vec<DebugInformation> {
    vec![
        DebugInformation::of(
            ARCHIVE_SYSTEM,
            format!("{} input queue", K::DISPLAY_NAME),
            0,
            Some(QUEUE_CAPACITY as i64),
            "",
        ),
        DebugInformation::of(
            ARCHIVE_SYSTEM,
            format!("{} storage rate", K::DISPLAY_NAME),
            0,
            None,
            "items/second",
        ),
    ]
}

/// Background loop multiplexing the flush deadline and the sampling deadline.
/// The channel is used purely as a shutdown signal.
fn run_worker<K: RecordKind>(inner: Arc<Inner<K>>, rx: Receiver<()>, flush_interval: Duration) {
    tracing::debug!(archive = K::DISPLAY_NAME, "archive worker started");
    let mut next_flush = Instant::now() + flush_interval;
    let mut next_sample = Instant::now() + SAMPLE_INTERVAL;
    let mut last_sample = Instant::now();

    loop {
        let deadline = next_flush.min(next_sample);
        let timeout = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        let now = Instant::now();
        if now >= next_flush {
            inner.flush();
            next_flush = now + flush_interval;
        }
        if now >= next_sample {
            inner.sample(now - last_sample);
            last_sample = now;
            next_sample = now + SAMPLE_INTERVAL;
        }
    }
    tracing::debug!(archive = K::DISPLAY_NAME, "archive worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinds::raw_data::{RawData, RawDataKind};
    use crate::schema::init_schema;
    use crate::types::Quality;

    fn frame(id: i64, micros: i64) -> RawData {
        RawData {
            unique_id: UniqueId(id),
            generation_time: from_micros(micros),
            name: format!("frame-{id}"),
            reception_time: from_micros(micros + 1),
            data_type: "TM PACKET".to_string(),
            route: "route-1".to_string(),
            source: "station-a".to_string(),
            quality: Quality::Good,
            contents: None,
            extension: None,
        }
    }

    fn setup(flush_interval: Duration) -> (tempfile::TempDir, DataArchive<RawDataKind>) {
        let dir = tempfile::tempdir().unwrap();
        let provider = ConnectionProvider::new(dir.path().join("archive.db")).unwrap();
        {
            let conn = provider.create_connection(true).unwrap();
            init_schema(&conn).unwrap();
        }
        let archive = DataArchive::<RawDataKind>::new(&provider, flush_interval).unwrap();
        (dir, archive)
    }

    #[test]
    fn test_dispose_flushes_residual_queue() {
        let (_dir, archive) = setup(Duration::from_secs(60));
        archive.store(frame(1, 100)).unwrap();
        archive.store(frame(2, 200)).unwrap();
        assert_eq!(archive.queue_len(), 2);

        // Retrieval before any flush sees nothing durable yet.
        assert!(archive.retrieve(UniqueId(1)).unwrap().is_none());

        archive.dispose().unwrap();
        assert!(archive.is_disposed());
        assert!(matches!(archive.dispose(), Err(ArchiveError::Disposed)));

        let (_d, reopened) = {
            let provider = ConnectionProvider::new(_dir.path().join("archive.db")).unwrap();
            let a = DataArchive::<RawDataKind>::new(&provider, Duration::from_secs(60)).unwrap();
            (provider, a)
        };
        assert_eq!(reopened.retrieve_last_id().unwrap(), Some(UniqueId(2)));
        reopened.dispose().unwrap();
    }

    #[test]
    fn test_failed_batch_is_dropped_not_retried() {
        let (_dir, archive) = setup(Duration::from_secs(60));
        // Two records with the same primary key poison the whole batch: it is
        // rolled back and dropped, and later flushes proceed normally.
        archive.store(frame(1, 100)).unwrap();
        archive.store(frame(1, 200)).unwrap();
        archive.dispose().unwrap();

        let provider = ConnectionProvider::new(_dir.path().join("archive.db")).unwrap();
        let reopened = DataArchive::<RawDataKind>::new(&provider, Duration::from_secs(60)).unwrap();
        assert_eq!(reopened.retrieve_last_id().unwrap(), None);

        reopened.store(frame(3, 300)).unwrap();
        reopened.dispose().unwrap();

        let again = DataArchive::<RawDataKind>::new(&provider, Duration::from_secs(60)).unwrap();
        assert_eq!(again.retrieve_last_id().unwrap(), Some(UniqueId(3)));
        again.dispose().unwrap();
    }

    #[test]
    fn test_store_fails_fast_after_dispose_without_touching_queue() {
        let (_dir, archive) = setup(Duration::from_secs(60));
        archive.dispose().unwrap();
        assert!(matches!(
            archive.store(frame(1, 100)),
            Err(ArchiveError::Disposed)
        ));
        assert_eq!(archive.queue_len(), 0);
    }
}
