//! # Row Cache
//!
//! In-memory cache of rows keyed by disk position, bounded both by row count
//! and by the total storage size of resident rows.
//!
//! ## Eviction
//!
//! `put` checks both budgets before inserting. When either would be exceeded
//! it runs a cleanup, and if that did not make room, a forced cleanup:
//!
//! ```text
//! put(row)
//!   ├─ rows >= row_capacity || bytes + size > bytes_capacity ?
//!   │     └─ clean_up()            evict ~half, coldest first
//!   │         └─ still over?  force_clean_up()   evict every clean, unpinned row
//!   │               └─ still over?  StoreError::CacheFull
//!   └─ insert, mark in-memory, add size to the byte total
//! ```
//!
//! A cleanup is a single full sweep:
//!
//! 1. Fold object access counts into the slot stamps.
//! 2. `remove_count = len / 2`; find the access stamp below which about that
//!    many entries lie (`access_target`, tolerance `remove_count / 8`).
//! 3. For every entry at or below the target: a pinned row gets its stamp
//!    raised to `access_target + 1` and stays; any other row is evicted, and
//!    if it is dirty it is staged for writing first.
//! 4. The target becomes the new access floor, the last staged batch is
//!    written, and stamps are pushed back into the objects.
//!
//! ## Write-Back Order
//!
//! Staged rows are written in batches of at most `save_batch_size`, each
//! sorted by ascending disk position so the backing store sees sequential
//! offsets. Eviction order is governed by access recency; write order is not.
//!
//! ## Thread Safety
//!
//! One `parking_lot::Mutex` guards the map, the byte total, the staging
//! buffer and the backing store writer; every public method takes it. The
//! sweep takes each row's state lock while deciding about that row (cache
//! lock outermost). Writes to the backing store block while the cache lock
//! is held.

use std::sync::Arc;
use std::time::{Duration, Instant};

use eyre::{ensure, Result, WrapErr};
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::{CachedObject, ObjectCacheMap, RowWriter};
use crate::config::{CacheConfig, ACCESS_CEILING_TOLERANCE_DIVISOR};
use crate::error::StoreError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub rows: usize,
    pub bytes: u64,
    pub cleanups: u64,
    pub forced_cleanups: u64,
    pub rows_saved: u64,
    pub rows_evicted: u64,
    pub save_time: Duration,
    pub access_count: i32,
    pub access_floor: i32,
}

#[derive(Debug, Default)]
struct Counters {
    cleanups: u64,
    forced_cleanups: u64,
    rows_saved: u64,
    rows_evicted: u64,
    save_time: Duration,
}

struct CacheInner<R: CachedObject, W> {
    map: ObjectCacheMap<R>,
    writer: W,
    row_table: Vec<Arc<R>>,
    cache_bytes: u64,
    counters: Counters,
}

pub struct RowCache<R: CachedObject, W: RowWriter<R>> {
    inner: Mutex<CacheInner<R, W>>,
    config: CacheConfig,
}

impl<R: CachedObject, W: RowWriter<R>> RowCache<R, W> {
    pub fn new(config: CacheConfig, writer: W) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            inner: Mutex::new(CacheInner {
                map: ObjectCacheMap::new(config.row_capacity),
                writer,
                row_table: Vec::with_capacity(config.save_batch_size),
                cache_bytes: 0,
                counters: Counters::default(),
            }),
            config,
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of the storage sizes of all resident rows.
    pub fn total_bytes(&self) -> u64 {
        self.inner.lock().cache_bytes
    }

    pub fn contains(&self, pos: i64) -> bool {
        self.inner.lock().map.contains(pos)
    }

    /// Current value of the global access counter. Callers that use a row
    /// directly can pass it to `CachedObject::update_access_count`.
    pub fn access_count(&self) -> i32 {
        self.inner.lock().map.access_count()
    }

    /// Eviction threshold of the most recent cleanup.
    pub fn access_count_floor(&self) -> i32 {
        self.inner.lock().map.access_count_floor()
    }

    pub fn access_count_of(&self, pos: i64) -> Option<i32> {
        self.inner.lock().map.access_count_of(pos)
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            rows: inner.map.len(),
            bytes: inner.cache_bytes,
            cleanups: inner.counters.cleanups,
            forced_cleanups: inner.counters.forced_cleanups,
            rows_saved: inner.counters.rows_saved,
            rows_evicted: inner.counters.rows_evicted,
            save_time: inner.counters.save_time,
            access_count: inner.map.access_count(),
            access_floor: inner.map.access_count_floor(),
        }
    }

    /// Resident row at `pos`, stamped as just accessed. A miss does not
    /// fault anything in.
    pub fn get(&self, pos: i64) -> Option<Arc<R>> {
        self.inner.lock().map.get(pos)
    }

    /// Resident row at `pos` without touching its access stamp.
    pub fn peek(&self, pos: i64) -> Option<Arc<R>> {
        self.inner.lock().map.peek(pos).cloned()
    }

    /// Returns the resident row or materializes it with `load` and inserts
    /// it, all under one lock acquisition.
    pub fn get_or_load<F>(&self, pos: i64, load: F) -> Result<Arc<R>>
    where
        F: FnOnce(&mut W) -> Result<R>,
    {
        let mut inner = self.inner.lock();
        if let Some(row) = inner.map.get(pos) {
            return Ok(row);
        }

        let row = Arc::new(load(&mut inner.writer)?);
        ensure!(
            row.pos() == pos,
            "loaded row reports position {} but was requested at {}",
            row.pos(),
            pos
        );

        inner.put(Arc::clone(&row), &self.config)?;
        Ok(row)
    }

    pub fn put(&self, row: Arc<R>) -> Result<()> {
        self.inner.lock().put(row, &self.config)
    }

    /// Removes the row without writing it.
    pub fn release(&self, pos: i64) -> Option<Arc<R>> {
        self.inner.lock().release(pos)
    }

    /// Swaps the object stored at `row.pos()`, keeping its access stamp.
    /// The byte total is left alone, so the replacement must have the same
    /// storage size as the resident row. `Ok(None)` if nothing is resident.
    pub fn replace(&self, row: Arc<R>) -> Result<Option<Arc<R>>> {
        let mut inner = self.inner.lock();
        let resident = match inner.map.peek(row.pos()) {
            Some(current) => current.storage_size(),
            None => return Ok(None),
        };
        ensure!(
            resident == row.storage_size(),
            "replacement for row {} has storage size {} but the resident row has {}",
            row.pos(),
            row.storage_size(),
            resident
        );

        let Some(previous) = inner.map.replace(Arc::clone(&row)) else {
            return Ok(None);
        };
        row.set_in_memory(true);
        if !Arc::ptr_eq(&previous, &row) {
            previous.set_in_memory(false);
        }
        Ok(Some(previous))
    }

    /// Writes every dirty resident row. Returns the number written.
    pub fn save_all(&self) -> Result<usize> {
        self.inner.lock().save_all(&self.config)
    }

    pub fn clean_up(&self) -> Result<()> {
        self.inner.lock().clean_up(&self.config)
    }

    /// Evicts every clean, unpinned row regardless of access recency.
    pub fn force_clean_up(&self) -> usize {
        self.inner.lock().force_clean_up()
    }

    /// Drops every resident row without writing and resets all counters.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// Runs `f` against the backing store writer under the cache lock.
    pub fn with_store<T>(&self, f: impl FnOnce(&mut W) -> T) -> T {
        f(&mut self.inner.lock().writer)
    }

    /// Drops every resident row without writing and hands back the writer.
    pub fn into_store(self) -> W {
        let mut inner = self.inner.into_inner();
        inner.clear();
        inner.writer
    }
}

impl<R: CachedObject, W: RowWriter<R>> CacheInner<R, W> {
    /// Whether inserting `incoming` bytes at `pos` would break a budget. A
    /// row already resident at `pos` is about to be overwritten, so it takes
    /// no extra slot and its bytes are discounted.
    fn exceeds(&self, pos: i64, incoming: u64, config: &CacheConfig) -> bool {
        match self.map.peek(pos) {
            Some(resident) => {
                incoming + self.cache_bytes - resident.storage_size() as u64
                    > config.bytes_capacity
            }
            None => {
                self.map.len() >= config.row_capacity
                    || incoming + self.cache_bytes > config.bytes_capacity
            }
        }
    }

    fn put(&mut self, row: Arc<R>, config: &CacheConfig) -> Result<()> {
        let pos = row.pos();
        let size = row.storage_size() as u64;

        if self.exceeds(pos, size, config) {
            self.clean_up(config)?;

            if self.exceeds(pos, size, config) {
                self.force_clean_up();

                if self.exceeds(pos, size, config) {
                    return Err(StoreError::CacheFull {
                        rows: self.map.len(),
                        bytes: self.cache_bytes,
                    }
                    .into());
                }
            }
        }

        row.set_in_memory(true);
        if let Some(previous) = self.map.put(Arc::clone(&row)) {
            self.cache_bytes -= previous.storage_size() as u64;
            if !Arc::ptr_eq(&previous, &row) {
                previous.set_in_memory(false);
            }
        }
        self.cache_bytes += size;
        Ok(())
    }

    fn release(&mut self, pos: i64) -> Option<Arc<R>> {
        let row = self.map.remove(pos)?;
        self.cache_bytes -= row.storage_size() as u64;
        row.set_in_memory(false);
        Some(row)
    }

    fn clean_up(&mut self, config: &CacheConfig) -> Result<()> {
        self.map.update_access_counts();

        let resident = self.map.len();
        let remove_count = resident / 2;
        let margin = remove_count / ACCESS_CEILING_TOLERANCE_DIVISOR;
        let access_target = self.map.access_count_ceiling(remove_count, margin);

        let CacheInner {
            map,
            writer,
            row_table,
            cache_bytes,
            counters,
        } = self;

        let mut remaining = remove_count as i64;
        let mut evicted = 0u64;
        let mut cursor = map.cursor();

        while cursor.advance().is_some() {
            let Some(row) = cursor.value().cloned() else {
                continue;
            };
            if cursor.access_count() > access_target {
                continue;
            }

            let mut state = row.state().lock();
            if state.keep_in_memory {
                cursor.set_access_count(access_target + 1);
                continue;
            }

            if state.changed {
                row_table.push(Arc::clone(&row));
            }
            state.in_memory = false;
            cursor.remove();
            drop(state);

            *cache_bytes -= row.storage_size() as u64;
            remaining -= 1;
            evicted += 1;

            if row_table.len() >= config.save_batch_size {
                save_rows(writer, row_table, counters)?;
            }
        }

        map.set_access_count_floor(access_target);
        save_rows(writer, row_table, counters)?;
        map.update_object_access_counts();

        counters.cleanups += 1;
        counters.rows_evicted += evicted;

        debug!(
            resident,
            remove_count,
            access_target,
            evicted,
            shortfall = remaining,
            "row cache cleanup"
        );
        Ok(())
    }

    fn force_clean_up(&mut self) -> usize {
        let mut evicted = 0;
        let mut cursor = self.map.cursor();

        while cursor.advance().is_some() {
            let Some(row) = cursor.value().cloned() else {
                continue;
            };

            let mut state = row.state().lock();
            if state.changed || state.keep_in_memory {
                continue;
            }
            state.in_memory = false;
            cursor.remove();
            drop(state);

            self.cache_bytes -= row.storage_size() as u64;
            evicted += 1;
        }

        self.counters.forced_cleanups += 1;
        self.counters.rows_evicted += evicted as u64;
        debug!(evicted, "row cache forced cleanup");
        evicted
    }

    fn save_all(&mut self, config: &CacheConfig) -> Result<usize> {
        let CacheInner {
            map,
            writer,
            row_table,
            counters,
            ..
        } = self;

        let mut saved = 0;
        for row in map.iter() {
            if !row.has_changed() {
                continue;
            }
            row_table.push(Arc::clone(row));
            if row_table.len() >= config.save_batch_size {
                saved += row_table.len();
                save_rows(writer, row_table, counters)?;
            }
        }
        saved += row_table.len();
        save_rows(writer, row_table, counters)?;

        debug!(saved, "row cache save all");
        Ok(saved)
    }

    fn clear(&mut self) {
        for row in self.map.iter() {
            row.set_in_memory(false);
        }
        self.map.clear();
        self.row_table.clear();
        self.cache_bytes = 0;
        self.counters = Counters::default();
    }
}

/// Sorts `batch` by position, hands it to the writer and clears the changed
/// flags. The batch is emptied whether or not the write succeeds.
fn save_rows<R: CachedObject, W: RowWriter<R>>(
    writer: &mut W,
    batch: &mut Vec<Arc<R>>,
    counters: &mut Counters,
) -> Result<()> {
    if batch.is_empty() {
        return Ok(());
    }

    batch.sort_unstable_by_key(|row| row.pos());

    let started = Instant::now();
    let result = writer.save_rows(batch);
    let elapsed = started.elapsed();
    let count = batch.len();

    if result.is_ok() {
        for row in batch.iter() {
            row.set_changed(false);
        }
        counters.rows_saved += count as u64;
        counters.save_time += elapsed;
    }
    batch.clear();

    result.wrap_err_with(|| format!("failed to save batch of {} rows", count))?;
    trace!(rows = count, elapsed_us = elapsed.as_micros() as u64, "saved row batch");
    Ok(())
}
