//! # Cached Object Contract
//!
//! Anything the row cache holds implements [`CachedObject`]: it knows its
//! disk position (the cache key), its exact storage size, and how to
//! serialize itself. Mutable bookkeeping lives in an [`ObjectState`] behind
//! the object's own lock, which is the per-row lock of the eviction sweep.
//!
//! ## Lock Order
//!
//! The cache takes its structural lock first and a row's state lock second,
//! never the reverse. Code holding a row's state lock must not call into the
//! cache.

use std::sync::Arc;

use eyre::Result;
use parking_lot::Mutex;

use crate::row_io::{RowInput, RowOutput};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObjectState {
    /// Unsaved changes relative to the on-disk image.
    pub changed: bool,
    /// Currently resident in a cache.
    pub in_memory: bool,
    /// Pinned: never evicted by a cleanup.
    pub keep_in_memory: bool,
    pub access_count: i32,
}

/// Old-position to new-position translation used while rewriting a file.
pub trait PositionLookup {
    fn lookup(&self, pos: i64) -> Option<i64>;
}

pub trait CachedObject: Send + Sync {
    /// Disk position. Stable while the object is cache-resident.
    fn pos(&self) -> i64;

    /// Exact byte length of the serialized form, padding included.
    fn storage_size(&self) -> u32;

    fn state(&self) -> &Mutex<ObjectState>;

    /// Byte length `write` will produce; equals `storage_size` once written.
    fn real_size(&self) -> u32;

    fn write(&self, out: &mut RowOutput) -> Result<()>;

    /// Writes with every stored position rewritten through `lookup`.
    fn write_translated(&self, out: &mut RowOutput, lookup: &dyn PositionLookup) -> Result<()>;

    fn has_changed(&self) -> bool {
        self.state().lock().changed
    }

    fn set_changed(&self, changed: bool) {
        self.state().lock().changed = changed;
    }

    fn is_in_memory(&self) -> bool {
        self.state().lock().in_memory
    }

    fn set_in_memory(&self, in_memory: bool) {
        self.state().lock().in_memory = in_memory;
    }

    fn is_keep_in_memory(&self) -> bool {
        self.state().lock().keep_in_memory
    }

    fn set_keep_in_memory(&self, keep: bool) {
        self.state().lock().keep_in_memory = keep;
    }

    fn access_count(&self) -> i32 {
        self.state().lock().access_count
    }

    /// Raises the object's access count to `count` if it is lower.
    fn update_access_count(&self, count: i32) {
        let mut state = self.state().lock();
        if count > state.access_count {
            state.access_count = count;
        }
    }

    fn set_access_count(&self, count: i32) {
        self.state().lock().access_count = count;
    }
}

/// A cached object that can be materialized from its on-disk image.
pub trait PersistentRow: CachedObject + Sized {
    fn read(pos: i64, input: &mut RowInput<'_>) -> Result<Self>;
}

/// Backing store write path. `rows` arrive sorted by ascending position and
/// each must be persisted at its own position. Errors propagate unretried.
pub trait RowWriter<R> {
    fn save_rows(&mut self, rows: &[Arc<R>]) -> Result<()>;
}
