//! # Row Cache Module
//!
//! Decides which rows live in memory and when they are written back.
//!
//! ```text
//! RowCache<R, W>
//! ├── Mutex<CacheInner>
//! │   ├── ObjectCacheMap<R>      position -> Arc<R>, per-slot access stamps
//! │   ├── W: RowWriter<R>        backing store write path
//! │   ├── row_table              reusable save batch
//! │   └── byte total, counters
//! └── CacheConfig                row and byte budgets
//! ```
//!
//! ## Module Organization
//!
//! - `object`: The [`CachedObject`] contract and backing store traits
//! - `object_map`: [`ObjectCacheMap`], the access-stamped position map
//! - `row_cache`: [`RowCache`], budgets, eviction and write-back

mod object;
mod object_map;
mod row_cache;

pub use object::{CachedObject, ObjectState, PersistentRow, PositionLookup, RowWriter};
pub use object_map::ObjectCacheMap;
pub use row_cache::{CacheStats, RowCache};
