//! # rowcache - Disk-Backed Row Cache
//!
//! An in-memory cache of database rows keyed by their position in a data
//! file, bounded by both a row count and a total byte size, plus the
//! defragmenter that compacts the data file underneath it.
//!
//! ## Quick Start
//!
//! ```ignore
//! use rowcache::{CacheConfig, CachedObject, DataFileCache, DataFileConfig, DiskRow, NIL_POS};
//!
//! let config = DataFileConfig::default().with_cache(CacheConfig::new(10_000, 16 << 20));
//! let store = DataFileCache::<DiskRow>::create("rows.data", config)?;
//!
//! let size = DiskRow::storage_size_for(1, 5, config.scale);
//! let row = store.add(size, |pos| DiskRow::new(pos, &[NIL_POS], b"hello", config.scale))?;
//!
//! let same = store.get(row.pos())?;
//! store.save_all()?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │     DataFileCache (fault-in, add)    │
//! ├──────────────────┬──────────────────┤
//! │     RowCache     │   Defragmenter   │
//! │  eviction, save  │  pointer table   │
//! ├──────────────────┼──────────────────┤
//! │  ObjectCacheMap  │  DoubleLongIndex │
//! │  BaseHashMap     │                  │
//! ├──────────────────┴──────────────────┤
//! │   DataFile (mmap) + DiskRow codec    │
//! └─────────────────────────────────────┘
//! ```
//!
//! ## Module Overview
//!
//! - [`cache`]: Row cache, eviction and write-back
//! - [`hash`]: Slot-indexed hash map with access stamps
//! - [`index`]: Sorted key/value arrays, the defrag pointer table
//! - [`storage`]: Data file, disk row, data file cache, defragmenter
//! - [`config`]: Budgets, file layout and constants
//! - [`error`]: Typed errors carried inside `eyre` reports

pub mod cache;
pub mod config;
pub mod error;
pub mod hash;
pub mod index;
pub mod row_io;
pub mod storage;

pub use cache::{CacheStats, CachedObject, PersistentRow, PositionLookup, RowCache, RowWriter};
pub use config::{CacheConfig, DataFileConfig, NIL_POS};
pub use error::{store_error, StoreError};
pub use index::{DoubleIntIndex, DoubleLongIndex};
pub use storage::{
    ClusteredTable, DataFile, DataFileCache, DefragResult, Defragmenter, DiskRow,
};
