//! # Storage Module
//!
//! The on-disk side of the row cache: a memory-mapped data file, the concrete
//! row type stored in it, the cache that fronts it, and the defragmenter that
//! compacts it.
//!
//! ## File Layout
//!
//! ```text
//! rows.data
//! ├── header (64 bytes)      magic, version, scale, free position, flags
//! ├── reserved               up to initial_free_pos
//! └── rows                   back to back, each padded to the scale
//! ```
//!
//! A row position is its byte offset divided by the file's scale. Positions
//! are what the cache is keyed on and what rows use to link to each other.
//!
//! ## Safety Model
//!
//! Row reads return `&[u8]` slices straight out of the mapping. Growing the
//! file remaps it, which needs `&mut DataFile`, so the borrow checker rules
//! out a slice outliving a remap.
//!
//! ## Module Organization
//!
//! - `header`: [`DataFileHeader`] zerocopy layout
//! - `data_file`: [`DataFile`], mmap growth, allocation, row reads and writes
//! - `row`: [`DiskRow`], links plus payload
//! - `data_file_cache`: [`DataFileCache`], fault-in and write-back through a
//!   [`crate::cache::RowCache`]
//! - `defrag`: [`Defragmenter`], two-pass compaction and root translation

mod data_file;
mod data_file_cache;
mod defrag;
mod header;
mod row;

pub use data_file::DataFile;
pub use data_file_cache::DataFileCache;
pub use defrag::{ClusteredTable, DefragResult, Defragmenter};
pub use header::{DataFileHeader, CURRENT_VERSION, DATA_FILE_MAGIC};
pub use row::DiskRow;
