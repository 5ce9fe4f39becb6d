//! # Configuration Constants
//!
//! This module centralizes all numeric configuration values, grouping
//! interdependent values together and documenting their relationships.
//!
//! ## Dependency Graph
//!
//! ```text
//! DEFAULT_ROW_CAPACITY (50,000 rows)
//!       │
//!       └─> DEFAULT_SAVE_BATCH_SIZE (must be <=)
//!             The save batch is a scratch array reused by every cleanup.
//!             A batch larger than the cache can never fill.
//!
//! DATA_FILE_HEADER_SIZE (64 bytes)
//!       │
//!       ├─> HEADER_FREE_POS_OFFSET (24, u64 word)
//!       ├─> HEADER_FLAGS_OFFSET (32, u32 word)
//!       │
//!       └─> DEFAULT_INITIAL_FREE_POS (must be >=)
//!             First row is written after the header region.
//!
//! DEFAULT_DATA_FILE_SCALE (8)
//!       │
//!       └─> DEFAULT_INITIAL_FREE_POS (must be a multiple)
//!             Positions are byte offsets divided by the scale.
//! ```
//!
//! ## Critical Invariants
//!
//! Enforced by compile-time assertions:
//!
//! 1. `DEFAULT_SAVE_BATCH_SIZE <= DEFAULT_ROW_CAPACITY`
//! 2. `DEFAULT_INITIAL_FREE_POS >= DATA_FILE_HEADER_SIZE`
//! 3. `DEFAULT_INITIAL_FREE_POS % DEFAULT_DATA_FILE_SCALE == 0`
//! 4. `FILE_END_ALIGNMENT` is a power of two

// ============================================================================
// ROW CACHE CONFIGURATION
// ============================================================================

/// Default maximum number of cache-resident rows.
pub const DEFAULT_ROW_CAPACITY: usize = 50_000;

/// Default maximum total storage size of cache-resident rows (64MB).
pub const DEFAULT_BYTES_CAPACITY: u64 = 64 * 1024 * 1024;

/// Number of dirty rows staged before a sorted batch is handed to the writer.
pub const DEFAULT_SAVE_BATCH_SIZE: usize = 1024;

/// Smallest row capacity a cache may be configured with.
pub const MIN_ROW_CAPACITY: usize = 2;

/// Divisor applied to the eviction target to get the ceiling tolerance.
pub const ACCESS_CEILING_TOLERANCE_DIVISOR: usize = 8;

const _: () = assert!(
    DEFAULT_SAVE_BATCH_SIZE <= DEFAULT_ROW_CAPACITY,
    "DEFAULT_SAVE_BATCH_SIZE must be <= DEFAULT_ROW_CAPACITY"
);

// ============================================================================
// HASH MAP CONFIGURATION
// ============================================================================

/// Load factor at which the hash map doubles its slot arrays.
pub const HASH_LOAD_FACTOR: f32 = 1.0;

/// Minimum number of buckets/slots allocated by a hash map.
pub const MIN_HASH_CAPACITY: usize = 16;

/// Global access counter value that triggers a batched rescale of all
/// per-slot counts.
pub const ACCESS_COUNT_MAX: i32 = i32::MAX - (i32::MAX >> 20);

/// Number of histogram segments used by the access-count ceiling search.
pub const ACCESS_RANK_SEGMENTS: usize = 256;

// ============================================================================
// DATA FILE LAYOUT
// ============================================================================

/// Size of the fixed data file header.
pub const DATA_FILE_HEADER_SIZE: usize = 64;

/// Byte offset of the u64 free-position word.
pub const HEADER_FREE_POS_OFFSET: usize = 24;

/// Byte offset of the u32 flags word.
pub const HEADER_FLAGS_OFFSET: usize = 32;

/// Default divisor converting byte offsets to row positions.
pub const DEFAULT_DATA_FILE_SCALE: u32 = 8;

/// Default offset of the first row, in bytes.
pub const DEFAULT_INITIAL_FREE_POS: u64 = 64;

/// The file length is padded to a multiple of this after defragmentation.
pub const FILE_END_ALIGNMENT: u64 = 4096;

/// Bytes the mapping grows by when an allocation runs past the end.
pub const FILE_GROWTH_INCREMENT: u64 = 1024 * 1024;

const _: () = assert!(
    DEFAULT_INITIAL_FREE_POS >= DATA_FILE_HEADER_SIZE as u64,
    "first row would overlap the file header"
);

const _: () = assert!(
    DEFAULT_INITIAL_FREE_POS % DEFAULT_DATA_FILE_SCALE as u64 == 0,
    "initial free position must be addressable at the default scale"
);

const _: () = assert!(
    FILE_END_ALIGNMENT.is_power_of_two(),
    "FILE_END_ALIGNMENT must be a power of two"
);

const _: () = assert!(
    HEADER_FLAGS_OFFSET + 4 <= DATA_FILE_HEADER_SIZE,
    "flags word lies outside the header"
);

// ============================================================================
// DEFRAGMENTATION
// ============================================================================

/// Largest total row count the pointer table can address.
pub const MAX_DEFRAG_ROWS: u64 = (i32::MAX / 2) as u64;

/// Position value meaning "no row": an empty index root or an unset link.
pub const NIL_POS: i64 = -1;

// ============================================================================
// DATA FILE FLAGS
// ============================================================================

/// Set by a clean close, cleared again when the file is opened.
pub const FLAG_SAVED: u32 = 1;

/// Set on files written by the defragmenter.
pub const FLAG_DEFRAGMENTED: u32 = 1 << 1;

const _: () = assert!(
    FLAG_SAVED & FLAG_DEFRAGMENTED == 0,
    "data file flags must be distinct bits"
);
