//! # Configuration Module
//!
//! Centralizes configuration constants and the runtime configuration structs
//! for the row cache and the data file.
//!
//! ## Module Organization
//!
//! - [`constants`]: All numeric configuration values with dependency documentation
//! - [`CacheConfig`]: Row-count and byte-size budget of a [`crate::cache::RowCache`]
//! - [`DataFileConfig`]: File layout parameters plus the cache budget

pub mod constants;
pub use constants::*;

use eyre::{ensure, Result};

/// Capacity settings supplied by the table/store layer when a cache is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    pub row_capacity: usize,
    pub bytes_capacity: u64,
    pub save_batch_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            row_capacity: DEFAULT_ROW_CAPACITY,
            bytes_capacity: DEFAULT_BYTES_CAPACITY,
            save_batch_size: DEFAULT_SAVE_BATCH_SIZE,
        }
    }
}

impl CacheConfig {
    pub fn new(row_capacity: usize, bytes_capacity: u64) -> Self {
        Self {
            row_capacity,
            bytes_capacity,
            save_batch_size: DEFAULT_SAVE_BATCH_SIZE.min(row_capacity.max(1)),
        }
    }

    pub fn with_row_capacity(mut self, rows: usize) -> Self {
        self.row_capacity = rows;
        self
    }

    pub fn with_bytes_capacity(mut self, bytes: u64) -> Self {
        self.bytes_capacity = bytes;
        self
    }

    pub fn with_save_batch_size(mut self, rows: usize) -> Self {
        self.save_batch_size = rows;
        self
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.row_capacity >= MIN_ROW_CAPACITY,
            "row capacity {} must be at least {}",
            self.row_capacity,
            MIN_ROW_CAPACITY
        );
        ensure!(self.bytes_capacity > 0, "byte capacity must be non-zero");
        ensure!(
            self.save_batch_size > 0,
            "save batch size must be non-zero"
        );
        Ok(())
    }
}

/// Layout of a data file and the budget of the cache in front of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataFileConfig {
    /// Divisor from byte offset to row position.
    pub scale: u32,
    /// Byte offset of the first row; everything before it is header.
    pub initial_free_pos: u64,
    pub cache: CacheConfig,
}

impl Default for DataFileConfig {
    fn default() -> Self {
        Self {
            scale: DEFAULT_DATA_FILE_SCALE,
            initial_free_pos: DEFAULT_INITIAL_FREE_POS,
            cache: CacheConfig::default(),
        }
    }
}

impl DataFileConfig {
    pub fn with_scale(mut self, scale: u32) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_initial_free_pos(mut self, offset: u64) -> Self {
        self.initial_free_pos = offset;
        self
    }

    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.scale > 0 && self.scale.is_power_of_two(),
            "data file scale {} must be a power of two",
            self.scale
        );
        ensure!(
            self.initial_free_pos >= DATA_FILE_HEADER_SIZE as u64,
            "initial free position {} overlaps the {}-byte header",
            self.initial_free_pos,
            DATA_FILE_HEADER_SIZE
        );
        ensure!(
            self.initial_free_pos % self.scale as u64 == 0,
            "initial free position {} is not a multiple of scale {}",
            self.initial_free_pos,
            self.scale
        );
        self.cache.validate()
    }
}
