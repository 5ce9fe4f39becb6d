//! # Sorted Array Indexes
//!
//! Array-backed sorted lookup structures. [`DoubleLongIndex`] doubles as the
//! old-position to new-position pointer table of the defragmenter.

mod double_index;

pub use double_index::{DoubleIndex, DoubleIntIndex, DoubleLongIndex, IndexValue};
