//! # Array-Backed Hash Maps
//!
//! Open hashing over flat arrays: bucket heads and collision chains are slot
//! numbers, never pointers. [`HashIndex`] owns the chain structure and slot
//! allocation; [`BaseHashMap`] layers keys, values and optional per-slot
//! access stamps on top of it.

mod base_map;
mod hash_index;

pub use base_map::{BaseHashMap, Cursor, HashKey};
pub use hash_index::HashIndex;
