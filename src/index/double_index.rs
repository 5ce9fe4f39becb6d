//! # Sorted Key/Value Index
//!
//! `DoubleIndex` is a flat array of `(key, value)` pairs that is searched by
//! binary search once sorted. It is used for bulk remapping tables where the
//! entries arrive in arbitrary order, are sorted once, and are then only
//! looked up:
//!
//! ```text
//! add_unsorted(540, 140)   entries: [(540,140)]
//! add_unsorted(500, 100)   entries: [(540,140), (500,100)]      sorted = false
//! add_unsorted(520, 120)   entries: [(540,140), (500,100), (520,120)]
//! sort()                   entries: [(500,100), (520,120), (540,140)]
//! lookup(520)              -> Some(120)
//! lookup(530)              -> None
//! ```
//!
//! ## Interval Compaction
//!
//! When consecutive keys map to consecutive values with the same offset, the
//! run can be stored as a single entry. `compact_lookup_as_intervals` folds
//! such runs, after which `lookup_interval` answers for any key inside a
//! run: `value(i) + (key - key(i))` for the last entry with `key(i) <= key`.
//! Exact membership is lost by compaction, so `lookup` must not be used on
//! a compacted index.
//!
//! ## Fixed Size Mode
//!
//! A fixed-size index never grows past the capacity given at construction;
//! `add*` returns `false` when full. The allocation is made up front, and
//! `try_with_capacity` reports the requested byte count if it fails.

use std::fmt::Debug;
use std::ops::{Add, Sub};

use crate::cache::PositionLookup;
use crate::error::StoreError;

pub trait IndexValue:
    Copy + Ord + Default + Debug + Add<Output = Self> + Sub<Output = Self> + Send + Sync + 'static
{
}

impl IndexValue for i32 {}
impl IndexValue for i64 {}

#[derive(Debug, Clone)]
pub struct DoubleIndex<T: IndexValue> {
    entries: Vec<(T, T)>,
    capacity: usize,
    fixed_size: bool,
    sorted: bool,
}

pub type DoubleIntIndex = DoubleIndex<i32>;
pub type DoubleLongIndex = DoubleIndex<i64>;

impl<T: IndexValue> DoubleIndex<T> {
    pub fn new(capacity: usize, fixed_size: bool) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
            fixed_size,
            sorted: true,
        }
    }

    /// Like [`DoubleIndex::new`] but reports allocation failure instead of
    /// aborting.
    pub fn try_with_capacity(capacity: usize, fixed_size: bool) -> Result<Self, StoreError> {
        let requested = capacity.saturating_mul(std::mem::size_of::<(T, T)>());
        let mut entries = Vec::new();
        entries
            .try_reserve_exact(capacity)
            .map_err(|_| StoreError::OutOfMemory { requested })?;

        Ok(Self {
            entries,
            capacity,
            fixed_size,
            sorted: true,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    pub fn is_full(&self) -> bool {
        self.fixed_size && self.entries.len() >= self.capacity
    }

    pub fn key(&self, i: usize) -> T {
        self.entries[i].0
    }

    pub fn value(&self, i: usize) -> T {
        self.entries[i].1
    }

    pub fn set_value(&mut self, i: usize, value: T) {
        self.entries[i].1 = value;
    }

    pub fn iter(&self) -> impl Iterator<Item = (T, T)> + '_ {
        self.entries.iter().copied()
    }

    fn ensure_room(&mut self) -> bool {
        if self.entries.len() < self.capacity {
            return true;
        }
        if self.fixed_size {
            return false;
        }
        self.capacity = (self.capacity * 2).max(8);
        self.entries.reserve(self.capacity - self.entries.len());
        true
    }

    /// Appends without keeping order. Call [`DoubleIndex::sort`] before
    /// searching.
    pub fn add_unsorted(&mut self, key: T, value: T) -> bool {
        if !self.ensure_room() {
            return false;
        }

        if let Some(&(last, _)) = self.entries.last() {
            if key < last {
                self.sorted = false;
            }
        }

        self.entries.push((key, value));
        true
    }

    /// Sorted insert after any entries with an equal key.
    pub fn add(&mut self, key: T, value: T) -> bool {
        if !self.ensure_room() {
            return false;
        }
        self.sort();

        let at = self.entries.partition_point(|&(k, _)| k <= key);
        self.entries.insert(at, (key, value));
        true
    }

    /// Sorted insert that refuses a key already present.
    pub fn add_unique(&mut self, key: T, value: T) -> bool {
        self.sort();

        let at = self.find_first_greater_equal_key_index(key);
        if at < self.entries.len() && self.entries[at].0 == key {
            return false;
        }
        if !self.ensure_room() {
            return false;
        }

        self.entries.insert(at, (key, value));
        true
    }

    pub fn sort(&mut self) {
        if self.sorted {
            return;
        }
        self.entries.sort_unstable_by_key(|&(k, _)| k);
        self.sorted = true;
    }

    /// Index of the first entry with `key`, or `None`.
    pub fn find_first_equal_key_index(&self, key: T) -> Option<usize> {
        if !self.sorted {
            return self.entries.iter().position(|&(k, _)| k == key);
        }

        let i = self.find_first_greater_equal_key_index(key);
        (i < self.entries.len() && self.entries[i].0 == key).then_some(i)
    }

    /// Index of the first entry whose key is `>= key`; `len()` if none.
    pub fn find_first_greater_equal_key_index(&self, key: T) -> usize {
        debug_assert!(self.sorted, "binary search on unsorted index");
        self.entries.partition_point(|&(k, _)| k < key)
    }

    pub fn lookup(&self, key: T) -> Option<T> {
        self.find_first_equal_key_index(key)
            .map(|i| self.entries[i].1)
    }

    /// Folds runs of entries that share the same `value - key` offset into
    /// their first entry. Returns whether any entry was removed.
    pub fn compact_lookup_as_intervals(&mut self) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        self.sort();

        let mut base = 0;
        for i in 1..self.entries.len() {
            let (base_key, base_value) = self.entries[base];
            let (key, value) = self.entries[i];

            if base_key + (value - base_value) != key {
                base += 1;
                self.entries[base] = (key, value);
            }
        }

        let compacted = base + 1 != self.entries.len();
        self.entries.truncate(base + 1);
        compacted
    }

    /// Lookup against an interval-compacted index.
    pub fn lookup_interval(&self, key: T) -> Option<T> {
        let upper = self.entries.partition_point(|&(k, _)| k <= key);
        if upper == 0 {
            return None;
        }

        let (base_key, base_value) = self.entries[upper - 1];
        Some(base_value + (key - base_key))
    }

    pub fn remove(&mut self, i: usize) -> (T, T) {
        self.entries.remove(i)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.sorted = true;
    }
}

impl PositionLookup for DoubleIndex<i64> {
    fn lookup(&self, pos: i64) -> Option<i64> {
        DoubleIndex::lookup(self, pos)
    }
}
