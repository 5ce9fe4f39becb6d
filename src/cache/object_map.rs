//! # Object Cache Map
//!
//! [`BaseHashMap`] specialized for cached rows: keyed by disk position,
//! values are shared `Arc<R>` handles, access stamps always enabled.
//!
//! ## Access Count Synchronization
//!
//! Callers holding an `Arc<R>` can advance the object's own access count
//! without going through the cache (`CachedObject::update_access_count`).
//! Before an eviction decision the object counts are folded into the slot
//! stamps (`update_access_counts`), and afterwards the slot stamps, including
//! any pin bumps made by the sweep, are pushed back into the objects
//! (`update_object_access_counts`). The push assigns, so an object never
//! keeps a count from before a rescale.
//!
//! A lookup or insert that would take the global counter past
//! `ACCESS_COUNT_MAX` rescales first, with a full sync on either side, so
//! object counts and stamps shift together.

use std::sync::Arc;

use super::CachedObject;
use crate::config::ACCESS_COUNT_MAX;
use crate::hash::{BaseHashMap, Cursor};

pub struct ObjectCacheMap<R: CachedObject> {
    map: BaseHashMap<i64, Arc<R>>,
}

impl<R: CachedObject> ObjectCacheMap<R> {
    pub fn new(capacity: usize) -> Self {
        Self {
            map: BaseHashMap::with_access_counts(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Lookup that stamps the entry as just accessed.
    pub fn get(&mut self, pos: i64) -> Option<Arc<R>> {
        if !self.map.contains_key(pos) {
            return None;
        }
        self.rescale_if_saturated();
        self.map.get_touch(pos).cloned()
    }

    pub fn peek(&self, pos: i64) -> Option<&Arc<R>> {
        self.map.get(pos)
    }

    pub fn contains(&self, pos: i64) -> bool {
        self.map.contains_key(pos)
    }

    pub fn put(&mut self, row: Arc<R>) -> Option<Arc<R>> {
        self.rescale_if_saturated();
        self.map.insert(row.pos(), row)
    }

    pub fn remove(&mut self, pos: i64) -> Option<Arc<R>> {
        self.map.remove(pos)
    }

    pub fn replace(&mut self, row: Arc<R>) -> Option<Arc<R>> {
        self.map.replace(row.pos(), row)
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<R>> + '_ {
        self.map.iter().map(|(_, row)| row)
    }

    pub fn cursor(&mut self) -> Cursor<'_, i64, Arc<R>> {
        self.map.cursor()
    }

    /// Object access counts -> slot stamps.
    pub fn update_access_counts(&mut self) {
        let mut highest = 0;
        for (row, stamp) in self.map.access_entries_mut() {
            let count = row.access_count();
            if count > *stamp {
                *stamp = count;
            }
            highest = highest.max(*stamp);
        }
        self.map.raise_access_count(highest);
    }

    /// Slot stamps -> object access counts.
    pub fn update_object_access_counts(&mut self) {
        for (row, stamp) in self.map.access_entries_mut() {
            row.set_access_count(*stamp);
        }
    }

    fn rescale_if_saturated(&mut self) {
        if self.map.access_count() < ACCESS_COUNT_MAX {
            return;
        }
        self.update_access_counts();
        self.map.reset_access_count();
        self.update_object_access_counts();
    }

    pub fn access_count_ceiling(&self, target: usize, margin: usize) -> i32 {
        self.map.access_count_ceiling(target, margin)
    }

    pub fn set_access_count_floor(&mut self, floor: i32) {
        self.map.set_access_count_floor(floor);
    }

    pub fn access_count(&self) -> i32 {
        self.map.access_count()
    }

    pub fn access_count_floor(&self) -> i32 {
        self.map.access_count_floor()
    }

    pub fn access_count_of(&self, pos: i64) -> Option<i32> {
        self.map.access_count_of(pos)
    }
}
