//! # Base Hash Map
//!
//! A hash map over parallel arrays indexed by slot number:
//!
//! ```text
//! slot:     0      1      2      3
//! keys:   [ 40,    10,    0,     30  ]
//! values: [ Some,  Some,  None,  Some]
//! access: [ 7,     2,     0,     5   ]   (optional)
//! ```
//!
//! Slot numbers and chains come from [`HashIndex`]. Lookups hash the key to a
//! bucket and walk the chain comparing full keys, so two keys that fold to the
//! same `i32` hash (common for `i64` file positions) never alias.
//!
//! ## Access Counting
//!
//! Maps built with [`BaseHashMap::with_access_counts`] stamp every touched
//! slot with a monotonically increasing global counter. The counter is the
//! recency signal for cache eviction:
//!
//! - `access_count_ceiling(target, margin)` finds the stamp at or below which
//!   roughly `target` entries lie.
//! - `set_access_count_floor(floor)` records the last eviction threshold.
//!   Every live entry is above it afterwards.
//! - When the counter approaches `ACCESS_COUNT_MAX` all stamps are shifted
//!   down in one batch (`reset_access_count`).
//!
//! ## Ordered Mode
//!
//! Maps built with [`BaseHashMap::ordered`] iterate in insertion order. A
//! removal shifts all trailing slots down, which is O(n); keep such maps
//! off hot removal paths.

use std::fmt::Debug;

use super::HashIndex;
use crate::config::{ACCESS_COUNT_MAX, ACCESS_RANK_SEGMENTS, HASH_LOAD_FACTOR, MIN_HASH_CAPACITY};

pub trait HashKey: Copy + Eq + Default + Debug {
    fn hash_code(self) -> i32;
}

impl HashKey for i32 {
    fn hash_code(self) -> i32 {
        self
    }
}

impl HashKey for i64 {
    fn hash_code(self) -> i32 {
        let v = self as u64;
        (v ^ (v >> 32)) as u32 as i32
    }
}

#[derive(Debug)]
pub struct BaseHashMap<K: HashKey, V> {
    index: HashIndex,
    keys: Vec<K>,
    values: Vec<Option<V>>,
    access: Option<Vec<i32>>,
    access_count: i32,
    access_min: i32,
    is_list: bool,
    threshold: usize,
}

impl<K: HashKey, V> BaseHashMap<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self::build(capacity, false, false)
    }

    pub fn with_access_counts(capacity: usize) -> Self {
        Self::build(capacity, true, false)
    }

    pub fn ordered(capacity: usize) -> Self {
        Self::build(capacity, false, true)
    }

    fn build(capacity: usize, access_counts: bool, is_list: bool) -> Self {
        let capacity = capacity.max(MIN_HASH_CAPACITY);
        let mut map = Self {
            index: HashIndex::new(capacity, capacity),
            keys: Vec::new(),
            values: Vec::new(),
            access: access_counts.then(Vec::new),
            access_count: 0,
            access_min: 0,
            is_list,
            threshold: 0,
        };
        map.resize_arrays(capacity);
        map
    }

    fn resize_arrays(&mut self, capacity: usize) {
        self.keys.clear();
        self.keys.resize(capacity, K::default());
        self.values.clear();
        self.values.resize_with(capacity, || None);
        if let Some(access) = &mut self.access {
            access.clear();
            access.resize(capacity, 0);
        }
        self.threshold = ((capacity as f32 * HASH_LOAD_FACTOR) as usize).clamp(1, capacity);
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.index.capacity()
    }

    pub fn is_ordered(&self) -> bool {
        self.is_list
    }

    /// Slot holding `key`, or `None`.
    pub fn get_lookup(&self, key: K) -> Option<usize> {
        let bucket = self.index.bucket_of(key.hash_code());
        let mut slot = self.index.first(bucket);

        while let Some(s) = slot {
            if self.keys[s] == key {
                return Some(s);
            }
            slot = self.index.next(s);
        }
        None
    }

    pub fn contains_key(&self, key: K) -> bool {
        self.get_lookup(key).is_some()
    }

    pub fn get(&self, key: K) -> Option<&V> {
        self.get_lookup(key)
            .and_then(|slot| self.values[slot].as_ref())
    }

    /// Lookup that stamps the slot with a fresh access count.
    pub fn get_touch(&mut self, key: K) -> Option<&V> {
        let slot = self.get_lookup(key)?;
        self.touch(slot);
        self.values[slot].as_ref()
    }

    /// Inserts or overwrites, returning the previous value.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        self.add_or_remove(key, Some(value), false)
    }

    pub fn remove(&mut self, key: K) -> Option<V> {
        self.add_or_remove(key, None, true)
    }

    /// Swaps the value of an existing key without touching its access count.
    pub fn replace(&mut self, key: K, value: V) -> Option<V> {
        let slot = self.get_lookup(key)?;
        self.values[slot].replace(value)
    }

    fn add_or_remove(&mut self, key: K, value: Option<V>, remove: bool) -> Option<V> {
        let bucket = self.index.bucket_of(key.hash_code());
        let mut last = None;
        let mut slot = self.index.first(bucket);

        while let Some(s) = slot {
            if self.keys[s] == key {
                if remove {
                    return self.unlink(bucket, last, s);
                }
                let previous = std::mem::replace(&mut self.values[s], value);
                self.touch(s);
                return previous;
            }
            last = Some(s);
            slot = self.index.next(s);
        }

        if remove {
            return None;
        }
        let value = value?;

        if self.index.len() >= self.threshold {
            self.rehash(self.capacity() * 2);
            return self.add_or_remove(key, Some(value), false);
        }

        let s = self.index.link_node(bucket, last);
        self.keys[s] = key;
        self.values[s] = Some(value);
        self.touch(s);
        None
    }

    fn unlink(&mut self, bucket: usize, last: Option<usize>, slot: usize) -> Option<V> {
        self.index.unlink_node(bucket, last, slot);
        let removed = self.values[slot].take();
        self.keys[slot] = K::default();

        if let Some(access) = &mut self.access {
            access[slot] = 0;
        }

        if self.is_list {
            let end = self.index.new_node_pointer();
            self.index.remove_empty_node(slot);
            self.keys[slot..end].rotate_left(1);
            self.values[slot..end].rotate_left(1);
            if let Some(access) = &mut self.access {
                access[slot..end].rotate_left(1);
            }
        }

        removed
    }

    fn remove_slot(&mut self, slot: usize) -> Option<V> {
        let key = self.keys[slot];
        let bucket = self.index.bucket_of(key.hash_code());
        let mut last = None;
        let mut current = self.index.first(bucket);

        while let Some(s) = current {
            if s == slot {
                return self.unlink(bucket, last, s);
            }
            last = Some(s);
            current = self.index.next(s);
        }
        None
    }

    fn rehash(&mut self, new_capacity: usize) {
        let end = self.index.new_node_pointer();
        let mut entries = Vec::with_capacity(self.len());

        for slot in 0..end {
            if let Some(value) = self.values[slot].take() {
                let count = self.access.as_ref().map_or(0, |a| a[slot]);
                entries.push((self.keys[slot], value, count));
            }
        }

        self.index.reset(new_capacity, new_capacity);
        self.resize_arrays(new_capacity);

        for (key, value, count) in entries {
            let bucket = self.index.bucket_of(key.hash_code());
            let mut last = None;
            let mut slot = self.index.first(bucket);
            while let Some(s) = slot {
                last = Some(s);
                slot = self.index.next(s);
            }

            let s = self.index.link_node(bucket, last);
            self.keys[s] = key;
            self.values[s] = Some(value);
            if let Some(access) = &mut self.access {
                access[s] = count;
            }
        }
    }

    pub fn clear(&mut self) {
        self.index.clear();
        self.keys.fill(K::default());
        self.values.iter_mut().for_each(|v| *v = None);
        if let Some(access) = &mut self.access {
            access.fill(0);
        }
        self.access_count = 0;
        self.access_min = 0;
    }

    fn touch(&mut self, slot: usize) {
        if self.access.is_none() {
            return;
        }
        if self.access_count >= ACCESS_COUNT_MAX {
            self.reset_access_count();
        }
        self.access_count += 1;
        if let Some(access) = &mut self.access {
            access[slot] = self.access_count;
        }
    }

    /// Shifts every stamp down so the global counter can keep growing.
    pub fn reset_access_count(&mut self) {
        let shift = self.access_min.max(self.access_count / 2);
        if let Some(access) = &mut self.access {
            for count in access.iter_mut() {
                *count = (*count - shift).max(0);
            }
        }
        self.access_count -= shift;
        self.access_min = (self.access_min - shift).max(0);
    }

    /// Current value of the global access counter.
    pub fn access_count(&self) -> i32 {
        self.access_count
    }

    /// Advances the global counter to at least `count`.
    pub fn raise_access_count(&mut self, count: i32) {
        if count > self.access_count {
            self.access_count = count;
        }
    }

    pub fn access_count_floor(&self) -> i32 {
        self.access_min
    }

    pub fn set_access_count_floor(&mut self, floor: i32) {
        self.access_min = floor;
    }

    pub fn access_count_of(&self, key: K) -> Option<i32> {
        let access = self.access.as_ref()?;
        self.get_lookup(key).map(|slot| access[slot])
    }

    /// Smallest stamp `t` such that at least `target - margin` live entries
    /// have an access count `<= t`.
    ///
    /// The stamps in `[floor, counter]` are bucketed into a fixed number of
    /// segments; the segment holding the `target`-th coldest entry becomes
    /// the new range until it is one stamp wide or the tolerance is met.
    pub fn access_count_ceiling(&self, target: usize, margin: usize) -> i32 {
        let Some(access) = &self.access else {
            return self.access_count;
        };

        let live = || self.live_access_counts(access);

        let mut low = self.access_min as i64;
        let mut high = self.access_count as i64 + 1;
        let mut below = live().filter(|&c| c < low).count();

        if below + margin >= target {
            return low as i32;
        }

        loop {
            let span = high - low;
            if span <= 1 {
                return low as i32;
            }

            let segments = ACCESS_RANK_SEGMENTS as i64;
            let width = (span + segments - 1) / segments;
            let mut histogram = [0usize; ACCESS_RANK_SEGMENTS];
            for c in live().filter(|&c| c >= low && c < high) {
                histogram[((c - low) / width) as usize] += 1;
            }

            for &n in histogram.iter() {
                if low >= high || below + n >= target {
                    break;
                }
                below += n;
                low += width;
            }

            if low >= high {
                return (high - 1) as i32;
            }
            if below + margin >= target {
                return low as i32;
            }
            high = (low + width).min(high);
        }
    }

    fn live_access_counts<'s>(&'s self, access: &'s [i32]) -> impl Iterator<Item = i64> + 's {
        let end = self.index.new_node_pointer();
        (0..end)
            .filter(move |&slot| self.values[slot].is_some())
            .map(move |slot| access[slot] as i64)
    }

    pub fn iter(&self) -> impl Iterator<Item = (K, &V)> + '_ {
        let end = self.index.new_node_pointer();
        self.keys[..end]
            .iter()
            .zip(&self.values[..end])
            .filter_map(|(k, v)| v.as_ref().map(|v| (*k, v)))
    }

    /// Live values paired with their mutable access stamps. Empty for maps
    /// without access counting.
    pub fn access_entries_mut(&mut self) -> impl Iterator<Item = (&V, &mut i32)> + '_ {
        let end = self.index.new_node_pointer();
        let access: &mut [i32] = match &mut self.access {
            Some(access) => &mut access[..end],
            None => &mut [],
        };
        self.values[..end]
            .iter()
            .zip(access.iter_mut())
            .filter_map(|(v, c)| v.as_ref().map(|v| (v, c)))
    }

    pub fn cursor(&mut self) -> Cursor<'_, K, V> {
        Cursor {
            map: self,
            next: 0,
            current: None,
        }
    }
}

/// Slot-order iterator that can read and write the access stamp of the
/// current entry and remove it in place.
pub struct Cursor<'a, K: HashKey, V> {
    map: &'a mut BaseHashMap<K, V>,
    next: usize,
    current: Option<usize>,
}

impl<'a, K: HashKey, V> Cursor<'a, K, V> {
    /// Moves to the next live entry and returns its key.
    pub fn advance(&mut self) -> Option<K> {
        while self.next < self.map.index.new_node_pointer() {
            let slot = self.next;
            self.next += 1;
            if self.map.values[slot].is_some() {
                self.current = Some(slot);
                return Some(self.map.keys[slot]);
            }
        }
        self.current = None;
        None
    }

    pub fn value(&self) -> Option<&V> {
        self.current
            .and_then(|slot| self.map.values[slot].as_ref())
    }

    pub fn access_count(&self) -> i32 {
        match (self.current, &self.map.access) {
            (Some(slot), Some(access)) => access[slot],
            _ => 0,
        }
    }

    pub fn set_access_count(&mut self, count: i32) {
        if let (Some(slot), Some(access)) = (self.current, &mut self.map.access) {
            access[slot] = count;
        }
    }

    /// Removes the current entry. Iteration continues with the entry after it.
    pub fn remove(&mut self) -> Option<V> {
        let slot = self.current.take()?;
        let removed = self.map.remove_slot(slot);
        if self.map.is_list {
            self.next = slot;
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_remove() {
        let mut map: BaseHashMap<i32, &str> = BaseHashMap::new(4);

        assert_eq!(map.insert(1, "a"), None);
        assert_eq!(map.insert(2, "b"), None);
        assert_eq!(map.insert(1, "c"), Some("a"));

        assert_eq!(map.len(), 2);
        assert_eq!(map.get(1), Some(&"c"));
        assert_eq!(map.remove(1), Some("c"));
        assert_eq!(map.remove(1), None);
        assert_eq!(map.get(1), None);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn colliding_long_keys_are_distinguished() {
        let mut map: BaseHashMap<i64, i64> = BaseHashMap::new(4);
        let a = 1i64;
        let b = 1i64 << 32;
        let c = (1i64 << 32) | 1;
        assert_eq!(a.hash_code(), b.hash_code());
        assert_eq!(c.hash_code(), 0);

        map.insert(a, 10);
        map.insert(b, 20);
        map.insert(c, 30);

        assert_eq!(map.get(a), Some(&10));
        assert_eq!(map.get(b), Some(&20));
        assert_eq!(map.get(c), Some(&30));

        map.remove(b);
        assert_eq!(map.get(a), Some(&10));
        assert_eq!(map.get(c), Some(&30));
    }

    #[test]
    fn grows_past_initial_capacity() {
        let mut map: BaseHashMap<i64, i64> = BaseHashMap::new(16);
        for i in 0..1000 {
            map.insert(i * 7, i);
        }

        assert_eq!(map.len(), 1000);
        assert!(map.capacity() >= 1000);
        for i in 0..1000 {
            assert_eq!(map.get(i * 7), Some(&i));
        }
    }

    #[test]
    fn removed_slots_are_reused_without_growth() {
        let mut map: BaseHashMap<i32, i32> = BaseHashMap::new(16);
        for round in 0..10 {
            for i in 0..16 {
                map.insert(round * 100 + i, i);
            }
            for i in 0..16 {
                map.remove(round * 100 + i);
            }
        }
        assert!(map.is_empty());
        assert_eq!(map.capacity(), 16);
    }

    #[test]
    fn ordered_map_keeps_insertion_order_across_removal() {
        let mut map: BaseHashMap<i32, i32> = BaseHashMap::ordered(16);
        for k in [5, 3, 9, 1, 7] {
            map.insert(k, k * 10);
        }

        map.remove(9);
        map.insert(4, 40);

        let keys: Vec<i32> = map.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![5, 3, 1, 7, 4]);
        assert_eq!(map.get(7), Some(&70));
    }

    #[test]
    fn access_stamps_increase_on_touch() {
        let mut map: BaseHashMap<i64, i32> = BaseHashMap::with_access_counts(16);
        map.insert(10, 1);
        map.insert(20, 2);
        assert_eq!(map.access_count_of(10), Some(1));
        assert_eq!(map.access_count_of(20), Some(2));

        map.get_touch(10);
        assert_eq!(map.access_count_of(10), Some(3));
        assert_eq!(map.access_count(), 3);

        map.get(20);
        assert_eq!(map.access_count_of(20), Some(2));
    }

    #[test]
    fn replace_keeps_access_stamp() {
        let mut map: BaseHashMap<i64, i32> = BaseHashMap::with_access_counts(16);
        map.insert(10, 1);
        map.insert(20, 2);

        assert_eq!(map.replace(10, 11), Some(1));
        assert_eq!(map.replace(30, 3), None);
        assert_eq!(map.access_count_of(10), Some(1));
        assert_eq!(map.get(10), Some(&11));
    }

    #[test]
    fn ceiling_selects_coldest_entries() {
        let mut map: BaseHashMap<i64, i32> = BaseHashMap::with_access_counts(16);
        for pos in [10, 20, 30, 40] {
            map.insert(pos, 0);
        }

        assert_eq!(map.access_count_ceiling(2, 0), 2);
        assert_eq!(map.access_count_ceiling(1, 0), 1);
        assert_eq!(map.access_count_ceiling(4, 0), 4);
        assert_eq!(map.access_count_ceiling(10, 0), 4);
    }

    #[test]
    fn ceiling_respects_floor_and_margin() {
        let mut map: BaseHashMap<i64, i32> = BaseHashMap::with_access_counts(64);
        for pos in 0..40 {
            map.insert(pos, 0);
        }
        map.set_access_count_floor(10);

        let target = map.access_count_ceiling(10, 0);
        assert_eq!(target, 10);

        assert_eq!(map.access_count_ceiling(20, 5), 20);
    }

    #[test]
    fn ceiling_tolerance_bounds_selection() {
        let mut map: BaseHashMap<i64, i32> = BaseHashMap::with_access_counts(1024);
        for pos in 0..1000 {
            map.insert(pos, 0);
        }

        let ceiling = map.access_count_ceiling(500, 100);
        assert!((400..=500).contains(&ceiling), "ceiling {ceiling}");
    }

    #[test]
    fn ceiling_over_wide_range_narrows_to_exact_stamp() {
        let mut map: BaseHashMap<i64, i32> = BaseHashMap::with_access_counts(1024);
        for pos in 0..1000 {
            map.insert(pos, 0);
        }
        for _ in 0..100_000 {
            map.get_touch(999);
        }

        assert_eq!(map.access_count_ceiling(500, 0), 500);
    }

    #[test]
    fn reset_shifts_stamps_below_floor_to_zero() {
        let mut map: BaseHashMap<i64, i32> = BaseHashMap::with_access_counts(16);
        for pos in 0..4 {
            map.insert(pos, 0);
        }
        map.set_access_count_floor(2);
        map.reset_access_count();

        assert_eq!(map.access_count(), 2);
        assert_eq!(map.access_count_floor(), 0);
        assert_eq!(map.access_count_of(0), Some(0));
        assert_eq!(map.access_count_of(3), Some(2));
    }

    #[test]
    fn cursor_removes_during_iteration() {
        let mut map: BaseHashMap<i64, i64> = BaseHashMap::with_access_counts(16);
        for pos in 0..10 {
            map.insert(pos, pos);
        }

        let mut cursor = map.cursor();
        let mut seen = 0;
        while let Some(key) = cursor.advance() {
            seen += 1;
            if key % 2 == 0 {
                assert_eq!(cursor.remove(), Some(key));
            } else {
                cursor.set_access_count(100);
            }
        }

        assert_eq!(seen, 10);
        assert_eq!(map.len(), 5);
        assert_eq!(map.access_count_of(3), Some(100));
        assert!(map.get(4).is_none());
    }

    #[test]
    fn cursor_on_ordered_map_visits_every_entry() {
        let mut map: BaseHashMap<i32, i32> = BaseHashMap::ordered(16);
        for k in 0..6 {
            map.insert(k, k);
        }

        let mut cursor = map.cursor();
        let mut visited = Vec::new();
        while let Some(key) = cursor.advance() {
            visited.push(key);
            if key < 3 {
                cursor.remove();
            }
        }

        assert_eq!(visited, vec![0, 1, 2, 3, 4, 5]);
        let keys: Vec<i32> = map.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![3, 4, 5]);
    }

    #[test]
    fn clear_resets_counters() {
        let mut map: BaseHashMap<i64, i32> = BaseHashMap::with_access_counts(16);
        map.insert(1, 1);
        map.set_access_count_floor(1);
        map.clear();

        assert!(map.is_empty());
        assert_eq!(map.access_count(), 0);
        assert_eq!(map.access_count_floor(), 0);
        assert_eq!(map.get(1), None);
    }
}
