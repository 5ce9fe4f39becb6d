//! # Array-Linked Hash Index
//!
//! The structural half of [`super::BaseHashMap`]: bucket heads and collision
//! chains expressed as `i32` slot numbers into flat arrays instead of
//! pointers. The map keeps its keys, values and access counts in arrays
//! parallel to the slot numbers handed out here.
//!
//! ```text
//! buckets:  [ 3, -1,  0, -1 ]          bucket -> first slot
//! links:    [ 2, -1, -1, -1, ... ]     slot   -> next slot in chain
//!
//! bucket 0: slot 3
//! bucket 2: slot 0 -> slot 2
//! ```
//!
//! ## Slot Allocation
//!
//! Slots are handed out from `new_node_pointer` (the high-water mark) unless
//! a previously unlinked slot is waiting on the free list. The free list is
//! threaded through `links` as well, with `reclaimed_node_pointer` as head.
//!
//! Ordered maps never reuse slots; they call [`HashIndex::remove_empty_node`]
//! right after unlinking, which pops the slot from the free list and shifts
//! every higher slot number down by one.

const NONE: i32 = -1;

#[inline]
fn to_slot(link: i32) -> Option<usize> {
    (link >= 0).then_some(link as usize)
}

#[derive(Debug, Clone)]
pub struct HashIndex {
    buckets: Vec<i32>,
    links: Vec<i32>,
    new_node_pointer: usize,
    element_count: usize,
    reclaimed_node_pointer: i32,
}

impl HashIndex {
    pub fn new(bucket_count: usize, capacity: usize) -> Self {
        Self {
            buckets: vec![NONE; bucket_count.max(1)],
            links: vec![NONE; capacity],
            new_node_pointer: 0,
            element_count: 0,
            reclaimed_node_pointer: NONE,
        }
    }

    /// Discards all chains and resizes both tables.
    pub fn reset(&mut self, bucket_count: usize, capacity: usize) {
        *self = Self::new(bucket_count, capacity);
    }

    pub fn clear(&mut self) {
        self.buckets.fill(NONE);
        self.links.fill(NONE);
        self.new_node_pointer = 0;
        self.element_count = 0;
        self.reclaimed_node_pointer = NONE;
    }

    pub fn len(&self) -> usize {
        self.element_count
    }

    pub fn is_empty(&self) -> bool {
        self.element_count == 0
    }

    pub fn capacity(&self) -> usize {
        self.links.len()
    }

    /// One past the highest slot ever handed out.
    pub fn new_node_pointer(&self) -> usize {
        self.new_node_pointer
    }

    pub fn bucket_of(&self, hash: i32) -> usize {
        ((hash & 0x7fff_ffff) as usize) % self.buckets.len()
    }

    pub fn first(&self, bucket: usize) -> Option<usize> {
        to_slot(self.buckets[bucket])
    }

    pub fn next(&self, slot: usize) -> Option<usize> {
        to_slot(self.links[slot])
    }

    /// Allocates a slot and appends it to the chain of `bucket` after `last`
    /// (the current tail, or `None` if the chain is empty).
    pub fn link_node(&mut self, bucket: usize, last: Option<usize>) -> usize {
        let slot = match to_slot(self.reclaimed_node_pointer) {
            Some(slot) => {
                self.reclaimed_node_pointer = self.links[slot];
                slot
            }
            None => {
                let slot = self.new_node_pointer;
                debug_assert!(slot < self.links.len(), "hash index out of slots");
                self.new_node_pointer += 1;
                slot
            }
        };

        self.links[slot] = NONE;
        match last {
            Some(prev) => self.links[prev] = slot as i32,
            None => self.buckets[bucket] = slot as i32,
        }

        self.element_count += 1;
        slot
    }

    /// Removes `slot` from the chain of `bucket`; `last` is its predecessor
    /// in that chain. The slot goes onto the free list.
    pub fn unlink_node(&mut self, bucket: usize, last: Option<usize>, slot: usize) {
        let next = self.links[slot];
        match last {
            Some(prev) => self.links[prev] = next,
            None => self.buckets[bucket] = next,
        }

        self.links[slot] = self.reclaimed_node_pointer;
        self.reclaimed_node_pointer = slot as i32;
        self.element_count -= 1;
    }

    /// Compacts away a slot that was just unlinked, renumbering every higher
    /// slot. Returns false if `slot` is not the free-list head.
    pub fn remove_empty_node(&mut self, slot: usize) -> bool {
        if self.reclaimed_node_pointer != slot as i32 {
            return false;
        }
        self.reclaimed_node_pointer = self.links[slot];

        let renumber = |link: &mut i32| {
            if *link > slot as i32 {
                *link -= 1;
            }
        };

        self.buckets.iter_mut().for_each(renumber);
        self.links[..self.new_node_pointer]
            .iter_mut()
            .for_each(renumber);
        if self.reclaimed_node_pointer > slot as i32 {
            self.reclaimed_node_pointer -= 1;
        }

        self.links.copy_within(slot + 1..self.new_node_pointer, slot);
        self.new_node_pointer -= 1;
        self.links[self.new_node_pointer] = NONE;
        true
    }
}
