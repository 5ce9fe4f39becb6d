//! # Disk Row
//!
//! A concrete [`CachedObject`]: a fixed number of links to other rows plus an
//! opaque payload. Links are what the defragmenter rewrites; the payload is
//! carried through untouched.
//!
//! ## Encoding
//!
//! ```text
//! +------------+------------+-----------------+-------------+---------+---------+
//! | size (u32) | links (u16)| link i64 * n    | len (u32)   | payload | padding |
//! +------------+------------+-----------------+-------------+---------+---------+
//! ```
//!
//! `size` is the storage size including padding, so a row can be sliced out
//! of the data file knowing only its start. Padding rounds the row up to the
//! file's scale so the next row starts on an addressable position.

use eyre::{ensure, Result};
use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::cache::{CachedObject, ObjectState, PersistentRow, PositionLookup};
use crate::config::NIL_POS;
use crate::error::StoreError;
use crate::row_io::{RowInput, RowOutput};

#[derive(Debug)]
pub struct DiskRow {
    pos: i64,
    storage_size: u32,
    links: Mutex<SmallVec<[i64; 4]>>,
    payload: Box<[u8]>,
    state: Mutex<ObjectState>,
}

impl DiskRow {
    /// Bytes taken by the size, link count and payload length words.
    pub const FIXED_SIZE: usize = 4 + 2 + 4;

    /// Largest link count the u16 count word can carry.
    pub const MAX_LINKS: usize = u16::MAX as usize;

    /// Builds a clean row. `alignment` is the scale of the file it will be
    /// written to.
    pub fn new(pos: i64, links: &[i64], payload: &[u8], alignment: u32) -> Self {
        Self {
            pos,
            storage_size: Self::storage_size_for(links.len(), payload.len(), alignment),
            links: Mutex::new(SmallVec::from_slice(links)),
            payload: payload.into(),
            state: Mutex::new(ObjectState::default()),
        }
    }

    pub fn storage_size_for(link_count: usize, payload_len: usize, alignment: u32) -> u32 {
        let raw = (Self::FIXED_SIZE + link_count * 8 + payload_len) as u32;
        let alignment = alignment.max(1);
        raw.div_ceil(alignment) * alignment
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn links(&self) -> SmallVec<[i64; 4]> {
        self.links.lock().clone()
    }

    pub fn link(&self, i: usize) -> Option<i64> {
        self.links.lock().get(i).copied()
    }

    /// Points link `i` at `target` and marks the row changed.
    pub fn set_link(&self, i: usize, target: i64) -> Result<()> {
        {
            let mut links = self.links.lock();
            let count = links.len();
            let slot = links
                .get_mut(i)
                .ok_or_else(|| eyre::eyre!("link {} out of range ({} links)", i, count))?;
            *slot = target;
        }
        self.set_changed(true);
        Ok(())
    }

    fn encode(&self, out: &mut RowOutput, links: &[i64]) -> Result<()> {
        let link_count = u16::try_from(links.len()).map_err(|_| {
            StoreError::data_file(format!(
                "row {} has {} links, more than {}",
                self.pos,
                links.len(),
                Self::MAX_LINKS
            ))
        })?;

        let start = out.len();
        out.write_u32(self.storage_size);
        out.write_u16(link_count);
        for &link in links {
            out.write_i64(link);
        }
        out.write_u32(self.payload.len() as u32);
        out.write_bytes(&self.payload);

        let written = out.len() - start;
        ensure!(
            written <= self.storage_size as usize,
            "row {} encodes to {} bytes, more than its storage size {}",
            self.pos,
            written,
            self.storage_size
        );
        out.pad_to(start + self.storage_size as usize);
        Ok(())
    }
}

impl CachedObject for DiskRow {
    fn pos(&self) -> i64 {
        self.pos
    }

    fn storage_size(&self) -> u32 {
        self.storage_size
    }

    fn state(&self) -> &Mutex<ObjectState> {
        &self.state
    }

    fn real_size(&self) -> u32 {
        self.storage_size
    }

    fn write(&self, out: &mut RowOutput) -> Result<()> {
        let links = self.links.lock().clone();
        self.encode(out, &links)
    }

    fn write_translated(&self, out: &mut RowOutput, lookup: &dyn PositionLookup) -> Result<()> {
        let mut links = self.links.lock().clone();
        for link in links.iter_mut().filter(|link| **link != NIL_POS) {
            let old = *link;
            *link = lookup.lookup(old).ok_or_else(|| {
                StoreError::data_file(format!(
                    "row {} links to position {} which was not relocated",
                    self.pos, old
                ))
            })?;
        }
        self.encode(out, &links)
    }
}

impl PersistentRow for DiskRow {
    fn read(pos: i64, input: &mut RowInput<'_>) -> Result<Self> {
        let storage_size = input.read_u32()?;
        let link_count = input.read_u16()? as usize;
        let mut links = SmallVec::with_capacity(link_count);
        for _ in 0..link_count {
            links.push(input.read_i64()?);
        }
        let payload_len = input.read_u32()? as usize;
        let payload = input.read_bytes(payload_len)?;

        ensure!(
            input.position() <= storage_size as usize,
            "row {} is {} bytes long but its header says {}",
            pos,
            input.position(),
            storage_size
        );

        Ok(Self {
            pos,
            storage_size,
            links: Mutex::new(links),
            payload: payload.into(),
            state: Mutex::new(ObjectState::default()),
        })
    }
}
