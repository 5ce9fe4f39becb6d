//! # Data File Header
//!
//! The first 64 bytes of every data file:
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----------------------------------------------
//!      0    16  magic "rowcache data\0\0\0"
//!     16     4  format version
//!     20     4  scale (byte offset = position * scale)
//!     24     8  free position: byte offset of the first unused byte
//!     32     4  flags (FLAG_SAVED, FLAG_DEFRAGMENTED)
//!     36     8  initial free position: byte offset of the first row
//!     44    20  reserved, zero
//! ```
//!
//! All multi-byte fields are little-endian via zerocopy's `U32`/`U64`, so the
//! header can be read and written in place in the mapping.

use eyre::{ensure, Result};
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{DATA_FILE_HEADER_SIZE, HEADER_FLAGS_OFFSET, HEADER_FREE_POS_OFFSET};

pub const DATA_FILE_MAGIC: &[u8; 16] = b"rowcache data\x00\x00\x00";

pub const CURRENT_VERSION: u32 = 1;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct DataFileHeader {
    magic: [u8; 16],
    version: U32,
    scale: U32,
    free_pos: U64,
    flags: U32,
    initial_free_pos: U64,
    reserved: [u8; 20],
}

const _: () = assert!(std::mem::size_of::<DataFileHeader>() == DATA_FILE_HEADER_SIZE);
const _: () = assert!(std::mem::offset_of!(DataFileHeader, free_pos) == HEADER_FREE_POS_OFFSET);
const _: () = assert!(std::mem::offset_of!(DataFileHeader, flags) == HEADER_FLAGS_OFFSET);

impl DataFileHeader {
    pub fn new(scale: u32, initial_free_pos: u64) -> Self {
        Self {
            magic: *DATA_FILE_MAGIC,
            version: U32::new(CURRENT_VERSION),
            scale: U32::new(scale),
            free_pos: U64::new(initial_free_pos),
            flags: U32::new(0),
            initial_free_pos: U64::new(initial_free_pos),
            reserved: [0u8; 20],
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        ensure!(
            bytes.len() >= DATA_FILE_HEADER_SIZE,
            "buffer too small for DataFileHeader: {} < {}",
            bytes.len(),
            DATA_FILE_HEADER_SIZE
        );

        let header = Self::ref_from_bytes(&bytes[..DATA_FILE_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse DataFileHeader: {:?}", e))?;

        ensure!(
            &header.magic == DATA_FILE_MAGIC,
            "invalid magic bytes in data file header"
        );

        ensure!(
            header.version.get() == CURRENT_VERSION,
            "unsupported data file version: {} (expected {})",
            header.version.get(),
            CURRENT_VERSION
        );

        Ok(header)
    }

    pub fn scale(&self) -> u32 {
        self.scale.get()
    }

    pub fn free_pos(&self) -> u64 {
        self.free_pos.get()
    }

    pub fn set_free_pos(&mut self, offset: u64) {
        self.free_pos = U64::new(offset);
    }

    pub fn flags(&self) -> u32 {
        self.flags.get()
    }

    pub fn set_flags(&mut self, flags: u32) {
        self.flags = U32::new(flags);
    }

    pub fn initial_free_pos(&self) -> u64 {
        self.initial_free_pos.get()
    }
}
