//! # Data File
//!
//! Memory-mapped backing file for cached rows. Rows are appended at the free
//! position and addressed by `byte offset / scale`:
//!
//! ```text
//! Offset 0                  initial_free_pos              free_pos        file end
//! +--------+----------------+------+------+------+--------+--------------+
//! | header | reserved       | row  | row  | row  |  ...   |  unused      |
//! +--------+----------------+------+------+------+--------+--------------+
//!   64 B                      ^ pos = offset / scale
//! ```
//!
//! The header's free-position and flags words are kept current in memory and
//! written back on `sync`, `set_flags`, `set_free_pos` and `close`.
//!
//! ## Growth
//!
//! The mapping grows in `FILE_GROWTH_INCREMENT` steps when an allocation
//! runs past the end: flush, extend the file, remap. Every accessor borrows
//! `&self` and growth needs `&mut self`, so no row slice survives a remap.
//!
//! ## Saved Flag
//!
//! `close` sets `FLAG_SAVED`; `open` records whether it was set and clears
//! it on disk, so a file that was not closed cleanly is detectable on the
//! next open via [`DataFile::was_saved`].

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use eyre::{ensure, Result, WrapErr};
use memmap2::MmapMut;
use tracing::info;
use zerocopy::IntoBytes;

use super::DataFileHeader;
use crate::cache::{CachedObject, PersistentRow, RowWriter};
use crate::config::{
    DataFileConfig, DATA_FILE_HEADER_SIZE, FILE_END_ALIGNMENT, FILE_GROWTH_INCREMENT, FLAG_SAVED,
};
use crate::error::StoreError;
use crate::row_io::{RowInput, RowOutput};

#[derive(Debug)]
pub struct DataFile {
    path: PathBuf,
    file: File,
    mmap: MmapMut,
    scale: u32,
    initial_free_pos: u64,
    free_pos: u64,
    flags: u32,
    was_saved: bool,
    scratch: RowOutput,
}

impl DataFile {
    pub fn create<P: AsRef<Path>>(path: P, config: &DataFileConfig) -> Result<Self> {
        let path = path.as_ref();
        config.validate()?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .wrap_err_with(|| format!("failed to create data file '{}'", path.display()))?;

        let file_size = config.initial_free_pos.next_multiple_of(FILE_END_ALIGNMENT);
        file.set_len(file_size)
            .wrap_err_with(|| format!("failed to set file size to {} bytes", file_size))?;

        // SAFETY: MmapMut::map_mut is unsafe because memory-mapped files can be
        // modified externally. This is safe because:
        // 1. We just created this file with exclusive access (truncate=true)
        // 2. The file was sized to hold at least the header before mapping
        // 3. The mmap lifetime is tied to DataFile, preventing use-after-unmap
        // 4. All row access goes through read_row()/write_row() which bounds-check
        let mmap = unsafe {
            MmapMut::map_mut(&file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };

        let mut data_file = Self {
            path: path.to_path_buf(),
            file,
            mmap,
            scale: config.scale,
            initial_free_pos: config.initial_free_pos,
            free_pos: config.initial_free_pos,
            flags: 0,
            was_saved: false,
            scratch: RowOutput::new(),
        };
        data_file.write_header();

        info!(
            path = %path.display(),
            scale = config.scale,
            initial_free_pos = config.initial_free_pos,
            "created data file"
        );
        Ok(data_file)
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .wrap_err_with(|| format!("failed to open data file '{}'", path.display()))?;

        let file_size = file
            .metadata()
            .wrap_err_with(|| format!("failed to get metadata for '{}'", path.display()))?
            .len();

        ensure!(
            file_size >= DATA_FILE_HEADER_SIZE as u64,
            "data file '{}' is {} bytes, smaller than its header",
            path.display(),
            file_size
        );

        // SAFETY: MmapMut::map_mut is unsafe because memory-mapped files can be
        // modified externally, leading to undefined behavior. This is safe because:
        // 1. The file is opened with exclusive write access (read+write mode)
        // 2. Data files are not meant to be modified by external processes
        // 3. The mmap lifetime is tied to DataFile, preventing use-after-unmap
        // 4. All row access goes through read_row()/write_row() which bounds-check
        let mmap = unsafe {
            MmapMut::map_mut(&file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };

        let header = DataFileHeader::from_bytes(&mmap)
            .wrap_err_with(|| format!("invalid data file '{}'", path.display()))?;
        let scale = header.scale();
        let initial_free_pos = header.initial_free_pos();
        let free_pos = header.free_pos();
        let flags = header.flags();

        ensure!(
            scale > 0 && scale.is_power_of_two(),
            "data file '{}' has invalid scale {}",
            path.display(),
            scale
        );
        ensure!(
            initial_free_pos >= DATA_FILE_HEADER_SIZE as u64
                && initial_free_pos <= free_pos
                && free_pos <= file_size,
            "data file '{}' has inconsistent free position {} (first row at {}, file size {})",
            path.display(),
            free_pos,
            initial_free_pos,
            file_size
        );

        let mut data_file = Self {
            path: path.to_path_buf(),
            file,
            mmap,
            scale,
            initial_free_pos,
            free_pos,
            flags: flags & !FLAG_SAVED,
            was_saved: flags & FLAG_SAVED != 0,
            scratch: RowOutput::new(),
        };
        data_file.write_header();
        data_file.sync()?;

        info!(
            path = %path.display(),
            free_pos,
            was_saved = data_file.was_saved,
            "opened data file"
        );
        Ok(data_file)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn scale(&self) -> u32 {
        self.scale
    }

    /// Byte offset of the first row.
    pub fn initial_free_pos(&self) -> u64 {
        self.initial_free_pos
    }

    /// Byte offset of the first unused byte.
    pub fn free_pos(&self) -> u64 {
        self.free_pos
    }

    pub fn file_size(&self) -> u64 {
        self.mmap.len() as u64
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    /// Whether the file had been closed cleanly before this open.
    pub fn was_saved(&self) -> bool {
        self.was_saved
    }

    pub fn set_flags(&mut self, flags: u32) -> Result<()> {
        self.flags = flags;
        self.write_header();
        Ok(())
    }

    /// Reserves `size` bytes at the free position and returns their row
    /// position.
    pub fn allocate(&mut self, size: u32) -> Result<i64> {
        ensure!(
            size > 0 && size % self.scale == 0,
            "row size {} is not a positive multiple of scale {}",
            size,
            self.scale
        );

        let offset = self.free_pos;
        let end = offset + size as u64;
        self.ensure_len(end)?;
        self.free_pos = end;

        Ok((offset / self.scale as u64) as i64)
    }

    /// Moves the free position, e.g. after rows were written at known
    /// positions.
    pub fn set_free_pos(&mut self, offset: u64) -> Result<()> {
        ensure!(
            offset >= self.initial_free_pos && offset % self.scale as u64 == 0,
            "free position {} must be a multiple of {} at or after {}",
            offset,
            self.scale,
            self.initial_free_pos
        );
        self.ensure_len(offset)?;
        self.free_pos = offset;
        self.write_header();
        Ok(())
    }

    fn offset_of(&self, pos: i64) -> Result<u64> {
        ensure!(pos >= 0, "negative row position {}", pos);
        let offset = pos as u64 * self.scale as u64;
        ensure!(
            offset >= self.initial_free_pos && offset < self.free_pos,
            "row position {} (offset {}) lies outside the row area {}..{}",
            pos,
            offset,
            self.initial_free_pos,
            self.free_pos
        );
        Ok(offset)
    }

    /// Bytes of the row stored at `pos`, exactly its storage size long.
    pub fn read_row(&self, pos: i64) -> Result<&[u8]> {
        let offset = self.offset_of(pos)? as usize;
        let end = self.free_pos as usize;

        ensure!(
            offset + 4 <= end,
            "row {} truncated: no size word before offset {}",
            pos,
            end
        );
        let mut size = [0u8; 4];
        size.copy_from_slice(&self.mmap[offset..offset + 4]);
        let size = u32::from_le_bytes(size) as usize;

        if size < 4 || offset + size > end {
            return Err(StoreError::data_file(format!(
                "row {} has invalid storage size {} at offset {}",
                pos, size, offset
            ))
            .into());
        }
        Ok(&self.mmap[offset..offset + size])
    }

    /// Materializes the row stored at `pos` without involving any cache.
    pub fn read_object<R: PersistentRow>(&self, pos: i64) -> Result<R> {
        let bytes = self.read_row(pos)?;
        R::read(pos, &mut RowInput::new(bytes))
            .wrap_err_with(|| format!("failed to decode row {} of '{}'", pos, self.path.display()))
    }

    /// Overwrites an allocated range starting at `pos`.
    pub fn write_row(&mut self, pos: i64, bytes: &[u8]) -> Result<()> {
        let offset = self.offset_of(pos)? as usize;
        ensure!(
            offset + bytes.len() <= self.free_pos as usize,
            "write of {} bytes at row {} runs past the free position {}",
            bytes.len(),
            pos,
            self.free_pos
        );
        self.mmap[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Truncates or extends the file to the free position rounded up to
    /// `FILE_END_ALIGNMENT`.
    pub fn pad_to_alignment(&mut self) -> Result<()> {
        let len = self.free_pos.next_multiple_of(FILE_END_ALIGNMENT);
        self.resize(len)
    }

    pub fn sync(&mut self) -> Result<()> {
        self.write_header();
        self.mmap.flush().wrap_err("failed to sync mmap to disk")
    }

    /// Marks the file as cleanly closed and syncs it.
    pub fn close(mut self) -> Result<()> {
        self.flags |= FLAG_SAVED;
        self.sync()?;
        info!(path = %self.path.display(), free_pos = self.free_pos, "closed data file");
        Ok(())
    }

    fn write_header(&mut self) {
        let mut header = DataFileHeader::new(self.scale, self.initial_free_pos);
        header.set_free_pos(self.free_pos);
        header.set_flags(self.flags);
        self.mmap[..DATA_FILE_HEADER_SIZE].copy_from_slice(header.as_bytes());
    }

    fn ensure_len(&mut self, end: u64) -> Result<()> {
        if end <= self.file_size() {
            return Ok(());
        }
        self.resize(end.next_multiple_of(FILE_GROWTH_INCREMENT))
    }

    fn resize(&mut self, new_size: u64) -> Result<()> {
        if new_size == self.file_size() {
            return Ok(());
        }

        self.mmap
            .flush()
            .wrap_err("failed to flush mmap before resize")?;

        self.file
            .set_len(new_size)
            .wrap_err_with(|| format!("failed to resize file to {} bytes", new_size))?;

        // SAFETY: MmapMut::map_mut is unsafe because the old mmap becomes invalid.
        // This is safe because:
        // 1. resize() requires &mut self, so no row slices can exist (borrow checker)
        // 2. We flushed the old mmap above, ensuring data is written to disk
        // 3. The file was resized to new_size before remapping, and never below
        //    the free position
        // 4. The old mmap is dropped when we assign the new one
        self.mmap =
            unsafe { MmapMut::map_mut(&self.file).wrap_err("failed to remap file after resize")? };

        Ok(())
    }
}

impl<R: CachedObject> RowWriter<R> for DataFile {
    fn save_rows(&mut self, rows: &[Arc<R>]) -> Result<()> {
        let mut out = std::mem::take(&mut self.scratch);
        let result = rows.iter().try_for_each(|row| {
            out.reset();
            row.write(&mut out)?;
            ensure!(
                out.len() == row.storage_size() as usize,
                "row {} wrote {} bytes but reserved {}",
                row.pos(),
                out.len(),
                row.storage_size()
            );
            self.write_row(row.pos(), out.as_bytes())
        });
        self.scratch = out;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FLAG_DEFRAGMENTED;
    use crate::storage::DiskRow;
    use tempfile::tempdir;

    fn config(scale: u32, initial: u64) -> DataFileConfig {
        DataFileConfig::default()
            .with_scale(scale)
            .with_initial_free_pos(initial)
    }

    #[test]
    fn create_writes_header_and_aligned_length() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rows.data");

        let file = DataFile::create(&path, &config(8, 128)).unwrap();

        assert_eq!(file.free_pos(), 128);
        assert_eq!(file.file_size(), FILE_END_ALIGNMENT);
        assert!(!file.was_saved());
    }

    #[test]
    fn create_rejects_invalid_layout() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rows.data");

        assert!(DataFile::create(&path, &config(3, 96)).is_err());
        assert!(DataFile::create(&path, &config(8, 100)).is_err());
    }

    #[test]
    fn allocate_returns_scaled_positions() {
        let dir = tempdir().unwrap();
        let mut file = DataFile::create(dir.path().join("rows.data"), &config(8, 64)).unwrap();

        assert_eq!(file.allocate(16).unwrap(), 8);
        assert_eq!(file.allocate(24).unwrap(), 10);
        assert_eq!(file.allocate(8).unwrap(), 13);
        assert_eq!(file.free_pos(), 112);
        assert!(file.allocate(12).is_err());
    }

    #[test]
    fn saved_rows_read_back() {
        let dir = tempdir().unwrap();
        let mut file = DataFile::create(dir.path().join("rows.data"), &config(8, 64)).unwrap();

        let size = DiskRow::storage_size_for(1, 5, 8);
        let a = file.allocate(size).unwrap();
        let b = file.allocate(size).unwrap();
        let rows = vec![
            Arc::new(DiskRow::new(a, &[b], b"first", 8)),
            Arc::new(DiskRow::new(b, &[a], b"secnd", 8)),
        ];
        file.save_rows(rows.as_slice()).unwrap();

        assert_eq!(file.read_row(a).unwrap().len(), size as usize);
        let read: DiskRow = file.read_object(b).unwrap();
        assert_eq!(read.payload(), b"secnd");
        assert_eq!(read.links().as_slice(), &[a]);
    }

    #[test]
    fn read_outside_row_area_fails() {
        let dir = tempdir().unwrap();
        let mut file = DataFile::create(dir.path().join("rows.data"), &config(8, 64)).unwrap();
        file.allocate(16).unwrap();

        assert!(file.read_row(-1).is_err());
        assert!(file.read_row(2).is_err());
        assert!(file.read_row(10).is_err());
    }

    #[test]
    fn allocation_grows_mapping() {
        let dir = tempdir().unwrap();
        let mut file = DataFile::create(dir.path().join("rows.data"), &config(8, 64)).unwrap();

        let big = 2 * FILE_GROWTH_INCREMENT as u32;
        let pos = file.allocate(big).unwrap();
        file.write_row(pos, &vec![0xAB; big as usize]).unwrap();

        assert!(file.file_size() >= 64 + big as u64);
        assert_eq!(file.file_size() % FILE_GROWTH_INCREMENT, 0);
    }

    #[test]
    fn close_then_open_preserves_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rows.data");

        {
            let mut file = DataFile::create(&path, &config(8, 64)).unwrap();
            let pos = file.allocate(16).unwrap();
            let row = Arc::new(DiskRow::new(pos, &[], b"abcdef", 8));
            file.save_rows(std::slice::from_ref(&row)).unwrap();
            file.set_flags(FLAG_DEFRAGMENTED).unwrap();
            file.close().unwrap();
        }

        let file = DataFile::open(&path).unwrap();
        assert!(file.was_saved());
        assert_eq!(file.flags(), FLAG_DEFRAGMENTED);
        assert_eq!(file.free_pos(), 80);
        let row: DiskRow = file.read_object(8).unwrap();
        assert_eq!(row.payload(), b"abcdef");
    }

    #[test]
    fn open_without_close_reports_unsaved() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rows.data");

        DataFile::create(&path, &config(8, 64)).unwrap().close().unwrap();
        drop(DataFile::open(&path).unwrap());

        let file = DataFile::open(&path).unwrap();
        assert!(!file.was_saved());
    }

    #[test]
    fn pad_to_alignment_truncates_growth() {
        let dir = tempdir().unwrap();
        let mut file = DataFile::create(dir.path().join("rows.data"), &config(8, 64)).unwrap();
        assert!(file.allocate(5001).is_err());
        file.allocate(5008).unwrap();
        assert_eq!(file.file_size(), FILE_GROWTH_INCREMENT);

        file.pad_to_alignment().unwrap();

        assert_eq!(file.file_size(), 8192);
    }

    #[test]
    fn open_rejects_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rows.data");
        std::fs::write(&path, vec![0u8; 4096]).unwrap();

        assert!(DataFile::open(&path).is_err());
    }
}
