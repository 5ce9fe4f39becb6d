//! # Data File Cache
//!
//! A [`DataFile`] with a [`RowCache`] in front of it. This is the table
//! layer's entry point: rows are fetched by position, faulted in from the
//! file on a miss, and written back when the cache evicts them or on
//! `save_all`.
//!
//! ```text
//! get(pos) ──hit──────────────────────────────> Arc<R>
//!    └─miss─> DataFile::read_row ─> R::read ─> put ─> Arc<R>
//!
//! add(size, build) ─> DataFile::allocate ─> build(pos) ─> mark dirty ─> put
//!
//! defrag(tables) ─> save_all ─> Defragmenter -> "<file>.new"
//!                ─> validate ─> rename over "<file>" ─> reopen ─> clear cache
//! ```

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use eyre::{ensure, Result, WrapErr};
use tracing::info;

use super::{ClusteredTable, DataFile, DefragResult, Defragmenter};
use crate::cache::{CacheStats, CachedObject, PersistentRow, RowCache};
use crate::config::{CacheConfig, DataFileConfig};

pub struct DataFileCache<R: PersistentRow> {
    path: PathBuf,
    config: DataFileConfig,
    cache: RowCache<R, DataFile>,
}

impl<R: PersistentRow> DataFileCache<R> {
    pub fn create<P: AsRef<Path>>(path: P, config: DataFileConfig) -> Result<Self> {
        let path = path.as_ref();
        let file = DataFile::create(path, &config)?;
        Ok(Self {
            path: path.to_path_buf(),
            config,
            cache: RowCache::new(config.cache, file)?,
        })
    }

    /// Opens an existing file. The layout comes from its header; only the
    /// cache budget is taken from the caller.
    pub fn open<P: AsRef<Path>>(path: P, cache: CacheConfig) -> Result<Self> {
        let path = path.as_ref();
        let file = DataFile::open(path)?;
        let config = DataFileConfig::default()
            .with_scale(file.scale())
            .with_initial_free_pos(file.initial_free_pos())
            .with_cache(cache);

        Ok(Self {
            path: path.to_path_buf(),
            config,
            cache: RowCache::new(cache, file)?,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &DataFileConfig {
        &self.config
    }

    pub fn cache(&self) -> &RowCache<R, DataFile> {
        &self.cache
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Row at `pos`, read from the file and cached on a miss.
    pub fn get(&self, pos: i64) -> Result<Arc<R>> {
        self.cache.get_or_load(pos, |file| file.read_object(pos))
    }

    /// Reads the on-disk image at `pos` without consulting or filling the
    /// cache. Unsaved changes of a resident row are not visible.
    pub fn get_uncached(&self, pos: i64) -> Result<R> {
        self.cache.with_store(|file| file.read_object(pos))
    }

    /// Allocates `storage_size` bytes, builds the row for the new position
    /// and caches it as dirty. It reaches the file on eviction or `save_all`.
    pub fn add<F>(&self, storage_size: u32, build: F) -> Result<Arc<R>>
    where
        F: FnOnce(i64) -> R,
    {
        let pos = self.cache.with_store(|file| file.allocate(storage_size))?;
        let row = build(pos);
        ensure!(
            row.pos() == pos && row.storage_size() == storage_size,
            "new row reports position {} and size {}, allocated {} and {}",
            row.pos(),
            row.storage_size(),
            pos,
            storage_size
        );

        row.set_changed(true);
        let row = Arc::new(row);
        self.cache.put(Arc::clone(&row))?;
        Ok(row)
    }

    /// Drops the row from the cache without writing it. Its file space is
    /// reclaimed by the next defragmentation.
    pub fn remove(&self, pos: i64) -> Option<Arc<R>> {
        self.cache.release(pos)
    }

    /// Writes every dirty row and syncs the file. Returns the rows written.
    pub fn save_all(&self) -> Result<usize> {
        let saved = self.cache.save_all()?;
        self.cache.with_store(|file| file.sync())?;
        Ok(saved)
    }

    pub fn close(self) -> Result<()> {
        self.save_all()?;
        self.cache.into_store().close()
    }

    /// Compacts the file in cluster order and swaps the result in place of
    /// the current file. The cache is emptied; callers install
    /// `DefragResult::roots` and translate any positions they hold through
    /// `DefragResult::lookup`.
    pub fn defrag(&mut self, tables: &[&dyn ClusteredTable]) -> Result<DefragResult> {
        self.save_all()?;

        let mut target = OsString::from(self.path.as_os_str());
        target.push(".new");
        let target = PathBuf::from(target);

        let result = self
            .cache
            .with_store(|file| Defragmenter::<R>::new(file, tables, &target).process())?;

        DataFile::open(&target)
            .and_then(DataFile::close)
            .wrap_err_with(|| format!("defragmented file '{}' is unreadable", target.display()))?;

        self.cache.clear();
        fs::rename(&target, &self.path).wrap_err_with(|| {
            format!(
                "failed to replace '{}' with '{}'",
                self.path.display(),
                target.display()
            )
        })?;

        let file = DataFile::open(&self.path)?;
        self.cache.with_store(|current| *current = file);

        info!(
            path = %self.path.display(),
            rows = result.row_count,
            file_size = result.file_size,
            "swapped in defragmented data file"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DiskRow;
    use tempfile::tempdir;

    fn new_row(size_payload: usize) -> (u32, impl FnOnce(i64) -> DiskRow) {
        let size = DiskRow::storage_size_for(0, size_payload, 8);
        (size, move |pos| {
            DiskRow::new(pos, &[], &vec![pos as u8; size_payload], 8)
        })
    }

    #[test]
    fn added_row_is_dirty_until_saved() {
        let dir = tempdir().unwrap();
        let store =
            DataFileCache::<DiskRow>::create(dir.path().join("rows.data"), DataFileConfig::default())
                .unwrap();

        let (size, build) = new_row(6);
        let row = store.add(size, build).unwrap();
        assert!(row.has_changed());
        assert!(store.get_uncached(row.pos()).is_err());

        assert_eq!(store.save_all().unwrap(), 1);
        assert!(!row.has_changed());
        let on_disk = store.get_uncached(row.pos()).unwrap();
        assert_eq!(on_disk.payload(), row.payload());
    }

    #[test]
    fn evicted_row_is_faulted_back_in() {
        let dir = tempdir().unwrap();
        let config = DataFileConfig::default().with_cache(CacheConfig::new(4, 1 << 20));
        let store = DataFileCache::<DiskRow>::create(dir.path().join("rows.data"), config).unwrap();

        let mut positions = Vec::new();
        for _ in 0..10 {
            let (size, build) = new_row(6);
            positions.push(store.add(size, build).unwrap().pos());
        }
        assert!(store.cache().len() <= 4);
        assert!(!store.cache().contains(positions[0]));

        let row = store.get(positions[0]).unwrap();
        assert_eq!(row.payload(), &[positions[0] as u8; 6]);
        assert!(store.cache().contains(positions[0]));
    }

    #[test]
    fn close_and_reopen_keeps_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rows.data");
        let pos = {
            let store = DataFileCache::<DiskRow>::create(&path, DataFileConfig::default()).unwrap();
            let (size, build) = new_row(20);
            let pos = store.add(size, build).unwrap().pos();
            store.close().unwrap();
            pos
        };

        let store = DataFileCache::<DiskRow>::open(&path, CacheConfig::default()).unwrap();
        assert!(store.cache().with_store(|f| f.was_saved()));
        assert_eq!(store.get(pos).unwrap().payload(), &[pos as u8; 20]);
    }
}
