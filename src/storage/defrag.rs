//! # Data File Defragmenter
//!
//! Rewrites every row of a data file into a fresh file, packed in cluster
//! order, and translates the tables' index roots to the new positions.
//!
//! ## Passes
//!
//! ```text
//! 1. lookup   for each table, for each row in cluster order:
//!               pointer_table += (old_pos, running_offset / scale)
//!               running_offset += storage_size(old_pos)
//!             sort pointer_table
//!
//! 2. write    create target file
//!             for each table, for each row in cluster order:
//!               new_pos = target.allocate(size)   must equal pointer_table[old_pos]
//!               write row with every link translated through pointer_table
//!
//! 3. roots    for each table, for each index root:
//!               NIL_POS stays NIL_POS, anything else must be in pointer_table
//! ```
//!
//! Offsets computed in pass 1 and allocations made in pass 2 must agree
//! exactly; a disagreement means a row changed size between passes and
//! aborts the run.
//!
//! ## Failure
//!
//! The row-count limit is checked before anything is created. After that,
//! any error deletes the partially written target and propagates. The source
//! file is only ever read; replacing it with the target is up to the caller.

use std::fs;
use std::io::ErrorKind;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use eyre::{ensure, Result, WrapErr};
use tracing::{debug, error, info, warn};

use super::DataFile;
use crate::cache::PersistentRow;
use crate::config::{DataFileConfig, FLAG_DEFRAGMENTED, MAX_DEFRAG_ROWS, NIL_POS};
use crate::error::StoreError;
use crate::index::DoubleLongIndex;
use crate::row_io::RowOutput;

/// A table whose rows live in the data file being defragmented.
pub trait ClusteredTable {
    fn name(&self) -> &str;

    /// Number of rows `for_each_position` will visit.
    fn row_count(&self) -> u64;

    /// Root position of each index, `NIL_POS` for an empty index.
    fn index_roots(&self) -> Vec<i64>;

    /// Visits every row position in primary-key order. Must visit the same
    /// positions in the same order on every call.
    fn for_each_position(&self, visit: &mut dyn FnMut(i64) -> Result<()>) -> Result<()>;
}

#[derive(Debug)]
pub struct DefragResult {
    /// Translated index roots, one vector per table in input order.
    pub roots: Vec<Vec<i64>>,
    pub row_count: u64,
    /// Length of the target file after end padding.
    pub file_size: u64,
    /// Sorted old-position to new-position table.
    pub lookup: DoubleLongIndex,
}

pub struct Defragmenter<'a, R> {
    source: &'a DataFile,
    tables: &'a [&'a dyn ClusteredTable],
    target_path: PathBuf,
    config: DataFileConfig,
    row_limit: u64,
    _row: PhantomData<fn() -> R>,
}

impl<'a, R: PersistentRow> Defragmenter<'a, R> {
    /// Targets a file with the same layout as `source`.
    pub fn new(
        source: &'a DataFile,
        tables: &'a [&'a dyn ClusteredTable],
        target_path: impl Into<PathBuf>,
    ) -> Self {
        let config = DataFileConfig::default()
            .with_scale(source.scale())
            .with_initial_free_pos(source.initial_free_pos());

        Self {
            source,
            tables,
            target_path: target_path.into(),
            config,
            row_limit: MAX_DEFRAG_ROWS,
            _row: PhantomData,
        }
    }

    /// Overrides the target file layout.
    pub fn with_layout(mut self, config: DataFileConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_row_limit(mut self, limit: u64) -> Self {
        self.row_limit = limit;
        self
    }

    pub fn target_path(&self) -> &Path {
        &self.target_path
    }

    pub fn process(self) -> Result<DefragResult> {
        let total: u64 = self.tables.iter().map(|t| t.row_count()).sum();
        if total > self.row_limit {
            return Err(StoreError::data_file(format!(
                "{} rows exceed the defragmentation limit of {}",
                total, self.row_limit
            ))
            .into());
        }
        self.config.validate()?;

        info!(
            source = %self.source.path().display(),
            target = %self.target_path.display(),
            tables = self.tables.len(),
            rows = total,
            "defragmenting data file"
        );

        match self.run(total) {
            Ok(result) => {
                info!(
                    rows = result.row_count,
                    file_size = result.file_size,
                    before = self.source.file_size(),
                    "defragmentation complete"
                );
                Ok(result)
            }
            Err(e) => {
                self.discard_target();
                Err(e).wrap_err_with(|| {
                    format!(
                        "failed to defragment '{}'",
                        self.source.path().display()
                    )
                })
            }
        }
    }

    fn run(&self, total: u64) -> Result<DefragResult> {
        let (lookup, end) = self.build_lookup(total)?;
        let mut target = DataFile::create(&self.target_path, &self.config)?;

        let written = self.write_rows(&mut target, &lookup)?;
        ensure!(
            target.free_pos() == end,
            "rewritten rows end at {} but the pointer table predicted {}",
            target.free_pos(),
            end
        );

        let roots = self.translate_roots(&lookup)?;

        target.set_free_pos(end)?;
        target.set_flags(FLAG_DEFRAGMENTED)?;
        target.pad_to_alignment()?;
        let file_size = target.file_size();
        target.close()?;

        Ok(DefragResult {
            roots,
            row_count: written,
            file_size,
            lookup,
        })
    }

    fn build_lookup(&self, total: u64) -> Result<(DoubleLongIndex, u64)> {
        let mut lookup = DoubleLongIndex::try_with_capacity(total as usize, true).map_err(|e| {
            error!(rows = total, error = %e, "cannot allocate defragmentation pointer table");
            e
        })?;

        let scale = self.config.scale as u64;
        let mut offset = self.config.initial_free_pos;

        for table in self.tables {
            table
                .for_each_position(&mut |old| {
                    let size = self.source.read_row(old)?.len() as u64;
                    ensure!(
                        size % scale == 0,
                        "row {} of {} bytes cannot be placed at scale {}",
                        old,
                        size,
                        scale
                    );
                    if !lookup.add_unsorted(old, (offset / scale) as i64) {
                        return Err(StoreError::data_file(format!(
                            "more rows visited than the {} reported",
                            total
                        ))
                        .into());
                    }
                    offset += size;
                    Ok(())
                })
                .wrap_err_with(|| format!("lookup pass over table '{}' failed", table.name()))?;
        }

        lookup.sort();
        if let Some(dup) = (1..lookup.len()).find(|&i| lookup.key(i - 1) == lookup.key(i)) {
            return Err(StoreError::data_file(format!(
                "row position {} is referenced twice",
                lookup.key(dup)
            ))
            .into());
        }

        debug!(rows = lookup.len(), end = offset, "pointer table built");
        Ok((lookup, offset))
    }

    fn write_rows(&self, target: &mut DataFile, lookup: &DoubleLongIndex) -> Result<u64> {
        let mut out = RowOutput::new();
        let mut written = 0u64;

        for table in self.tables {
            table
                .for_each_position(&mut |old| {
                    let row: R = self.source.read_object(old)?;
                    let expected = lookup.lookup(old).ok_or_else(|| {
                        StoreError::data_file(format!(
                            "row {} appeared only in the write pass",
                            old
                        ))
                    })?;

                    let pos = target.allocate(row.storage_size())?;
                    if pos != expected {
                        return Err(StoreError::data_file(format!(
                            "row {} moved to {} but the pointer table says {}",
                            old, pos, expected
                        ))
                        .into());
                    }

                    out.reset();
                    row.write_translated(&mut out, lookup)?;
                    ensure!(
                        out.len() == row.storage_size() as usize,
                        "row {} wrote {} bytes but reserved {}",
                        old,
                        out.len(),
                        row.storage_size()
                    );
                    target.write_row(pos, out.as_bytes())?;
                    written += 1;
                    Ok(())
                })
                .wrap_err_with(|| format!("write pass over table '{}' failed", table.name()))?;
        }

        Ok(written)
    }

    fn translate_roots(&self, lookup: &DoubleLongIndex) -> Result<Vec<Vec<i64>>> {
        let mut roots = Vec::with_capacity(self.tables.len());
        for table in self.tables {
            let translated = table
                .index_roots()
                .into_iter()
                .map(|root| {
                    if root == NIL_POS {
                        return Ok(NIL_POS);
                    }
                    lookup.lookup(root).ok_or_else(|| {
                        StoreError::data_file(format!(
                            "index root {} of table '{}' is not a row of the table",
                            root,
                            table.name()
                        ))
                    })
                })
                .collect::<Result<Vec<_>, StoreError>>()?;
            roots.push(translated);
        }
        Ok(roots)
    }

    fn discard_target(&self) {
        match fs::remove_file(&self.target_path) {
            Ok(()) => debug!(target = %self.target_path.display(), "removed partial defrag output"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(
                target = %self.target_path.display(),
                error = %e,
                "failed to remove partial defrag output"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::store_error;
    use crate::storage::DiskRow;
    use std::sync::Arc;
    use tempfile::tempdir;

    struct Table {
        positions: Vec<i64>,
        roots: Vec<i64>,
    }

    impl ClusteredTable for Table {
        fn name(&self) -> &str {
            "t"
        }

        fn row_count(&self) -> u64 {
            self.positions.len() as u64
        }

        fn index_roots(&self) -> Vec<i64> {
            self.roots.clone()
        }

        fn for_each_position(&self, visit: &mut dyn FnMut(i64) -> Result<()>) -> Result<()> {
            self.positions.iter().try_for_each(|&pos| visit(pos))
        }
    }

    fn source_with_rows(dir: &Path, count: usize) -> (DataFile, Vec<i64>) {
        let config = DataFileConfig::default();
        let mut file = DataFile::create(dir.join("src.data"), &config).unwrap();
        let size = DiskRow::storage_size_for(0, 6, 8);
        let positions: Vec<i64> = (0..count).map(|_| file.allocate(size).unwrap()).collect();
        let rows: Vec<_> = positions
            .iter()
            .map(|&p| Arc::new(DiskRow::new(p, &[], &[p as u8; 6], 8)))
            .collect();
        crate::cache::RowWriter::save_rows(&mut file, rows.as_slice()).unwrap();
        (file, positions)
    }

    #[test]
    fn row_limit_is_checked_before_target_exists() {
        let dir = tempdir().unwrap();
        let (source, positions) = source_with_rows(dir.path(), 3);
        let table = Table {
            positions,
            roots: vec![],
        };
        let tables: [&dyn ClusteredTable; 1] = [&table];
        let target = dir.path().join("out.data");

        let err = Defragmenter::<DiskRow>::new(&source, &tables, &target)
            .with_row_limit(2)
            .process()
            .unwrap_err();

        assert!(matches!(store_error(&err), Some(StoreError::DataFile { .. })));
        assert!(!target.exists());
    }

    #[test]
    fn reversed_cluster_order_is_packed() {
        let dir = tempdir().unwrap();
        let (source, mut positions) = source_with_rows(dir.path(), 3);
        positions.reverse();
        let table = Table {
            positions: positions.clone(),
            roots: vec![positions[2], NIL_POS],
        };
        let tables: [&dyn ClusteredTable; 1] = [&table];

        let result = Defragmenter::<DiskRow>::new(&source, &tables, dir.path().join("out.data"))
            .process()
            .unwrap();

        assert_eq!(result.row_count, 3);
        assert_eq!(result.lookup.lookup(positions[0]), Some(8));
        assert_eq!(result.lookup.lookup(positions[1]), Some(10));
        assert_eq!(result.lookup.lookup(positions[2]), Some(12));
        assert_eq!(result.roots, vec![vec![12, NIL_POS]]);
    }

    #[test]
    fn duplicate_position_is_rejected() {
        let dir = tempdir().unwrap();
        let (source, positions) = source_with_rows(dir.path(), 2);
        let table = Table {
            positions: vec![positions[0], positions[0]],
            roots: vec![],
        };
        let tables: [&dyn ClusteredTable; 1] = [&table];
        let target = dir.path().join("out.data");

        let err = Defragmenter::<DiskRow>::new(&source, &tables, &target)
            .process()
            .unwrap_err();

        assert!(matches!(store_error(&err), Some(StoreError::DataFile { .. })));
        assert!(!target.exists());
    }
}
