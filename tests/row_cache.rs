//! # Row Cache Tests
//!
//! Exercises the cache through its public API:
//!
//! 1. Budget properties under random put/get/release sequences
//! 2. Eviction picks the coldest rows and never a pinned one
//! 3. Dirty rows reach the writer in position order
//! 4. A row evicted to the data file comes back unchanged
//! 5. Budgets hold with several threads sharing one cache

use std::sync::Arc;
use std::thread;

use eyre::{bail, Result};
use proptest::prelude::*;
use rowcache::row_io::RowOutput;
use rowcache::{
    store_error, CacheConfig, CachedObject, DataFileCache, DataFileConfig, DiskRow, RowCache,
    RowWriter, StoreError, NIL_POS,
};
use tempfile::tempdir;

#[derive(Default)]
struct BatchLog {
    batches: Vec<Vec<i64>>,
}

impl RowWriter<DiskRow> for BatchLog {
    fn save_rows(&mut self, rows: &[Arc<DiskRow>]) -> Result<()> {
        if rows.is_empty() {
            bail!("empty batch handed to writer");
        }
        self.batches.push(rows.iter().map(|r| r.pos()).collect());
        Ok(())
    }
}

fn row(pos: i64, payload_len: usize) -> Arc<DiskRow> {
    Arc::new(DiskRow::new(pos, &[], &vec![pos as u8; payload_len], 8))
}

fn cache(rows: usize, bytes: u64) -> RowCache<DiskRow, BatchLog> {
    RowCache::new(CacheConfig::new(rows, bytes), BatchLog::default()).unwrap()
}

mod scenarios {
    use super::*;

    #[test]
    fn fifth_row_evicts_two_coldest() {
        let cache = cache(4, 1 << 20);
        for pos in [10, 20, 30, 40] {
            cache.put(row(pos, 6)).unwrap();
        }
        assert_eq!(cache.access_count_of(10), Some(1));
        assert_eq!(cache.access_count_of(40), Some(4));

        cache.put(row(50, 6)).unwrap();

        assert!(!cache.contains(10));
        assert!(!cache.contains(20));
        assert!(cache.contains(30) && cache.contains(40) && cache.contains(50));
        assert!(cache.len() <= 4);
        assert_eq!(cache.total_bytes(), 3 * 16);
    }

    #[test]
    fn pinned_cold_row_is_kept_and_raised() {
        let cache = cache(4, 1 << 20);
        let pinned = row(5, 6);
        pinned.set_keep_in_memory(true);
        cache.put(Arc::clone(&pinned)).unwrap();
        for pos in [6, 7, 8] {
            let r = row(pos, 6);
            r.update_access_count(5);
            cache.put(r).unwrap();
        }

        cache.clean_up().unwrap();

        assert!(cache.contains(5));
        let target = cache.access_count_floor();
        assert!(cache.access_count_of(5).unwrap() > target);
        assert!(pinned.access_count() > target);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn dirty_rows_flush_in_position_order() {
        let cache = cache(4, 1 << 20);
        for pos in [100, 50] {
            let r = row(pos, 6);
            r.set_changed(true);
            cache.put(r).unwrap();
        }
        cache.put(row(300, 6)).unwrap();
        cache.put(row(200, 6)).unwrap();

        cache.clean_up().unwrap();

        assert_eq!(cache.with_store(|w| w.batches.clone()), vec![vec![50, 100]]);
    }

    #[test]
    fn cache_full_when_everything_is_pinned() {
        let cache = cache(2, 1 << 20);
        for pos in [1, 2] {
            let r = row(pos, 6);
            r.set_keep_in_memory(true);
            cache.put(r).unwrap();
        }

        let err = cache.put(row(3, 6)).unwrap_err();
        assert!(matches!(
            store_error(&err),
            Some(StoreError::CacheFull { rows: 2, .. })
        ));
        assert_eq!(cache.len(), 2);
    }
}

#[derive(Debug, Clone)]
enum Op {
    Put { pos: i64, payload: usize, dirty: bool },
    Get(i64),
    Release(i64),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0i64..64, 0usize..80, any::<bool>())
            .prop_map(|(pos, payload, dirty)| Op::Put { pos, payload, dirty }),
        2 => (0i64..64).prop_map(Op::Get),
        1 => (0i64..64).prop_map(Op::Release),
    ]
}

proptest! {
    #[test]
    fn budgets_hold_after_every_operation(
        rows in 2usize..12,
        bytes in 128u64..1024,
        ops in prop::collection::vec(op(), 1..200),
    ) {
        let cache = cache(rows, bytes);

        for op in ops {
            match op {
                Op::Put { pos, payload, dirty } => {
                    let r = row(pos, payload);
                    r.set_changed(dirty);
                    if let Err(e) = cache.put(r) {
                        let full = matches!(store_error(&e), Some(StoreError::CacheFull { .. }));
                        prop_assert!(full, "unexpected put error: {:?}", e);
                    }
                }
                Op::Get(pos) => {
                    cache.get(pos);
                }
                Op::Release(pos) => {
                    cache.release(pos);
                }
            }

            prop_assert!(cache.len() <= rows);
            let resident: u64 = (0..64)
                .filter_map(|p| cache.peek(p))
                .map(|r| r.storage_size() as u64)
                .sum();
            prop_assert_eq!(cache.total_bytes(), resident);
            prop_assert!(cache.total_bytes() <= bytes);
        }

        for batch in cache.with_store(|w| w.batches.clone()) {
            prop_assert!(batch.windows(2).all(|w| w[0] < w[1]), "unsorted batch {:?}", batch);
        }
    }
}

#[test]
fn shared_cache_holds_budgets_across_threads() {
    const WORKERS: i64 = 4;
    const KEYS: i64 = 300;
    let cache = Arc::new(cache(64, 64 * 16));

    let workers: Vec<_> = (0..WORKERS)
        .map(|t| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for i in 0..3_000i64 {
                    let pos = (t * KEYS + i % KEYS) * 8;
                    match i % 4 {
                        0 | 1 => {
                            let r = row(pos, 6);
                            r.set_changed(i % 3 == 0);
                            cache.put(r).unwrap();
                        }
                        2 => {
                            if let Some(r) = cache.get(pos) {
                                assert_eq!(r.pos(), pos);
                            }
                        }
                        _ => {
                            cache.release(pos);
                        }
                    }
                }
            })
        })
        .collect();

    let saver = {
        let cache = Arc::clone(&cache);
        thread::spawn(move || {
            for _ in 0..200 {
                cache.save_all().unwrap();
                thread::yield_now();
            }
        })
    };

    for worker in workers {
        worker.join().unwrap();
    }
    saver.join().unwrap();

    assert!(cache.len() <= 64);
    let resident: Vec<_> = (0..WORKERS * KEYS)
        .filter_map(|k| cache.peek(k * 8))
        .collect();
    assert_eq!(resident.len(), cache.len());
    assert!(resident.iter().all(|r| r.is_in_memory()));
    let bytes: u64 = resident.iter().map(|r| r.storage_size() as u64).sum();
    assert_eq!(cache.total_bytes(), bytes);
    assert!(cache.total_bytes() <= 64 * 16);

    for batch in cache.with_store(|w| w.batches.clone()) {
        assert!(batch.windows(2).all(|w| w[0] < w[1]), "unsorted batch {:?}", batch);
    }
}

#[test]
fn evicted_row_round_trips_through_data_file() {
    let dir = tempdir().unwrap();
    let config = DataFileConfig::default().with_cache(CacheConfig::new(8, 1 << 20));
    let store = DataFileCache::<DiskRow>::create(dir.path().join("rows.data"), config).unwrap();

    let size = DiskRow::storage_size_for(2, 12, config.scale);
    let first = store
        .add(size, |pos| {
            DiskRow::new(pos, &[NIL_POS, pos], b"first row!!!", config.scale)
        })
        .unwrap();
    let mut original = RowOutput::new();
    first.write(&mut original).unwrap();

    for i in 0..40u8 {
        store
            .add(size, |pos| DiskRow::new(pos, &[pos, NIL_POS], &[i; 12], config.scale))
            .unwrap();
    }
    assert!(!store.cache().contains(first.pos()));
    assert!(!first.is_in_memory());
    assert!(!first.has_changed());

    let reloaded = store.get(first.pos()).unwrap();
    assert!(!Arc::ptr_eq(&reloaded, &first));
    let mut again = RowOutput::new();
    reloaded.write(&mut again).unwrap();

    assert_eq!(reloaded.pos(), first.pos());
    assert_eq!(again.as_bytes(), original.as_bytes());
}
