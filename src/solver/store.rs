//! Storage backends: an ordered, column-familied key-value store.
//!
//! The engine talks to storage through the [`Store`] trait: point reads,
//! batched multi-key reads, atomic write batches, range deletes, and ordered
//! scans with read-ahead. [`RocksStore`] is the production backend;
//! [`MemStore`] keeps the same semantics in BTreeMaps for tests.
//!
//! Writes go through [`WriteBatch`]: the backend applies a batch atomically
//! or not at all, which is what makes every phase's checkpointing
//! crash-safe.

use std::path::Path;

use parking_lot::Mutex;
use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, Direction, IteratorMode, Options,
    ReadOptions, DB,
};

use crate::error::{SolverError, SolverResult};
use crate::solver::schema::{Cf, ALL_CFS};

/// Exclusive upper bound above every key the schema can produce (keys are at
/// most 8 bytes).
pub const RANGE_END_MAX: [u8; 9] = [0xFF; 9];

// ── Write batches ──

enum Op {
    Put { cf: Cf, key: Vec<u8>, value: Vec<u8> },
    Delete { cf: Cf, key: Vec<u8> },
}

/// An ordered group of mutations applied atomically by [`Store::write`].
#[derive(Default)]
pub struct WriteBatch {
    ops: Vec<Op>,
}

impl WriteBatch {
    pub fn new() -> Self {
        WriteBatch::default()
    }

    pub fn put(&mut self, cf: Cf, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(Op::Put {
            cf,
            key: key.into(),
            value: value.into(),
        });
    }

    pub fn delete(&mut self, cf: Cf, key: impl Into<Vec<u8>>) {
        self.ops.push(Op::Delete { cf, key: key.into() });
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

// ── Store trait ──

/// Ordered byte-keyed KV store with column families.
///
/// Implementations must support concurrent reads and serialize writes
/// internally; `write` is atomic. Scan order is bytewise ascending on keys,
/// starting at `from` (inclusive) when given.
pub trait Store: Send + Sync {
    fn get(&self, cf: Cf, key: &[u8]) -> SolverResult<Option<Vec<u8>>>;

    /// Batched point lookup; result positions match `keys`.
    fn multi_get(&self, cf: Cf, keys: &[Vec<u8>]) -> SolverResult<Vec<Option<Vec<u8>>>>;

    fn write(&self, batch: WriteBatch) -> SolverResult<()>;

    /// Delete every key in `[from, to)`.
    fn delete_range(&self, cf: Cf, from: &[u8], to: &[u8]) -> SolverResult<()>;

    /// Ordered scan with read-ahead. `visit` returns `Ok(false)` to stop.
    fn scan(
        &self,
        cf: Cf,
        from: Option<&[u8]>,
        visit: &mut dyn FnMut(&[u8], &[u8]) -> SolverResult<bool>,
    ) -> SolverResult<()>;

    /// Convenience single put.
    fn put(&self, cf: Cf, key: &[u8], value: &[u8]) -> SolverResult<()> {
        let mut batch = WriteBatch::new();
        batch.put(cf, key, value);
        self.write(batch)
    }

    /// Convenience single delete.
    fn delete(&self, cf: Cf, key: &[u8]) -> SolverResult<()> {
        let mut batch = WriteBatch::new();
        batch.delete(cf, key);
        self.write(batch)
    }

    /// Drop everything in a column family.
    fn clear(&self, cf: Cf) -> SolverResult<()> {
        self.delete_range(cf, &[], &RANGE_END_MAX)
    }
}

/// Shared handles delegate; lets callers keep a reference to the store a
/// solver owns (re-opening over the same backing in tests, for instance).
impl<T: Store + ?Sized> Store for std::sync::Arc<T> {
    fn get(&self, cf: Cf, key: &[u8]) -> SolverResult<Option<Vec<u8>>> {
        (**self).get(cf, key)
    }

    fn multi_get(&self, cf: Cf, keys: &[Vec<u8>]) -> SolverResult<Vec<Option<Vec<u8>>>> {
        (**self).multi_get(cf, keys)
    }

    fn write(&self, batch: WriteBatch) -> SolverResult<()> {
        (**self).write(batch)
    }

    fn delete_range(&self, cf: Cf, from: &[u8], to: &[u8]) -> SolverResult<()> {
        (**self).delete_range(cf, from, to)
    }

    fn scan(
        &self,
        cf: Cf,
        from: Option<&[u8]>,
        visit: &mut dyn FnMut(&[u8], &[u8]) -> SolverResult<bool>,
    ) -> SolverResult<()> {
        (**self).scan(cf, from, visit)
    }
}

// ── RocksDB backend ──

/// RocksDB-backed store.
///
/// Tuning follows the database's access patterns: bulk sequential writes
/// during enumeration and predecessor building, then read-heavy point
/// lookups during propagation. A shared LRU block cache backs every column
/// family; point-lookup CFs carry 10-bit bloom filters.
pub struct RocksStore {
    db: DB,
    _cache: Cache,
}

/// Shared block cache capacity (2 GiB).
const BLOCK_CACHE_BYTES: usize = 2 * 1024 * 1024 * 1024;
/// SST block size (16 KiB).
const BLOCK_SIZE: usize = 16 * 1024;
/// Memtable size (64 MiB) — sized for bulk loading.
const WRITE_BUFFER_BYTES: usize = 64 * 1024 * 1024;
/// Iterator read-ahead for sequential scans (2 MiB).
const SCAN_READAHEAD_BYTES: usize = 2 * 1024 * 1024;

fn cf_options(cache: &Cache, point_lookup: bool) -> Options {
    let mut block_opts = BlockBasedOptions::default();
    block_opts.set_block_cache(cache);
    block_opts.set_block_size(BLOCK_SIZE);
    block_opts.set_cache_index_and_filter_blocks(true);
    block_opts.set_pin_l0_filter_and_index_blocks_in_cache(true);
    if point_lookup {
        block_opts.set_bloom_filter(10.0, false);
    }

    let mut opts = Options::default();
    opts.set_block_based_table_factory(&block_opts);
    opts
}

impl RocksStore {
    /// Open (or create) the database with its five column families.
    pub fn open(path: impl AsRef<Path>) -> SolverResult<Self> {
        let cache = Cache::new_lru_cache(BLOCK_CACHE_BYTES);

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_background_jobs(4);
        db_opts.set_max_write_buffer_number(4);
        db_opts.set_write_buffer_size(WRITE_BUFFER_BYTES);
        db_opts.set_target_file_size_base(WRITE_BUFFER_BYTES as u64);

        // RocksDB requires the default column family in the open set even
        // though the schema never touches it.
        let mut descriptors =
            vec![ColumnFamilyDescriptor::new("default", cf_options(&cache, false))];
        descriptors.extend(ALL_CFS.iter().map(|cf| {
            // The queue is append/scan only; everything else serves point
            // lookups.
            let point_lookup = !matches!(cf, Cf::Queue);
            ColumnFamilyDescriptor::new(cf.name(), cf_options(&cache, point_lookup))
        }));

        let db = DB::open_cf_descriptors(&db_opts, path, descriptors)
            .map_err(|e| SolverError::Storage(e.to_string()))?;

        Ok(RocksStore { db, _cache: cache })
    }

    fn handle(&self, cf: Cf) -> SolverResult<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(cf.name())
            .ok_or_else(|| SolverError::Storage(format!("missing column family {}", cf.name())))
    }
}

impl Store for RocksStore {
    fn get(&self, cf: Cf, key: &[u8]) -> SolverResult<Option<Vec<u8>>> {
        self.db
            .get_cf(self.handle(cf)?, key)
            .map_err(|e| SolverError::Storage(e.to_string()))
    }

    fn multi_get(&self, cf: Cf, keys: &[Vec<u8>]) -> SolverResult<Vec<Option<Vec<u8>>>> {
        let handle = self.handle(cf)?;
        let results = self.db.batched_multi_get_cf(handle, keys, false);
        let mut out = Vec::with_capacity(results.len());
        for r in results {
            match r {
                Ok(Some(slice)) => out.push(Some(slice.as_ref().to_vec())),
                Ok(None) => out.push(None),
                Err(e) => return Err(SolverError::Storage(e.to_string())),
            }
        }
        Ok(out)
    }

    fn write(&self, batch: WriteBatch) -> SolverResult<()> {
        let mut rb = rocksdb::WriteBatch::default();
        for op in &batch.ops {
            match op {
                Op::Put { cf, key, value } => rb.put_cf(self.handle(*cf)?, key, value),
                Op::Delete { cf, key } => rb.delete_cf(self.handle(*cf)?, key),
            }
        }
        self.db
            .write(rb)
            .map_err(|e| SolverError::Storage(e.to_string()))
    }

    fn delete_range(&self, cf: Cf, from: &[u8], to: &[u8]) -> SolverResult<()> {
        self.db
            .delete_range_cf(self.handle(cf)?, from, to)
            .map_err(|e| SolverError::Storage(e.to_string()))
    }

    fn scan(
        &self,
        cf: Cf,
        from: Option<&[u8]>,
        visit: &mut dyn FnMut(&[u8], &[u8]) -> SolverResult<bool>,
    ) -> SolverResult<()> {
        let mut read_opts = ReadOptions::default();
        // Sequential scans should not evict the hot point-lookup blocks.
        read_opts.fill_cache(false);
        read_opts.set_readahead_size(SCAN_READAHEAD_BYTES);

        let mode = match from {
            Some(key) => IteratorMode::From(key, Direction::Forward),
            None => IteratorMode::Start,
        };
        let iter = self.db.iterator_cf_opt(self.handle(cf)?, read_opts, mode);
        for item in iter {
            let (key, value) = item.map_err(|e| SolverError::Storage(e.to_string()))?;
            if !visit(&key, &value)? {
                break;
            }
        }
        Ok(())
    }
}

// ── In-memory backend ──

/// BTreeMap-backed store with the same ordering and atomicity semantics as
/// the RocksDB backend. Used by the engine test suites, where solving toy
/// games end-to-end should not need a disk database.
#[derive(Default)]
pub struct MemStore {
    maps: Mutex<[std::collections::BTreeMap<Vec<u8>, Vec<u8>>; 5]>,
}

impl MemStore {
    pub fn new() -> Self {
        MemStore::default()
    }

    /// Snapshot of a column family's contents, for equality assertions in
    /// tests.
    pub fn dump(&self, cf: Cf) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.maps.lock()[cf.index()]
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl Store for MemStore {
    fn get(&self, cf: Cf, key: &[u8]) -> SolverResult<Option<Vec<u8>>> {
        Ok(self.maps.lock()[cf.index()].get(key).cloned())
    }

    fn multi_get(&self, cf: Cf, keys: &[Vec<u8>]) -> SolverResult<Vec<Option<Vec<u8>>>> {
        let maps = self.maps.lock();
        Ok(keys
            .iter()
            .map(|k| maps[cf.index()].get(k.as_slice()).cloned())
            .collect())
    }

    fn write(&self, batch: WriteBatch) -> SolverResult<()> {
        let mut maps = self.maps.lock();
        for op in batch.ops {
            match op {
                Op::Put { cf, key, value } => {
                    maps[cf.index()].insert(key, value);
                }
                Op::Delete { cf, key } => {
                    maps[cf.index()].remove(&key);
                }
            }
        }
        Ok(())
    }

    fn delete_range(&self, cf: Cf, from: &[u8], to: &[u8]) -> SolverResult<()> {
        let mut maps = self.maps.lock();
        let doomed: Vec<Vec<u8>> = maps[cf.index()]
            .range(from.to_vec()..to.to_vec())
            .map(|(k, _)| k.clone())
            .collect();
        for k in doomed {
            maps[cf.index()].remove(&k);
        }
        Ok(())
    }

    fn scan(
        &self,
        cf: Cf,
        from: Option<&[u8]>,
        visit: &mut dyn FnMut(&[u8], &[u8]) -> SolverResult<bool>,
    ) -> SolverResult<()> {
        // Snapshot the range first so the callback may issue writes without
        // deadlocking on the map lock.
        let snapshot: Vec<(Vec<u8>, Vec<u8>)> = {
            let maps = self.maps.lock();
            match from {
                Some(key) => maps[cf.index()]
                    .range(key.to_vec()..)
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
                None => maps[cf.index()]
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            }
        };
        for (key, value) in snapshot {
            if !visit(&key, &value)? {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_store_batch_and_get() {
        let store = MemStore::new();
        let mut batch = WriteBatch::new();
        batch.put(Cf::States, vec![1u8], vec![10u8]);
        batch.put(Cf::Queue, vec![2u8], vec![20u8]);
        store.write(batch).unwrap();

        assert_eq!(store.get(Cf::States, &[1]).unwrap(), Some(vec![10]));
        assert_eq!(store.get(Cf::Queue, &[2]).unwrap(), Some(vec![20]));
        assert_eq!(store.get(Cf::States, &[2]).unwrap(), None);
    }

    #[test]
    fn mem_store_scan_is_bytewise_ordered() {
        let store = MemStore::new();
        let mut batch = WriteBatch::new();
        batch.put(Cf::States, vec![2u8], vec![2u8]);
        batch.put(Cf::States, vec![0u8], vec![0u8]);
        batch.put(Cf::States, vec![1u8], vec![1u8]);
        store.write(batch).unwrap();

        let mut seen = Vec::new();
        store
            .scan(Cf::States, None, &mut |k, _| {
                seen.push(k.to_vec());
                Ok(true)
            })
            .unwrap();
        assert_eq!(seen, vec![vec![0u8], vec![1u8], vec![2u8]]);
    }

    #[test]
    fn mem_store_scan_from_and_early_stop() {
        let store = MemStore::new();
        let mut batch = WriteBatch::new();
        for i in 0u8..5 {
            batch.put(Cf::Queue, vec![i], vec![i]);
        }
        store.write(batch).unwrap();

        let mut seen = Vec::new();
        store
            .scan(Cf::Queue, Some(&[2]), &mut |k, _| {
                seen.push(k[0]);
                Ok(seen.len() < 2)
            })
            .unwrap();
        assert_eq!(seen, vec![2, 3]);
    }

    #[test]
    fn mem_store_delete_range() {
        let store = MemStore::new();
        let mut batch = WriteBatch::new();
        for i in 0u8..5 {
            batch.put(Cf::Predecessors, vec![i], vec![i]);
        }
        store.write(batch).unwrap();

        store.delete_range(Cf::Predecessors, &[1], &[4]).unwrap();
        assert!(store.get(Cf::Predecessors, &[0]).unwrap().is_some());
        assert!(store.get(Cf::Predecessors, &[1]).unwrap().is_none());
        assert!(store.get(Cf::Predecessors, &[3]).unwrap().is_none());
        assert!(store.get(Cf::Predecessors, &[4]).unwrap().is_some());

        store.clear(Cf::Predecessors).unwrap();
        assert!(store.dump(Cf::Predecessors).is_empty());
    }

    #[test]
    fn mem_store_multi_get_preserves_positions() {
        let store = MemStore::new();
        store.put(Cf::PackedToId, &[1], &[11]).unwrap();
        store.put(Cf::PackedToId, &[3], &[33]).unwrap();

        let keys = vec![vec![1u8], vec![2u8], vec![3u8]];
        let got = store.multi_get(Cf::PackedToId, &keys).unwrap();
        assert_eq!(got, vec![Some(vec![11]), None, Some(vec![33])]);
    }
}
