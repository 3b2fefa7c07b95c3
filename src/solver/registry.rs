//! State registry: dense 32-bit ids for canonical packed states.
//!
//! The registry is the only allocator of ids. During parallel enumeration,
//! allocation happens in the serial merge step of each batch, so `id ==
//! allocation order` and ids stay contiguous in `[0, num_states)`.

use rayon::prelude::*;

use crate::error::SolverResult;
use crate::solver::schema::{self, Cf, StateInfo};
use crate::solver::store::{Store, WriteBatch};

/// Chunk size for parallel batched lookups.
const LOOKUP_CHUNK: usize = 50_000;

/// Thin view over the `packed_to_id` and `states` column families.
pub struct Registry<'a, S: Store> {
    store: &'a S,
}

impl<'a, S: Store> Registry<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Registry { store }
    }

    /// Point lookup of a canonical packed state.
    pub fn lookup(&self, packed: u64) -> SolverResult<Option<u32>> {
        match self.store.get(Cf::PackedToId, &schema::packed_key(packed))? {
            Some(v) => Ok(Some(schema::decode_u32(&v)?)),
            None => Ok(None),
        }
    }

    /// Batched lookup; result positions match `packeds`. Chunks run on the
    /// rayon pool so large probes overlap their I/O.
    pub fn batch_lookup(&self, packeds: &[u64]) -> SolverResult<Vec<Option<u32>>> {
        let chunks: Vec<Vec<Option<u32>>> = packeds
            .par_chunks(LOOKUP_CHUNK)
            .map(|chunk| {
                let keys: Vec<Vec<u8>> = chunk
                    .iter()
                    .map(|&p| schema::packed_key(p).to_vec())
                    .collect();
                let values = self.store.multi_get(Cf::PackedToId, &keys)?;
                values
                    .into_iter()
                    .map(|v| v.map(|bytes| schema::decode_u32(&bytes)).transpose())
                    .collect()
            })
            .collect::<SolverResult<_>>()?;
        Ok(chunks.into_iter().flatten().collect())
    }

    /// Stage the two writes that register a new state: its fresh
    /// [`StateInfo`] record and the reverse mapping. The caller owns id
    /// assignment and the batch commit.
    pub fn stage_new(batch: &mut WriteBatch, id: u32, packed: u64) {
        batch.put(Cf::States, schema::id_key(id), StateInfo::new(packed).encode());
        batch.put(Cf::PackedToId, schema::packed_key(packed), schema::id_key(id));
    }

    /// Load the whole `packed_to_id` mapping into a sorted vector for
    /// in-memory binary search. Costs 12 bytes per state; used only while
    /// building the predecessor graph.
    pub fn load_packed_cache(&self, expected: u64) -> SolverResult<PackedCache> {
        println!(
            "Loading packed_to_id mapping into memory (~{} MB as sorted vector)...",
            expected * 12 / (1024 * 1024)
        );
        let start = std::time::Instant::now();

        let mut entries: Vec<(u64, u32)> = Vec::with_capacity(expected as usize + 1024);
        self.store.scan(Cf::PackedToId, None, &mut |k, v| {
            entries.push((schema::decode_u64(k)?, schema::decode_u32(v)?));
            Ok(true)
        })?;

        // Keys iterate in bytewise order, which is not numeric order for
        // little-endian u64s.
        entries.sort_unstable();

        println!(
            "Cache ready: {} entries in {:.1}s",
            entries.len(),
            start.elapsed().as_secs_f64()
        );
        Ok(PackedCache { entries })
    }
}

/// Sorted `(packed, id)` pairs with binary-search lookup.
pub struct PackedCache {
    entries: Vec<(u64, u32)>,
}

impl PackedCache {
    pub fn lookup(&self, packed: u64) -> Option<u32> {
        self.entries
            .binary_search_by_key(&packed, |&(p, _)| p)
            .ok()
            .map(|i| self.entries[i].1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
