//! Phase 1: enumerate every reachable canonical state.
//!
//! A BFS whose frontier lives in the on-disk `queue` column family. Each
//! batch of ~10^5 queue entries runs four stages: load the queue slice,
//! prefetch the corresponding state records, expand states on worker
//! threads, then merge and commit on the driving thread. New ids are
//! assigned only in the serial merge step, so ids stay dense and no state is
//! ever registered twice.
//!
//! The bloom filter splits generated successors into `definitely_new`
//! (negative probe — created without a lookup) and `maybe_exists` (checked
//! against `packed_to_id` in one batched read). On a resumed run the filter
//! is skipped rather than rebuilt; everything then takes the checked path.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use rayon::prelude::*;

use crate::error::SolverResult;
use crate::game::{Game, Status};

use super::bloom::BloomFilter;
use super::registry::Registry;
use super::schema::{self, Cf, StateInfo};
use super::store::{Store, WriteBatch};
use super::{Outcome, Solver};

/// Queue entries pulled from disk per batch.
const BATCH_SIZE: u64 = 100_000;
/// Keys per multiget issued to the store.
const MULTIGET_CHUNK: usize = 50_000;
/// Fixed bloom seed keeps runs deterministic.
const BLOOM_SEED: u64 = 0x0B0B_A115_EED5_EED5;

#[derive(Default)]
struct ExpandOut {
    updates: Vec<(u32, StateInfo)>,
    definitely_new: Vec<u64>,
    maybe_exists: Vec<u64>,
    processed: u64,
}

/// Parallel multiget: chunks dispatched on the rayon pool, order preserved.
fn chunked_multi_get<S: Store>(
    store: &S,
    cf: Cf,
    keys: &[Vec<u8>],
) -> SolverResult<Vec<Option<Vec<u8>>>> {
    let chunks: Vec<Vec<Option<Vec<u8>>>> = keys
        .par_chunks(MULTIGET_CHUNK)
        .map(|chunk| store.multi_get(cf, chunk))
        .collect::<SolverResult<_>>()?;
    Ok(chunks.into_iter().flatten().collect())
}

impl<G: Game, S: Store> Solver<G, S> {
    pub(super) fn enumerate_states(&mut self) -> SolverResult<Outcome> {
        let mut bloom: Option<BloomFilter> = None;

        if self.queue_head == 0 && self.queue_tail == 0 && self.num_states == 0 {
            // Fresh start: register the canonical starting state and seed
            // the frontier.
            let start_packed = self.game.starting_state();
            let mut filter = BloomFilter::new(self.bloom_bytes, BLOOM_SEED);
            filter.insert(start_packed);
            bloom = Some(filter);

            let mut batch = WriteBatch::new();
            Registry::<S>::stage_new(&mut batch, 0, start_packed);
            batch.put(Cf::Queue, schema::queue_key(0), schema::id_key(0));
            self.start_id = 0;
            self.num_states = 1;
            self.queue_tail = 1;
            self.enum_processed = 0;
            self.stage_metadata(&mut batch);
            self.store.write(batch)?;
        } else {
            // Rebuilding the filter from packed_to_id takes longer than it
            // saves; resumed runs route every successor through the DB check.
            eprintln!(
                "Resuming enumeration: queue {}/{}, {} states, {} processed (bloom skipped)",
                self.queue_head, self.queue_tail, self.num_states, self.enum_processed
            );
        }

        let mut last_logged = self.enum_processed;
        let mut last_report = Instant::now();

        while self.queue_head < self.queue_tail {
            if self.stop_requested() {
                self.save_metadata()?;
                return Ok(Outcome::Cancelled);
            }

            let batch_end = (self.queue_head + BATCH_SIZE).min(self.queue_tail);

            // ── Stage 1: load the queue slice ──
            let queue_keys: Vec<Vec<u8>> = (self.queue_head..batch_end)
                .map(|i| schema::queue_key(i).to_vec())
                .collect();
            let mut work: Vec<u32> = Vec::with_capacity(queue_keys.len());
            for value in chunked_multi_get(&self.store, Cf::Queue, &queue_keys)?
                .into_iter()
                .flatten()
            {
                work.push(schema::decode_u32(&value)?);
            }

            if work.is_empty() {
                self.queue_head = batch_end;
                self.save_metadata()?;
                continue;
            }

            // ── Stage 2: prefetch state records ──
            let info_keys: Vec<Vec<u8>> = work
                .iter()
                .map(|&id| schema::id_key(id).to_vec())
                .collect();
            let infos: Vec<Option<StateInfo>> =
                chunked_multi_get(&self.store, Cf::States, &info_keys)?
                    .into_iter()
                    .map(|v| v.map(|bytes| StateInfo::decode(&bytes)).transpose())
                    .collect::<SolverResult<_>>()?;

            // ── Stage 3: parallel expand ──
            let next = AtomicUsize::new(0);
            let game = &self.game;
            let bloom_ref = bloom.as_ref();
            let work_ref = &work;
            let infos_ref = &infos;

            let outs: Vec<ExpandOut> = std::thread::scope(|scope| {
                let handles: Vec<_> = (0..self.num_threads)
                    .map(|_| {
                        scope.spawn(|| {
                            let mut out = ExpandOut::default();
                            loop {
                                let idx = next.fetch_add(1, Ordering::Relaxed);
                                if idx >= work_ref.len() {
                                    break;
                                }
                                let id = work_ref[idx];
                                let Some(mut info) = infos_ref[idx] else {
                                    continue;
                                };
                                let packed = info.packed;

                                if game.status(packed) != Status::Ongoing {
                                    info.num_successors = 0;
                                    out.updates.push((id, info));
                                    out.processed += 1;
                                    continue;
                                }

                                let moves = game.legal_moves(packed);
                                info.num_successors = moves.len() as u16;
                                out.updates.push((id, info));

                                for m in moves {
                                    let child = game.canonicalize(game.apply(packed, m));
                                    match bloom_ref {
                                        Some(b) if !b.maybe_contains(child) => {
                                            out.definitely_new.push(child)
                                        }
                                        _ => out.maybe_exists.push(child),
                                    }
                                }
                                out.processed += 1;
                            }
                            out
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|h| h.join().expect("expand worker panicked"))
                    .collect()
            });

            // ── Stage 4: merge and commit ──
            let mut batch = WriteBatch::new();
            let mut processed = 0u64;
            let mut definitely_new: Vec<u64> = Vec::new();
            let mut maybe_exists: Vec<u64> = Vec::new();
            for out in outs {
                processed += out.processed;
                for (id, info) in out.updates {
                    batch.put(Cf::States, schema::id_key(id), info.encode());
                }
                definitely_new.extend(out.definitely_new);
                maybe_exists.extend(out.maybe_exists);
            }

            definitely_new.sort_unstable();
            definitely_new.dedup();
            maybe_exists.sort_unstable();
            maybe_exists.dedup();
            let maybe_filtered: Vec<u64> = maybe_exists
                .into_iter()
                .filter(|p| definitely_new.binary_search(p).is_err())
                .collect();

            let looked = Registry::new(&self.store).batch_lookup(&maybe_filtered)?;
            let new_from_check = maybe_filtered
                .iter()
                .zip(&looked)
                .filter(|(_, found)| found.is_none())
                .map(|(&p, _)| p);

            let mut new_count: u64 = 0;
            for packed in definitely_new.iter().copied().chain(new_from_check) {
                let id = (self.num_states + new_count) as u32;
                Registry::<S>::stage_new(&mut batch, id, packed);
                batch.put(
                    Cf::Queue,
                    schema::queue_key(self.queue_tail),
                    schema::id_key(id),
                );
                self.queue_tail += 1;
                new_count += 1;
                if let Some(b) = bloom.as_mut() {
                    b.insert(packed);
                }
            }

            self.num_states += new_count;
            self.enum_processed += processed;
            // Advance the head before committing: if we crash after the
            // write lands, the next run must not re-process this batch.
            self.queue_head = batch_end;
            self.stage_metadata(&mut batch);
            self.store.write(batch)?;

            if last_report.elapsed().as_secs_f64() >= 1.0 {
                last_report = Instant::now();
                self.report("Enumerating states", self.enum_processed, self.num_states);
            }
            if self.checkpoint_interval > 0
                && self.enum_processed - last_logged >= self.checkpoint_interval
            {
                last_logged = self.enum_processed;
                eprintln!(
                    "Checkpoint: {} processed, {} states, queue {}/{}",
                    self.enum_processed, self.num_states, self.queue_head, self.queue_tail
                );
            }
        }

        eprintln!(
            "Enumeration complete: {} states, {} processed, queue {}/{}",
            self.num_states, self.enum_processed, self.queue_head, self.queue_tail
        );
        self.report("Enumeration complete", self.num_states, self.num_states);
        Ok(Outcome::Completed)
    }
}
