//! Phase 2: invert the successor graph.
//!
//! For every non-terminal state `u` and every canonical successor `v`, the
//! edge `u → v` lands in `v`'s predecessor list. At full branching this
//! writes an order of magnitude more edges than there are states, so the
//! phase never reads the `predecessors` column family on its hot path:
//!
//! - a single producer streams `(id, packed)` pairs out of a sequential
//!   `states` scan into a bounded channel,
//! - workers canonicalize successors, resolve them against an in-memory
//!   sorted `packed → id` cache, and buffer edges per successor id,
//! - a worker whose buffer crosses the flush threshold writes each
//!   `(v, preds)` entry under the compound key `(v, worker_id)`, so no two
//!   workers ever touch the same key.
//!
//! Each per-`v` list is sort-deduplicated before it is written: two moves of
//! `u` can canonicalize to the same successor, and a duplicate edge would
//! later over-count `winning_succs` and mis-prove a LOSS.
//!
//! The phase is not resumable mid-run. It clears the column family on entry,
//! so a crashed attempt restarts cleanly.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, SendTimeoutError};
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::SolverResult;
use crate::game::{Game, Status};

use super::schema::{self, Cf, StateInfo, NUM_PRED_SHARDS};
use super::store::{Store, WriteBatch};
use super::{Outcome, Solver};

/// Bounded channel capacity between the producer and the workers.
const RING_CAPACITY: usize = 100_000;
/// A worker flushes once it holds this many buffered edges (~8 MiB).
const FLUSH_ENTRIES: usize = 1_000_000;

impl<G: Game, S: Store> Solver<G, S> {
    pub(super) fn build_predecessors(&mut self) -> SolverResult<Outcome> {
        // Restarts overwrite everything: wipe any partial output first.
        self.store.clear(Cf::Predecessors)?;

        let cache = super::registry::Registry::new(&self.store).load_packed_cache(self.num_states)?;

        let workers = self.num_threads.min(NUM_PRED_SHARDS).max(1);
        eprintln!(
            "Building predecessors ({} workers, flush at {} edges each)...",
            workers, FLUSH_ENTRIES
        );

        let processed = AtomicU64::new(0);
        let total_edges = AtomicU64::new(0);
        let missing = AtomicU64::new(0);
        let abort = AtomicBool::new(false);
        let write_mutex = Mutex::new(());
        let (tx, rx) = bounded::<(u32, u64)>(RING_CAPACITY);

        let start = Instant::now();
        let num_states = self.num_states;
        let store = &self.store;
        let game = &self.game;
        let stop = &self.stop;
        let cache_ref = &cache;
        let processed_ref = &processed;
        let edges_ref = &total_edges;
        let missing_ref = &missing;
        let abort_ref = &abort;
        let mutex_ref = &write_mutex;

        let run: SolverResult<()> = std::thread::scope(|scope| {
            let mut worker_handles = Vec::with_capacity(workers);
            for wid in 0..workers as u8 {
                let rx = rx.clone();
                worker_handles.push(scope.spawn(move || -> SolverResult<()> {
                    let mut buf: FxHashMap<u32, Vec<u32>> = FxHashMap::default();
                    let mut buffered = 0usize;
                    let mut flushed_ids: FxHashSet<u32> = FxHashSet::default();

                    let flush = |buf: &mut FxHashMap<u32, Vec<u32>>,
                                     buffered: &mut usize,
                                     flushed_ids: &mut FxHashSet<u32>|
                     -> SolverResult<()> {
                        if buf.is_empty() {
                            return Ok(());
                        }
                        let mut batch = WriteBatch::new();
                        let mut flushed = 0u64;
                        for (&v, preds) in buf.iter_mut() {
                            preds.sort_unstable();
                            preds.dedup();

                            let key = schema::pred_shard_key(v, wid);
                            // A second flush for the same successor must
                            // union with what this worker already wrote, or
                            // the earlier edges would be overwritten.
                            let mut value = if flushed_ids.contains(&v) {
                                store.get(Cf::Predecessors, &key)?.unwrap_or_default()
                            } else {
                                Vec::with_capacity(preds.len() * 4)
                            };
                            for &p in preds.iter() {
                                value.extend_from_slice(&p.to_le_bytes());
                                flushed += 1;
                            }
                            batch.put(Cf::Predecessors, key, value);
                            flushed_ids.insert(v);
                        }
                        let _guard = mutex_ref.lock();
                        store.write(batch)?;
                        edges_ref.fetch_add(flushed, Ordering::Relaxed);
                        buf.clear();
                        *buffered = 0;
                        Ok(())
                    };

                    while let Ok((id, packed)) = rx.recv() {
                        if game.status(packed) == Status::Ongoing {
                            for child in game.successors(packed) {
                                match cache_ref.lookup(child) {
                                    Some(v) => {
                                        buf.entry(v).or_default().push(id);
                                        buffered += 1;
                                    }
                                    // Every successor was registered in
                                    // enumeration; this branch firing means
                                    // the registry is inconsistent.
                                    None => {
                                        missing_ref.fetch_add(1, Ordering::Relaxed);
                                    }
                                }
                            }
                        }
                        processed_ref.fetch_add(1, Ordering::Relaxed);

                        if buffered >= FLUSH_ENTRIES {
                            if let Err(e) = flush(&mut buf, &mut buffered, &mut flushed_ids) {
                                abort_ref.store(true, Ordering::Relaxed);
                                return Err(e);
                            }
                        }
                    }

                    if !stop.load(Ordering::Relaxed) {
                        flush(&mut buf, &mut buffered, &mut flushed_ids)?;
                    }
                    Ok(())
                }));
            }
            drop(rx);

            let producer = scope.spawn(move || -> SolverResult<()> {
                store.scan(Cf::States, None, &mut |key, value| {
                    if stop.load(Ordering::Relaxed) || abort_ref.load(Ordering::Relaxed) {
                        return Ok(false);
                    }
                    let id = schema::decode_u32(key)?;
                    let info = StateInfo::decode(value)?;
                    let mut item = (id, info.packed);
                    loop {
                        match tx.send_timeout(item, Duration::from_millis(100)) {
                            Ok(()) => return Ok(true),
                            Err(SendTimeoutError::Timeout(v)) => {
                                if stop.load(Ordering::Relaxed) || abort_ref.load(Ordering::Relaxed)
                                {
                                    return Ok(false);
                                }
                                item = v;
                            }
                            Err(SendTimeoutError::Disconnected(_)) => return Ok(false),
                        }
                    }
                })
            });

            // Progress monitoring while the pipeline drains.
            let mut last_report = Instant::now();
            loop {
                let workers_done = worker_handles.iter().all(|h| h.is_finished());
                if workers_done && producer.is_finished() {
                    break;
                }
                std::thread::sleep(Duration::from_millis(200));
                if last_report.elapsed().as_secs() >= 5 {
                    last_report = Instant::now();
                    let done = processed.load(Ordering::Relaxed);
                    self.report("Building predecessors", done, num_states);
                    let elapsed = start.elapsed().as_secs_f64();
                    if elapsed > 0.0 && done > 0 {
                        let rate = done as f64 / elapsed;
                        let eta = (num_states.saturating_sub(done)) as f64 / rate;
                        eprintln!(
                            "  [{}/{}] {:.0} states/sec, ETA {:.1} min",
                            done,
                            num_states,
                            rate,
                            eta / 60.0
                        );
                    }
                }
            }

            producer.join().expect("producer panicked")?;
            for h in worker_handles {
                h.join().expect("predecessor worker panicked")?;
            }
            Ok(())
        });
        run?;

        if self.stop_requested() {
            // Not resumable mid-phase: the next run restarts Phase 2 from
            // its beginning.
            self.save_metadata()?;
            return Ok(Outcome::Cancelled);
        }

        let skipped = missing.load(Ordering::Relaxed);
        if skipped > 0 {
            eprintln!(
                "WARNING: {} successors missing from the registry were skipped",
                skipped
            );
        }
        eprintln!(
            "Predecessors complete: {} edges in {:.1}s",
            total_edges.load(Ordering::Relaxed),
            start.elapsed().as_secs_f64()
        );
        self.report("Predecessors complete", self.num_states, self.num_states);
        Ok(Outcome::Completed)
    }
}
