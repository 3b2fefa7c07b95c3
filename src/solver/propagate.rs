//! Phase 4: retrograde propagation.
//!
//! Starting from the terminal WIN/LOSS states, a backward wave walks the
//! predecessor graph:
//!
//! - a LOSS child gives its predecessor a winning move ⇒ predecessor WIN,
//! - a WIN child bumps the predecessor's `winning_succs`; once every
//!   successor is a win the predecessor is LOSS,
//! - whatever the wave never reaches is a DRAW (cycles with no forcing
//!   move).
//!
//! The wave queue is the on-disk `queue` column family. Workers race for
//! slots with an atomic head; resolved predecessors are appended at an
//! atomic tail. Per-predecessor updates serialize through an array of 65,536
//! stripe locks (`id mod 65536`); no thread ever holds more than one.
//!
//! ## Exactly-once replay
//!
//! `winning_succs` is a counter, so re-applying a queue entry after a crash
//! would over-count and could mis-prove a LOSS. Each queue entry therefore
//! carries a cursor over its predecessor list: every per-predecessor batch
//! atomically commits the state update, the enqueue of a newly resolved
//! predecessor, and the cursor advance (the final batch deletes the entry).
//! A resumed wave re-enters an interrupted entry exactly where its last
//! committed batch left off, and entries that finished are gone.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::{SolverError, SolverResult};
use crate::game::Game;

use super::schema::{self, Cf, StateInfo, Value};
use super::store::{Store, WriteBatch};
use super::{Outcome, Solver};

/// Seed/finalization write batch size.
const WRITE_BATCH: usize = 10_000;
/// Stripe lock count.
const NUM_STRIPES: usize = 65_536;
/// Checkpoint cadence during the wave.
const CHECKPOINT_SECS: u64 = 60;
/// Progress cadence during the wave.
const REPORT_SECS: u64 = 5;

fn encode_checkpoint(head: u64, tail: u64, propagated: u64) -> [u8; 24] {
    let mut blob = [0u8; 24];
    blob[0..8].copy_from_slice(&head.to_le_bytes());
    blob[8..16].copy_from_slice(&tail.to_le_bytes());
    blob[16..24].copy_from_slice(&propagated.to_le_bytes());
    blob
}

/// Queue entry: `id` (4 B), optionally followed by the predecessor cursor
/// (4 B) once processing of the entry has begun.
fn decode_entry(raw: &[u8]) -> SolverResult<(u32, u32)> {
    match raw.len() {
        4 => Ok((schema::decode_u32(raw)?, 0)),
        8 => Ok((
            schema::decode_u32(&raw[0..4])?,
            schema::decode_u32(&raw[4..8])?,
        )),
        n => Err(SolverError::Corrupt(format!("queue entry of {} bytes", n))),
    }
}

fn encode_entry(id: u32, cursor: u32) -> [u8; 8] {
    let mut buf = [0u8; 8];
    buf[0..4].copy_from_slice(&id.to_le_bytes());
    buf[4..8].copy_from_slice(&cursor.to_le_bytes());
    buf
}

impl<G: Game, S: Store> Solver<G, S> {
    pub(super) fn propagate(&mut self) -> SolverResult<Outcome> {
        let mut head0 = 0u64;
        let mut tail0 = 0u64;
        let mut propagated0 = 0u64;

        let checkpoint = self
            .store
            .get(Cf::Metadata, schema::meta::PROP_CHECKPOINT.as_bytes())?
            .filter(|b| b.len() == 24);

        if let Some(blob) = checkpoint {
            // Stage A already ran. The checkpointed head/tail can lag the
            // last committed batch by a checkpoint period, so the queue
            // itself is authoritative: outstanding entries span
            // [min index, max index].
            let stored_tail = u64::from_le_bytes(blob[8..16].try_into().unwrap());
            propagated0 = u64::from_le_bytes(blob[16..24].try_into().unwrap());

            let mut min_idx: Option<u64> = None;
            let mut max_idx: Option<u64> = None;
            self.store.scan(Cf::Queue, None, &mut |key, _| {
                let idx = schema::decode_u64(key)?;
                min_idx = Some(min_idx.map_or(idx, |m: u64| m.min(idx)));
                max_idx = Some(max_idx.map_or(idx, |m: u64| m.max(idx)));
                Ok(true)
            })?;
            tail0 = max_idx.map_or(stored_tail, |m| (m + 1).max(stored_tail));
            head0 = min_idx.unwrap_or(tail0);
            eprintln!(
                "Resuming propagation: head={}, tail={}, {} propagated",
                head0, tail0, propagated0
            );
        } else {
            // ── Stage A: seed the queue with every resolved state ──
            self.store.clear(Cf::Queue)?;

            let mut batch = WriteBatch::new();
            let mut pending = 0usize;
            let mut scanned = 0u64;
            let mut tail = 0u64;
            let mut cancelled = false;

            let store = &self.store;
            let stop = &self.stop;
            let progress = &self.progress;
            let num_states = self.num_states;

            store.scan(Cf::States, None, &mut |key, value| {
                if stop.load(Ordering::Relaxed) {
                    cancelled = true;
                    return Ok(false);
                }
                let info = StateInfo::decode(value)?;
                if info.result != Value::Unknown {
                    batch.put(Cf::Queue, schema::queue_key(tail), key.to_vec());
                    tail += 1;
                    pending += 1;
                    if pending >= WRITE_BATCH {
                        store.write(std::mem::take(&mut batch))?;
                        pending = 0;
                    }
                }
                scanned += 1;
                if scanned % 1_000_000 == 0 {
                    if let Some(cb) = progress {
                        cb("Building propagation queue", scanned, num_states);
                    }
                }
                Ok(true)
            })?;

            if cancelled {
                // No checkpoint was written; the next run re-seeds from
                // scratch.
                self.save_metadata()?;
                return Ok(Outcome::Cancelled);
            }
            if !batch.is_empty() {
                self.store.write(batch)?;
            }
            tail0 = tail;
            self.store.put(
                Cf::Metadata,
                schema::meta::PROP_CHECKPOINT.as_bytes(),
                &encode_checkpoint(0, tail0, 0),
            )?;
            eprintln!("Propagation queue built: {} solved states", tail0);
        }

        // ── Stage B: the wave ──
        let head = AtomicU64::new(head0);
        let tail = AtomicU64::new(tail0);
        let run_start_tail = tail0;
        let propagated = AtomicU64::new(propagated0);
        let processing = AtomicU64::new(0);
        let abort = AtomicBool::new(false);
        let done = AtomicBool::new(false);
        let wave_wins = AtomicU64::new(0);
        let wave_losses = AtomicU64::new(0);
        let stripes: Vec<Mutex<()>> = (0..NUM_STRIPES).map(|_| Mutex::new(())).collect();

        let wave: SolverResult<()> = std::thread::scope(|scope| {
            let reporter = scope.spawn(|| -> SolverResult<()> {
                let mut last_report = Instant::now();
                let mut last_ckpt = Instant::now();
                while !done.load(Ordering::Acquire) {
                    std::thread::sleep(Duration::from_millis(200));
                    if last_report.elapsed().as_secs() >= REPORT_SECS {
                        last_report = Instant::now();
                        self.report(
                            "Propagating",
                            propagated.load(Ordering::Relaxed),
                            tail.load(Ordering::Relaxed),
                        );
                    }
                    if last_ckpt.elapsed().as_secs() >= CHECKPOINT_SECS {
                        last_ckpt = Instant::now();
                        self.store.put(
                            Cf::Metadata,
                            schema::meta::PROP_CHECKPOINT.as_bytes(),
                            &encode_checkpoint(
                                head.load(Ordering::Relaxed),
                                tail.load(Ordering::Relaxed),
                                propagated.load(Ordering::Relaxed),
                            ),
                        )?;
                    }
                }
                Ok(())
            });

            let mut workers = Vec::with_capacity(self.num_threads);
            for _ in 0..self.num_threads {
                workers.push(scope.spawn(|| -> SolverResult<()> {
                    loop {
                        if abort.load(Ordering::Relaxed) || self.stop_requested() {
                            return Ok(());
                        }
                        let h = head.load(Ordering::Acquire);
                        let t = tail.load(Ordering::Acquire);
                        if h >= t {
                            // Quiescent only if nobody is mid-entry and the
                            // tail did not move while we looked.
                            if processing.load(Ordering::Acquire) == 0
                                && tail.load(Ordering::Acquire) == t
                            {
                                return Ok(());
                            }
                            std::thread::yield_now();
                            continue;
                        }
                        if head
                            .compare_exchange_weak(h, h + 1, Ordering::AcqRel, Ordering::Relaxed)
                            .is_err()
                        {
                            continue;
                        }

                        processing.fetch_add(1, Ordering::AcqRel);
                        let res = self.process_wave_slot(
                            h,
                            run_start_tail,
                            &tail,
                            &stripes,
                            &abort,
                            &wave_wins,
                            &wave_losses,
                        );
                        processing.fetch_sub(1, Ordering::AcqRel);
                        propagated.fetch_add(1, Ordering::Relaxed);

                        if let Err(e) = res {
                            abort.store(true, Ordering::Relaxed);
                            return Err(e);
                        }
                    }
                }));
            }

            let mut first_err: Option<SolverError> = None;
            for handle in workers {
                if let Err(e) = handle.join().expect("wave worker panicked") {
                    first_err.get_or_insert(e);
                }
            }
            done.store(true, Ordering::Release);
            if let Err(e) = reporter.join().expect("reporter panicked") {
                first_err.get_or_insert(e);
            }
            match first_err {
                Some(e) => Err(e),
                None => Ok(()),
            }
        });
        wave?;

        let head_final = head.load(Ordering::Relaxed);
        let tail_final = tail.load(Ordering::Relaxed);
        let propagated_final = propagated.load(Ordering::Relaxed);
        self.store.put(
            Cf::Metadata,
            schema::meta::PROP_CHECKPOINT.as_bytes(),
            &encode_checkpoint(head_final, tail_final, propagated_final),
        )?;

        if self.stop_requested() {
            self.save_metadata()?;
            return Ok(Outcome::Cancelled);
        }

        eprintln!(
            "Propagation wave complete: {} processed, {} new wins, {} new losses",
            propagated_final,
            wave_wins.load(Ordering::Relaxed),
            wave_losses.load(Ordering::Relaxed)
        );

        // ── Finalization: residual UNKNOWN ⇒ DRAW, then recount ──
        // Tallying all four values in the same pass makes the counters exact
        // however many interrupted runs came before.
        let mut batch = WriteBatch::new();
        let mut pending = 0usize;
        let (mut wins, mut losses, mut draws) = (0u64, 0u64, 0u64);
        let mut scanned = 0u64;
        let mut cancelled = false;

        {
            let store = &self.store;
            let stop = &self.stop;
            let progress = &self.progress;
            let num_states = self.num_states;

            store.scan(Cf::States, None, &mut |key, value| {
                if stop.load(Ordering::Relaxed) {
                    cancelled = true;
                    return Ok(false);
                }
                let mut info = StateInfo::decode(value)?;
                match info.result {
                    Value::Unknown => {
                        info.result = Value::Draw;
                        batch.put(Cf::States, key.to_vec(), info.encode());
                        pending += 1;
                        draws += 1;
                        if pending >= WRITE_BATCH {
                            store.write(std::mem::take(&mut batch))?;
                            pending = 0;
                        }
                    }
                    Value::Win => wins += 1,
                    Value::Loss => losses += 1,
                    Value::Draw => draws += 1,
                }
                scanned += 1;
                if scanned % 1_000_000 == 0 {
                    if let Some(cb) = progress {
                        cb("Marking draws", scanned, num_states);
                    }
                }
                Ok(true)
            })?;
        }

        if !batch.is_empty() {
            self.store.write(batch)?;
        }
        if cancelled {
            self.save_metadata()?;
            return Ok(Outcome::Cancelled);
        }

        self.num_wins = wins;
        self.num_losses = losses;
        self.num_draws = draws;
        self.store
            .delete(Cf::Metadata, schema::meta::PROP_CHECKPOINT.as_bytes())?;

        eprintln!(
            "Propagation complete: {} wins, {} losses, {} draws",
            wins, losses, draws
        );
        self.report("Propagation complete", self.num_states, self.num_states);
        Ok(Outcome::Completed)
    }

    /// Process one wave slot: pop its entry and push the child's value into
    /// every predecessor, continuing from the entry's cursor.
    #[allow(clippy::too_many_arguments)]
    fn process_wave_slot(
        &self,
        slot: u64,
        run_start_tail: u64,
        tail: &AtomicU64,
        stripes: &[Mutex<()>],
        abort: &AtomicBool,
        wave_wins: &AtomicU64,
        wave_losses: &AtomicU64,
    ) -> SolverResult<()> {
        let qkey = schema::queue_key(slot);

        let mut entry = self.store.get(Cf::Queue, &qkey)?;
        if entry.is_none() && slot >= run_start_tail {
            // The slot was reserved by a concurrent enqueuer whose batch has
            // not landed yet; it commits inside a stripe-lock critical
            // section, so this wait is short.
            while entry.is_none() {
                if abort.load(Ordering::Relaxed) {
                    return Ok(());
                }
                std::thread::yield_now();
                entry = self.store.get(Cf::Queue, &qkey)?;
            }
        }
        let Some(raw) = entry else {
            // Deleted by a finished entry in an earlier run.
            return Ok(());
        };
        let (id, start_cursor) = decode_entry(&raw)?;

        let info = match self.get_state_info(id)? {
            Some(info) => info,
            None => {
                return Err(SolverError::Corrupt(format!(
                    "queued state {} has no record",
                    id
                )))
            }
        };
        let child_result = info.result;
        if child_result != Value::Win && child_result != Value::Loss {
            self.store.delete(Cf::Queue, &qkey)?;
            return Ok(());
        }

        let preds = self.get_predecessors(id)?;
        for (i, &pred) in preds.iter().enumerate().skip(start_cursor as usize) {
            if self.stop_requested() || abort.load(Ordering::Relaxed) {
                // The cursor committed with the last batch; a resumed wave
                // re-enters this entry exactly here.
                return Ok(());
            }

            let last = i + 1 == preds.len();
            let _guard = stripes[pred as usize % NUM_STRIPES].lock();

            let mut batch = WriteBatch::new();
            if last {
                batch.delete(Cf::Queue, qkey.to_vec());
            } else {
                batch.put(Cf::Queue, qkey.to_vec(), encode_entry(id, (i + 1) as u32));
            }

            if let Some(mut pinfo) = self.get_state_info(pred)? {
                if pinfo.result == Value::Unknown {
                    let mut resolved = false;
                    if child_result == Value::Loss {
                        // The predecessor can move into a position its
                        // opponent loses.
                        pinfo.result = Value::Win;
                        wave_wins.fetch_add(1, Ordering::Relaxed);
                        resolved = true;
                    } else {
                        pinfo.winning_succs += 1;
                        if pinfo.winning_succs >= pinfo.num_successors {
                            pinfo.result = Value::Loss;
                            wave_losses.fetch_add(1, Ordering::Relaxed);
                            resolved = true;
                        }
                    }
                    batch.put(Cf::States, schema::id_key(pred), pinfo.encode());
                    if resolved {
                        let slot2 = tail.fetch_add(1, Ordering::AcqRel);
                        batch.put(Cf::Queue, schema::queue_key(slot2), schema::id_key(pred));
                    }
                }
            }

            self.store.write(batch)?;
        }

        if preds.len() <= start_cursor as usize {
            self.store.delete(Cf::Queue, &qkey)?;
        }
        Ok(())
    }
}
