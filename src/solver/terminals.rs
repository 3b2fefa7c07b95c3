//! Phase 3: classify terminal states.
//!
//! A single sequential scan over `states` with read-ahead beats parallel
//! random reads for this pattern. Every record still UNKNOWN is checked
//! against the adapter: a decided position becomes WIN or LOSS for its side
//! to move, and a position with no legal moves is a LOSS by stalemate.
//!
//! Updates accumulate in write batches of 10^4. Each batch carries the
//! phase's checkpoint blob — the last processed key plus the running
//! win/loss counts — so a crash resumes from the last committed batch with
//! exact counters. Re-scanning already-marked records is a no-op.

use std::time::Instant;

use crate::error::SolverResult;
use crate::game::{Game, Status};

use super::schema::{self, Cf, StateInfo, Value};
use super::store::{Store, WriteBatch};
use super::{Outcome, Solver};

/// State updates per write batch.
const WRITE_BATCH: usize = 10_000;
/// Progress callback cadence.
const REPORT_EVERY: u64 = 100_000;

/// Checkpoint blob: last processed key (4 B) ∥ wins (8 B) ∥ losses (8 B).
fn encode_checkpoint(key: &[u8], wins: u64, losses: u64) -> Vec<u8> {
    let mut blob = Vec::with_capacity(20);
    blob.extend_from_slice(key);
    blob.extend_from_slice(&wins.to_le_bytes());
    blob.extend_from_slice(&losses.to_le_bytes());
    blob
}

impl<G: Game, S: Store> Solver<G, S> {
    pub(super) fn mark_terminals(&mut self) -> SolverResult<Outcome> {
        let mut wins = 0u64;
        let mut losses = 0u64;
        let mut resume_key: Option<Vec<u8>> = None;

        if let Some(blob) = self
            .store
            .get(Cf::Metadata, schema::meta::TERMINAL_CHECKPOINT.as_bytes())?
        {
            if blob.len() == 20 {
                resume_key = Some(blob[0..4].to_vec());
                wins = u64::from_le_bytes(blob[4..12].try_into().unwrap());
                losses = u64::from_le_bytes(blob[12..20].try_into().unwrap());
                eprintln!(
                    "Resuming terminal marking: {} wins, {} losses so far",
                    wins, losses
                );
            }
        }

        let mut batch = WriteBatch::new();
        let mut pending = 0usize;
        let mut processed = 0u64;
        let mut cancelled = false;
        let mut last_key: Option<Vec<u8>> = None;
        let mut last_report = Instant::now();

        let game = &self.game;
        let store = &self.store;
        let stop = &self.stop;
        let num_states = self.num_states;
        let progress = &self.progress;
        let seek = resume_key.clone();

        store.scan(Cf::States, seek.as_deref(), &mut |key, value| {
            // The seek lands on the checkpointed key itself; that one is
            // already committed.
            if resume_key.as_deref() == Some(key) {
                return Ok(true);
            }

            if stop.load(std::sync::atomic::Ordering::Relaxed) {
                cancelled = true;
                return Ok(false);
            }

            let mut info = StateInfo::decode(value)?;
            if info.result != Value::Unknown {
                // Already marked by an earlier interrupted run (nothing else
                // assigns results before propagation). Re-counting here keeps
                // the totals exact even when the scan restarts from a stale
                // cursor or from the beginning.
                match info.result {
                    Value::Win => wins += 1,
                    Value::Loss => losses += 1,
                    _ => {}
                }
                processed += 1;
                last_key = Some(key.to_vec());
                return Ok(true);
            }

            let mut changed = false;
            match game.status(info.packed) {
                Status::MoverWins => {
                    info.result = Value::Win;
                    wins += 1;
                    changed = true;
                }
                Status::MoverLoses => {
                    info.result = Value::Loss;
                    losses += 1;
                    changed = true;
                }
                Status::Ongoing => {
                    if info.num_successors == 0 {
                        // Either a genuine stalemate or a record whose move
                        // count was lost to an interrupted enumeration batch.
                        let moves = game.legal_moves(info.packed);
                        if moves.is_empty() {
                            info.result = Value::Loss;
                            losses += 1;
                        } else {
                            info.num_successors = moves.len() as u16;
                        }
                        changed = true;
                    }
                }
            }

            if changed {
                batch.put(Cf::States, key.to_vec(), info.encode());
                pending += 1;
            }
            processed += 1;
            last_key = Some(key.to_vec());

            if pending >= WRITE_BATCH {
                // The checkpoint rides in the same atomic batch, keeping the
                // cursor and counters consistent with committed updates.
                batch.put(
                    Cf::Metadata,
                    schema::meta::TERMINAL_CHECKPOINT.as_bytes(),
                    encode_checkpoint(key, wins, losses),
                );
                store.write(std::mem::take(&mut batch))?;
                pending = 0;
            }

            if processed % REPORT_EVERY == 0 || last_report.elapsed().as_secs() >= 5 {
                last_report = Instant::now();
                if let Some(cb) = progress {
                    cb("Marking terminals", processed, num_states);
                }
            }
            Ok(true)
        })?;

        if !batch.is_empty() {
            if let Some(key) = &last_key {
                batch.put(
                    Cf::Metadata,
                    schema::meta::TERMINAL_CHECKPOINT.as_bytes(),
                    encode_checkpoint(key, wins, losses),
                );
            }
            self.store.write(batch)?;
        }

        if cancelled {
            self.save_metadata()?;
            return Ok(Outcome::Cancelled);
        }

        self.num_wins = wins;
        self.num_losses = losses;
        self.store
            .delete(Cf::Metadata, schema::meta::TERMINAL_CHECKPOINT.as_bytes())?;

        eprintln!(
            "Terminal marking complete: {} wins, {} losses",
            wins, losses
        );
        self.report("Terminals marked", self.num_states, self.num_states);
        Ok(Outcome::Completed)
    }
}
