//! Database audits: exhaustive scans that re-derive what each phase was
//! supposed to establish.
//!
//! These are read-only and independent of the solve path, so they can vet a
//! database produced by any sequence of runs, crashes, and resumes. They
//! cost full scans (and, for the edge and value audits, a move generation
//! per state), which is why they are explicit operations rather than part
//! of `solve()`.

use crate::error::SolverResult;
use crate::game::{Game, Status};

use super::registry::Registry;
use super::schema::{self, Cf, StateInfo, Value};
use super::store::Store;
use super::Solver;

/// Keep at most this many findings; one corrupt range would otherwise
/// produce millions of identical lines.
const MAX_ISSUES: usize = 20;

/// Outcome of an audit scan.
#[derive(Debug, Default)]
pub struct VerifyReport {
    pub states_checked: u64,
    pub edges_checked: u64,
    /// Human-readable findings, truncated at [`MAX_ISSUES`].
    pub issues: Vec<String>,
    /// Total findings, including those beyond the truncation cap.
    pub issue_count: u64,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.issue_count == 0
    }

    fn note(&mut self, msg: String) {
        self.issue_count += 1;
        if self.issues.len() < MAX_ISSUES {
            self.issues.push(msg);
        }
    }
}

impl<G: Game, S: Store> Solver<G, S> {
    /// Audit the registry: ids are contiguous, `states` and `packed_to_id`
    /// invert each other exactly, and every stored state is canonical.
    pub fn verify_registry(&self) -> SolverResult<VerifyReport> {
        let mut report = VerifyReport::default();
        let mut seen = 0u64;

        self.store.scan(Cf::States, None, &mut |key, value| {
            let id = schema::decode_u32(key)?;
            let info = StateInfo::decode(value)?;
            seen += 1;

            if (id as u64) >= self.num_states {
                report.note(format!(
                    "state id {} out of range (num_states = {})",
                    id, self.num_states
                ));
            }
            if self.game.canonicalize(info.packed) != info.packed {
                report.note(format!("state {} stores a non-canonical form", id));
            }
            if info.winning_succs > info.num_successors {
                report.note(format!(
                    "state {}: winning_succs {} exceeds num_successors {}",
                    id, info.winning_succs, info.num_successors
                ));
            }
            match self.store.get(Cf::PackedToId, &schema::packed_key(info.packed))? {
                Some(v) if schema::decode_u32(&v)? == id => {}
                Some(v) => report.note(format!(
                    "state {} reverse-maps to {}",
                    id,
                    schema::decode_u32(&v)?
                )),
                None => report.note(format!("state {} has no reverse mapping", id)),
            }
            Ok(true)
        })?;

        if seen != self.num_states {
            report.note(format!(
                "states column holds {} records, metadata says {}",
                seen, self.num_states
            ));
        }

        let mut reverse = 0u64;
        self.store
            .scan(Cf::PackedToId, None, &mut |_, _| {
                reverse += 1;
                Ok(true)
            })?;
        if reverse != seen {
            report.note(format!(
                "packed_to_id holds {} records, states holds {}",
                reverse, seen
            ));
        }

        report.states_checked = seen;
        Ok(report)
    }

    /// Audit the predecessor graph: for every legal move `u → v`, `u`
    /// appears in `v`'s predecessor list. Valid after Phase 2.
    pub fn verify_predecessors(&self) -> SolverResult<VerifyReport> {
        let mut report = VerifyReport::default();
        let cache = Registry::new(&self.store).load_packed_cache(self.num_states)?;

        self.store.scan(Cf::States, None, &mut |key, value| {
            let id = schema::decode_u32(key)?;
            let info = StateInfo::decode(value)?;
            report.states_checked += 1;

            if self.game.status(info.packed) != Status::Ongoing {
                return Ok(true);
            }
            let mut succs = self.game.successors(info.packed);
            succs.sort_unstable();
            succs.dedup();
            for child in succs {
                let Some(child_id) = cache.lookup(child) else {
                    report.note(format!("state {}: successor not registered", id));
                    continue;
                };
                report.edges_checked += 1;
                if !self.get_predecessors(child_id)?.contains(&id) {
                    report.note(format!(
                        "edge {} -> {} missing from predecessor list",
                        id, child_id
                    ));
                }
            }
            Ok(true)
        })?;
        Ok(report)
    }

    /// Audit the solved values against the retrograde fixpoint rules. Valid
    /// once the database is COMPLETE:
    ///
    /// - terminals carry the adapter's classification,
    /// - WIN ⇔ some successor is LOSS for its mover,
    /// - LOSS ⇔ every successor is WIN for its mover (or no moves at all),
    /// - DRAW otherwise.
    pub fn verify_results(&self) -> SolverResult<VerifyReport> {
        let mut report = VerifyReport::default();
        let cache = Registry::new(&self.store).load_packed_cache(self.num_states)?;

        // One result byte per id so the re-derivation below needs no point
        // reads.
        let mut results = vec![Value::Unknown as u8; self.num_states as usize];
        self.store.scan(Cf::States, None, &mut |key, value| {
            let id = schema::decode_u32(key)?;
            let info = StateInfo::decode(value)?;
            if let Some(slot) = results.get_mut(id as usize) {
                *slot = info.result as u8;
            }
            Ok(true)
        })?;

        self.store.scan(Cf::States, None, &mut |key, value| {
            let id = schema::decode_u32(key)?;
            let info = StateInfo::decode(value)?;
            report.states_checked += 1;

            let expected = match self.game.status(info.packed) {
                Status::MoverWins => Value::Win,
                Status::MoverLoses => Value::Loss,
                Status::Ongoing => {
                    let mut succs = self.game.successors(info.packed);
                    succs.sort_unstable();
                    succs.dedup();
                    if succs.is_empty() {
                        Value::Loss
                    } else {
                        let mut any_loss = false;
                        let mut all_win = true;
                        for child in succs {
                            report.edges_checked += 1;
                            let child_value = cache
                                .lookup(child)
                                .and_then(|cid| results.get(cid as usize).copied())
                                .map(Value::from_u8)
                                .transpose()?
                                .unwrap_or(Value::Unknown);
                            match child_value {
                                Value::Loss => any_loss = true,
                                Value::Win => {}
                                _ => all_win = false,
                            }
                        }
                        if any_loss {
                            Value::Win
                        } else if all_win {
                            Value::Loss
                        } else {
                            Value::Draw
                        }
                    }
                }
            };

            if info.result != expected {
                report.note(format!(
                    "state {}: stored {:?}, fixpoint says {:?}",
                    id, info.result, expected
                ));
            }
            Ok(true)
        })?;
        Ok(report)
    }
}
