//! Out-of-core retrograde analysis engine.
//!
//! Solves a two-player perfect-information game whose reachable state space
//! does not fit in memory by running four phases over a persistent ordered
//! KV store:
//!
//! | Phase | Module | Description |
//! |-------|--------|-------------|
//! | 1 | `enumerate` | BFS discovery of all reachable canonical states |
//! | 2 | `predecessors` | Invert the successor graph, sharded per worker |
//! | 3 | `terminals` | Classify terminal states for the side to move |
//! | 4 | `propagate` | Retrograde wave: LOSS child ⇒ WIN parent, all-WIN children ⇒ LOSS parent, rest DRAW |
//!
//! A persistent phase counter and per-phase checkpoints make every run
//! resumable: kill the process at any point and the next `solve()` picks up
//! from the last committed batch.

pub mod bloom;
pub mod registry;
pub mod schema;
pub mod store;

mod enumerate;
mod import;
mod predecessors;
mod propagate;
mod terminals;
mod verify;

pub use verify::VerifyReport;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{SolverError, SolverResult};
use crate::game::Game;
use schema::{Cf, Phase, StateInfo, Value};
use store::{Store, WriteBatch};

/// Progress callback: `(phase label, current, total)`.
pub type ProgressCallback = Box<dyn Fn(&str, u64, u64) + Send + Sync>;

/// How a `solve()` run ended.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Outcome {
    /// All phases ran to completion; the database is fully solved.
    Completed,
    /// A stop request arrived; checkpoints are persisted and a later run
    /// resumes where this one left off.
    Cancelled,
}

/// Default bloom filter size (2 GiB).
pub const DEFAULT_BLOOM_BYTES: usize = 2 * 1024 * 1024 * 1024;

/// Disk-backed retrograde solver, parametric in the game and the store.
pub struct Solver<G: Game, S: Store> {
    game: G,
    store: S,

    phase: Phase,
    num_states: u64,
    num_wins: u64,
    num_losses: u64,
    num_draws: u64,
    start_id: u32,
    enum_processed: u64,
    queue_head: u64,
    queue_tail: u64,

    num_threads: usize,
    checkpoint_interval: u64,
    bloom_bytes: usize,
    stop: Arc<AtomicBool>,
    progress: Option<ProgressCallback>,
}

impl<G: Game, S: Store> Solver<G, S> {
    /// Wrap an opened store, loading any persisted solver metadata.
    pub fn open(game: G, store: S) -> SolverResult<Self> {
        let mut solver = Solver {
            game,
            store,
            phase: Phase::NotStarted,
            num_states: 0,
            num_wins: 0,
            num_losses: 0,
            num_draws: 0,
            start_id: 0,
            enum_processed: 0,
            queue_head: 0,
            queue_tail: 0,
            num_threads: 8,
            checkpoint_interval: 1_000_000,
            bloom_bytes: DEFAULT_BLOOM_BYTES,
            stop: Arc::new(AtomicBool::new(false)),
            progress: None,
        };
        solver.load_metadata()?;
        Ok(solver)
    }

    // ── Configuration ──

    pub fn set_num_threads(&mut self, n: usize) {
        self.num_threads = n.max(1);
    }

    pub fn set_checkpoint_interval(&mut self, states: u64) {
        self.checkpoint_interval = states;
    }

    /// Size of the enumeration bloom filter. Shrink when memory is tight;
    /// correctness is unaffected, only Phase 1 throughput.
    pub fn set_bloom_bytes(&mut self, bytes: usize) {
        self.bloom_bytes = bytes.max(1);
    }

    pub fn set_progress_callback(&mut self, cb: impl Fn(&str, u64, u64) + Send + Sync + 'static) {
        self.progress = Some(Box::new(cb));
    }

    /// Shared stop flag. Setting it makes long-running phases drain their
    /// current batch, persist a checkpoint, and return
    /// [`Outcome::Cancelled`].
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Install an externally owned stop flag (e.g. one raised by a signal
    /// handler) in place of the solver's own.
    pub fn set_stop_flag(&mut self, flag: Arc<AtomicBool>) {
        self.stop = flag;
    }

    // ── Statistics ──

    pub fn current_phase(&self) -> Phase {
        self.phase
    }

    pub fn num_states(&self) -> u64 {
        self.num_states
    }

    pub fn num_wins(&self) -> u64 {
        self.num_wins
    }

    pub fn num_losses(&self) -> u64 {
        self.num_losses
    }

    pub fn num_draws(&self) -> u64 {
        self.num_draws
    }

    // ── Solve driver ──

    /// Run the phase pipeline from wherever the database left off.
    pub fn solve(&mut self) -> SolverResult<Outcome> {
        if self.phase == Phase::NotStarted || self.phase == Phase::Enumerating {
            self.phase = Phase::Enumerating;
            self.report("Enumerating states", 0, 0);
            if self.enumerate_states()? == Outcome::Cancelled {
                return Ok(Outcome::Cancelled);
            }
            self.phase = Phase::BuildingPredecessors;
            self.save_metadata()?;
        }

        if self.phase == Phase::BuildingPredecessors {
            self.report("Building predecessors", 0, self.num_states);
            if self.build_predecessors()? == Outcome::Cancelled {
                return Ok(Outcome::Cancelled);
            }
            self.phase = Phase::MarkingTerminals;
            self.save_metadata()?;
        }

        if self.phase == Phase::MarkingTerminals {
            self.report("Marking terminals", 0, self.num_states);
            if self.mark_terminals()? == Outcome::Cancelled {
                return Ok(Outcome::Cancelled);
            }
            self.phase = Phase::Propagating;
            self.save_metadata()?;
        }

        if self.phase == Phase::Propagating {
            self.report("Propagating", 0, self.num_states);
            if self.propagate()? == Outcome::Cancelled {
                return Ok(Outcome::Cancelled);
            }
            self.phase = Phase::Complete;
            self.save_metadata()?;
        }

        Ok(Outcome::Completed)
    }

    // ── Queries ──

    /// Game-theoretic value of a state (any orbit member) for its side to
    /// move. `Unknown` when the state is not in the database.
    pub fn result(&self, packed: u64) -> SolverResult<Value> {
        let canonical = self.game.canonicalize(packed);
        match registry::Registry::new(&self.store).lookup(canonical)? {
            Some(id) => match self.get_state_info(id)? {
                Some(info) => Ok(info.result),
                None => Ok(Value::Unknown),
            },
            None => Ok(Value::Unknown),
        }
    }

    /// An optimal move: win as fast as the database proves, hold a draw, or
    /// steer a lost position toward a draw if the opponent allows one.
    pub fn best_move(&self, packed: u64) -> SolverResult<Option<G::Move>> {
        let moves = self.game.legal_moves(packed);
        if moves.is_empty() {
            return Ok(None);
        }

        let my_result = self.result(packed)?;
        let mut child_values = Vec::with_capacity(moves.len());
        for &m in &moves {
            child_values.push(self.result(self.game.apply(packed, m))?);
        }

        let find = |want: Value| {
            moves
                .iter()
                .zip(&child_values)
                .find(|(_, &v)| v == want)
                .map(|(&m, _)| m)
        };

        let chosen = match my_result {
            Value::Win => find(Value::Loss),
            Value::Draw => find(Value::Draw),
            Value::Loss => find(Value::Draw),
            Value::Unknown => None,
        };
        Ok(chosen.or(Some(moves[0])))
    }

    /// Value of the canonical starting state.
    pub fn starting_result(&self) -> SolverResult<Value> {
        match self.get_state_info(self.start_id)? {
            Some(info) => Ok(info.result),
            None => Ok(Value::Unknown),
        }
    }

    // ── Shared helpers ──

    pub(crate) fn report(&self, label: &str, current: u64, total: u64) {
        if let Some(cb) = &self.progress {
            cb(label, current, total);
        }
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    pub(crate) fn get_state_info(&self, id: u32) -> SolverResult<Option<StateInfo>> {
        match self.store.get(Cf::States, &schema::id_key(id))? {
            Some(v) => Ok(Some(StateInfo::decode(&v)?)),
            None => Ok(None),
        }
    }

    /// Concatenated predecessor list of a state: one multiget over the 16
    /// worker shards plus the legacy unsharded key.
    pub(crate) fn get_predecessors(&self, id: u32) -> SolverResult<Vec<u32>> {
        let mut keys: Vec<Vec<u8>> = Vec::with_capacity(schema::NUM_PRED_SHARDS + 1);
        for shard in 0..schema::NUM_PRED_SHARDS as u8 {
            keys.push(schema::pred_shard_key(id, shard).to_vec());
        }
        keys.push(schema::id_key(id).to_vec());

        let values = self.store.multi_get(Cf::Predecessors, &keys)?;
        let mut preds = Vec::new();
        for value in values.into_iter().flatten() {
            if value.len() % 4 != 0 {
                return Err(SolverError::Corrupt(format!(
                    "predecessor list for state {} has odd length {}",
                    id,
                    value.len()
                )));
            }
            for chunk in value.chunks_exact(4) {
                preds.push(u32::from_le_bytes(chunk.try_into().unwrap()));
            }
        }
        Ok(preds)
    }

    // ── Metadata persistence ──

    pub(crate) fn stage_metadata(&self, batch: &mut WriteBatch) {
        let put_u64 = |batch: &mut WriteBatch, key: &str, v: u64| {
            batch.put(Cf::Metadata, key.as_bytes(), v.to_le_bytes());
        };
        let put_u32 = |batch: &mut WriteBatch, key: &str, v: u32| {
            batch.put(Cf::Metadata, key.as_bytes(), v.to_le_bytes());
        };

        put_u32(batch, schema::meta::PHASE, self.phase as u32);
        put_u64(batch, schema::meta::NUM_STATES, self.num_states);
        put_u64(batch, schema::meta::NUM_WINS, self.num_wins);
        put_u64(batch, schema::meta::NUM_LOSSES, self.num_losses);
        put_u64(batch, schema::meta::NUM_DRAWS, self.num_draws);
        put_u32(batch, schema::meta::START_ID, self.start_id);
        put_u64(batch, schema::meta::ENUM_PROCESSED, self.enum_processed);
        put_u64(batch, schema::meta::QUEUE_HEAD, self.queue_head);
        put_u64(batch, schema::meta::QUEUE_TAIL, self.queue_tail);
    }

    pub(crate) fn save_metadata(&self) -> SolverResult<()> {
        let mut batch = WriteBatch::new();
        self.stage_metadata(&mut batch);
        self.store.write(batch)
    }

    fn load_metadata(&mut self) -> SolverResult<()> {
        let get_u64 = |store: &S, key: &str| -> SolverResult<Option<u64>> {
            match store.get(Cf::Metadata, key.as_bytes())? {
                Some(v) => Ok(Some(schema::decode_u64(&v)?)),
                None => Ok(None),
            }
        };
        let get_u32 = |store: &S, key: &str| -> SolverResult<Option<u32>> {
            match store.get(Cf::Metadata, key.as_bytes())? {
                Some(v) => Ok(Some(schema::decode_u32(&v)?)),
                None => Ok(None),
            }
        };

        if let Some(v) = get_u32(&self.store, schema::meta::PHASE)? {
            self.phase = Phase::from_u32(v)?;
        }
        if let Some(v) = get_u64(&self.store, schema::meta::NUM_STATES)? {
            self.num_states = v;
        }
        if let Some(v) = get_u64(&self.store, schema::meta::NUM_WINS)? {
            self.num_wins = v;
        }
        if let Some(v) = get_u64(&self.store, schema::meta::NUM_LOSSES)? {
            self.num_losses = v;
        }
        if let Some(v) = get_u64(&self.store, schema::meta::NUM_DRAWS)? {
            self.num_draws = v;
        }
        if let Some(v) = get_u32(&self.store, schema::meta::START_ID)? {
            self.start_id = v;
        }
        if let Some(v) = get_u64(&self.store, schema::meta::ENUM_PROCESSED)? {
            self.enum_processed = v;
        }
        if let Some(v) = get_u64(&self.store, schema::meta::QUEUE_HEAD)? {
            self.queue_head = v;
        }
        if let Some(v) = get_u64(&self.store, schema::meta::QUEUE_TAIL)? {
            self.queue_tail = v;
        }
        Ok(())
    }
}
