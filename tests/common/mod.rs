#![allow(dead_code)] // each test crate uses a different subset

//! Toy games for exercising the engine without a real board.
//!
//! A [`GraphGame`] is an explicit directed graph over `u64` states: moves
//! *are* the successor states, canonicalization is the identity, and
//! terminal classification is declared per state. This makes every solver
//! scenario constructible in a few lines.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bobail::game::{Game, Status};

#[derive(Default)]
pub struct GraphGame {
    start: u64,
    status: HashMap<u64, Status>,
    edges: HashMap<u64, Vec<u64>>,
}

impl GraphGame {
    pub fn new(start: u64) -> Self {
        GraphGame {
            start,
            ..Default::default()
        }
    }

    /// Declare a non-terminal state and its successors.
    pub fn node(mut self, state: u64, succs: &[u64]) -> Self {
        self.status.insert(state, Status::Ongoing);
        self.edges.insert(state, succs.to_vec());
        self
    }

    /// Declare a terminal state with the given classification for its mover.
    pub fn terminal(mut self, state: u64, status: Status) -> Self {
        self.status.insert(state, status);
        self.edges.insert(state, Vec::new());
        self
    }
}

impl Game for GraphGame {
    type Move = u64;

    fn starting_state(&self) -> u64 {
        self.start
    }

    fn canonicalize(&self, packed: u64) -> u64 {
        packed
    }

    fn status(&self, packed: u64) -> Status {
        self.status.get(&packed).copied().unwrap_or(Status::Ongoing)
    }

    fn legal_moves(&self, packed: u64) -> Vec<u64> {
        self.edges.get(&packed).cloned().unwrap_or_default()
    }

    fn apply(&self, _packed: u64, mv: u64) -> u64 {
        mv
    }
}

/// Wrapper that raises a stop flag after a fixed number of `status` calls,
/// simulating an interrupt landing mid-phase.
pub struct StopAfter<G> {
    inner: G,
    remaining: AtomicU64,
    stop: Arc<AtomicBool>,
}

impl<G: Game> StopAfter<G> {
    pub fn new(inner: G, calls: u64, stop: Arc<AtomicBool>) -> Self {
        StopAfter {
            inner,
            remaining: AtomicU64::new(calls),
            stop,
        }
    }
}

impl<G: Game> Game for StopAfter<G> {
    type Move = G::Move;

    fn starting_state(&self) -> u64 {
        self.inner.starting_state()
    }

    fn canonicalize(&self, packed: u64) -> u64 {
        self.inner.canonicalize(packed)
    }

    fn status(&self, packed: u64) -> Status {
        if self.remaining.fetch_sub(1, Ordering::Relaxed) == 1 {
            self.stop.store(true, Ordering::Relaxed);
        }
        self.inner.status(packed)
    }

    fn legal_moves(&self, packed: u64) -> Vec<Self::Move> {
        self.inner.legal_moves(packed)
    }

    fn apply(&self, packed: u64, mv: Self::Move) -> u64 {
        self.inner.apply(packed, mv)
    }
}
