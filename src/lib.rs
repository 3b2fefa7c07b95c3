//! # Bobail — strong solver via out-of-core retrograde analysis
//!
//! Computes the exact game-theoretic value (WIN, LOSS, DRAW) of every
//! position reachable in *Bobail*, a two-player perfect-information game on
//! a 5×5 board. The reachable space runs to hundreds of millions of states,
//! so the solve runs **out of core** over a RocksDB database, incrementally,
//! resumably, and in parallel.
//!
//! ## Pipeline
//!
//! | Phase | Module | Description |
//! |-------|--------|-------------|
//! | 1 | [`solver::enumerate`](solver) | BFS over canonical states; the frontier is an on-disk queue |
//! | 2 | [`solver::predecessors`](solver) | Invert the successor graph with sharded streaming writes |
//! | 3 | [`solver::terminals`](solver) | Mark WIN/LOSS terminals for the side to move |
//! | 4 | [`solver::propagate`](solver) | Retrograde wave to the fixpoint; the rest is DRAW |
//!
//! A persisted phase counter plus per-phase checkpoints make any run
//! killable and resumable. After `solve()` completes, [`Solver::result`]
//! and [`Solver::best_move`] answer queries for arbitrary positions.
//!
//! ## State identity
//!
//! Positions are packed into 56 bits ([`board::State::pack`]) and identified
//! up to the board's goal-preserving symmetry ([`symmetry::canonicalize`]).
//! The engine itself ([`solver::Solver`]) is generic over the game rules
//! ([`game::Game`]) and the storage backend ([`solver::store::Store`]).

pub mod board;
pub mod env_config;
pub mod error;
pub mod game;
pub mod movegen;
pub mod solver;
pub mod symmetry;

pub use error::{SolverError, SolverResult};
pub use solver::{Outcome, Solver};
