//! Engine integration tests over the in-memory store.
//!
//! Each scenario builds a small explicit game graph, runs the full
//! four-phase solve, and checks the resulting values, counters, and
//! database invariants.

mod common;

use std::sync::Arc;

use bobail::game::Status;
use bobail::solver::schema::{Cf, Phase, StateInfo, Value};
use bobail::solver::store::{MemStore, Store};
use bobail::solver::Outcome;
use bobail::Solver;

use common::{GraphGame, StopAfter};

fn solve(game: GraphGame, store: Arc<MemStore>, threads: usize) -> Solver<GraphGame, Arc<MemStore>> {
    let mut solver = Solver::open(game, store).unwrap();
    solver.set_num_threads(threads);
    solver.set_bloom_bytes(64 * 1024);
    assert_eq!(solver.solve().unwrap(), Outcome::Completed);
    solver
}

/// Decode every record in the `states` column family.
fn all_states(store: &MemStore) -> Vec<StateInfo> {
    store
        .dump(Cf::States)
        .iter()
        .map(|(_, v)| StateInfo::decode(v).unwrap())
        .collect()
}

fn find_state(store: &MemStore, packed: u64) -> StateInfo {
    all_states(store)
        .into_iter()
        .find(|info| info.packed == packed)
        .expect("state not in database")
}

// ── Value computation ──

#[test]
fn one_ply_win() {
    let game = GraphGame::new(1)
        .node(1, &[2])
        .terminal(2, Status::MoverLoses);
    let store = Arc::new(MemStore::new());
    let solver = solve(game, store.clone(), 2);

    assert_eq!(solver.num_states(), 2);
    assert_eq!(solver.num_wins(), 1);
    assert_eq!(solver.num_losses(), 1);
    assert_eq!(solver.num_draws(), 0);
    assert_eq!(solver.starting_result().unwrap(), Value::Win);
    assert_eq!(solver.result(2).unwrap(), Value::Loss);
    assert_eq!(solver.best_move(1).unwrap(), Some(2));
}

#[test]
fn forced_loss_counts_winning_successors() {
    let game = GraphGame::new(1)
        .node(1, &[2, 3])
        .node(2, &[4])
        .node(3, &[4])
        .terminal(4, Status::MoverLoses);
    let store = Arc::new(MemStore::new());
    let solver = solve(game, store.clone(), 2);

    assert_eq!(solver.result(1).unwrap(), Value::Loss);
    assert_eq!(solver.result(2).unwrap(), Value::Win);
    assert_eq!(solver.result(3).unwrap(), Value::Win);

    // Every move of the root leads to an opponent win, and the record
    // proves it.
    let root = find_state(&store, 1);
    assert_eq!(root.result, Value::Loss);
    assert_eq!(root.num_successors, 2);
    assert_eq!(root.winning_succs, 2);
}

#[test]
fn cyclic_draw() {
    let game = GraphGame::new(10).node(10, &[11]).node(11, &[10]);
    let store = Arc::new(MemStore::new());
    let solver = solve(game, store, 2);

    assert_eq!(solver.num_states(), 2);
    assert_eq!(solver.num_draws(), 2);
    assert_eq!(solver.result(10).unwrap(), Value::Draw);
    assert_eq!(solver.result(11).unwrap(), Value::Draw);
    assert_eq!(solver.best_move(10).unwrap(), Some(11));
}

#[test]
fn terminal_starting_state() {
    let game = GraphGame::new(5).terminal(5, Status::MoverWins);
    let store = Arc::new(MemStore::new());
    let solver = solve(game, store.clone(), 2);

    assert_eq!(solver.num_states(), 1);
    assert_eq!(solver.num_wins(), 1);
    assert_eq!(solver.current_phase(), Phase::Complete);
    assert_eq!(solver.starting_result().unwrap(), Value::Win);
    assert_eq!(solver.best_move(5).unwrap(), None);

    let info = find_state(&store, 5);
    assert_eq!(info.num_successors, 0);
}

fn chain(n: u64) -> GraphGame {
    let mut game = GraphGame::new(1);
    for i in 1..n {
        game = game.node(i, &[i + 1]);
    }
    game.terminal(n, Status::MoverLoses)
}

#[test]
fn alternating_chain_resolves_backwards() {
    let store = Arc::new(MemStore::new());
    let solver = solve(chain(4), store, 2);

    assert_eq!(solver.result(4).unwrap(), Value::Loss);
    assert_eq!(solver.result(3).unwrap(), Value::Win);
    assert_eq!(solver.result(2).unwrap(), Value::Loss);
    assert_eq!(solver.result(1).unwrap(), Value::Win);
}

#[test]
fn best_move_prefers_proving_child() {
    // Child order puts a WIN child first; the winning move is the LOSS
    // child behind it.
    let game = GraphGame::new(1)
        .node(1, &[2, 3])
        .node(2, &[5])
        .terminal(5, Status::MoverLoses)
        .terminal(3, Status::MoverLoses);
    let store = Arc::new(MemStore::new());
    let solver = solve(game, store, 2);

    assert_eq!(solver.result(1).unwrap(), Value::Win);
    assert_eq!(solver.best_move(1).unwrap(), Some(3));
}

#[test]
fn best_move_holds_draw() {
    let game = GraphGame::new(1)
        .node(1, &[3, 2])
        .node(2, &[4])
        .node(4, &[2])
        .terminal(3, Status::MoverWins);
    let store = Arc::new(MemStore::new());
    let solver = solve(game, store, 2);

    assert_eq!(solver.result(1).unwrap(), Value::Draw);
    // 3 wins for the opponent; the only move that holds the draw is 2.
    assert_eq!(solver.best_move(1).unwrap(), Some(2));
}

// ── Database invariants ──

#[test]
fn registry_is_a_contiguous_bijection() {
    let game = GraphGame::new(1)
        .node(1, &[2, 3])
        .node(2, &[4])
        .node(3, &[4])
        .terminal(4, Status::MoverLoses);
    let store = Arc::new(MemStore::new());
    let solver = solve(game, store.clone(), 2);

    let states = store.dump(Cf::States);
    assert_eq!(states.len() as u64, solver.num_states());

    let mut ids: Vec<u32> = states
        .iter()
        .map(|(k, _)| u32::from_le_bytes(k.as_slice().try_into().unwrap()))
        .collect();
    ids.sort_unstable();
    let expected: Vec<u32> = (0..solver.num_states() as u32).collect();
    assert_eq!(ids, expected);

    // packed_to_id inverts states exactly.
    let reverse = store.dump(Cf::PackedToId);
    assert_eq!(reverse.len(), states.len());
    for (key, value) in &states {
        let info = StateInfo::decode(value).unwrap();
        let mapped = store
            .get(Cf::PackedToId, &info.packed.to_le_bytes())
            .unwrap()
            .expect("missing reverse mapping");
        assert_eq!(&mapped, key);
    }
}

#[test]
fn solve_on_complete_database_is_a_noop() {
    let game = || {
        GraphGame::new(1)
            .node(1, &[2, 3])
            .node(2, &[4])
            .node(3, &[4])
            .terminal(4, Status::MoverLoses)
    };
    let store = Arc::new(MemStore::new());
    let mut solver = solve(game(), store.clone(), 2);

    let before: Vec<_> = [
        Cf::States,
        Cf::PackedToId,
        Cf::Predecessors,
        Cf::Queue,
        Cf::Metadata,
    ]
    .iter()
    .map(|&cf| store.dump(cf))
    .collect();

    // Same instance.
    assert_eq!(solver.solve().unwrap(), Outcome::Completed);
    // Fresh instance over the same backing.
    let mut reopened = Solver::open(game(), store.clone()).unwrap();
    assert_eq!(reopened.solve().unwrap(), Outcome::Completed);

    let after: Vec<_> = [
        Cf::States,
        Cf::PackedToId,
        Cf::Predecessors,
        Cf::Queue,
        Cf::Metadata,
    ]
    .iter()
    .map(|&cf| store.dump(cf))
    .collect();
    assert_eq!(before, after);
}

#[test]
fn thread_count_does_not_change_the_database() {
    let game = || chain(12);

    let store_a = Arc::new(MemStore::new());
    solve(game(), store_a.clone(), 1);

    let store_b = Arc::new(MemStore::new());
    solve(game(), store_b.clone(), 4);

    assert_eq!(store_a.dump(Cf::States), store_b.dump(Cf::States));
    assert_eq!(store_a.dump(Cf::PackedToId), store_b.dump(Cf::PackedToId));
}

// ── Cancellation and resume ──

fn assert_cancel_resume_matches(stop_after: u64) {
    use std::sync::atomic::AtomicBool;

    // Uninterrupted reference run.
    let reference = Arc::new(MemStore::new());
    solve(chain(50), reference.clone(), 1);

    // Interrupted run: the wrapper raises the stop flag mid-phase.
    let store = Arc::new(MemStore::new());
    let stop = Arc::new(AtomicBool::new(false));
    let mut solver = Solver::open(
        StopAfter::new(chain(50), stop_after, stop.clone()),
        store.clone(),
    )
    .unwrap();
    solver.set_stop_flag(stop);
    solver.set_num_threads(1);
    solver.set_bloom_bytes(64 * 1024);
    assert_eq!(solver.solve().unwrap(), Outcome::Cancelled);
    assert!(solver.current_phase() < Phase::Complete);
    drop(solver);

    // Resume with the plain game and finish.
    let mut resumed = Solver::open(chain(50), store.clone()).unwrap();
    resumed.set_num_threads(1);
    resumed.set_bloom_bytes(64 * 1024);
    assert_eq!(resumed.solve().unwrap(), Outcome::Completed);

    assert_eq!(store.dump(Cf::States), reference.dump(Cf::States));
    assert_eq!(store.dump(Cf::PackedToId), reference.dump(Cf::PackedToId));
    assert_eq!(resumed.starting_result().unwrap(), Value::Win);
}

#[test]
fn cancel_during_enumeration_resumes_cleanly() {
    // The chain discovers one state per BFS batch, so call 25 lands halfway
    // through enumeration.
    assert_cancel_resume_matches(25);
}

#[test]
fn cancel_during_predecessor_build_resumes_cleanly() {
    // Enumeration classifies the 50 chain states once each; call 75 lands
    // in the middle of the predecessor build.
    assert_cancel_resume_matches(75);
}

#[test]
fn cancel_during_terminal_marking_resumes_cleanly() {
    // Calls 101..150 happen during the terminal scan.
    assert_cancel_resume_matches(125);
}
