//! Audit-scan tests: clean databases verify clean, corrupted ones do not.

mod common;

use std::sync::Arc;

use bobail::game::Status;
use bobail::solver::schema::{Cf, StateInfo, Value};
use bobail::solver::store::{MemStore, Store};
use bobail::solver::Outcome;
use bobail::Solver;

use common::GraphGame;

fn diamond() -> GraphGame {
    GraphGame::new(1)
        .node(1, &[2, 3])
        .node(2, &[4])
        .node(3, &[4])
        .terminal(4, Status::MoverLoses)
}

fn solved_solver() -> (Solver<GraphGame, Arc<MemStore>>, Arc<MemStore>) {
    let store = Arc::new(MemStore::new());
    let mut solver = Solver::open(diamond(), store.clone()).unwrap();
    solver.set_num_threads(2);
    solver.set_bloom_bytes(64 * 1024);
    assert_eq!(solver.solve().unwrap(), Outcome::Completed);
    (solver, store)
}

#[test]
fn clean_database_passes_all_audits() {
    let (solver, _store) = solved_solver();

    let registry = solver.verify_registry().unwrap();
    assert!(registry.is_clean(), "{:?}", registry.issues);
    assert_eq!(registry.states_checked, 4);

    let preds = solver.verify_predecessors().unwrap();
    assert!(preds.is_clean(), "{:?}", preds.issues);
    assert_eq!(preds.edges_checked, 4);

    let results = solver.verify_results().unwrap();
    assert!(results.is_clean(), "{:?}", results.issues);
}

#[test]
fn flipped_result_is_detected() {
    let (solver, store) = solved_solver();

    // Flip the terminal's LOSS to WIN behind the solver's back.
    let (key, value) = store
        .dump(Cf::States)
        .into_iter()
        .find(|(_, v)| StateInfo::decode(v).unwrap().packed == 4)
        .unwrap();
    let mut info = StateInfo::decode(&value).unwrap();
    info.result = Value::Win;
    store.put(Cf::States, &key, &info.encode()).unwrap();

    let report = solver.verify_results().unwrap();
    assert!(!report.is_clean());
}

#[test]
fn missing_reverse_mapping_is_detected() {
    let (solver, store) = solved_solver();

    store
        .delete(Cf::PackedToId, &2u64.to_le_bytes())
        .unwrap();

    let report = solver.verify_registry().unwrap();
    assert!(!report.is_clean());
    assert!(report
        .issues
        .iter()
        .any(|msg| msg.contains("no reverse mapping") || msg.contains("packed_to_id")));
}

#[test]
fn dropped_edge_is_detected() {
    let (solver, store) = solved_solver();

    // Erase every predecessor shard of the terminal state.
    let terminal_key = store
        .dump(Cf::States)
        .into_iter()
        .find(|(_, v)| StateInfo::decode(v).unwrap().packed == 4)
        .unwrap()
        .0;
    let doomed: Vec<Vec<u8>> = store
        .dump(Cf::Predecessors)
        .into_iter()
        .map(|(k, _)| k)
        .filter(|k| k.starts_with(&terminal_key))
        .collect();
    assert!(!doomed.is_empty());
    for key in doomed {
        store.delete(Cf::Predecessors, &key).unwrap();
    }

    let report = solver.verify_predecessors().unwrap();
    assert!(!report.is_clean());
}
