//! Legacy checkpoint import tests.

mod common;

use std::io::Write as _;
use std::sync::Arc;

use bobail::game::Status;
use bobail::solver::schema::Cf;
use bobail::solver::store::MemStore;
use bobail::solver::Outcome;
use bobail::Solver;

use common::GraphGame;

fn chain(n: u64) -> GraphGame {
    let mut game = GraphGame::new(1);
    for i in 1..n {
        game = game.node(i, &[i + 1]);
    }
    game.terminal(n, Status::MoverLoses)
}

/// A checkpoint of chain(3) taken right after the states were registered:
/// three UNKNOWN records, the whole queue still pending, phase ENUMERATING.
fn chain3_checkpoint() -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(b"BBCK");
    buf.extend_from_slice(&1u32.to_le_bytes()); // version
    buf.extend_from_slice(&1u32.to_le_bytes()); // phase = ENUMERATING
    buf.extend_from_slice(&0u64.to_le_bytes()); // num_wins
    buf.extend_from_slice(&0u64.to_le_bytes()); // num_losses
    buf.extend_from_slice(&0u64.to_le_bytes()); // num_draws
    buf.extend_from_slice(&0u32.to_le_bytes()); // start_id
    buf.extend_from_slice(&0u64.to_le_bytes()); // enum_processed
    buf.extend_from_slice(&3u64.to_le_bytes()); // num_states
    for packed in [1u64, 2, 3] {
        buf.extend_from_slice(&packed.to_le_bytes());
        buf.push(0); // result = UNKNOWN
        buf.extend_from_slice(&0u16.to_le_bytes()); // num_successors
        buf.extend_from_slice(&0u16.to_le_bytes()); // winning_succs
    }
    buf.extend_from_slice(&3u64.to_le_bytes()); // queue_size
    for id in [0u32, 1, 2] {
        buf.extend_from_slice(&id.to_le_bytes());
    }
    buf
}

#[test]
fn import_then_solve_matches_fresh_solve() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&chain3_checkpoint()).unwrap();
    file.flush().unwrap();

    let imported = Arc::new(MemStore::new());
    let mut solver = Solver::open(chain(3), imported.clone()).unwrap();
    solver.set_num_threads(1);
    solver.set_bloom_bytes(64 * 1024);
    solver.import_checkpoint(file.path()).unwrap();
    assert_eq!(solver.num_states(), 3);
    assert_eq!(solver.solve().unwrap(), Outcome::Completed);

    let fresh = Arc::new(MemStore::new());
    let mut reference = Solver::open(chain(3), fresh.clone()).unwrap();
    reference.set_num_threads(1);
    reference.set_bloom_bytes(64 * 1024);
    assert_eq!(reference.solve().unwrap(), Outcome::Completed);

    assert_eq!(imported.dump(Cf::States), fresh.dump(Cf::States));
    assert_eq!(imported.dump(Cf::PackedToId), fresh.dump(Cf::PackedToId));
}

#[test]
fn rejects_bad_magic_and_truncation() {
    let good = chain3_checkpoint();

    let mut bad_magic = good.clone();
    bad_magic[0] = b'X';
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&bad_magic).unwrap();
    let store = Arc::new(MemStore::new());
    let mut solver = Solver::open(chain(3), store).unwrap();
    assert!(solver.import_checkpoint(file.path()).is_err());

    let truncated = &good[..good.len() - 2];
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(truncated).unwrap();
    let store = Arc::new(MemStore::new());
    let mut solver = Solver::open(chain(3), store).unwrap();
    assert!(solver.import_checkpoint(file.path()).is_err());
}
