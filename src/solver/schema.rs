//! Database schema: column families, key layouts, and the state record.
//!
//! All fixed-width integers are little-endian on disk. The `states` record
//! is exactly 13 bytes with no padding:
//!
//! | field            | width | meaning |
//! |------------------|-------|---------|
//! | `packed`         | 8 B   | canonical packed state |
//! | `result`         | 1 B   | UNKNOWN=0 WIN=1 LOSS=2 DRAW=3 |
//! | `num_successors` | 2 B   | legal move count (0 for terminals) |
//! | `winning_succs`  | 2 B   | successors proven WIN for their mover |

use crate::error::{SolverError, SolverResult};

// ── Column families ──

/// The five column families the solver uses (plus the backend's default CF,
/// which stays empty).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Cf {
    /// `id: u32` → [`StateInfo`] (13 B). Point reads and sequential scans.
    States,
    /// `packed: u64` → `id: u32`. Point reads, often batched.
    PackedToId,
    /// `id: u32 ∥ shard: u8` → sequence of `u32` predecessor ids.
    Predecessors,
    /// `index: u64` → `id: u32`. On-disk FIFO for BFS and the wave.
    Queue,
    /// String key → scalar or checkpoint blob.
    Metadata,
}

pub const ALL_CFS: [Cf; 5] = [
    Cf::States,
    Cf::PackedToId,
    Cf::Predecessors,
    Cf::Queue,
    Cf::Metadata,
];

impl Cf {
    pub fn name(self) -> &'static str {
        match self {
            Cf::States => "states",
            Cf::PackedToId => "packed_to_id",
            Cf::Predecessors => "predecessors",
            Cf::Queue => "queue",
            Cf::Metadata => "metadata",
        }
    }

    pub fn index(self) -> usize {
        match self {
            Cf::States => 0,
            Cf::PackedToId => 1,
            Cf::Predecessors => 2,
            Cf::Queue => 3,
            Cf::Metadata => 4,
        }
    }
}

// ── Metadata keys ──

pub mod meta {
    pub const PHASE: &str = "phase";
    pub const NUM_STATES: &str = "num_states";
    pub const NUM_WINS: &str = "num_wins";
    pub const NUM_LOSSES: &str = "num_losses";
    pub const NUM_DRAWS: &str = "num_draws";
    pub const START_ID: &str = "start_id";
    pub const ENUM_PROCESSED: &str = "enum_processed";
    pub const QUEUE_HEAD: &str = "queue_head";
    pub const QUEUE_TAIL: &str = "queue_tail";
    /// Phase 3 cursor blob: last processed key (4 B) ∥ wins (8 B) ∥ losses (8 B).
    pub const TERMINAL_CHECKPOINT: &str = "terminal_checkpoint";
    /// Phase 4 blob: head (8 B) ∥ tail (8 B) ∥ propagated (8 B).
    pub const PROP_CHECKPOINT: &str = "prop_checkpoint";
}

// ── Phases ──

/// Persistent phase counter. Advances monotonically 0→5; a resumed run
/// re-enters the recorded phase.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Debug)]
pub enum Phase {
    NotStarted = 0,
    Enumerating = 1,
    BuildingPredecessors = 2,
    MarkingTerminals = 3,
    Propagating = 4,
    Complete = 5,
}

impl Phase {
    pub fn from_u32(v: u32) -> SolverResult<Phase> {
        Ok(match v {
            0 => Phase::NotStarted,
            1 => Phase::Enumerating,
            2 => Phase::BuildingPredecessors,
            3 => Phase::MarkingTerminals,
            4 => Phase::Propagating,
            5 => Phase::Complete,
            _ => return Err(SolverError::Corrupt(format!("bad phase value {}", v))),
        })
    }
}

// ── Game-theoretic values ──

/// Value of a state for its side to move.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Value {
    Unknown = 0,
    Win = 1,
    Loss = 2,
    Draw = 3,
}

impl Value {
    pub fn from_u8(v: u8) -> SolverResult<Value> {
        Ok(match v {
            0 => Value::Unknown,
            1 => Value::Win,
            2 => Value::Loss,
            3 => Value::Draw,
            _ => return Err(SolverError::Corrupt(format!("bad result byte {}", v))),
        })
    }
}

// ── State record ──

/// On-disk size of a [`StateInfo`] record.
pub const STATE_INFO_LEN: usize = 13;

/// Fixed-size per-state record in the `states` column family.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct StateInfo {
    pub packed: u64,
    pub result: Value,
    pub num_successors: u16,
    pub winning_succs: u16,
}

impl StateInfo {
    /// Fresh record for a newly registered state.
    pub fn new(packed: u64) -> Self {
        StateInfo {
            packed,
            result: Value::Unknown,
            num_successors: 0,
            winning_succs: 0,
        }
    }

    pub fn encode(&self) -> [u8; STATE_INFO_LEN] {
        let mut buf = [0u8; STATE_INFO_LEN];
        buf[0..8].copy_from_slice(&self.packed.to_le_bytes());
        buf[8] = self.result as u8;
        buf[9..11].copy_from_slice(&self.num_successors.to_le_bytes());
        buf[11..13].copy_from_slice(&self.winning_succs.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> SolverResult<StateInfo> {
        if buf.len() != STATE_INFO_LEN {
            return Err(SolverError::Corrupt(format!(
                "state record has {} bytes, expected {}",
                buf.len(),
                STATE_INFO_LEN
            )));
        }
        Ok(StateInfo {
            packed: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            result: Value::from_u8(buf[8])?,
            num_successors: u16::from_le_bytes(buf[9..11].try_into().unwrap()),
            winning_succs: u16::from_le_bytes(buf[11..13].try_into().unwrap()),
        })
    }
}

// ── Key codecs ──

#[inline]
pub fn id_key(id: u32) -> [u8; 4] {
    id.to_le_bytes()
}

#[inline]
pub fn packed_key(packed: u64) -> [u8; 8] {
    packed.to_le_bytes()
}

#[inline]
pub fn queue_key(index: u64) -> [u8; 8] {
    index.to_le_bytes()
}

/// Number of predecessor shards; Phase 2 runs at most this many writers.
/// Readback probes every shard plus the legacy unsharded 4-byte key.
pub const NUM_PRED_SHARDS: usize = 16;

/// Compound predecessor key: state id followed by the writer's shard byte.
#[inline]
pub fn pred_shard_key(id: u32, shard: u8) -> [u8; 5] {
    let mut key = [0u8; 5];
    key[0..4].copy_from_slice(&id.to_le_bytes());
    key[4] = shard;
    key
}

#[inline]
pub fn decode_u32(buf: &[u8]) -> SolverResult<u32> {
    buf.try_into()
        .map(u32::from_le_bytes)
        .map_err(|_| SolverError::Corrupt(format!("expected 4-byte value, got {}", buf.len())))
}

#[inline]
pub fn decode_u64(buf: &[u8]) -> SolverResult<u64> {
    buf.try_into()
        .map(u64::from_le_bytes)
        .map_err(|_| SolverError::Corrupt(format!("expected 8-byte value, got {}", buf.len())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_info_round_trip() {
        let info = StateInfo {
            packed: 0x00AB_CDEF_0123_4567,
            result: Value::Loss,
            num_successors: 321,
            winning_succs: 320,
        };
        let buf = info.encode();
        assert_eq!(buf.len(), STATE_INFO_LEN);
        assert_eq!(StateInfo::decode(&buf).unwrap(), info);
    }

    #[test]
    fn state_info_layout_is_fixed() {
        let info = StateInfo {
            packed: 1,
            result: Value::Win,
            num_successors: 0x0201,
            winning_succs: 0x0403,
        };
        let buf = info.encode();
        assert_eq!(&buf[0..8], &[1, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(buf[8], 1);
        assert_eq!(&buf[9..11], &[0x01, 0x02]);
        assert_eq!(&buf[11..13], &[0x03, 0x04]);
    }

    #[test]
    fn truncated_record_is_rejected() {
        assert!(StateInfo::decode(&[0u8; 12]).is_err());
        assert!(StateInfo::decode(&[0u8; 14]).is_err());
    }

    #[test]
    fn bad_result_byte_is_rejected() {
        let mut buf = StateInfo::new(7).encode();
        buf[8] = 9;
        assert!(StateInfo::decode(&buf).is_err());
    }

    #[test]
    fn pred_shard_key_layout() {
        let key = pred_shard_key(0x0403_0201, 7);
        assert_eq!(key, [0x01, 0x02, 0x03, 0x04, 7]);
    }

    #[test]
    fn phase_round_trip() {
        for v in 0..=5u32 {
            assert_eq!(Phase::from_u32(v).unwrap() as u32, v);
        }
        assert!(Phase::from_u32(6).is_err());
    }
}
