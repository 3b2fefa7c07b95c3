//! One-shot importer for the legacy file-based checkpoint format.
//!
//! Layout (all little-endian):
//!
//! ```text
//! magic[4] = "BBCK"
//! version: u32 = 1
//! phase: u32
//! num_wins: u64, num_losses: u64, num_draws: u64
//! start_id: u32
//! enum_processed: u64
//! num_states: u64
//!   num_states × { packed: u64, result: u8, num_successors: u16, winning_succs: u16 }
//! queue_size: u64
//!   queue_size × { id: u32 }
//! ```
//!
//! Import populates `states`, `packed_to_id`, `queue`, and the metadata
//! scalars. It does not populate `predecessors`; Phase 2 is re-run against
//! the imported states.

use std::fs::File;
use std::path::Path;

use memmap2::Mmap;

use crate::error::{SolverError, SolverResult};
use crate::game::Game;

use super::schema::{self, Cf, Phase, StateInfo, STATE_INFO_LEN};
use super::store::{Store, WriteBatch};
use super::Solver;

const MAGIC: &[u8; 4] = b"BBCK";
const VERSION: u32 = 1;
const HEADER_LEN: usize = 56;
const IMPORT_BATCH: usize = 10_000;

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> SolverResult<&'a [u8]> {
        if self.pos + n > self.data.len() {
            return Err(SolverError::Import(format!(
                "truncated checkpoint: need {} bytes at offset {}",
                n, self.pos
            )));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u32(&mut self) -> SolverResult<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> SolverResult<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }
}

impl<G: Game, S: Store> Solver<G, S> {
    /// Import a legacy checkpoint file into an empty database.
    pub fn import_checkpoint(&mut self, path: impl AsRef<Path>) -> SolverResult<()> {
        let file = File::open(path.as_ref())?;
        let mmap = unsafe { Mmap::map(&file) }?;
        let mut r = Reader {
            data: &mmap[..],
            pos: 0,
        };

        if r.take(4)? != MAGIC {
            return Err(SolverError::Import("bad magic".into()));
        }
        let version = r.u32()?;
        if version != VERSION {
            return Err(SolverError::Import(format!(
                "unsupported version {}",
                version
            )));
        }

        let phase = Phase::from_u32(r.u32()?)?;
        let num_wins = r.u64()?;
        let num_losses = r.u64()?;
        let num_draws = r.u64()?;
        let start_id = r.u32()?;
        let enum_processed = r.u64()?;
        let num_states = r.u64()?;

        // The record and queue sections are length-prefixed; check the whole
        // file adds up before writing anything.
        let queue_count_off = HEADER_LEN + num_states as usize * STATE_INFO_LEN;
        if mmap.len() < queue_count_off + 8 {
            return Err(SolverError::Import(format!(
                "file of {} bytes too small for {} states",
                mmap.len(),
                num_states
            )));
        }
        let queue_size = u64::from_le_bytes(
            mmap[queue_count_off..queue_count_off + 8]
                .try_into()
                .unwrap(),
        );
        let expected = queue_count_off + 8 + queue_size as usize * 4;
        if mmap.len() != expected {
            return Err(SolverError::Import(format!(
                "file size mismatch: expected {}, got {}",
                expected,
                mmap.len()
            )));
        }

        println!("Importing {} states from checkpoint...", num_states);
        let mut batch = WriteBatch::new();
        for i in 0..num_states {
            let info = StateInfo::decode(r.take(STATE_INFO_LEN)?)?;
            batch.put(Cf::States, schema::id_key(i as u32), info.encode());
            batch.put(
                Cf::PackedToId,
                schema::packed_key(info.packed),
                schema::id_key(i as u32),
            );

            if (i + 1) % IMPORT_BATCH as u64 == 0 {
                self.store.write(std::mem::take(&mut batch))?;
                if (i + 1) % 1_000_000 == 0 {
                    println!("  {} / {} states", i + 1, num_states);
                }
            }
        }
        self.store.write(std::mem::take(&mut batch))?;

        println!("Importing queue of {} entries...", queue_size);
        r.u64()?; // queue_size, already read above
        for i in 0..queue_size {
            let id = r.u32()?;
            batch.put(Cf::Queue, schema::queue_key(i), schema::id_key(id));
            if (i + 1) % IMPORT_BATCH as u64 == 0 {
                self.store.write(std::mem::take(&mut batch))?;
            }
        }
        self.store.write(batch)?;

        self.phase = phase;
        self.num_states = num_states;
        self.num_wins = num_wins;
        self.num_losses = num_losses;
        self.num_draws = num_draws;
        self.start_id = start_id;
        self.enum_processed = enum_processed;
        self.queue_head = 0;
        self.queue_tail = queue_size;
        self.save_metadata()?;

        println!(
            "Import complete: {} states, {} queue entries",
            num_states, queue_size
        );
        Ok(())
    }
}
