//! Bloom filter gating the enumeration's duplicate checks.
//!
//! During the BFS, most generated successors already exist in the database.
//! A negative probe proves a state is new and skips the lookup entirely; a
//! positive probe only means "maybe", and those go through the batched
//! `packed_to_id` check. Correctness never depends on the filter — it is a
//! throughput device.
//!
//! Seven probes per key, derived by double hashing from two splitmix64-style
//! mixes of the key and a seed.

/// Number of probes per key.
const NUM_HASHES: u64 = 7;

#[inline]
fn mix64(mut x: u64) -> u64 {
    // splitmix64 finalizer.
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

/// Plain bit-array bloom filter.
pub struct BloomFilter {
    bits: Vec<u64>,
    num_bits: u64,
    seed: u64,
}

impl BloomFilter {
    /// Allocate a filter of `num_bytes` (rounded up to a whole word).
    pub fn new(num_bytes: usize, seed: u64) -> Self {
        let words = num_bytes.div_ceil(8).max(1);
        BloomFilter {
            bits: vec![0u64; words],
            num_bits: words as u64 * 64,
            seed,
        }
    }

    #[inline]
    fn probes(&self, key: u64) -> (u64, u64) {
        let h1 = mix64(key ^ self.seed);
        let h2 = mix64(h1 ^ key) | 1;
        (h1, h2)
    }

    pub fn insert(&mut self, key: u64) {
        let (h1, h2) = self.probes(key);
        for i in 0..NUM_HASHES {
            let bit = h1.wrapping_add(i.wrapping_mul(h2)) % self.num_bits;
            self.bits[(bit / 64) as usize] |= 1 << (bit % 64);
        }
    }

    /// False means the key was never inserted; true means it may have been.
    pub fn maybe_contains(&self, key: u64) -> bool {
        let (h1, h2) = self.probes(key);
        for i in 0..NUM_HASHES {
            let bit = h1.wrapping_add(i.wrapping_mul(h2)) % self.num_bits;
            if self.bits[(bit / 64) as usize] & (1 << (bit % 64)) == 0 {
                return false;
            }
        }
        true
    }
}
