//! Deterministic RNG hierarchy.
//!
//! A master seed generates deterministic sub-seeds for each `(stream, k, restart)`
//! tuple. Sub-seeds are derived via BLAKE3 hashing, so a clustering fit for a
//! given `k` and restart is reproducible no matter which other fits ran first
//! or on which worker thread.

use rand::rngs::StdRng;
use rand::SeedableRng;

#[derive(Debug, Clone)]
pub struct RngHierarchy {
    master_seed: u64,
}

impl RngHierarchy {
    pub fn new(master_seed: u64) -> Self {
        Self { master_seed }
    }

    pub fn master_seed(&self) -> u64 {
        self.master_seed
    }

    /// Derive a deterministic sub-seed for a specific (stream, k, restart).
    pub fn sub_seed(&self, stream: &str, k: usize, restart: usize) -> u64 {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.master_seed.to_le_bytes());
        hasher.update(stream.as_bytes());
        hasher.update(&(k as u64).to_le_bytes());
        hasher.update(&(restart as u64).to_le_bytes());
        let hash = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&hash.as_bytes()[..8]);
        u64::from_le_bytes(bytes)
    }

    /// Create a seeded StdRng from a sub-seed.
    pub fn rng_for(&self, stream: &str, k: usize, restart: usize) -> StdRng {
        StdRng::seed_from_u64(self.sub_seed(stream, k, restart))
    }
}
