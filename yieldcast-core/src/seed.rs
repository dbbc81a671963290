//! Deterministic seed derivation.
//!
//! A master seed expands into labelled sub-seeds via BLAKE3 hashing, so
//! every consumer (one RNG per ensemble tree, today) gets an independent
//! stream whose value does not depend on derivation order.

use rand::rngs::StdRng;
use rand::SeedableRng;

/// Hash-based seed hierarchy rooted at a master seed.
#[derive(Debug, Clone)]
pub struct SeedHierarchy {
    master_seed: u64,
}

impl SeedHierarchy {
    pub fn new(master_seed: u64) -> Self {
        Self { master_seed }
    }

    pub fn master_seed(&self) -> u64 {
        self.master_seed
    }

    /// Derive the sub-seed for `(label, index)`.
    pub fn sub_seed(&self, label: &str, index: u64) -> u64 {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.master_seed.to_le_bytes());
        hasher.update(label.as_bytes());
        hasher.update(&index.to_le_bytes());
        let hash = hasher.finalize();
        u64::from_le_bytes(hash.as_bytes()[..8].try_into().unwrap())
    }

    /// Seeded RNG for `(label, index)`.
    pub fn rng_for(&self, label: &str, index: u64) -> StdRng {
        StdRng::seed_from_u64(self.sub_seed(label, index))
    }
}
