//! Replicate seed derivation.

use std::collections::HashSet;

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

/// Largest replicate seed, inclusive.
pub const MAX_SEED: u64 = 1 << 31;

/// Derives `count` replicate seeds from a master seed.
///
/// The whole array is drawn from one generator in a single pass, so the
/// result depends only on `(master_seed, count)` and a shorter array is
/// always a prefix of a longer one. Repeated draws are skipped so every
/// replicate owns its own output directory.
pub fn derive_seeds(master_seed: u64, count: usize) -> Vec<u64> {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(master_seed);
    let mut seen = HashSet::with_capacity(count);
    let mut seeds = Vec::with_capacity(count);

    while seeds.len() < count {
        let seed = rng.random_range(1..=MAX_SEED);
        if seen.insert(seed) {
            seeds.push(seed);
        }
    }

    seeds
}
