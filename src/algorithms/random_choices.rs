use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::config::PartitionConfig;

// Power of two, so lookups can mask instead of divide. Large enough that
// unrelated (vertex, round) pairs rarely share an entry, small enough to stay
// cache resident.
const TABLE_SIZE: usize = 4096;

// Odd constants keep the index mix bijective on the vertex and round inputs.
const VERTEX_STRIDE: u64 = 0x9e37_79b9_7f4a_7c15;
const ROUND_STRIDE: u64 = 0xc2b2_ae3d_27d4_eb4f;

/// A process-wide table of precomputed random words for tie-breaking.
///
/// Lookups are pure: the same `(vertex, round)` pair always maps to the same
/// word, so replaying a round replays its choices. Each process fills its
/// table from its own derived seed; rank 0 keeps the configured seed and rank
/// r uses `seed * size + r`, so runs are reproducible per process count while
/// the per-process streams stay distinct.
pub struct RandomChoiceTable {
    values: Vec<u64>,
}

impl RandomChoiceTable {
    /// Fills the table from the per-process seed.
    pub fn generate(config: &PartitionConfig, rank: usize, size: usize) -> Self {
        let mut rng = SmallRng::seed_from_u64(rank_seed(config.seed, rank, size));
        let values = (0..TABLE_SIZE).map(|_| rng.gen::<u64>()).collect();
        Self { values }
    }

    /// The random word assigned to a `(vertex, round)` pair.
    pub fn next_choice(&self, vertex: usize, round: usize) -> u64 {
        let mix = (vertex as u64).wrapping_mul(VERTEX_STRIDE)
            ^ (round as u64).wrapping_mul(ROUND_STRIDE);
        self.values[(mix as usize) & (TABLE_SIZE - 1)]
    }
}

fn rank_seed(seed: u64, rank: usize, size: usize) -> u64 {
    if rank == 0 {
        seed
    } else {
        seed.wrapping_mul(size as u64).wrapping_add(rank as u64)
    }
}
