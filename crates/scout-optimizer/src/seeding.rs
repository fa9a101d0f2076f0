//! Per-phase RNG derivation.
//!
//! Every stage draws from its own ChaCha8 stream seeded from the run's base
//! seed, a fixed offset for the kind of phase and the stage's position in
//! the plan. Nothing reads the clock or thread-local entropy.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Separates the streams of two stages of the same kind.
pub const STAGE_STRIDE: u64 = 1009;

/// Which family of phase a stage belongs to, for seed offsetting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseKind {
    Sampling,
    Global,
    Surrogate,
    Local,
    Surf,
}

impl PhaseKind {
    pub fn offset(self) -> u64 {
        match self {
            Self::Sampling | Self::Global => 0,
            Self::Surrogate => 11,
            Self::Local => 23,
            Self::Surf => 101,
        }
    }
}

/// Seed for one stage. An explicit stage seed always wins.
pub fn phase_seed(base: u64, kind: PhaseKind, stage_index: usize, explicit: Option<u64>) -> u64 {
    explicit.unwrap_or_else(|| {
        base.wrapping_add(kind.offset())
            .wrapping_add(STAGE_STRIDE.wrapping_mul(stage_index as u64))
    })
}

pub fn rng(seed: u64) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed)
}
