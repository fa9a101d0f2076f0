//! Deterministic candidate generators.
//!
//! All samplers work in the unit hypercube and map onto the declared bounds
//! through [`SearchSpace::from_unit`], which clamps. Randomness comes only
//! from the seed they are constructed with.

use rand::seq::SliceRandom;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use scout_types::{ConfigError, SearchSpace};

use crate::seeding;

/// Named sampling method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplingMethod {
    Uniform,
    Lhs,
    Halton,
    Grid,
}

impl SamplingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uniform => "uniform",
            Self::Lhs => "lhs",
            Self::Halton => "halton",
            Self::Grid => "grid",
        }
    }
}

impl FromStr for SamplingMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "uniform" | "random" => Ok(Self::Uniform),
            "lhs" | "latin_hypercube" => Ok(Self::Lhs),
            "halton" => Ok(Self::Halton),
            "grid" => Ok(Self::Grid),
            other => Err(ConfigError::UnknownMethod {
                method: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for SamplingMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Unit-cube generators
// ---------------------------------------------------------------------------

/// First `n` primes, used as Halton bases.
pub fn first_primes(n: usize) -> Vec<u64> {
    let mut primes = Vec::with_capacity(n);
    let mut candidate = 2u64;
    while primes.len() < n {
        if primes.iter().take_while(|p| *p * *p <= candidate).all(|p| candidate % p != 0) {
            primes.push(candidate);
        }
        candidate += 1;
    }
    primes
}

/// Van der Corput radical inverse of `index` in `base`.
pub fn radical_inverse(mut index: u64, base: u64) -> f64 {
    let inv = 1.0 / base as f64;
    let mut f = inv;
    let mut value = 0.0;
    while index > 0 {
        value += (index % base) as f64 * f;
        index /= base;
        f *= inv;
    }
    value
}

/// Seed-derived starting offset into the Halton sequence.
pub fn halton_skip(seed: u64) -> u64 {
    seeding::rng(seed).gen_range(1..=1024)
}

/// `n` Halton points in `[0,1)^dims`, starting after the seed's skip.
pub fn halton(seed: u64, dims: usize, n: usize) -> Vec<Vec<f64>> {
    halton_from(halton_skip(seed), dims, n)
}

fn halton_from(start: u64, dims: usize, n: usize) -> Vec<Vec<f64>> {
    let bases = first_primes(dims);
    (0..n as u64)
        .map(|i| {
            bases
                .iter()
                .map(|b| radical_inverse(start + i, *b))
                .collect()
        })
        .collect()
}

/// `n` Latin-hypercube points: one per stratum per dimension, strata
/// independently permuted.
pub fn latin_hypercube(rng: &mut ChaCha8Rng, dims: usize, n: usize) -> Vec<Vec<f64>> {
    let mut points = vec![vec![0.0; dims]; n];
    for d in 0..dims {
        let mut strata: Vec<usize> = (0..n).collect();
        strata.shuffle(rng);
        for (point, k) in points.iter_mut().zip(strata) {
            let u: f64 = rng.gen();
            point[d] = (k as f64 + u) / n as f64;
        }
    }
    points
}

/// `n` independent uniform points.
pub fn uniform(rng: &mut ChaCha8Rng, dims: usize, n: usize) -> Vec<Vec<f64>> {
    (0..n)
        .map(|_| (0..dims).map(|_| rng.gen::<f64>()).collect())
        .collect()
}

/// Points per axis of the smallest full grid holding at least `n` points.
pub fn grid_levels(dims: usize, n: usize) -> usize {
    if dims == 0 || n <= 1 {
        return 1;
    }
    let mut k = 1usize;
    loop {
        let total = (0..dims).try_fold(1usize, |acc, _| acc.checked_mul(k));
        match total {
            Some(t) if t >= n => return k,
            None => return k,
            _ => k += 1,
        }
    }
}

/// Evenly spaced grid over the unit cube, truncated to `n` points in
/// lexicographic order (last dimension fastest).
pub fn grid(dims: usize, n: usize) -> Vec<Vec<f64>> {
    let k = grid_levels(dims, n);
    let level = |j: usize| {
        if k == 1 {
            0.5
        } else {
            j as f64 / (k - 1) as f64
        }
    };
    let mut points = Vec::with_capacity(n);
    let mut digits = vec![0usize; dims];
    while points.len() < n {
        points.push(digits.iter().map(|j| level(*j)).collect());
        // Odometer increment.
        let mut d = dims;
        loop {
            if d == 0 {
                return points;
            }
            d -= 1;
            digits[d] += 1;
            if digits[d] < k {
                break;
            }
            digits[d] = 0;
        }
    }
    points
}

// ---------------------------------------------------------------------------
// Stateful samplers
// ---------------------------------------------------------------------------

/// Common trait for deterministic candidate generators.
pub trait CandidateSampler: Send + Sync {
    /// Generate the next batch of vectors, already inside the bounds.
    /// Returns fewer than `count` only when the sampler is finite and drained.
    fn sample(&mut self, count: usize) -> Vec<Vec<f64>>;

    /// Human-readable sampler name.
    fn name(&self) -> &str;
}

/// Halton low-discrepancy sampler.
#[derive(Debug, Clone)]
pub struct HaltonSampler {
    space: SearchSpace,
    cursor: u64,
}

impl HaltonSampler {
    pub fn new(space: SearchSpace, seed: u64) -> Self {
        Self {
            space,
            cursor: halton_skip(seed),
        }
    }
}

impl CandidateSampler for HaltonSampler {
    fn sample(&mut self, count: usize) -> Vec<Vec<f64>> {
        let batch = halton_from(self.cursor, self.space.dims(), count);
        self.cursor += count as u64;
        batch.iter().map(|u| self.space.from_unit(u)).collect()
    }

    fn name(&self) -> &str {
        "halton"
    }
}

/// Independent uniform sampling.
#[derive(Debug, Clone)]
pub struct UniformSampler {
    space: SearchSpace,
    rng: ChaCha8Rng,
}

impl UniformSampler {
    pub fn new(space: SearchSpace, seed: u64) -> Self {
        Self {
            space,
            rng: seeding::rng(seed),
        }
    }
}

impl CandidateSampler for UniformSampler {
    fn sample(&mut self, count: usize) -> Vec<Vec<f64>> {
        uniform(&mut self.rng, self.space.dims(), count)
            .iter()
            .map(|u| self.space.from_unit(u))
            .collect()
    }

    fn name(&self) -> &str {
        "uniform"
    }
}

/// A finite, precomputed design (Latin hypercube or grid) served in order.
#[derive(Debug, Clone)]
pub struct DesignSampler {
    name: &'static str,
    points: Vec<Vec<f64>>,
    cursor: usize,
}

impl DesignSampler {
    pub fn latin_hypercube(space: &SearchSpace, seed: u64, total: usize) -> Self {
        let mut rng = seeding::rng(seed);
        let points = latin_hypercube(&mut rng, space.dims(), total)
            .iter()
            .map(|u| space.from_unit(u))
            .collect();
        Self {
            name: "lhs",
            points,
            cursor: 0,
        }
    }

    pub fn grid(space: &SearchSpace, total: usize) -> Self {
        let points = grid(space.dims(), total)
            .iter()
            .map(|u| space.from_unit(u))
            .collect();
        Self {
            name: "grid",
            points,
            cursor: 0,
        }
    }
}

impl CandidateSampler for DesignSampler {
    fn sample(&mut self, count: usize) -> Vec<Vec<f64>> {
        let end = (self.cursor + count).min(self.points.len());
        let batch = self.points[self.cursor..end].to_vec();
        self.cursor = end;
        batch
    }

    fn name(&self) -> &str {
        self.name
    }
}

/// Build the sampler for `method` sized for `total` points.
pub fn build_sampler(
    method: SamplingMethod,
    space: &SearchSpace,
    seed: u64,
    total: usize,
) -> Box<dyn CandidateSampler> {
    match method {
        SamplingMethod::Uniform => Box::new(UniformSampler::new(space.clone(), seed)),
        SamplingMethod::Halton => Box::new(HaltonSampler::new(space.clone(), seed)),
        SamplingMethod::Lhs => Box::new(DesignSampler::latin_hypercube(space, seed, total)),
        SamplingMethod::Grid => Box::new(DesignSampler::grid(space, total)),
    }
}
