//! Feasible-first differential evolution.
//!
//! DE/rand/1/bin with selection on the feasible-first key: a trial replaces
//! its parent only if `key(trial) < key(parent)`, so any feasible point beats
//! any infeasible one and infeasible points compete on violation. With a
//! small probability a domain-shaped move replaces the DE mutation:
//!
//! - scale a random third of the dimensions together,
//! - trade two dimensions against each other,
//! - jitter every dimension slightly (relief),
//! - pull toward the box centre.
//!
//! A whole generation is one batch; selection only happens after every trial
//! of the generation has been evaluated.

use rand::seq::SliceRandom;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use tracing::debug;

use scout_types::{FeasibleKey, SearchSpace};

use crate::config::StageSpec;
use crate::phase::PhaseContext;

/// Smallest population DE/rand/1 can mutate (parent plus three donors).
pub const MIN_DE_POPULATION: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub struct DifferentialEvolution {
    pub population_size: usize,
    pub generations: Option<usize>,
    pub mutation_factor: f64,
    pub crossover_rate: f64,
    pub operator_rate: f64,
}

impl From<&StageSpec> for DifferentialEvolution {
    fn from(stage: &StageSpec) -> Self {
        Self {
            population_size: stage.population_size,
            generations: stage.generations,
            mutation_factor: stage.mutation_factor,
            crossover_rate: stage.crossover_rate,
            operator_rate: stage.operator_rate,
        }
    }
}

struct Member {
    x: Vec<f64>,
    key: FeasibleKey,
}

impl DifferentialEvolution {
    /// Population and generation count that fit `budget` evaluations.
    ///
    /// The initial population counts as the first generation, so at most
    /// `population * generations <= budget` oracle calls are made.
    pub fn plan(&self, budget: usize) -> (usize, usize) {
        let population = self.population_size.min(budget);
        if population == 0 {
            return (0, 0);
        }
        let max_generations = budget / population;
        let generations = self
            .generations
            .unwrap_or(max_generations)
            .clamp(1, max_generations.max(1));
        (population, generations)
    }

    /// Run the search inside `ctx`, starting around `anchor`.
    pub fn run(&self, ctx: &mut PhaseContext<'_>, rng: &mut ChaCha8Rng, anchor: &[f64]) {
        let (population, generations) = self.plan(ctx.stage_remaining());
        if population == 0 {
            return;
        }
        let space = ctx.space().clone();
        let initial = initial_population(&space, anchor, population, rng);
        let Some(evaluated) = ctx.evaluate(initial) else {
            return;
        };
        let mut members: Vec<Member> = evaluated
            .into_iter()
            .map(|(x, result)| Member {
                key: result.key(),
                x,
            })
            .collect();

        for generation in 1..generations {
            let trials: Vec<Vec<f64>> = (0..members.len())
                .map(|i| self.trial(&members, i, &space, rng))
                .collect();
            let Some(evaluated) = ctx.evaluate(trials) else {
                debug!(stage = ctx.name(), generation, "global budget exhausted mid-search");
                return;
            };
            let mut improved = 0usize;
            for (member, (x, result)) in members.iter_mut().zip(evaluated) {
                let key = result.key();
                if key < member.key {
                    *member = Member { x, key };
                    improved += 1;
                }
            }
            let best = members.iter().map(|m| m.key).min();
            debug!(
                stage = ctx.name(),
                generation,
                improved,
                best_feasible = best.map(|k| k.is_feasible()).unwrap_or(false),
                best_value = best.map(|k| k.value).unwrap_or(f64::INFINITY),
                "generation complete"
            );
        }
    }

    fn trial(&self, members: &[Member], i: usize, space: &SearchSpace, rng: &mut ChaCha8Rng) -> Vec<f64> {
        let parent = &members[i].x;
        if members.len() < MIN_DE_POPULATION || rng.gen::<f64>() < self.operator_rate {
            return domain_move(parent, space, rng);
        }
        let donors = distinct_indices(i, 3, members.len(), rng);
        let (a, b, c) = (&members[donors[0]].x, &members[donors[1]].x, &members[donors[2]].x);
        let dims = parent.len();
        let forced = rng.gen_range(0..dims);
        (0..dims)
            .map(|j| {
                if j == forced || rng.gen::<f64>() < self.crossover_rate {
                    a[j] + self.mutation_factor * (b[j] - c[j])
                } else {
                    parent[j]
                }
            })
            .collect()
    }
}

/// Anchor cluster followed by uniform samples.
///
/// The first point is the anchor itself; the next few are Gaussian
/// perturbations of it with a tenth of each span as standard deviation.
pub fn initial_population(
    space: &SearchSpace,
    anchor: &[f64],
    population: usize,
    rng: &mut ChaCha8Rng,
) -> Vec<Vec<f64>> {
    let spans = space.spans();
    let clustered = (population / 8).clamp(1, 8).min(population);
    let mut points = Vec::with_capacity(population);
    points.push(space.clamp(anchor));
    while points.len() < clustered {
        let x: Vec<f64> = anchor
            .iter()
            .zip(&spans)
            .map(|(a, s)| a + gaussian(rng) * s / 10.0)
            .collect();
        points.push(space.clamp(&x));
    }
    let lower = space.lower();
    while points.len() < population {
        let x: Vec<f64> = lower
            .iter()
            .zip(&spans)
            .map(|(lo, s)| lo + rng.gen::<f64>() * s)
            .collect();
        points.push(x);
    }
    points
}

/// One of the four domain-shaped moves, chosen uniformly.
pub fn domain_move(x: &[f64], space: &SearchSpace, rng: &mut ChaCha8Rng) -> Vec<f64> {
    let spans = space.spans();
    let dims = x.len();
    let mut y = x.to_vec();
    match rng.gen_range(0..4) {
        0 => {
            // Scale a subset together.
            let factor = 1.0 + 0.06 * gaussian(rng);
            let mut dims_idx: Vec<usize> = (0..dims).collect();
            dims_idx.shuffle(rng);
            for j in dims_idx.into_iter().take((dims / 3).max(1)) {
                y[j] *= factor;
            }
        }
        1 if dims >= 2 => {
            // Trade two dimensions oppositely.
            let pair = distinct_indices(usize::MAX, 2, dims, rng);
            let delta = 0.08 * gaussian(rng);
            y[pair[0]] += delta * spans[pair[0]];
            y[pair[1]] -= delta * spans[pair[1]];
        }
        2 | 1 => {
            // Relief jitter.
            for (v, s) in y.iter_mut().zip(&spans) {
                *v += gaussian(rng) * s / 30.0;
            }
        }
        _ => {
            // Pull toward the centre.
            for ((v, mid), s) in y.iter_mut().zip(space.midpoint()).zip(&spans) {
                *v = 0.85 * *v + 0.15 * mid + gaussian(rng) * s / 60.0;
            }
        }
    }
    space.clamp(&y)
}

fn gaussian(rng: &mut ChaCha8Rng) -> f64 {
    rng.sample(StandardNormal)
}

/// `count` distinct indices from `0..pool_size`, skipping `exclude`.
pub(crate) fn distinct_indices(
    exclude: usize,
    count: usize,
    pool_size: usize,
    rng: &mut ChaCha8Rng,
) -> Vec<usize> {
    let mut idxs: Vec<usize> = (0..pool_size).collect();
    idxs.shuffle(rng);
    idxs.into_iter().filter(|i| *i != exclude).take(count).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::testing::*;
    use crate::seeding;

    fn de(population: usize) -> DifferentialEvolution {
        DifferentialEvolution::from(&StageSpec::global("g", 0).with_population(population))
    }

    #[test]
    fn plan_fits_budget() {
        assert_eq!(de(20).plan(100), (20, 5));
        assert_eq!(de(20).plan(110), (20, 5));
        assert_eq!(de(20).plan(7), (7, 1));
        assert_eq!(de(20).plan(0), (0, 0));

        let capped = DifferentialEvolution {
            generations: Some(50),
            ..de(10)
        };
        assert_eq!(capped.plan(30), (10, 3));
    }

    #[test]
    fn initial_population_starts_at_anchor() {
        let space = square();
        let mut rng = seeding::rng(1);
        let pop = initial_population(&space, &[2.0, 3.0], 24, &mut rng);
        assert_eq!(pop.len(), 24);
        assert_eq!(pop[0], vec![2.0, 3.0]);
        for x in &pop {
            assert!(x.iter().all(|v| (0.0..=10.0).contains(v)));
        }
    }

    #[test]
    fn domain_moves_stay_in_bounds() {
        let space = square();
        let mut rng = seeding::rng(2);
        for _ in 0..200 {
            let y = domain_move(&[9.9, 0.1], &space, &mut rng);
            assert!(y.iter().all(|v| (0.0..=10.0).contains(v)));
        }
    }

    #[test]
    fn spends_exactly_population_times_generations() {
        let space = square();
        let evaluator = FnEvaluator::new(1000, half_plane);
        let mut ctx = PhaseContext::new("global", &space, &evaluator, 100);
        let mut rng = seeding::rng(3);
        de(20).run(&mut ctx, &mut rng, &space.midpoint());
        assert_eq!(ctx.records().len(), 100);
    }

    #[test]
    fn finds_the_constraint_boundary() {
        let space = square();
        let evaluator = FnEvaluator::new(1000, half_plane);
        let mut ctx = PhaseContext::new("global", &space, &evaluator, 400);
        let mut rng = seeding::rng(4);
        de(20).run(&mut ctx, &mut rng, &space.midpoint());
        let best = ctx
            .records()
            .iter()
            .filter(|r| r.feasible())
            .map(|r| r.score())
            .fold(f64::NEG_INFINITY, f64::max);
        assert!(best > 14.0, "best feasible score {best}");
    }

    #[test]
    fn same_seed_same_records() {
        let space = square();
        let run = |seed| {
            let evaluator = FnEvaluator::new(1000, half_plane);
            let mut ctx = PhaseContext::new("global", &space, &evaluator, 60);
            let mut rng = seeding::rng(seed);
            de(12).run(&mut ctx, &mut rng, &space.midpoint());
            ctx.into_records().0
        };
        assert_eq!(run(9), run(9));
    }
}
