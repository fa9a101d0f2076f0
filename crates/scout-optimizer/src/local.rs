//! Local refinement: Gaussian pattern search and constraint-surface surfing.

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use std::collections::HashSet;
use tracing::debug;

use scout_types::{margin_proxy, EvalResult, FeasibleKey, Record, SearchSpace};

use crate::archive::{quantized_key, DEDUP_DECIMALS};
use crate::config::StageSpec;
use crate::phase::PhaseContext;

/// Bracket for the surf step length, in units of each variable's span.
const SURF_BRACKET: f64 = 0.35;
/// Standard deviation of the first surf probe within the bracket.
const SURF_PROBE_SCALE: f64 = 0.12;
/// Seeds drawn from the least-violating records when nothing is feasible.
const SURF_INFEASIBLE_SEEDS: usize = 8;

pub const NOTE_SURF_INFEASIBLE_SEEDS: &str = "surf_seeded_from_infeasible";
pub const NOTE_NO_SEEDS: &str = "no_seed_records";

/// A point with its feasible-first key.
#[derive(Debug, Clone, PartialEq)]
pub struct Incumbent {
    pub x: Vec<f64>,
    pub key: FeasibleKey,
}

/// Best `k` distinct records by feasible-first key (infeasible included).
pub fn top_incumbents(space: &SearchSpace, records: &[Record], k: usize) -> Vec<Incumbent> {
    let mut sorted: Vec<&Record> = records.iter().collect();
    sorted.sort_by_key(|r| r.key());
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(k);
    for record in sorted {
        if out.len() == k {
            break;
        }
        let Some(x) = space.vector(&record.x) else {
            continue;
        };
        if seen.insert(quantized_key(&x, DEDUP_DECIMALS)) {
            out.push(Incumbent { x, key: record.key() });
        }
    }
    out
}

fn gaussian(rng: &mut ChaCha8Rng) -> f64 {
    rng.sample(StandardNormal)
}

/// Split `total` into `parts` near-equal shares, larger shares first.
pub fn split_budget(total: usize, parts: usize) -> Vec<usize> {
    if parts == 0 {
        return Vec::new();
    }
    let base = total / parts;
    let extra = total % parts;
    (0..parts).map(|i| base + usize::from(i < extra)).collect()
}

// ---- Pattern search ----

/// Accept-if-better Gaussian perturbation around the best records.
///
/// Each pass perturbs every dimension by `N(0, step * span)`; the step
/// halves between passes. No annealing: a worse point is never accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternSearch {
    pub step_frac: f64,
    pub seeds: usize,
    pub passes: usize,
}

impl From<&StageSpec> for PatternSearch {
    fn from(stage: &StageSpec) -> Self {
        Self {
            step_frac: stage.local_step_frac,
            seeds: stage.local_seeds,
            passes: stage.local_passes,
        }
    }
}

impl PatternSearch {
    /// Refine the top records of `history`, or `anchor` if there are none.
    pub fn run(
        &self,
        ctx: &mut PhaseContext<'_>,
        rng: &mut ChaCha8Rng,
        history: &[Record],
        anchor: &[f64],
    ) -> Vec<Incumbent> {
        let space = ctx.space().clone();
        let mut incumbents = top_incumbents(&space, history, self.seeds.max(1));
        if incumbents.is_empty() {
            incumbents.push(Incumbent {
                x: space.clamp(anchor),
                key: FeasibleKey::worst(),
            });
        }
        let spans = space.spans();
        let passes = self.passes.max(1);
        let pass_budgets = split_budget(ctx.stage_remaining(), passes);

        for (pass, pass_budget) in pass_budgets.into_iter().enumerate() {
            let step = self.step_frac * 0.5f64.powi(pass as i32);
            let seed_budgets = split_budget(pass_budget, incumbents.len());
            for (incumbent, budget) in incumbents.iter_mut().zip(seed_budgets) {
                let mut accepted = 0usize;
                for _ in 0..budget {
                    let trial: Vec<f64> = incumbent
                        .x
                        .iter()
                        .zip(&spans)
                        .map(|(v, s)| v + gaussian(rng) * step * s)
                        .collect();
                    let Some((x, result)) = ctx.evaluate_one(trial) else {
                        return incumbents;
                    };
                    let key = result.key();
                    if key < incumbent.key {
                        *incumbent = Incumbent { x, key };
                        accepted += 1;
                    }
                }
                debug!(stage = ctx.name(), pass, step, budget, accepted, "pattern search seed done");
            }
        }
        incumbents
    }
}

// ---- Surface surfing ----

/// Walks along the feasibility boundary.
///
/// Each step picks a seed `a` and a partner `b` from the boundary pool, takes
/// the normalized direction `b - a` (random if they coincide), then bisects
/// the step length `t` in `[-0.35, 0.35]` so that the margin of `a`'s binding
/// constraint at `a + t * dir * span` returns to its value at `a`. The first
/// probe is a random step inside the bracket; every probe is recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceSurfer {
    pub eps_margin: f64,
    pub bisection_steps: usize,
}

impl From<&StageSpec> for SurfaceSurfer {
    fn from(stage: &StageSpec) -> Self {
        Self {
            eps_margin: stage.surf_eps_margin,
            bisection_steps: stage.surf_bisection_steps,
        }
    }
}

struct SurfSeed {
    x: Vec<f64>,
    binding: Option<String>,
    target: f64,
}

impl SurfSeed {
    fn new(x: Vec<f64>, result: &EvalResult, target: Option<f64>) -> Self {
        let binding = result.evidence.binding_name().map(str::to_string);
        let own = binding_margin(result, binding.as_deref());
        Self {
            x,
            binding,
            target: target.unwrap_or(if own.is_finite() { own } else { 0.0 }),
        }
    }
}

/// Margin of the named constraint, or the margin proxy when unnamed.
fn binding_margin(result: &EvalResult, binding: Option<&str>) -> f64 {
    match binding {
        Some(name) => result.evidence.margin_of(name).unwrap_or(f64::NAN),
        None => margin_proxy(result),
    }
}

impl SurfaceSurfer {
    fn is_near(&self, result: &EvalResult) -> bool {
        result.feasible
            && result
                .evidence
                .min_margin()
                .map_or(false, |m| m.abs() < self.eps_margin)
    }

    /// Build the seed pool: near-boundary feasible records, else any
    /// feasible record, else the least-violating records aiming at margin 0.
    fn seed_pool(&self, space: &SearchSpace, history: &[Record]) -> (Vec<SurfSeed>, bool) {
        let with_x = |r: &&Record| space.vector(&r.x).is_some();
        let near: Vec<&Record> = history.iter().filter(|r| self.is_near(&r.result)).filter(with_x).collect();
        let chosen: Vec<&Record> = if near.is_empty() {
            history.iter().filter(|r| r.feasible()).filter(with_x).collect()
        } else {
            near
        };
        if !chosen.is_empty() {
            let pool = chosen
                .into_iter()
                .filter_map(|r| Some(SurfSeed::new(space.vector(&r.x)?, &r.result, None)))
                .collect();
            return (pool, false);
        }
        let mut infeasible: Vec<&Record> = history
            .iter()
            .filter(|r| !r.result.is_failure())
            .filter(with_x)
            .collect();
        infeasible.sort_by_key(|r| r.key());
        let pool = infeasible
            .into_iter()
            .take(SURF_INFEASIBLE_SEEDS)
            .filter_map(|r| Some(SurfSeed::new(space.vector(&r.x)?, &r.result, Some(0.0))))
            .collect();
        (pool, true)
    }

    /// Surf until the stage allowance is spent. Returns a note when the
    /// pool had to be seeded from infeasible records or was empty.
    pub fn run(&self, ctx: &mut PhaseContext<'_>, rng: &mut ChaCha8Rng, history: &[Record]) -> Option<&'static str> {
        let space = ctx.space().clone();
        let spans = space.spans();
        let (mut pool, from_infeasible) = self.seed_pool(&space, history);
        if pool.is_empty() {
            return Some(NOTE_NO_SEEDS);
        }

        let mut step_index = 0usize;
        while ctx.stage_remaining() > 0 && !ctx.is_exhausted() {
            let a = rng.gen_range(0..pool.len());
            let b = rng.gen_range(0..pool.len());
            let direction = surf_direction(&pool[a].x, &pool[b].x, rng);
            let seed = &pool[a];
            let (origin, binding, target) = (seed.x.clone(), seed.binding.clone(), seed.target);

            let (mut t_lo, mut t_hi) = (-SURF_BRACKET, SURF_BRACKET);
            let mut t = (gaussian(rng) * SURF_PROBE_SCALE).clamp(t_lo, t_hi);
            let mut best: Option<(f64, Vec<f64>, EvalResult)> = None;
            for _ in 0..self.bisection_steps {
                let x: Vec<f64> = origin
                    .iter()
                    .zip(&direction)
                    .zip(&spans)
                    .map(|((o, d), s)| o + t * d * s)
                    .collect();
                let Some((x, result)) = ctx.evaluate_one(x) else {
                    break;
                };
                let margin = binding_margin(&result, binding.as_deref());
                let err = (if margin.is_finite() { margin } else { 0.0 } - target).abs();
                if best.as_ref().map_or(true, |(e, _, _)| err < *e) {
                    best = Some((err, x, result));
                }
                if margin.is_finite() && margin > target {
                    t_hi = t;
                } else {
                    t_lo = t;
                }
                t = 0.5 * (t_lo + t_hi);
            }
            if let Some((err, x, result)) = best {
                debug!(stage = ctx.name(), step = step_index, err, feasible = result.feasible, "surf step done");
                if self.is_near(&result) {
                    pool.push(SurfSeed::new(x, &result, None));
                }
            }
            step_index += 1;
        }
        from_infeasible.then_some(NOTE_SURF_INFEASIBLE_SEEDS)
    }
}

/// Unit direction from `a` to `b`, or a random one if they coincide.
fn surf_direction(a: &[f64], b: &[f64], rng: &mut ChaCha8Rng) -> Vec<f64> {
    let mut d: Vec<f64> = b.iter().zip(a).map(|(b, a)| b - a).collect();
    let mut norm = d.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm <= 1e-12 {
        d = (0..a.len()).map(|_| gaussian(rng)).collect();
        norm = d.iter().map(|v| v * v).sum::<f64>().sqrt();
    }
    d.iter().map(|v| v / (norm + 1e-12)).collect()
}
