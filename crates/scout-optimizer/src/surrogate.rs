//! Surrogate-guided proposals.
//!
//! Each round fits models on every record seen so far (prior stages, loaded
//! knowledge and this stage's own evaluations), scores a uniform candidate
//! pool and sends the top `propose_per_round` to the oracle. With too little
//! history the stage falls back to Halton sampling instead of failing.

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::collections::HashSet;
use tracing::{debug, warn};

use scout_types::{margin_proxy, Record, SearchSpace};

use crate::archive::quantized_key;
use crate::config::{StageSpec, SurrogateBackend};
use crate::forest::{ForestConfig, RegressionForest};
use crate::phase::PhaseContext;
use crate::ridge::{min_training_rows, RidgeModel};
use crate::sampler::{self, CandidateSampler, HaltonSampler};

/// History needed before any model is fitted.
pub const MIN_TRAINING_RECORDS: usize = 16;
/// Feasible rows needed before the ensemble score regressor is used.
pub const MIN_FEASIBLE_FOR_REGRESSOR: usize = 8;
/// Proposal deduplication precision.
const PROPOSAL_DECIMALS: i32 = 12;

pub const NOTE_INSUFFICIENT_HISTORY: &str = "surrogate_fallback: insufficient_training_records";
pub const NOTE_MODEL_FIT_FAILED: &str = "surrogate_fallback: model_fit_failed";

/// One observation usable as training data.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingRow {
    pub x: Vec<f64>,
    pub feasible: bool,
    pub score: f64,
    /// Minimum constraint margin, or its proxy (see [`Record::margin_proxy`]).
    pub margin: f64,
}

impl TrainingRow {
    pub fn from_record(space: &SearchSpace, record: &Record) -> Option<Self> {
        Some(Self {
            x: space.vector(&record.x)?,
            feasible: record.feasible(),
            score: record.score(),
            margin: margin_proxy(&record.result),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SurrogateSearch {
    pub pool_mult: usize,
    pub kappa: f64,
    pub ridge_alpha: f64,
    pub uncertainty_weight: f64,
    pub propose_per_round: usize,
    pub backend: SurrogateBackend,
    pub forest: ForestConfig,
}

impl SurrogateSearch {
    pub fn new(stage: &StageSpec, backend: SurrogateBackend) -> Self {
        Self {
            pool_mult: stage.surrogate_pool_mult,
            kappa: stage.surrogate_kappa,
            ridge_alpha: stage.surrogate_ridge_alpha,
            uncertainty_weight: stage.surrogate_uncertainty_weight,
            propose_per_round: stage.propose_per_round,
            backend,
            forest: ForestConfig::default(),
        }
    }

    /// Run rounds until the stage allowance is spent. Returns a note when
    /// the stage fell back to plain sampling.
    pub fn run(
        &self,
        ctx: &mut PhaseContext<'_>,
        rng: &mut ChaCha8Rng,
        history: &[TrainingRow],
    ) -> Option<&'static str> {
        let mut training = history.to_vec();
        if training.len() < MIN_TRAINING_RECORDS {
            warn!(
                stage = ctx.name(),
                records = training.len(),
                required = MIN_TRAINING_RECORDS,
                "not enough history for surrogate, falling back to halton"
            );
            self.fallback(ctx, rng);
            return Some(NOTE_INSUFFICIENT_HISTORY);
        }

        let space = ctx.space().clone();
        let mut round = 0usize;
        while ctx.stage_remaining() > 0 && !ctx.is_exhausted() {
            let wanted = self.propose_per_round.min(ctx.stage_remaining());
            let pool_size = (self.pool_mult * self.propose_per_round).max(64);
            let pool: Vec<Vec<f64>> = sampler::uniform(rng, space.dims(), pool_size)
                .iter()
                .map(|u| space.from_unit(u))
                .collect();
            let Some(proposals) = self.propose(&training, &pool, wanted, rng) else {
                warn!(stage = ctx.name(), round, "surrogate fit failed, falling back to halton");
                self.fallback(ctx, rng);
                return Some(NOTE_MODEL_FIT_FAILED);
            };
            let Some(evaluated) = ctx.evaluate(proposals) else {
                break;
            };
            let feasible = evaluated.iter().filter(|(_, r)| r.feasible).count();
            for (x, result) in evaluated {
                training.push(TrainingRow {
                    margin: margin_proxy(&result),
                    feasible: result.feasible,
                    score: result.score,
                    x,
                });
            }
            debug!(stage = ctx.name(), round, proposed = wanted, feasible, "surrogate round complete");
            round += 1;
        }
        None
    }

    /// Top `wanted` pool members by acquisition, deduplicated against each
    /// other and the training inputs. `None` if the models cannot be fitted.
    pub fn propose(
        &self,
        training: &[TrainingRow],
        pool: &[Vec<f64>],
        wanted: usize,
        rng: &mut ChaCha8Rng,
    ) -> Option<Vec<Vec<f64>>> {
        let ranked = match self.backend {
            SurrogateBackend::RidgeOnly => self.rank_ridge(training, pool)?,
            SurrogateBackend::RidgeWithEnsemble => self.rank_ensemble(training, pool, rng)?,
        };
        let mut seen: HashSet<Vec<u64>> = training
            .iter()
            .map(|r| quantized_key(&r.x, PROPOSAL_DECIMALS))
            .collect();
        let mut out = Vec::with_capacity(wanted);
        for i in ranked {
            if out.len() == wanted {
                break;
            }
            if seen.insert(quantized_key(&pool[i], PROPOSAL_DECIMALS)) {
                out.push(pool[i].clone());
            }
        }
        Some(out)
    }

    /// Ridge only: keep points with positive predicted margin, rank them by
    /// expected score improvement plus weighted uncertainty. Without such
    /// points (or a score model) rank everything by the margin proxy.
    fn rank_ridge(&self, training: &[TrainingRow], pool: &[Vec<f64>]) -> Option<Vec<usize>> {
        let margin_model = fit_ridge(training, |r| Some(r.margin), self.ridge_alpha)?;
        let score_model = fit_ridge(
            training,
            |r| (r.feasible && r.score.is_finite()).then_some(r.score),
            self.ridge_alpha,
        );
        let margins: Vec<f64> = pool.iter().map(|x| margin_model.predict(x)).collect();
        let w = self.uncertainty_weight;

        let best_score = training
            .iter()
            .filter(|r| r.feasible && r.score.is_finite())
            .map(|r| r.score)
            .fold(f64::NEG_INFINITY, f64::max);
        let safe: Vec<usize> = (0..pool.len()).filter(|i| margins[*i] > 0.0).collect();

        let scored: Vec<(usize, f64, f64)> = match score_model {
            Some(model) if !safe.is_empty() => {
                let baseline = if best_score.is_finite() { best_score } else { 0.0 };
                safe.iter()
                    .map(|i| {
                        let x = &pool[*i];
                        let gain = model.predict(x) - baseline + w * model.uncertainty(x);
                        (*i, gain, margins[*i])
                    })
                    .collect()
            }
            _ => (0..pool.len())
                .map(|i| {
                    let acq = margins[i] + w * margin_model.uncertainty(&pool[i]);
                    (i, acq, margins[i])
                })
                .collect(),
        };
        Some(rank(scored))
    }

    /// Ensemble: `P(feasible)^kappa * normalized predicted score`.
    fn rank_ensemble(
        &self,
        training: &[TrainingRow],
        pool: &[Vec<f64>],
        rng: &mut ChaCha8Rng,
    ) -> Option<Vec<usize>> {
        let xs: Vec<Vec<f64>> = training.iter().map(|r| r.x.clone()).collect();
        let labels: Vec<f64> = training
            .iter()
            .map(|r| if r.feasible { 1.0 } else { 0.0 })
            .collect();
        let classifier = RegressionForest::fit(&xs, &labels, &self.forest, rng)?;
        let probabilities: Vec<f64> = pool.iter().map(|x| classifier.probability(x)).collect();

        let feasible: Vec<&TrainingRow> = training
            .iter()
            .filter(|r| r.feasible && r.score.is_finite())
            .collect();
        let predicted: Vec<f64> = if feasible.len() >= MIN_FEASIBLE_FOR_REGRESSOR {
            let fx: Vec<Vec<f64>> = feasible.iter().map(|r| r.x.clone()).collect();
            let fy: Vec<f64> = feasible.iter().map(|r| r.score).collect();
            let regressor = RegressionForest::fit(&fx, &fy, &self.forest, rng)?;
            pool.iter().map(|x| regressor.predict(x)).collect()
        } else {
            let margin_model = fit_ridge(training, |r| Some(r.margin), self.ridge_alpha)?;
            pool.iter().map(|x| margin_model.predict(x)).collect()
        };

        let normalized = min_max(&predicted);
        let scored = (0..pool.len())
            .map(|i| {
                let acq = probabilities[i].powf(self.kappa) * normalized[i];
                (i, acq, probabilities[i])
            })
            .collect();
        Some(rank(scored))
    }

    fn fallback(&self, ctx: &mut PhaseContext<'_>, rng: &mut ChaCha8Rng) {
        let mut halton = HaltonSampler::new(ctx.space().clone(), rng.gen());
        while ctx.stage_remaining() > 0 {
            let batch = halton.sample(self.propose_per_round.min(ctx.stage_remaining()));
            if ctx.evaluate(batch).is_none() {
                break;
            }
        }
    }
}

fn fit_ridge(
    training: &[TrainingRow],
    target: impl Fn(&TrainingRow) -> Option<f64>,
    alpha: f64,
) -> Option<RidgeModel> {
    let (xs, ys): (Vec<Vec<f64>>, Vec<f64>) = training
        .iter()
        .filter_map(|r| target(r).filter(|y| y.is_finite()).map(|y| (r.x.clone(), y)))
        .unzip();
    let dims = xs.first()?.len();
    if xs.len() < min_training_rows(dims) {
        return None;
    }
    RidgeModel::fit(&xs, &ys, alpha)
}

/// Min-max normalize to `[0, 1]`; a flat vector maps to all ones.
fn min_max(values: &[f64]) -> Vec<f64> {
    let lo = values.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = hi - lo;
    if !range.is_finite() || range <= 1e-12 {
        return vec![1.0; values.len()];
    }
    values.iter().map(|v| (v - lo) / range).collect()
}

/// Indices sorted by acquisition desc, then secondary desc, then index.
fn rank(mut scored: Vec<(usize, f64, f64)>) -> Vec<usize> {
    scored.sort_by(|a, b| {
        b.1.total_cmp(&a.1)
            .then_with(|| b.2.total_cmp(&a.2))
            .then_with(|| a.0.cmp(&b.0))
    });
    scored.into_iter().map(|(i, _, _)| i).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::testing::*;
    use crate::seeding;
    use scout_types::Candidate;

    fn rows(space: &SearchSpace, n: usize, seed: u64) -> Vec<TrainingRow> {
        sampler::halton(seed, 2, n)
            .iter()
            .map(|u| {
                let x = space.from_unit(u);
                let record = scout_types::Record::new(0, "h", space.candidate(&x), half_plane(&space.candidate(&x)));
                TrainingRow::from_record(space, &record).unwrap()
            })
            .collect()
    }

    fn search(backend: SurrogateBackend) -> SurrogateSearch {
        SurrogateSearch::new(&StageSpec::surrogate("s", 40), backend)
    }

    #[test]
    fn falls_back_with_little_history() {
        let space = square();
        let evaluator = FnEvaluator::new(100, half_plane);
        let mut ctx = PhaseContext::new("surrogate", &space, &evaluator, 20);
        let mut rng = seeding::rng(1);
        let note = search(SurrogateBackend::RidgeOnly).run(&mut ctx, &mut rng, &rows(&space, 5, 1));
        assert_eq!(note, Some(NOTE_INSUFFICIENT_HISTORY));
        assert_eq!(ctx.records().len(), 20);
    }

    #[test]
    fn proposals_are_unique_and_sized() {
        let space = square();
        let training = rows(&space, 40, 2);
        let mut rng = seeding::rng(2);
        let mut pool: Vec<Vec<f64>> = sampler::uniform(&mut rng, 2, 100)
            .iter()
            .map(|u| space.from_unit(u))
            .collect();
        pool.push(pool[0].clone());
        pool.push(training[0].x.clone());
        for backend in [SurrogateBackend::RidgeOnly, SurrogateBackend::RidgeWithEnsemble] {
            let out = search(backend).propose(&training, &pool, 8, &mut rng).unwrap();
            assert_eq!(out.len(), 8);
            let keys: HashSet<_> = out.iter().map(|x| quantized_key(x, PROPOSAL_DECIMALS)).collect();
            assert_eq!(keys.len(), 8);
            assert!(!out.contains(&training[0].x));
        }
    }

    #[test]
    fn ensemble_prefers_high_score_feasible_region() {
        let space = square();
        let training = rows(&space, 80, 3);
        let mut rng = seeding::rng(3);
        let pool: Vec<Vec<f64>> = sampler::uniform(&mut rng, 2, 400)
            .iter()
            .map(|u| space.from_unit(u))
            .collect();
        let out = search(SurrogateBackend::RidgeWithEnsemble)
            .propose(&training, &pool, 4, &mut rng)
            .unwrap();
        let mean_sum: f64 = out.iter().map(|x| x[0] + x[1]).sum::<f64>() / out.len() as f64;
        assert!(mean_sum > 10.0, "proposals average x+y = {mean_sum}");
    }

    #[test]
    fn spends_whole_allowance() {
        let space = square();
        let evaluator = FnEvaluator::new(100, half_plane);
        let mut ctx = PhaseContext::new("surrogate", &space, &evaluator, 20);
        let mut rng = seeding::rng(4);
        let note = search(SurrogateBackend::RidgeOnly).run(&mut ctx, &mut rng, &rows(&space, 30, 4));
        assert_eq!(note, None);
        assert_eq!(ctx.records().len(), 20);
        let first = &ctx.records()[0];
        assert_eq!(first.phase, "surrogate");
        assert!(first.x != Candidate::new());
    }

    #[test]
    fn rank_breaks_ties_by_secondary_then_index() {
        let order = rank(vec![(0, 1.0, 0.2), (1, 1.0, 0.5), (2, 2.0, 0.0), (3, 1.0, 0.5)]);
        assert_eq!(order, vec![2, 1, 3, 0]);
        assert_eq!(min_max(&[3.0, 3.0]), vec![1.0, 1.0]);
    }
}
