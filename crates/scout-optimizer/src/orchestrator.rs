//! Staged search runs.
//!
//! The orchestrator validates the `SearchSpec`, then runs every stage in order
//! against one shared evaluation budget and worker pool. After the first
//! global or sampling stage the scheduler may rebalance the later stages.
//! Records from all stages feed the archive, the diagnostics and the final
//! evidence artifact.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

use scout_types::{best_index, Builder, Evaluator, Record, ScoutResult, SearchSpace, SearchVariable};

use crate::archive::Archive;
use crate::artifact::{
    run_digest, ArchiveView, BestSummary, EvaluationSummary, EvidenceArtifact, SamplingPlan, SearchResult,
    StageResult, StageStatus, SCHEMA_VERSION,
};
use crate::config::{SearchSpec, StageKind, StageSpec};
use crate::diagnostics::Diagnostics;
use crate::digest;
use crate::dispatch::{EvaluationBudget, OracleDispatcher, WorkerPoolConfig};
use crate::global::DifferentialEvolution;
use crate::knowledge::{KnowledgeRow, Repository};
use crate::local::{PatternSearch, SurfaceSurfer};
use crate::phase::PhaseContext;
use crate::sampler::{build_sampler, SamplingMethod};
use crate::scheduler::{BudgetAllocation, Scheduler, StageBudget};
use crate::seeding;
use crate::surrogate::{SurrogateSearch, TrainingRow};

/// Archive entries written back to the repository after a run.
pub const KNOWLEDGE_SAVE_LIMIT: usize = 400;

pub struct Orchestrator {
    spec: SearchSpec,
    repository: Option<Arc<dyn Repository>>,
}

impl Orchestrator {
    pub fn new(spec: SearchSpec) -> Self {
        Self {
            spec,
            repository: None,
        }
    }

    /// Use `repository` for cross-run knowledge.
    pub fn with_repository(mut self, repository: Arc<dyn Repository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn spec(&self) -> &SearchSpec {
        &self.spec
    }

    /// Execute every stage and assemble the evidence artifact.
    ///
    /// Only configuration problems are returned as errors; oracle failures,
    /// fallbacks and budget exhaustion are recorded in the artifact.
    pub fn run<B, Bd, E>(&self, base: &B, builder: &Bd, evaluator: &E) -> ScoutResult<EvidenceArtifact>
    where
        B: Sync,
        Bd: Builder<B>,
        E: Evaluator<Bd::Input>,
    {
        let spec = &self.spec;
        spec.validate()?;

        let budget = EvaluationBudget::new(spec.evaluation_limit());
        let pool = spec.workers.build_pool()?;
        let dispatcher = OracleDispatcher::new(base, builder, evaluator, &budget, &pool);
        let space = spec.variables.clone();
        let anchor = space.anchor(spec.anchor.as_ref());
        let knowledge = self.load_knowledge(&space);
        let scheduler = Scheduler::new(spec.scheduler.clone());

        info!(
            "Starting search '{}': {} stages, {} evaluations, {} workers",
            spec.name,
            spec.stages.len(),
            budget.limit(),
            spec.workers.num_workers
        );

        let mut stages: Vec<StageSpec> = spec.stages.clone();
        let mut allocation = BudgetAllocation::new(&stages);
        let mut results = Vec::with_capacity(stages.len());
        let mut all_records: Vec<Record> = Vec::new();
        let mut observed = false;

        for i in 0..stages.len() {
            let stage = stages[i].clone();
            let kind = stage.kind()?;
            let seed = seeding::phase_seed(spec.seed, kind.phase_kind(), i, stage.seed);

            if budget.is_exhausted() && stage.budget > 0 {
                warn!(stage = %stage.name, "evaluation budget exhausted, skipping stage");
                results.push(StageResult::new(
                    &stage.name,
                    &stage.method,
                    stage.budget,
                    seed,
                    space.variables().to_vec(),
                    StageStatus::Skipped,
                    None,
                    &[],
                )?);
                continue;
            }

            let stage_space = match kind {
                StageKind::Sampling(_) if stage.local_refine => {
                    let center = best_index(&all_records)
                        .and_then(|b| space.vector(&all_records[b].x))
                        .unwrap_or_else(|| anchor.clone());
                    space.narrowed(&center, stage.local_shrink)
                }
                _ => space.clone(),
            };

            let mut ctx = PhaseContext::new(stage.name.clone(), &stage_space, &dispatcher, stage.budget);
            let mut rng = seeding::rng(seed);
            let note = match kind {
                StageKind::Sampling(method) => {
                    sample_stage(&mut ctx, method, seed, spec.workers.batch_size);
                    None
                }
                StageKind::Global => {
                    DifferentialEvolution::from(&stage).run(&mut ctx, &mut rng, &anchor);
                    None
                }
                StageKind::Surrogate => {
                    let mut history: Vec<TrainingRow> = all_records
                        .iter()
                        .filter_map(|r| TrainingRow::from_record(&space, r))
                        .collect();
                    history.extend(knowledge.iter().cloned());
                    SurrogateSearch::new(&stage, spec.backend).run(&mut ctx, &mut rng, &history)
                }
                StageKind::Local => {
                    PatternSearch::from(&stage).run(&mut ctx, &mut rng, &all_records, &anchor);
                    None
                }
                StageKind::Surf => SurfaceSurfer::from(&stage).run(&mut ctx, &mut rng, &all_records),
            };

            let (records, exhausted) = ctx.into_records();
            let status = if exhausted {
                warn!(stage = %stage.name, records = records.len(), "evaluation budget exhausted during stage");
                StageStatus::BudgetExhausted
            } else {
                StageStatus::Completed
            };
            let result = StageResult::new(
                &stage.name,
                &stage.method,
                stage.budget,
                seed,
                stage_space.variables().to_vec(),
                status,
                note.map(str::to_string),
                &records,
            )?;
            info!(
                stage = %stage.name,
                method = %stage.method,
                budget = stage.budget,
                records = records.len(),
                feasible = records.iter().filter(|r| r.feasible()).count(),
                best_score = result.best().map(|r| r.score).unwrap_or(f64::NEG_INFINITY),
                ?status,
                "stage complete"
            );

            if !observed && matches!(kind, StageKind::Sampling(_) | StageKind::Global) {
                observed = true;
                if scheduler.is_enabled() {
                    let after = scheduler.reallocate(&stage.name, &records, &mut stages[i + 1..]);
                    allocation.after_global = Some(after);
                }
            }
            results.push(result);
            all_records.extend(records);
        }
        allocation.final_budgets = stages.iter().map(StageBudget::from).collect();

        let archive = Archive::build(&all_records, &space, &spec.archive, &spec.objectives)?;
        let best = BestSummary::of(best_index(&all_records).map(|i| &all_records[i]));
        let diagnostics = Diagnostics::collect(&all_records, &archive.entries, &space);
        let digest = run_digest(spec, &results)?;
        self.save_knowledge(&archive);

        let evaluations = EvaluationSummary {
            limit: budget.limit(),
            spent: budget.spent(),
            exhausted: budget.is_exhausted(),
        };
        info!(
            "Search '{}' finished: {} of {} evaluations, best score {:?}, digest {}",
            spec.name, evaluations.spent, evaluations.limit, best.score, digest
        );

        Ok(EvidenceArtifact {
            schema_version: SCHEMA_VERSION.to_string(),
            run_id: digest::run_id(&digest),
            created_at: Utc::now(),
            spec: spec.clone(),
            stages: results,
            best,
            budget_allocation: allocation,
            archive: ArchiveView::from(&archive),
            diagnostics,
            evaluations,
            knowledge_rows: knowledge.len(),
            digest,
        })
    }

    fn load_knowledge(&self, space: &SearchSpace) -> Vec<TrainingRow> {
        let Some(repository) = &self.repository else {
            return Vec::new();
        };
        match repository.load() {
            Ok(rows) => {
                let usable: Vec<TrainingRow> = rows.iter().filter_map(|r| r.training_row(space)).collect();
                info!("Loaded {} knowledge rows ({} match the search space)", rows.len(), usable.len());
                usable
            }
            Err(e) => {
                warn!(error = %e, "failed to load knowledge, continuing without it");
                Vec::new()
            }
        }
    }

    fn save_knowledge(&self, archive: &Archive) {
        let Some(repository) = &self.repository else {
            return;
        };
        let now = Utc::now();
        let rows: Vec<KnowledgeRow> = archive
            .entries
            .iter()
            .take(KNOWLEDGE_SAVE_LIMIT)
            .map(|r| KnowledgeRow::from_record(r, now))
            .collect();
        match repository.save(&rows) {
            Ok(()) => debug!(rows = rows.len(), "knowledge saved"),
            Err(e) => warn!(error = %e, "failed to save knowledge"),
        }
    }
}

/// Run `spec` once. See [`Orchestrator::run`].
pub fn run<B, Bd, E>(base: &B, spec: &SearchSpec, builder: &Bd, evaluator: &E) -> ScoutResult<EvidenceArtifact>
where
    B: Sync,
    Bd: Builder<B>,
    E: Evaluator<Bd::Input>,
{
    Orchestrator::new(spec.clone()).run(base, builder, evaluator)
}

/// A single deterministic sampling search over `variables`.
///
/// The plan's seed is used as is; the budget is also the evaluation cap.
pub fn run_budgeted_search<B, Bd, E>(
    base: &B,
    variables: Vec<SearchVariable>,
    plan: SamplingPlan,
    builder: &Bd,
    evaluator: &E,
) -> ScoutResult<SearchResult>
where
    B: Sync,
    Bd: Builder<B>,
    E: Evaluator<Bd::Input>,
{
    let space = SearchSpace::from_variables(variables);
    space.validate()?;
    let workers = WorkerPoolConfig::default();
    let budget = EvaluationBudget::new(plan.budget);
    let pool = workers.build_pool()?;
    let dispatcher = OracleDispatcher::new(base, builder, evaluator, &budget, &pool);

    let mut ctx = PhaseContext::new(plan.method.as_str(), &space, &dispatcher, plan.budget);
    sample_stage(&mut ctx, plan.method, plan.seed, workers.batch_size);
    let (records, exhausted) = ctx.into_records();
    let status = if exhausted {
        StageStatus::BudgetExhausted
    } else {
        StageStatus::Completed
    };
    info!(
        method = plan.method.as_str(),
        budget = plan.budget,
        records = records.len(),
        feasible = records.iter().filter(|r| r.feasible()).count(),
        "budgeted search complete"
    );
    SearchResult::new(space.variables().to_vec(), plan, status, &records)
}

/// Draw from the sampler in worker-sized batches until the allowance is
/// spent, a finite design runs dry, or the budget refuses a batch.
fn sample_stage(ctx: &mut PhaseContext<'_>, method: SamplingMethod, seed: u64, batch_size: usize) {
    let mut sampler = build_sampler(method, ctx.space(), seed, ctx.stage_remaining());
    while ctx.stage_remaining() > 0 {
        let batch = sampler.sample(batch_size.max(1).min(ctx.stage_remaining()));
        if batch.is_empty() {
            break;
        }
        if ctx.evaluate(batch).is_none() {
            break;
        }
    }
    debug!(stage = ctx.name(), sampler = sampler.name(), records = ctx.records().len(), "sampling done");
}
