//! # scout-optimizer
//!
//! Feasibility-first, budgeted design-space search for Scout.
//!
//! A run is a plan of stages (deterministic sampling, differential evolution,
//! surrogate-guided proposals, local pattern search and constraint-surface
//! surfing) sharing one evaluation budget and worker pool. Feasible records
//! always outrank infeasible ones; infeasible ones are ranked by violation.
//! Every run ends in an [`EvidenceArtifact`] whose digest is reproducible
//! from the `SearchSpec`, the seed and a pure evaluator.

mod archive;
mod artifact;
mod config;
mod diagnostics;
mod digest;
mod dispatch;
mod forest;
mod global;
mod knowledge;
mod local;
mod orchestrator;
mod phase;
mod ridge;
mod sampler;
mod scheduler;
mod seeding;
mod surrogate;

pub use archive::{dedup, dominates, pareto_front, prune_diverse, Archive, DEDUP_DECIMALS};
pub use artifact::{
    ArchiveView, BestSummary, EvaluationSummary, EvidenceArtifact, RecordView, SamplingPlan, SearchResult,
    StageResult, StageStatus, SCHEMA_VERSION,
};
pub use config::{ArchiveConfig, SchedulerConfig, SearchSpec, StageKind, StageSpec, SurrogateBackend};
pub use diagnostics::{
    feasibility_skeleton, pearson, resistance, variable_correlations, Correlations, Diagnostics,
    FeasibilitySkeleton, Resistance, SkeletonEdge, VariableCorrelation,
};
pub use digest::{canonical_bytes, content_digest, run_id, sha256_hex};
pub use dispatch::{BatchEvaluator, EvaluationBudget, OracleDispatcher, WorkerPoolConfig};
pub use forest::{ForestConfig, RegressionForest};
pub use global::DifferentialEvolution;
pub use knowledge::{JsonFileRepository, KnowledgeRow, MemoryRepository, Repository};
pub use local::{top_incumbents, Incumbent, PatternSearch, SurfaceSurfer};
pub use orchestrator::{run, run_budgeted_search, Orchestrator, KNOWLEDGE_SAVE_LIMIT};
pub use phase::PhaseContext;
pub use ridge::{RidgeModel, Standardizer};
pub use sampler::{
    build_sampler, halton, latin_hypercube, CandidateSampler, DesignSampler, HaltonSampler, SamplingMethod,
    UniformSampler,
};
pub use scheduler::{
    redistribute, AfterGlobal, AllocationRule, BudgetAllocation, RoleWeights, Scheduler, StageBudget, YieldStats,
};
pub use seeding::{phase_seed, PhaseKind, STAGE_STRIDE};
pub use surrogate::{SurrogateSearch, TrainingRow, NOTE_INSUFFICIENT_HISTORY, NOTE_MODEL_FIT_FAILED};
