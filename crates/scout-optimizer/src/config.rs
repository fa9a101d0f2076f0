//! Search configuration: variables, objectives and the staged plan.

use serde::{Deserialize, Serialize};

use scout_types::{Candidate, ConfigError, Objective, ScoutResult, SearchSpace, SearchVariable};

use crate::dispatch::WorkerPoolConfig;
use crate::sampler::SamplingMethod;
use crate::seeding::PhaseKind;

/// Which surrogate tiers are available to surrogate stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurrogateBackend {
    /// Ridge regression on a margin proxy only.
    RidgeOnly,
    /// Ridge plus a tree-ensemble feasibility classifier and score regressor.
    RidgeWithEnsemble,
}

impl Default for SurrogateBackend {
    fn default() -> Self {
        Self::RidgeWithEnsemble
    }
}

/// What a stage does, parsed from its method name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Sampling(SamplingMethod),
    Global,
    Surrogate,
    Local,
    Surf,
}

impl StageKind {
    pub fn parse(method: &str) -> Result<Self, ConfigError> {
        match method.trim().to_ascii_lowercase().as_str() {
            "de" | "global" => Ok(Self::Global),
            "surrogate" => Ok(Self::Surrogate),
            "local" => Ok(Self::Local),
            "surf" => Ok(Self::Surf),
            other => other.parse().map(Self::Sampling),
        }
    }

    pub fn phase_kind(&self) -> PhaseKind {
        match self {
            Self::Sampling(_) => PhaseKind::Sampling,
            Self::Global => PhaseKind::Global,
            Self::Surrogate => PhaseKind::Surrogate,
            Self::Local => PhaseKind::Local,
            Self::Surf => PhaseKind::Surf,
        }
    }
}

/// One stage of the plan. Parameters not relevant to the stage's method are
/// ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageSpec {
    pub name: String,
    /// "uniform", "lhs", "halton", "grid", "de", "surrogate", "local" or "surf".
    pub method: String,
    /// Maximum oracle calls for this stage.
    pub budget: usize,
    /// Overrides the derived phase seed.
    pub seed: Option<u64>,

    /// Sampling stages: sample inside bounds shrunk around the best point.
    pub local_refine: bool,
    pub local_shrink: f64,

    pub population_size: usize,
    /// Defaults to `budget / population_size`.
    pub generations: Option<usize>,
    pub mutation_factor: f64,
    pub crossover_rate: f64,
    /// Probability of a domain-shaped move instead of DE mutation.
    pub operator_rate: f64,

    pub surrogate_pool_mult: usize,
    pub surrogate_kappa: f64,
    pub surrogate_ridge_alpha: f64,
    pub surrogate_uncertainty_weight: f64,
    pub propose_per_round: usize,

    pub local_step_frac: f64,
    pub local_seeds: usize,
    pub local_passes: usize,

    /// Feasible points with `|min margin|` below this count as near-boundary.
    pub surf_eps_margin: f64,
    pub surf_bisection_steps: usize,
}

impl Default for StageSpec {
    fn default() -> Self {
        Self {
            name: "stage".to_string(),
            method: "halton".to_string(),
            budget: 0,
            seed: None,
            local_refine: false,
            local_shrink: 0.35,
            population_size: 24,
            generations: None,
            mutation_factor: 0.7,
            crossover_rate: 0.9,
            operator_rate: 0.18,
            surrogate_pool_mult: 40,
            surrogate_kappa: 1.0,
            surrogate_ridge_alpha: 1e-3,
            surrogate_uncertainty_weight: 0.5,
            propose_per_round: 8,
            local_step_frac: 0.06,
            local_seeds: 3,
            local_passes: 1,
            surf_eps_margin: 0.015,
            surf_bisection_steps: 10,
        }
    }
}

impl StageSpec {
    pub fn new(name: impl Into<String>, method: impl Into<String>, budget: usize) -> Self {
        Self {
            name: name.into(),
            method: method.into(),
            budget,
            ..Self::default()
        }
    }

    pub fn sampling(name: impl Into<String>, method: SamplingMethod, budget: usize) -> Self {
        Self::new(name, method.as_str(), budget)
    }

    pub fn global(name: impl Into<String>, budget: usize) -> Self {
        Self::new(name, "de", budget)
    }

    pub fn surrogate(name: impl Into<String>, budget: usize) -> Self {
        Self::new(name, "surrogate", budget)
    }

    pub fn local(name: impl Into<String>, budget: usize) -> Self {
        Self::new(name, "local", budget)
    }

    pub fn surf(name: impl Into<String>, budget: usize) -> Self {
        Self::new(name, "surf", budget)
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_local_refine(mut self, shrink: f64) -> Self {
        self.local_refine = true;
        self.local_shrink = shrink;
        self
    }

    pub fn with_population(mut self, n: usize) -> Self {
        self.population_size = n;
        self
    }

    pub fn with_generations(mut self, n: usize) -> Self {
        self.generations = Some(n);
        self
    }

    pub fn with_de_rates(mut self, mutation_factor: f64, crossover_rate: f64) -> Self {
        self.mutation_factor = mutation_factor;
        self.crossover_rate = crossover_rate;
        self
    }

    pub fn with_operator_rate(mut self, rate: f64) -> Self {
        self.operator_rate = rate;
        self
    }

    pub fn with_surrogate(mut self, pool_mult: usize, kappa: f64, ridge_alpha: f64) -> Self {
        self.surrogate_pool_mult = pool_mult;
        self.surrogate_kappa = kappa;
        self.surrogate_ridge_alpha = ridge_alpha;
        self
    }

    pub fn with_proposals_per_round(mut self, n: usize) -> Self {
        self.propose_per_round = n;
        self
    }

    pub fn with_step_frac(mut self, frac: f64) -> Self {
        self.local_step_frac = frac;
        self
    }

    pub fn with_local_seeds(mut self, seeds: usize, passes: usize) -> Self {
        self.local_seeds = seeds;
        self.local_passes = passes;
        self
    }

    pub fn with_surf(mut self, eps_margin: f64, bisection_steps: usize) -> Self {
        self.surf_eps_margin = eps_margin;
        self.surf_bisection_steps = bisection_steps;
        self
    }

    pub fn kind(&self) -> Result<StageKind, ConfigError> {
        StageKind::parse(&self.method)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let kind = self.kind()?;
        let param = |p: &str| format!("stages.{}.{}", self.name, p);
        let unit = |p: &str, v: f64| {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(ConfigError::invalid(param(p), format!("{v} is outside [0, 1]")))
            }
        };
        let positive = |p: &str, v: f64| {
            if v.is_finite() && v > 0.0 {
                Ok(())
            } else {
                Err(ConfigError::invalid(param(p), format!("{v} must be positive")))
            }
        };
        match kind {
            StageKind::Sampling(_) => {
                if self.local_refine {
                    positive("local_shrink", self.local_shrink)?;
                }
            }
            StageKind::Global => {
                if self.population_size == 0 {
                    return Err(ConfigError::invalid(param("population_size"), "must be at least 1"));
                }
                if self.generations == Some(0) {
                    return Err(ConfigError::invalid(param("generations"), "must be at least 1"));
                }
                if !(self.mutation_factor.is_finite() && self.mutation_factor > 0.0 && self.mutation_factor <= 2.0) {
                    return Err(ConfigError::invalid(
                        param("mutation_factor"),
                        format!("{} is outside (0, 2]", self.mutation_factor),
                    ));
                }
                unit("crossover_rate", self.crossover_rate)?;
                unit("operator_rate", self.operator_rate)?;
            }
            StageKind::Surrogate => {
                if self.surrogate_pool_mult == 0 {
                    return Err(ConfigError::invalid(param("surrogate_pool_mult"), "must be at least 1"));
                }
                if self.propose_per_round == 0 {
                    return Err(ConfigError::invalid(param("propose_per_round"), "must be at least 1"));
                }
                positive("surrogate_ridge_alpha", self.surrogate_ridge_alpha)?;
                if !(self.surrogate_kappa.is_finite() && self.surrogate_kappa >= 0.0) {
                    return Err(ConfigError::invalid(param("surrogate_kappa"), "must be non-negative"));
                }
                if !(self.surrogate_uncertainty_weight.is_finite() && self.surrogate_uncertainty_weight >= 0.0) {
                    return Err(ConfigError::invalid(
                        param("surrogate_uncertainty_weight"),
                        "must be non-negative",
                    ));
                }
            }
            StageKind::Local => {
                positive("local_step_frac", self.local_step_frac)?;
                if self.local_seeds == 0 || self.local_passes == 0 {
                    return Err(ConfigError::invalid(param("local_seeds"), "seeds and passes must be at least 1"));
                }
            }
            StageKind::Surf => {
                positive("surf_eps_margin", self.surf_eps_margin)?;
                if self.surf_bisection_steps == 0 {
                    return Err(ConfigError::invalid(param("surf_bisection_steps"), "must be at least 1"));
                }
            }
        }
        Ok(())
    }
}

/// Archive size and Pareto extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Diversity cap on the number of archive entries.
    pub cap: usize,
    /// Extract the Pareto front over the declared objectives.
    pub pareto: bool,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            cap: 64,
            pareto: false,
        }
    }
}

/// Adaptive budget redistribution after the global phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// Infeasible points with min margin in `[-band, 0)` count as near-feasible.
    pub near_feasible_band: f64,
    /// Feasible fraction below which yield counts as low.
    pub low_yield_fraction: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            near_feasible_band: 0.2,
            low_yield_fraction: 0.05,
        }
    }
}

/// Top-level configuration for a search run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSpec {
    pub name: String,
    pub variables: SearchSpace,
    pub objectives: Vec<Objective>,
    pub stages: Vec<StageSpec>,
    /// Base seed every phase seed is derived from.
    pub seed: u64,
    /// Centre of the initial anchor cluster; midpoints when absent.
    pub anchor: Option<Candidate>,
    /// Global oracle-call cap; defaults to the sum of stage budgets.
    pub max_evaluations: Option<usize>,
    pub archive: ArchiveConfig,
    pub scheduler: SchedulerConfig,
    pub workers: WorkerPoolConfig,
    pub backend: SurrogateBackend,
}

impl Default for SearchSpec {
    fn default() -> Self {
        Self {
            name: "search".to_string(),
            variables: SearchSpace::new(),
            objectives: Vec::new(),
            stages: Vec::new(),
            seed: 0,
            anchor: None,
            max_evaluations: None,
            archive: ArchiveConfig::default(),
            scheduler: SchedulerConfig::default(),
            workers: WorkerPoolConfig::default(),
            backend: SurrogateBackend::default(),
        }
    }
}

impl SearchSpec {
    pub fn new(name: impl Into<String>, variables: SearchSpace) -> Self {
        Self {
            name: name.into(),
            variables,
            ..Self::default()
        }
    }

    /// Global search, surrogate, local refinement and surfing, with the total
    /// budget split 50/20/20/10.
    pub fn hybrid(
        name: impl Into<String>,
        variables: Vec<SearchVariable>,
        objectives: Vec<Objective>,
        budget: usize,
    ) -> Self {
        let global = budget / 2;
        let surrogate = budget / 5;
        let local = budget / 5;
        let surf = budget - global - surrogate - local;
        Self::new(name, SearchSpace::from_variables(variables))
            .with_objectives(objectives)
            .with_stage(StageSpec::global("global", global))
            .with_stage(StageSpec::surrogate("surrogate", surrogate))
            .with_stage(StageSpec::local("local", local))
            .with_stage(StageSpec::surf("surf", surf))
    }

    pub fn from_json(json: &str) -> ScoutResult<Self> {
        let spec: Self = serde_json::from_str(json)?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn with_objectives(mut self, objectives: Vec<Objective>) -> Self {
        self.objectives = objectives;
        self
    }

    pub fn with_stage(mut self, stage: StageSpec) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_anchor(mut self, anchor: Candidate) -> Self {
        self.anchor = Some(anchor);
        self
    }

    pub fn with_max_evaluations(mut self, n: usize) -> Self {
        self.max_evaluations = Some(n);
        self
    }

    pub fn with_archive(mut self, cap: usize, pareto: bool) -> Self {
        self.archive = ArchiveConfig { cap, pareto };
        self
    }

    pub fn with_scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_workers(mut self, workers: WorkerPoolConfig) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_backend(mut self, backend: SurrogateBackend) -> Self {
        self.backend = backend;
        self
    }

    /// Oracle calls allowed for the whole run.
    pub fn evaluation_limit(&self) -> usize {
        self.max_evaluations
            .unwrap_or_else(|| self.stages.iter().map(|s| s.budget).sum())
    }

    /// Fail fast on anything that would make the run meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.variables.validate()?;
        if self.stages.is_empty() {
            return Err(ConfigError::NoStages);
        }
        for stage in &self.stages {
            stage.validate()?;
        }
        for objective in &self.objectives {
            objective.validate()?;
        }
        if self.archive.pareto && self.objectives.is_empty() {
            return Err(ConfigError::EmptyObjectives);
        }
        if self.archive.cap == 0 {
            return Err(ConfigError::invalid("archive.cap", "must be at least 1"));
        }
        let band = self.scheduler.near_feasible_band;
        if !(band.is_finite() && band >= 0.0) {
            return Err(ConfigError::invalid("scheduler.near_feasible_band", "must be non-negative"));
        }
        if !(0.0..=1.0).contains(&self.scheduler.low_yield_fraction) {
            return Err(ConfigError::invalid("scheduler.low_yield_fraction", "must be within [0, 1]"));
        }
        if let Some(anchor) = &self.anchor {
            if let Some((name, _)) = anchor.iter().find(|(_, v)| !v.is_finite()) {
                return Err(ConfigError::invalid(format!("anchor.{name}"), "must be finite"));
            }
        }
        self.workers.validate()
    }
}
