//! Yield-driven redistribution of downstream stage budgets.
//!
//! After the first global or sampling stage the scheduler looks at how many
//! of its records were feasible or nearly so, picks a rule, and re-splits the
//! combined budget of the later surrogate, local and surf stages by weight.
//! The total is conserved; constraints are never relaxed. Every decision is
//! returned as data for the artifact.

use serde::{Deserialize, Serialize};
use tracing::info;

use scout_types::{margin_proxy, Record};

use crate::config::{SchedulerConfig, StageKind, StageSpec};

pub const POLICY: &str = "Allocate effort to reach feasibility when none was found, then to refine \
feasible candidates. Budgets are only moved between later stages; constraints are never relaxed.";

/// Feasibility yield of the observed stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YieldStats {
    pub n_global: usize,
    pub n_feasible: usize,
    pub feasible_fraction: f64,
    /// Records whose margin lies in `[-band, 0)`.
    pub n_near_feasible: usize,
}

impl YieldStats {
    pub fn observe(records: &[Record], near_feasible_band: f64) -> Self {
        let n_global = records.len();
        let n_feasible = records.iter().filter(|r| r.feasible()).count();
        let n_near_feasible = records
            .iter()
            .map(|r| margin_proxy(&r.result))
            .filter(|m| m.is_finite() && *m < 0.0 && *m >= -near_feasible_band)
            .count();
        let feasible_fraction = if n_global == 0 {
            0.0
        } else {
            n_feasible as f64 / n_global as f64
        };
        Self {
            n_global,
            n_feasible,
            feasible_fraction,
            n_near_feasible,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationRule {
    /// Nothing feasible: favour surrogate proposals and surfing.
    NoFeasible,
    /// Low yield but near-feasible points exist: favour surrogate and local.
    LowYieldNearFeasible,
    /// Exploit: favour local refinement and surfing.
    Exploit,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoleWeights {
    pub surrogate: f64,
    pub local: f64,
    pub surf: f64,
}

impl AllocationRule {
    pub fn weights(self) -> RoleWeights {
        let (surrogate, local, surf) = match self {
            Self::NoFeasible => (1.5, 0.6, 1.5),
            Self::LowYieldNearFeasible => (1.25, 1.25, 0.6),
            Self::Exploit => (0.6, 1.5, 1.5),
        };
        RoleWeights { surrogate, local, surf }
    }
}

/// One stage's allocation, as recorded in the artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageBudget {
    pub name: String,
    pub method: String,
    pub budget: usize,
}

impl From<&StageSpec> for StageBudget {
    fn from(stage: &StageSpec) -> Self {
        Self {
            name: stage.name.clone(),
            method: stage.method.clone(),
            budget: stage.budget,
        }
    }
}

/// Statistics and decision taken after the observed stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AfterGlobal {
    /// Name of the stage whose yield was observed.
    pub stage: String,
    #[serde(flatten)]
    pub stats: YieldStats,
    pub rule: AllocationRule,
    pub weights: RoleWeights,
    pub updated: Vec<StageBudget>,
}

/// Audit record of the run's budget decisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetAllocation {
    pub initial: Vec<StageBudget>,
    pub after_global: Option<AfterGlobal>,
    #[serde(rename = "final")]
    pub final_budgets: Vec<StageBudget>,
    pub policy: String,
}

impl BudgetAllocation {
    pub fn new(stages: &[StageSpec]) -> Self {
        Self {
            initial: stages.iter().map(StageBudget::from).collect(),
            after_global: None,
            final_budgets: Vec::new(),
            policy: POLICY.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn classify(&self, stats: &YieldStats) -> AllocationRule {
        if stats.n_feasible == 0 {
            AllocationRule::NoFeasible
        } else if stats.feasible_fraction < self.config.low_yield_fraction && stats.n_near_feasible > 0 {
            AllocationRule::LowYieldNearFeasible
        } else {
            AllocationRule::Exploit
        }
    }

    /// Observe `records` from stage `observed` and rebalance the surrogate,
    /// local and surf stages in `downstream` in place.
    pub fn reallocate(&self, observed: &str, records: &[Record], downstream: &mut [StageSpec]) -> AfterGlobal {
        let stats = YieldStats::observe(records, self.config.near_feasible_band);
        let rule = self.classify(&stats);
        let weights = rule.weights();

        let roles: Vec<(usize, f64)> = downstream
            .iter()
            .enumerate()
            .filter_map(|(i, stage)| {
                let weight = match stage.kind().ok()? {
                    StageKind::Surrogate => weights.surrogate,
                    StageKind::Local => weights.local,
                    StageKind::Surf => weights.surf,
                    StageKind::Sampling(_) | StageKind::Global => return None,
                };
                Some((i, weight))
            })
            .collect();
        let budgets: Vec<usize> = roles.iter().map(|(i, _)| downstream[*i].budget).collect();
        let factors: Vec<f64> = roles.iter().map(|(_, w)| *w).collect();
        for ((i, _), budget) in roles.iter().zip(redistribute(&budgets, &factors)) {
            downstream[*i].budget = budget;
        }

        info!(
            stage = observed,
            n = stats.n_global,
            feasible = stats.n_feasible,
            near_feasible = stats.n_near_feasible,
            ?rule,
            "scheduler reallocated downstream budgets"
        );
        AfterGlobal {
            stage: observed.to_string(),
            stats,
            rule,
            weights,
            updated: downstream.iter().map(StageBudget::from).collect(),
        }
    }
}

/// Re-split `sum(budgets)` in proportion to `budget * weight`.
///
/// Floors first, then hands the remainder to the largest fractional parts
/// (earliest first on ties), so the total is conserved exactly.
pub fn redistribute(budgets: &[usize], weights: &[f64]) -> Vec<usize> {
    let total: usize = budgets.iter().sum();
    let mass: Vec<f64> = budgets
        .iter()
        .zip(weights)
        .map(|(b, w)| *b as f64 * w.max(0.0))
        .collect();
    let denom: f64 = mass.iter().sum();
    if total == 0 || !(denom.is_finite() && denom > 0.0) {
        return budgets.to_vec();
    }
    let shares: Vec<f64> = mass.iter().map(|m| total as f64 * m / denom).collect();
    let mut out: Vec<usize> = shares.iter().map(|s| s.floor() as usize).collect();
    let assigned: usize = out.iter().sum();
    let mut order: Vec<usize> = (0..shares.len()).collect();
    order.sort_by(|a, b| {
        let fa = shares[*a] - shares[*a].floor();
        let fb = shares[*b] - shares[*b].floor();
        fb.total_cmp(&fa).then_with(|| a.cmp(b))
    });
    for i in order.into_iter().take(total.saturating_sub(assigned)) {
        out[i] += 1;
    }
    out
}
