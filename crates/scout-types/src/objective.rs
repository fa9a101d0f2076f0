//! Objectives and the scalar acquisition score.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::ConfigError;

/// Whether an objective is minimized or maximized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sense {
    Min,
    Max,
}

impl Default for Sense {
    fn default() -> Self {
        Self::Max
    }
}

/// One term of the scalar score and one axis of Pareto comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Objective {
    /// Output key the evaluator reports this objective under.
    pub key: String,
    #[serde(default)]
    pub sense: Sense,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

impl Objective {
    pub fn maximize(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            sense: Sense::Max,
            weight: 1.0,
        }
    }

    pub fn minimize(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            sense: Sense::Min,
            weight: 1.0,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Weights must be positive so every objective moves the scalar score.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.weight.is_finite() && self.weight > 0.0) {
            return Err(ConfigError::NonPositiveWeight {
                key: self.key.clone(),
                weight: self.weight,
            });
        }
        Ok(())
    }

    /// Value with the sense folded in, so that larger is always better.
    pub fn oriented(&self, value: f64) -> f64 {
        match self.sense {
            Sense::Max => value,
            Sense::Min => -value,
        }
    }

    /// True if `a` is strictly better than `b` on this objective.
    pub fn better(&self, a: f64, b: f64) -> bool {
        self.oriented(a) > self.oriented(b)
    }
}

/// Weighted scalar score, higher is better.
///
/// A missing or non-finite objective value makes the whole score `-inf`.
pub fn scalar_score(outputs: &BTreeMap<String, f64>, objectives: &[Objective]) -> f64 {
    let mut score = 0.0;
    for objective in objectives {
        let value = match outputs.get(&objective.key) {
            Some(v) if v.is_finite() => *v,
            _ => return f64::NEG_INFINITY,
        };
        score += objective.weight * objective.oriented(value);
    }
    score
}
