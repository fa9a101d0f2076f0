//! Evaluation results and the evidence attached to them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::objective::{scalar_score, Objective};
use crate::record::FeasibleKey;

/// Verdict label used in the evidence artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Pass,
    Fail,
}

/// Why an evaluation was turned into an infeasible failure by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureReason {
    /// The evaluator returned an error or panicked.
    Exception,
    /// The evaluator returned a non-finite score or violation.
    Nonfinite,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exception => write!(f, "exception"),
            Self::Nonfinite => write!(f, "nonfinite"),
        }
    }
}

/// Signed distance of one constraint from its threshold (negative = violated).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintMargin {
    pub name: String,
    #[serde(with = "crate::sentinel::score")]
    pub signed_margin: f64,
}

impl ConstraintMargin {
    pub fn new(name: impl Into<String>, signed_margin: f64) -> Self {
        Self {
            name: name.into(),
            signed_margin,
        }
    }
}

/// Diagnostic payload attached to an evaluation.
///
/// Fixed fields cover what the engine itself reads (failure reason, margins,
/// objective outputs); anything else the evaluator wants to keep goes into
/// the ordered `extra` map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Evidence {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Explicit minimum constraint margin; derived from `constraints` when absent.
    #[serde(with = "crate::sentinel::optional")]
    pub min_margin: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binding_constraint: Option<String>,
    pub constraints: Vec<ConstraintMargin>,
    #[serde(with = "crate::sentinel::outputs")]
    pub outputs: BTreeMap<String, f64>,
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Evidence {
    pub fn with_output(mut self, key: impl Into<String>, value: f64) -> Self {
        self.outputs.insert(key.into(), value);
        self
    }

    pub fn with_constraint(mut self, name: impl Into<String>, signed_margin: f64) -> Self {
        self.constraints.push(ConstraintMargin::new(name, signed_margin));
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// The most-negative finite constraint margin, if any.
    pub fn binding(&self) -> Option<&ConstraintMargin> {
        self.constraints
            .iter()
            .filter(|c| c.signed_margin.is_finite())
            .min_by(|a, b| a.signed_margin.total_cmp(&b.signed_margin))
    }

    pub fn margin_of(&self, name: &str) -> Option<f64> {
        self.constraints
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.signed_margin)
            .filter(|m| m.is_finite())
    }

    /// Minimum constraint margin: the explicit value, else the binding one.
    pub fn min_margin(&self) -> Option<f64> {
        self.min_margin
            .filter(|m| m.is_finite())
            .or_else(|| self.binding().map(|c| c.signed_margin))
    }

    /// Name of the binding constraint: the explicit value, else derived.
    pub fn binding_name(&self) -> Option<&str> {
        self.binding_constraint
            .as_deref()
            .or_else(|| self.binding().map(|c| c.name.as_str()))
    }
}

/// The evaluator's verdict on one candidate. Never mutated once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalResult {
    pub feasible: bool,
    #[serde(with = "crate::sentinel::score")]
    pub score: f64,
    #[serde(with = "crate::sentinel::violation")]
    pub violation: f64,
    #[serde(default)]
    pub evidence: Evidence,
}

impl EvalResult {
    pub fn feasible(score: f64) -> Self {
        Self {
            feasible: true,
            score,
            violation: 0.0,
            evidence: Evidence::default(),
        }
    }

    pub fn infeasible(score: f64, violation: f64) -> Self {
        Self {
            feasible: false,
            score,
            violation,
            evidence: Evidence::default(),
        }
    }

    pub fn with_evidence(mut self, evidence: Evidence) -> Self {
        self.evidence = evidence;
        self
    }

    /// Build a result from objective outputs and constraint margins.
    ///
    /// Feasible iff every finite margin is non-negative and none is missing;
    /// violation is the sum of the negative margins.
    pub fn from_margins(
        outputs: BTreeMap<String, f64>,
        constraints: Vec<ConstraintMargin>,
        objectives: &[Objective],
    ) -> Self {
        let mut violation = 0.0;
        let mut nonfinite = false;
        for c in &constraints {
            if !c.signed_margin.is_finite() {
                nonfinite = true;
            } else if c.signed_margin < 0.0 {
                violation += -c.signed_margin;
            }
        }
        if nonfinite {
            violation = f64::INFINITY;
        }
        let score = scalar_score(&outputs, objectives);
        let evidence = Evidence {
            outputs,
            constraints,
            ..Evidence::default()
        };
        Self {
            feasible: violation == 0.0,
            score,
            violation,
            evidence,
        }
    }

    /// Sentinel result for a candidate the engine could not evaluate.
    pub fn failure(reason: FailureReason, message: impl Into<String>) -> Self {
        Self {
            feasible: false,
            score: f64::NEG_INFINITY,
            violation: f64::INFINITY,
            evidence: Evidence {
                reason: Some(reason),
                message: Some(message.into()),
                ..Evidence::default()
            },
        }
    }

    /// Normalize an evaluator result so the record invariants hold.
    ///
    /// NaN or `+inf` scores and NaN, infinite or negative violations become
    /// `nonfinite` failures (the original evidence is kept). A feasible
    /// result always carries zero violation, an infeasible one a positive
    /// violation.
    pub fn sanitized(self) -> Self {
        let bad_score = self.score.is_nan() || self.score == f64::INFINITY;
        let bad_violation = !self.violation.is_finite() || self.violation < 0.0;
        if bad_score || bad_violation {
            let message = format!("score={} violation={}", self.score, self.violation);
            let mut evidence = self.evidence;
            evidence.reason = Some(FailureReason::Nonfinite);
            evidence.message = Some(message);
            return Self {
                feasible: false,
                score: f64::NEG_INFINITY,
                violation: f64::INFINITY,
                evidence,
            };
        }
        let mut out = self;
        if out.feasible {
            out.violation = 0.0;
        } else if out.violation == 0.0 {
            out.violation = f64::MIN_POSITIVE;
        }
        out
    }

    pub fn verdict(&self) -> Verdict {
        if self.feasible {
            Verdict::Pass
        } else {
            Verdict::Fail
        }
    }

    pub fn is_failure(&self) -> bool {
        self.evidence.reason.is_some()
    }

    pub fn key(&self) -> FeasibleKey {
        FeasibleKey::of(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_margins_sums_violations() {
        let objectives = vec![Objective::maximize("q")];
        let outputs: BTreeMap<String, f64> = [("q".to_string(), 2.0)].into_iter().collect();
        let result = EvalResult::from_margins(
            outputs,
            vec![
                ConstraintMargin::new("beta_limit", -0.25),
                ConstraintMargin::new("density_limit", 0.5),
                ConstraintMargin::new("q95", -0.5),
            ],
            &objectives,
        );
        assert!(!result.feasible);
        assert!((result.violation - 0.75).abs() < 1e-12);
        assert_eq!(result.score, 2.0);
        assert_eq!(result.evidence.min_margin(), Some(-0.5));
        assert_eq!(result.evidence.binding_name(), Some("q95"));
    }

    #[test]
    fn from_margins_feasible_when_all_non_negative() {
        let result = EvalResult::from_margins(
            BTreeMap::new(),
            vec![ConstraintMargin::new("a", 0.0), ConstraintMargin::new("b", 1.0)],
            &[],
        );
        assert!(result.feasible);
        assert_eq!(result.violation, 0.0);
        assert_eq!(result.verdict(), Verdict::Pass);
    }

    #[test]
    fn sanitized_flags_nan_as_nonfinite() {
        let result = EvalResult::feasible(f64::NAN).sanitized();
        assert!(!result.feasible);
        assert_eq!(result.evidence.reason, Some(FailureReason::Nonfinite));
        assert_eq!(result.score, f64::NEG_INFINITY);
        assert_eq!(result.violation, f64::INFINITY);
    }

    #[test]
    fn sanitized_flags_infinite_violation() {
        let result = EvalResult::infeasible(1.0, f64::INFINITY).sanitized();
        assert_eq!(result.evidence.reason, Some(FailureReason::Nonfinite));
    }

    #[test]
    fn sanitized_keeps_negative_infinite_score() {
        let result = EvalResult::feasible(f64::NEG_INFINITY).sanitized();
        assert!(result.feasible);
        assert!(result.evidence.reason.is_none());
    }

    #[test]
    fn sanitized_enforces_zero_violation_iff_feasible() {
        let mut feasible = EvalResult::feasible(1.0);
        feasible.violation = 0.3;
        assert_eq!(feasible.sanitized().violation, 0.0);

        let infeasible = EvalResult::infeasible(1.0, 0.0).sanitized();
        assert!(infeasible.violation > 0.0);
        assert!(!infeasible.feasible);
    }

    #[test]
    fn failure_serializes_with_null_sentinels() {
        let result = EvalResult::failure(FailureReason::Exception, "boom");
        let json = serde_json::to_value(&result).unwrap();
        assert!(json["score"].is_null());
        assert!(json["violation"].is_null());
        assert_eq!(json["evidence"]["reason"], "exception");

        let back: EvalResult = serde_json::from_value(json).unwrap();
        assert_eq!(back.score, f64::NEG_INFINITY);
        assert_eq!(back.violation, f64::INFINITY);
    }
}
