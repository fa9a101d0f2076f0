//! Evaluated records and the feasible-first ordering.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::eval::{EvalResult, Verdict};
use crate::space::Candidate;

/// Sort key implementing feasible-first ordering.
///
/// `(0, -score)` for feasible results, `(1, violation)` otherwise; smaller is
/// better. Any feasible result beats any infeasible one regardless of score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeasibleKey {
    pub tier: u8,
    pub value: f64,
}

impl FeasibleKey {
    pub fn of(result: &EvalResult) -> Self {
        if result.feasible {
            Self {
                tier: 0,
                value: -result.score,
            }
        } else {
            Self {
                tier: 1,
                value: result.violation,
            }
        }
    }

    /// Key that every real evaluation beats.
    pub fn worst() -> Self {
        Self {
            tier: 2,
            value: f64::INFINITY,
        }
    }

    pub fn is_feasible(&self) -> bool {
        self.tier == 0
    }
}

impl Eq for FeasibleKey {}

impl PartialOrd for FeasibleKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FeasibleKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.tier
            .cmp(&other.tier)
            .then_with(|| self.value.total_cmp(&other.value))
    }
}

/// One evaluated candidate, immutable once appended to a phase's records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Position within the owning stage.
    pub index: usize,
    /// Name of the stage that produced the record.
    pub phase: String,
    pub x: Candidate,
    #[serde(flatten)]
    pub result: EvalResult,
}

impl Record {
    pub fn new(index: usize, phase: impl Into<String>, x: Candidate, result: EvalResult) -> Self {
        Self {
            index,
            phase: phase.into(),
            x,
            result,
        }
    }

    pub fn key(&self) -> FeasibleKey {
        FeasibleKey::of(&self.result)
    }

    pub fn feasible(&self) -> bool {
        self.result.feasible
    }

    pub fn score(&self) -> f64 {
        self.result.score
    }

    pub fn violation(&self) -> f64 {
        self.result.violation
    }

    pub fn verdict(&self) -> Verdict {
        self.result.verdict()
    }

    /// Scalar used when only "how close to feasible" matters.
    ///
    /// The explicit minimum margin if reported, else `0` for feasible and
    /// `-violation` for infeasible records.
    pub fn margin_proxy(&self) -> f64 {
        margin_proxy(&self.result)
    }
}

/// See [`Record::margin_proxy`].
pub fn margin_proxy(result: &EvalResult) -> f64 {
    match result.evidence.min_margin() {
        Some(m) => m,
        None if result.feasible => 0.0,
        None => -result.violation,
    }
}

/// Index of the best record under feasible-first ordering.
///
/// Ties keep the earliest record.
pub fn best_index(records: &[Record]) -> Option<usize> {
    let mut best: Option<(usize, FeasibleKey)> = None;
    for (i, record) in records.iter().enumerate() {
        let key = record.key();
        match best {
            Some((_, current)) if key >= current => {}
            _ => best = Some((i, key)),
        }
    }
    best.map(|(i, _)| i)
}

/// Index of the best feasible record, or `None` when nothing passed.
pub fn best_feasible_index(records: &[Record]) -> Option<usize> {
    best_index(records).filter(|i| records[*i].feasible())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(feasible: bool, score: f64, violation: f64) -> Record {
        let result = if feasible {
            EvalResult::feasible(score)
        } else {
            EvalResult::infeasible(score, violation)
        };
        Record::new(0, "test", Candidate::new(), result)
    }

    #[test]
    fn feasible_beats_infeasible_regardless_of_score() {
        let a = record(true, -1e9, 0.0);
        let b = record(false, 1e9, 1e-9);
        assert!(a.key() < b.key());

        let failed = record(true, f64::NEG_INFINITY, 0.0);
        assert!(failed.key() < b.key());
    }

    #[test]
    fn infeasible_ordered_by_violation() {
        let near = record(false, 0.0, 0.1);
        let far = record(false, 100.0, 2.0);
        assert!(near.key() < far.key());
    }

    #[test]
    fn feasible_ordered_by_descending_score() {
        let high = record(true, 3.0, 0.0);
        let low = record(true, 1.0, 0.0);
        assert!(high.key() < low.key());
        assert!(FeasibleKey::of(&low.result) < FeasibleKey::worst());
    }

    #[test]
    fn best_index_keeps_first_of_ties() {
        let records = vec![
            record(false, 0.0, 1.0),
            record(true, 2.0, 0.0),
            record(true, 2.0, 0.0),
            record(true, 1.0, 0.0),
        ];
        assert_eq!(best_index(&records), Some(1));
        assert_eq!(best_index(&[]), None);
    }

    #[test]
    fn best_feasible_index_skips_failures() {
        let failing = vec![record(false, 5.0, 0.1), record(false, 9.0, 2.0)];
        assert_eq!(best_index(&failing), Some(0));
        assert_eq!(best_feasible_index(&failing), None);

        let mixed = vec![record(false, 5.0, 0.1), record(true, 1.0, 0.0)];
        assert_eq!(best_feasible_index(&mixed), Some(1));
    }

    #[test]
    fn record_wire_form_is_flat() {
        let record = record(false, 1.0, 0.5);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["phase"], "test");
        assert_eq!(json["feasible"], false);
        assert_eq!(json["violation"], 0.5);
        assert!(json["evidence"].is_object());
    }

    #[test]
    fn margin_proxy_prefers_reported_margin() {
        let mut r = record(false, 0.0, 0.4);
        assert_eq!(r.margin_proxy(), -0.4);
        r.result.evidence.min_margin = Some(-0.1);
        assert_eq!(r.margin_proxy(), -0.1);
        assert_eq!(record(true, 1.0, 0.0).margin_proxy(), 0.0);
    }
}
