//! Per-stage evaluation context.
//!
//! Algorithms propose plain vectors; the context clamps them, dispatches the
//! batch, and appends the results as records in index order. Records are the
//! only output a stage produces.

use scout_types::{EvalResult, Record, SearchSpace};

use crate::dispatch::BatchEvaluator;

pub struct PhaseContext<'a> {
    name: String,
    space: &'a SearchSpace,
    evaluator: &'a dyn BatchEvaluator,
    allowance: usize,
    records: Vec<Record>,
    exhausted: bool,
}

impl<'a> PhaseContext<'a> {
    pub fn new(
        name: impl Into<String>,
        space: &'a SearchSpace,
        evaluator: &'a dyn BatchEvaluator,
        allowance: usize,
    ) -> Self {
        Self {
            name: name.into(),
            space,
            evaluator,
            allowance,
            records: Vec::new(),
            exhausted: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn space(&self) -> &SearchSpace {
        self.space
    }

    /// Evaluations left for this stage, bounded by the global budget.
    pub fn remaining(&self) -> usize {
        if self.exhausted {
            return 0;
        }
        (self.allowance - self.records.len()).min(self.evaluator.remaining())
    }

    /// Stage allowance left, ignoring the global budget.
    pub fn stage_remaining(&self) -> usize {
        self.allowance - self.records.len()
    }

    /// True once a batch was refused because the global budget ran out.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Evaluate a batch of vectors, truncated to the stage allowance.
    ///
    /// Returns the clamped vectors with their results, or `None` when the
    /// global budget cannot cover the batch; the batch is then discarded and
    /// the context marked exhausted.
    pub fn evaluate(&mut self, xs: Vec<Vec<f64>>) -> Option<Vec<(Vec<f64>, EvalResult)>> {
        if self.exhausted {
            return None;
        }
        let take = xs.len().min(self.stage_remaining());
        let xs: Vec<Vec<f64>> = xs
            .into_iter()
            .take(take)
            .map(|x| self.space.clamp(&x))
            .collect();
        if xs.is_empty() {
            return Some(Vec::new());
        }
        let candidates: Vec<_> = xs.iter().map(|x| self.space.candidate(x)).collect();
        let results = match self.evaluator.evaluate_batch(&candidates) {
            Some(results) => results,
            None => {
                self.exhausted = true;
                return None;
            }
        };
        for (candidate, result) in candidates.into_iter().zip(&results) {
            let index = self.records.len();
            self.records
                .push(Record::new(index, self.name.clone(), candidate, result.clone()));
        }
        Some(xs.into_iter().zip(results).collect())
    }

    /// Evaluate a single vector.
    pub fn evaluate_one(&mut self, x: Vec<f64>) -> Option<(Vec<f64>, EvalResult)> {
        self.evaluate(vec![x]).and_then(|mut out| out.pop())
    }

    pub fn into_records(self) -> (Vec<Record>, bool) {
        (self.records, self.exhausted)
    }
}
