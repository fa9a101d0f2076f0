//! Evaluation budget and batch dispatch onto the worker pool.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::warn;

use scout_types::{internal_error, Builder, Candidate, ConfigError, EvalResult, Evaluator, FailureReason, ScoutResult};

/// Shared count of oracle calls still allowed for the run.
///
/// Workers reserve units before calling the oracle; once the counter cannot
/// cover a batch, the run is exhausted.
#[derive(Debug)]
pub struct EvaluationBudget {
    limit: usize,
    remaining: AtomicUsize,
}

impl EvaluationBudget {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            remaining: AtomicUsize::new(limit),
        }
    }

    /// Reserve `n` units, all or nothing.
    pub fn try_acquire(&self, n: usize) -> bool {
        self.remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |left| left.checked_sub(n))
            .is_ok()
    }

    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn spent(&self) -> usize {
        self.limit - self.remaining()
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }
}

/// Size of the evaluation worker pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
    /// Number of worker threads (1 = evaluate on a single worker).
    pub num_workers: usize,
    /// Candidates per dispatched batch for sampling stages.
    pub batch_size: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: 4,
            batch_size: 32,
        }
    }
}

impl WorkerPoolConfig {
    pub fn with_workers(mut self, n: usize) -> Self {
        self.num_workers = n;
        self
    }

    pub fn with_batch_size(mut self, n: usize) -> Self {
        self.batch_size = n;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_workers == 0 {
            return Err(ConfigError::invalid("workers.num_workers", "must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::invalid("workers.batch_size", "must be at least 1"));
        }
        Ok(())
    }

    pub fn build_pool(&self) -> ScoutResult<rayon::ThreadPool> {
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.num_workers)
            .thread_name(|i| format!("scout-worker-{i}"))
            .build()
            .map_err(|e| internal_error!("failed to build worker pool: {e}"))
    }
}

/// Evaluates whole batches of candidates against the shared budget.
pub trait BatchEvaluator: Sync {
    /// Evaluate every candidate, returning results in input order.
    ///
    /// Returns `None` without calling the oracle when the remaining budget
    /// cannot cover the whole batch.
    fn evaluate_batch(&self, batch: &[Candidate]) -> Option<Vec<EvalResult>>;

    /// Oracle calls still available to the run.
    fn remaining(&self) -> usize;
}

/// Dispatches oracle calls for one run onto a fixed-size rayon pool.
pub struct OracleDispatcher<'a, B, Bd, E> {
    base: &'a B,
    builder: &'a Bd,
    evaluator: &'a E,
    budget: &'a EvaluationBudget,
    pool: &'a rayon::ThreadPool,
}

impl<'a, B, Bd, E> OracleDispatcher<'a, B, Bd, E>
where
    B: Sync,
    Bd: Builder<B>,
    E: Evaluator<Bd::Input>,
{
    pub fn new(
        base: &'a B,
        builder: &'a Bd,
        evaluator: &'a E,
        budget: &'a EvaluationBudget,
        pool: &'a rayon::ThreadPool,
    ) -> Self {
        Self {
            base,
            builder,
            evaluator,
            budget,
            pool,
        }
    }

    /// Build and evaluate one candidate, absorbing errors and panics.
    fn evaluate_one(&self, candidate: &Candidate) -> EvalResult {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let input = self.builder.build(self.base, candidate);
            self.evaluator.evaluate(&input)
        }));
        match outcome {
            Ok(Ok(result)) => {
                let result = result.sanitized();
                if result.evidence.reason == Some(FailureReason::Nonfinite) {
                    warn!(candidate = ?candidate, "oracle returned non-finite result");
                }
                result
            }
            Ok(Err(err)) => {
                warn!(candidate = ?candidate, error = %err, "oracle failed");
                EvalResult::failure(FailureReason::Exception, err.message)
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(candidate = ?candidate, panic = %message, "oracle panicked");
                EvalResult::failure(FailureReason::Exception, message)
            }
        }
    }
}

impl<'a, B, Bd, E> BatchEvaluator for OracleDispatcher<'a, B, Bd, E>
where
    B: Sync,
    Bd: Builder<B>,
    E: Evaluator<Bd::Input>,
{
    fn evaluate_batch(&self, batch: &[Candidate]) -> Option<Vec<EvalResult>> {
        if batch.is_empty() {
            return Some(Vec::new());
        }
        if !self.budget.try_acquire(batch.len()) {
            return None;
        }
        let results = self
            .pool
            .install(|| batch.par_iter().map(|c| self.evaluate_one(c)).collect());
        Some(results)
    }

    fn remaining(&self) -> usize {
        self.budget.remaining()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scout_types::{OracleError, Overrides};

    fn pool(n: usize) -> rayon::ThreadPool {
        WorkerPoolConfig::default().with_workers(n).build_pool().unwrap()
    }

    #[test]
    fn budget_is_all_or_nothing() {
        let budget = EvaluationBudget::new(5);
        assert!(budget.try_acquire(3));
        assert!(!budget.try_acquire(3));
        assert_eq!(budget.remaining(), 2);
        assert!(budget.try_acquire(2));
        assert!(budget.is_exhausted());
        assert_eq!(budget.spent(), 5);
    }

    #[test]
    fn batch_results_keep_input_order() {
        let budget = EvaluationBudget::new(100);
        let pool = pool(4);
        let evaluator = |c: &Candidate| -> Result<EvalResult, OracleError> {
            Ok(EvalResult::feasible(c.get("x").unwrap_or(0.0)))
        };
        let dispatcher = OracleDispatcher::new(&(), &Overrides, &evaluator, &budget, &pool);
        let batch: Vec<Candidate> = (0..50)
            .map(|i| Candidate::new().with("x", i as f64))
            .collect();
        let results = dispatcher.evaluate_batch(&batch).unwrap();
        let scores: Vec<f64> = results.iter().map(|r| r.score).collect();
        assert_eq!(scores, (0..50).map(|i| i as f64).collect::<Vec<_>>());
        assert_eq!(budget.remaining(), 50);
    }

    #[test]
    fn oversized_batch_is_not_evaluated() {
        let budget = EvaluationBudget::new(3);
        let pool = pool(2);
        let evaluator = |_: &Candidate| -> Result<EvalResult, OracleError> {
            panic!("must not be called")
        };
        let dispatcher = OracleDispatcher::new(&(), &Overrides, &evaluator, &budget, &pool);
        let batch = vec![Candidate::new(); 4];
        assert!(dispatcher.evaluate_batch(&batch).is_none());
        assert_eq!(budget.remaining(), 3);
    }

    #[test]
    fn errors_and_panics_become_exception_records() {
        let budget = EvaluationBudget::new(10);
        let pool = pool(2);
        let evaluator = |c: &Candidate| -> Result<EvalResult, OracleError> {
            match c.get("mode").unwrap_or(0.0) as i64 {
                0 => Err(OracleError::new("solver diverged")),
                1 => panic!("index out of range"),
                2 => Ok(EvalResult::feasible(f64::NAN)),
                _ => Ok(EvalResult::feasible(1.0)),
            }
        };
        let dispatcher = OracleDispatcher::new(&(), &Overrides, &evaluator, &budget, &pool);
        let batch: Vec<Candidate> = (0..4)
            .map(|i| Candidate::new().with("mode", i as f64))
            .collect();
        let results = dispatcher.evaluate_batch(&batch).unwrap();

        assert_eq!(results[0].evidence.reason, Some(FailureReason::Exception));
        assert_eq!(results[0].evidence.message.as_deref(), Some("solver diverged"));
        assert_eq!(results[1].evidence.reason, Some(FailureReason::Exception));
        assert!(results[1]
            .evidence
            .message
            .as_deref()
            .unwrap()
            .contains("index out of range"));
        assert_eq!(results[2].evidence.reason, Some(FailureReason::Nonfinite));
        assert!(results[3].feasible);
        for failed in &results[..3] {
            assert!(!failed.feasible);
            assert_eq!(failed.score, f64::NEG_INFINITY);
            assert_eq!(failed.violation, f64::INFINITY);
        }
    }

    #[test]
    fn zero_workers_is_rejected() {
        let config = WorkerPoolConfig::default().with_workers(0);
        assert!(config.validate().is_err());
    }
}
