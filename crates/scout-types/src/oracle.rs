//! Caller-supplied collaborators: the input builder and the evaluator oracle.
//!
//! The engine never looks inside the domain input. It asks the [`Builder`]
//! to materialize one from the caller's base point plus variable overrides,
//! then hands it to the [`Evaluator`]. Both must be pure for a run to be
//! reproducible, and both are shared across worker threads.

use crate::errors::OracleError;
use crate::eval::EvalResult;
use crate::space::Candidate;

/// Materializes a domain input from base inputs and variable overrides.
pub trait Builder<B>: Send + Sync {
    type Input;

    fn build(&self, base: &B, overrides: &Candidate) -> Self::Input;
}

impl<B, I, F> Builder<B> for F
where
    F: Fn(&B, &Candidate) -> I + Send + Sync,
{
    type Input = I;

    fn build(&self, base: &B, overrides: &Candidate) -> I {
        self(base, overrides)
    }
}

/// Evaluates one domain input.
///
/// Errors (and panics) are absorbed by the engine as infeasible records.
pub trait Evaluator<I>: Send + Sync {
    fn evaluate(&self, input: &I) -> Result<EvalResult, OracleError>;
}

impl<I, F> Evaluator<I> for F
where
    F: Fn(&I) -> Result<EvalResult, OracleError> + Send + Sync,
{
    fn evaluate(&self, input: &I) -> Result<EvalResult, OracleError> {
        self(input)
    }
}

/// Builder that uses the overrides directly as the domain input, ignoring
/// the base point. Handy when the evaluator works on candidates.
#[derive(Debug, Clone, Copy, Default)]
pub struct Overrides;

impl<B> Builder<B> for Overrides {
    type Input = Candidate;

    fn build(&self, _base: &B, overrides: &Candidate) -> Candidate {
        overrides.clone()
    }
}
