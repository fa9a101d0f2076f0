//! Bounded search variables, the search space they form, and candidates.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::errors::ConfigError;

/// A bounded scalar dimension of the search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchVariable {
    /// Name of the input this variable overrides (e.g. "major_radius").
    pub name: String,
    pub lo: f64,
    pub hi: f64,
}

impl SearchVariable {
    pub fn new(name: impl Into<String>, lo: f64, hi: f64) -> Self {
        Self {
            name: name.into(),
            lo,
            hi,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.lo.is_finite() || !self.hi.is_finite() || self.lo >= self.hi {
            return Err(ConfigError::InvalidBounds {
                name: self.name.clone(),
                lo: self.lo,
                hi: self.hi,
            });
        }
        Ok(())
    }

    pub fn span(&self) -> f64 {
        self.hi - self.lo
    }

    pub fn midpoint(&self) -> f64 {
        0.5 * (self.lo + self.hi)
    }

    /// Clamp into `[lo, hi]`. Non-finite input maps to the midpoint.
    pub fn clamp(&self, value: f64) -> f64 {
        if value.is_finite() {
            value.clamp(self.lo, self.hi)
        } else {
            self.midpoint()
        }
    }
}

/// A concrete assignment of every declared variable, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Candidate(BTreeMap<String, f64>);

impl Candidate {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.0.insert(name.into(), value);
    }

    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.insert(name, value);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &f64)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &BTreeMap<String, f64> {
        &self.0
    }
}

impl From<BTreeMap<String, f64>> for Candidate {
    fn from(map: BTreeMap<String, f64>) -> Self {
        Self(map)
    }
}

impl FromIterator<(String, f64)> for Candidate {
    fn from_iter<T: IntoIterator<Item = (String, f64)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// The full search space: an ordered list of bounded variables.
///
/// Algorithms work on plain `Vec<f64>` vectors in declaration order; the
/// space converts between those vectors, the unit hypercube and named
/// [`Candidate`]s, clamping on every conversion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SearchSpace {
    variables: Vec<SearchVariable>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self {
            variables: Vec::new(),
        }
    }

    pub fn from_variables(variables: Vec<SearchVariable>) -> Self {
        Self { variables }
    }

    pub fn add(mut self, name: impl Into<String>, lo: f64, hi: f64) -> Self {
        self.variables.push(SearchVariable::new(name, lo, hi));
        self
    }

    /// Reject empty spaces, bad bounds and duplicate names.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.variables.is_empty() {
            return Err(ConfigError::NoVariables);
        }
        let mut seen = HashSet::new();
        for var in &self.variables {
            var.validate()?;
            if !seen.insert(var.name.as_str()) {
                return Err(ConfigError::DuplicateVariable {
                    name: var.name.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn variables(&self) -> &[SearchVariable] {
        &self.variables
    }

    pub fn dims(&self) -> usize {
        self.variables.len()
    }

    pub fn names(&self) -> Vec<&str> {
        self.variables.iter().map(|v| v.name.as_str()).collect()
    }

    pub fn lower(&self) -> Vec<f64> {
        self.variables.iter().map(|v| v.lo).collect()
    }

    pub fn upper(&self) -> Vec<f64> {
        self.variables.iter().map(|v| v.hi).collect()
    }

    pub fn spans(&self) -> Vec<f64> {
        self.variables.iter().map(SearchVariable::span).collect()
    }

    pub fn midpoint(&self) -> Vec<f64> {
        self.variables.iter().map(SearchVariable::midpoint).collect()
    }

    pub fn clamp(&self, x: &[f64]) -> Vec<f64> {
        self.variables
            .iter()
            .zip(x)
            .map(|(var, v)| var.clamp(*v))
            .collect()
    }

    /// Map a point of the unit hypercube onto the declared bounds.
    pub fn from_unit(&self, u: &[f64]) -> Vec<f64> {
        self.variables
            .iter()
            .zip(u)
            .map(|(var, t)| var.clamp(var.lo + t * var.span()))
            .collect()
    }

    /// Normalize a vector to `[0, 1]` per dimension.
    pub fn to_unit(&self, x: &[f64]) -> Vec<f64> {
        self.variables
            .iter()
            .zip(x)
            .map(|(var, v)| (var.clamp(*v) - var.lo) / var.span())
            .collect()
    }

    /// Build a named candidate from a vector, clamping every value.
    pub fn candidate(&self, x: &[f64]) -> Candidate {
        self.variables
            .iter()
            .zip(x)
            .map(|(var, v)| (var.name.clone(), var.clamp(*v)))
            .collect()
    }

    /// Extract the vector for this space from a candidate.
    ///
    /// Returns `None` if any declared variable is missing or non-finite.
    pub fn vector(&self, candidate: &Candidate) -> Option<Vec<f64>> {
        self.variables
            .iter()
            .map(|var| candidate.get(&var.name).filter(|v| v.is_finite()))
            .collect()
    }

    /// Anchor point: the caller's base values where given, midpoints elsewhere.
    pub fn anchor(&self, base: Option<&Candidate>) -> Vec<f64> {
        self.variables
            .iter()
            .map(|var| {
                let value = base
                    .and_then(|c| c.get(&var.name))
                    .unwrap_or_else(|| var.midpoint());
                var.clamp(value)
            })
            .collect()
    }

    /// Bounds shrunk to `shrink` of each span, centred on `center` and kept
    /// inside the declared bounds. `shrink` is clamped to `[0.05, 0.95]`.
    pub fn narrowed(&self, center: &[f64], shrink: f64) -> SearchSpace {
        let s = shrink.clamp(0.05, 0.95);
        let variables = self
            .variables
            .iter()
            .zip(center)
            .map(|(var, c)| {
                let c = var.clamp(*c);
                let half = 0.5 * s * var.span();
                let lo = var.clamp(c - half);
                let mut hi = var.clamp(c + half);
                if hi <= lo {
                    hi = lo + 1e-12;
                }
                SearchVariable::new(var.name.clone(), lo, hi)
            })
            .collect();
        SearchSpace { variables }
    }
}

impl From<Vec<SearchVariable>> for SearchSpace {
    fn from(variables: Vec<SearchVariable>) -> Self {
        Self::from_variables(variables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_space() -> SearchSpace {
        SearchSpace::new().add("x", 0.0, 10.0).add("y", -1.0, 1.0)
    }

    #[test]
    fn validate_rejects_bad_bounds() {
        let space = SearchSpace::new().add("x", 1.0, 1.0);
        assert!(matches!(
            space.validate(),
            Err(ConfigError::InvalidBounds { .. })
        ));

        let space = SearchSpace::new().add("x", 0.0, f64::INFINITY);
        assert!(space.validate().is_err());
    }

    #[test]
    fn validate_rejects_duplicates_and_empty() {
        let space = SearchSpace::new().add("x", 0.0, 1.0).add("x", 0.0, 2.0);
        assert_eq!(
            space.validate(),
            Err(ConfigError::DuplicateVariable { name: "x".into() })
        );
        assert_eq!(SearchSpace::new().validate(), Err(ConfigError::NoVariables));
    }

    #[test]
    fn candidate_is_clamped() {
        let space = sample_space();
        let c = space.candidate(&[12.0, -3.0]);
        assert_eq!(c.get("x"), Some(10.0));
        assert_eq!(c.get("y"), Some(-1.0));
    }

    #[test]
    fn unit_round_trip_stays_in_bounds() {
        let space = sample_space();
        let x = space.from_unit(&[0.25, 1.5]);
        assert_eq!(x, vec![2.5, 1.0]);
        assert_eq!(space.to_unit(&x), vec![0.25, 1.0]);
    }

    #[test]
    fn vector_requires_every_variable() {
        let space = sample_space();
        let partial = Candidate::new().with("x", 1.0);
        assert!(space.vector(&partial).is_none());

        let full = partial.with("y", 0.5);
        assert_eq!(space.vector(&full), Some(vec![1.0, 0.5]));
    }

    #[test]
    fn anchor_falls_back_to_midpoint() {
        let space = sample_space();
        let base = Candidate::new().with("x", 20.0);
        assert_eq!(space.anchor(Some(&base)), vec![10.0, 0.0]);
        assert_eq!(space.anchor(None), vec![5.0, 0.0]);
    }

    #[test]
    fn narrowed_bounds_stay_inside_declared() {
        let space = sample_space();
        let local = space.narrowed(&[9.5, 0.0], 0.4);
        let x = &local.variables()[0];
        assert!((x.hi - 10.0).abs() < 1e-12);
        assert!((x.lo - 7.5).abs() < 1e-12);
        let y = &local.variables()[1];
        assert!((y.span() - 0.8).abs() < 1e-12);
    }
}
