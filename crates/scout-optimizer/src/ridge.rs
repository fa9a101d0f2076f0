//! Standardized ridge regression on quadratic features.
//!
//! Inputs are standardized per dimension (dimensions with no spread keep
//! scale 1), expanded to `[1, z_i, z_i * z_j (i <= j)]`, and the regularized
//! normal equations `(PhiᵀPhi + alpha I) w = Phiᵀy` are solved by Cholesky.
//! The intercept is not penalized.

use nalgebra::{DMatrix, DVector};

/// Per-dimension mean and scale learned from training inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct Standardizer {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

impl Standardizer {
    pub fn fit(xs: &[Vec<f64>]) -> Self {
        let dims = xs.first().map(Vec::len).unwrap_or(0);
        let n = xs.len().max(1) as f64;
        let mean: Vec<f64> = (0..dims)
            .map(|j| xs.iter().map(|x| x[j]).sum::<f64>() / n)
            .collect();
        let scale = (0..dims)
            .map(|j| {
                let var = xs.iter().map(|x| (x[j] - mean[j]).powi(2)).sum::<f64>() / n;
                let std = var.sqrt();
                if std > 1e-12 {
                    std
                } else {
                    1.0
                }
            })
            .collect();
        Self { mean, scale }
    }

    pub fn transform(&self, x: &[f64]) -> Vec<f64> {
        x.iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(v, (m, s))| (v - m) / s)
            .collect()
    }
}

/// Bias, linear and pairwise-product terms.
pub fn poly2_features(z: &[f64]) -> Vec<f64> {
    let d = z.len();
    let mut phi = Vec::with_capacity(1 + d + d * (d + 1) / 2);
    phi.push(1.0);
    phi.extend_from_slice(z);
    for i in 0..d {
        for j in i..d {
            phi.push(z[i] * z[j]);
        }
    }
    phi
}

/// Rows needed before a ridge fit is attempted.
pub fn min_training_rows(dims: usize) -> usize {
    (2 * dims + 1).max(8)
}

#[derive(Debug, Clone)]
pub struct RidgeModel {
    standardizer: Standardizer,
    weights: DVector<f64>,
    /// Residual standard deviation on the training set.
    sigma: f64,
    /// Standardized training inputs, for distance-based uncertainty.
    train: Vec<Vec<f64>>,
}

impl RidgeModel {
    /// Fit on `(xs, ys)`. Returns `None` with too few rows or a failed
    /// factorization.
    pub fn fit(xs: &[Vec<f64>], ys: &[f64], alpha: f64) -> Option<Self> {
        let n = xs.len();
        let dims = xs.first()?.len();
        if n != ys.len() || n < min_training_rows(dims) {
            return None;
        }
        let standardizer = Standardizer::fit(xs);
        let train: Vec<Vec<f64>> = xs.iter().map(|x| standardizer.transform(x)).collect();
        let features: Vec<Vec<f64>> = train.iter().map(|z| poly2_features(z)).collect();
        let p = features[0].len();

        let phi = DMatrix::from_fn(n, p, |i, j| features[i][j]);
        let y = DVector::from_column_slice(ys);
        let mut gram = phi.transpose() * &phi;
        for j in 1..p {
            gram[(j, j)] += alpha;
        }
        // Keep the intercept column positive definite on degenerate data.
        gram[(0, 0)] += 1e-10;
        let rhs = phi.transpose() * &y;
        let weights = nalgebra::linalg::Cholesky::new(gram)?.solve(&rhs);

        let residuals = &y - &phi * &weights;
        let sigma = (residuals.norm_squared() / n as f64).sqrt();
        if !sigma.is_finite() || weights.iter().any(|w| !w.is_finite()) {
            return None;
        }
        Some(Self {
            standardizer,
            weights,
            sigma,
            train,
        })
    }

    pub fn predict(&self, x: &[f64]) -> f64 {
        let phi = poly2_features(&self.standardizer.transform(x));
        phi.iter().zip(self.weights.iter()).map(|(a, b)| a * b).sum()
    }

    /// Residual sigma scaled by the distance to the nearest training point.
    pub fn uncertainty(&self, x: &[f64]) -> f64 {
        let z = self.standardizer.transform(x);
        let nearest = self
            .train
            .iter()
            .map(|t| {
                t.iter()
                    .zip(&z)
                    .map(|(a, b)| (a - b).powi(2))
                    .sum::<f64>()
                    .sqrt()
            })
            .fold(f64::INFINITY, f64::min);
        if nearest.is_finite() {
            self.sigma * nearest
        } else {
            self.sigma
        }
    }

    pub fn residual_sigma(&self) -> f64 {
        self.sigma
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn standardizer_keeps_degenerate_scale() {
        let xs = vec![vec![1.0, 5.0], vec![3.0, 5.0]];
        let s = Standardizer::fit(&xs);
        assert_eq!(s.transform(&[2.0, 5.0]), vec![0.0, 0.0]);
        assert_eq!(s.transform(&[3.0, 6.0]), vec![1.0, 1.0]);
    }

    #[test]
    fn feature_count_is_quadratic() {
        assert_eq!(poly2_features(&[1.0, 2.0]), vec![1.0, 1.0, 2.0, 1.0, 2.0, 4.0]);
        assert_eq!(poly2_features(&[0.0; 4]).len(), 1 + 4 + 10);
    }

    #[test]
    fn recovers_quadratic_surface() {
        let mut rng = crate::seeding::rng(5);
        let xs: Vec<Vec<f64>> = (0..60)
            .map(|_| vec![rng.gen_range(-2.0..2.0), rng.gen_range(0.0..4.0)])
            .collect();
        let f = |x: &[f64]| 3.0 - x[0] * x[0] + 0.5 * x[1];
        let ys: Vec<f64> = xs.iter().map(|x| f(x)).collect();
        let model = RidgeModel::fit(&xs, &ys, 1e-6).unwrap();
        for probe in [[0.0, 1.0], [1.5, 3.0], [-1.0, 0.5]] {
            assert!((model.predict(&probe) - f(&probe)).abs() < 1e-3);
        }
        assert!(model.residual_sigma() < 1e-3);
    }

    #[test]
    fn too_few_rows_is_none() {
        let xs = vec![vec![0.0, 0.0]; 4];
        assert!(RidgeModel::fit(&xs, &[0.0; 4], 1e-3).is_none());
        assert!(RidgeModel::fit(&[], &[], 1e-3).is_none());
    }

    #[test]
    fn uncertainty_grows_away_from_data() {
        let xs: Vec<Vec<f64>> = (0..12).map(|i| vec![i as f64 * 0.1]).collect();
        let ys: Vec<f64> = xs.iter().map(|x| (x[0] * 7.0).sin()).collect();
        let model = RidgeModel::fit(&xs, &ys, 1e-3).unwrap();
        assert!(model.uncertainty(&[5.0]) > model.uncertainty(&[0.55]));
    }
}
