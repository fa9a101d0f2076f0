//! Bagged regression-tree ensemble.
//!
//! Used twice by surrogate stages: on 0/1 feasibility labels it acts as the
//! feasibility classifier (the mean leaf value is the probability), and on
//! feasible scores as the conditional score regressor.

use rand::seq::SliceRandom;
use rand::Rng;
use rand_chacha::ChaCha8Rng;

#[derive(Debug, Clone, PartialEq)]
pub struct ForestConfig {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_leaf: usize,
    /// Fraction of features considered at each split.
    pub feature_fraction: f64,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_trees: 24,
            max_depth: 6,
            min_leaf: 3,
            feature_fraction: 0.7,
        }
    }
}

#[derive(Debug, Clone)]
enum Node {
    Leaf(f64),
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl Node {
    fn predict(&self, x: &[f64]) -> f64 {
        let mut node = self;
        loop {
            match node {
                Node::Leaf(v) => return *v,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if x[*feature] <= *threshold { left } else { right };
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegressionForest {
    trees: Vec<Node>,
}

impl RegressionForest {
    /// Fit on bootstrap resamples of `(xs, ys)`. `None` on empty input.
    pub fn fit(xs: &[Vec<f64>], ys: &[f64], config: &ForestConfig, rng: &mut ChaCha8Rng) -> Option<Self> {
        let n = xs.len();
        if n == 0 || n != ys.len() {
            return None;
        }
        let dims = xs[0].len();
        let n_features = ((dims as f64 * config.feature_fraction).ceil() as usize).clamp(1, dims.max(1));
        let trees = (0..config.n_trees.max(1))
            .map(|_| {
                let sample: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                let builder = TreeBuilder {
                    xs,
                    ys,
                    config,
                    n_features,
                };
                builder.build(sample, 0, rng)
            })
            .collect();
        Some(Self { trees })
    }

    pub fn predict(&self, x: &[f64]) -> f64 {
        let total: f64 = self.trees.iter().map(|t| t.predict(x)).sum();
        total / self.trees.len() as f64
    }

    /// Prediction clamped to `[0, 1]`, for forests fitted on 0/1 labels.
    pub fn probability(&self, x: &[f64]) -> f64 {
        self.predict(x).clamp(0.0, 1.0)
    }
}

struct TreeBuilder<'a> {
    xs: &'a [Vec<f64>],
    ys: &'a [f64],
    config: &'a ForestConfig,
    n_features: usize,
}

impl TreeBuilder<'_> {
    fn build(&self, idx: Vec<usize>, depth: usize, rng: &mut ChaCha8Rng) -> Node {
        let mean = idx.iter().map(|i| self.ys[*i]).sum::<f64>() / idx.len() as f64;
        if depth >= self.config.max_depth || idx.len() < 2 * self.config.min_leaf {
            return Node::Leaf(mean);
        }
        let Some((feature, threshold)) = self.best_split(&idx, rng) else {
            return Node::Leaf(mean);
        };
        let (left, right): (Vec<usize>, Vec<usize>) =
            idx.into_iter().partition(|i| self.xs[*i][feature] <= threshold);
        Node::Split {
            feature,
            threshold,
            left: Box::new(self.build(left, depth + 1, rng)),
            right: Box::new(self.build(right, depth + 1, rng)),
        }
    }

    /// Split minimizing the summed squared error of both children.
    fn best_split(&self, idx: &[usize], rng: &mut ChaCha8Rng) -> Option<(usize, f64)> {
        let dims = self.xs[idx[0]].len();
        let mut features: Vec<usize> = (0..dims).collect();
        features.shuffle(rng);
        features.truncate(self.n_features);

        let min_leaf = self.config.min_leaf.max(1);
        let total_sum: f64 = idx.iter().map(|i| self.ys[*i]).sum();
        let total_sq: f64 = idx.iter().map(|i| self.ys[*i].powi(2)).sum();
        let n = idx.len() as f64;
        let parent_sse = total_sq - total_sum * total_sum / n;

        let mut best: Option<(f64, usize, f64)> = None;
        for feature in features {
            let mut order = idx.to_vec();
            order.sort_by(|a, b| self.xs[*a][feature].total_cmp(&self.xs[*b][feature]));
            let mut left_sum = 0.0;
            let mut left_sq = 0.0;
            for k in 0..order.len() - 1 {
                let y = self.ys[order[k]];
                left_sum += y;
                left_sq += y * y;
                let n_left = (k + 1) as f64;
                let n_right = n - n_left;
                if k + 1 < min_leaf || order.len() - (k + 1) < min_leaf {
                    continue;
                }
                let here = self.xs[order[k]][feature];
                let next = self.xs[order[k + 1]][feature];
                if next <= here {
                    continue;
                }
                let right_sum = total_sum - left_sum;
                let right_sq = total_sq - left_sq;
                let sse = (left_sq - left_sum * left_sum / n_left)
                    + (right_sq - right_sum * right_sum / n_right);
                if best.map_or(true, |(b, _, _)| sse < b) {
                    best = Some((sse, feature, 0.5 * (here + next)));
                }
            }
        }
        match best {
            Some((sse, feature, threshold)) if sse < parent_sse - 1e-12 => Some((feature, threshold)),
            _ => None,
        }
    }
}
