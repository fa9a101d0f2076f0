//! Run summaries derived from records and the archive.
//!
//! None of these influence the search; they are attached to the artifact
//! to explain where the feasible region is and what keeps candidates out.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use scout_types::{Record, SearchSpace};

pub const DEFAULT_RESISTANCE_WINDOW: usize = 250;
const MIN_CORRELATION_ROWS: usize = 10;
const MIN_PAIRED_VALUES: usize = 5;
const SKELETON_NEIGHBOURS: usize = 8;
const SKELETON_MIN_FEASIBLE: usize = 3;
const SKELETON_TOP_EDGES: usize = 10;

/// What blocked the most recent evaluations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resistance {
    pub n: usize,
    pub feasible_rate: Option<f64>,
    /// Failure reason counts; successful evaluations count under `"none"`.
    pub failure_modes: BTreeMap<String, usize>,
    /// How often each constraint was binding among infeasible records.
    pub binding_constraints: BTreeMap<String, usize>,
}

/// Summarize the last `window` records.
pub fn resistance(records: &[Record], window: usize) -> Resistance {
    let tail = &records[records.len().saturating_sub(window)..];
    if tail.is_empty() {
        return Resistance::default();
    }
    let mut out = Resistance {
        n: tail.len(),
        ..Resistance::default()
    };
    let feasible = tail.iter().filter(|r| r.feasible()).count();
    out.feasible_rate = Some(feasible as f64 / tail.len() as f64);
    for record in tail {
        let mode = match record.result.evidence.reason {
            Some(reason) => reason.to_string(),
            None => "none".to_string(),
        };
        *out.failure_modes.entry(mode).or_default() += 1;
        if !record.feasible() {
            if let Some(name) = record.result.evidence.binding_name() {
                *out.binding_constraints.entry(name.to_string()).or_default() += 1;
            }
        }
    }
    out
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariableCorrelation {
    /// Pearson correlation with the minimum constraint margin.
    pub margin: Option<f64>,
    pub score: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Correlations {
    pub n: usize,
    pub variables: BTreeMap<String, VariableCorrelation>,
}

/// Correlation of each variable with margin and score over feasible entries.
pub fn variable_correlations(archive: &[Record], space: &SearchSpace) -> Correlations {
    let feasible: Vec<&Record> = archive.iter().filter(|r| r.feasible()).collect();
    let mut out = Correlations {
        n: feasible.len(),
        variables: BTreeMap::new(),
    };
    if feasible.len() < MIN_CORRELATION_ROWS {
        return out;
    }
    let margins: Vec<f64> = feasible
        .iter()
        .map(|r| r.result.evidence.min_margin().unwrap_or(f64::NAN))
        .collect();
    let scores: Vec<f64> = feasible.iter().map(|r| r.score()).collect();
    for variable in space.variables() {
        let xs: Vec<f64> = feasible
            .iter()
            .map(|r| r.x.get(&variable.name).unwrap_or(f64::NAN))
            .collect();
        out.variables.insert(
            variable.name.clone(),
            VariableCorrelation {
                margin: pearson(&xs, &margins),
                score: pearson(&xs, &scores),
            },
        );
    }
    out
}

/// Pearson correlation over pairs where both values are finite.
///
/// `None` with fewer than five such pairs or a flat series.
pub fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
    let pairs: Vec<(f64, f64)> = a
        .iter()
        .zip(b)
        .filter(|(x, y)| x.is_finite() && y.is_finite())
        .map(|(x, y)| (*x, *y))
        .collect();
    if pairs.len() < MIN_PAIRED_VALUES {
        return None;
    }
    let n = pairs.len() as f64;
    let mean_a = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_b = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let (mut cov, mut var_a, mut var_b) = (0.0, 0.0, 0.0);
    for (x, y) in &pairs {
        cov += (x - mean_a) * (y - mean_b);
        var_a += (x - mean_a).powi(2);
        var_b += (y - mean_b).powi(2);
    }
    let (sd_a, sd_b) = ((var_a / n).sqrt(), (var_b / n).sqrt());
    if sd_a < 1e-12 || sd_b < 1e-12 {
        return None;
    }
    Some((cov / (var_a.sqrt() * var_b.sqrt())).clamp(-1.0, 1.0))
}

/// A k-NN edge between two feasible archive entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkeletonEdge {
    pub from: usize,
    pub to: usize,
    pub distance: f64,
}

/// Connectivity of the feasible region as seen through the archive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeasibilitySkeleton {
    pub n_feasible: usize,
    pub n_components: usize,
    /// Component sizes, largest first.
    pub components: Vec<usize>,
    /// Longest k-NN edges, longest first. Indices refer to the feasible
    /// entries in archive order.
    pub bottleneck_edges: Vec<SkeletonEdge>,
}

/// k-NN graph over feasible entries in span-normalized space.
pub fn feasibility_skeleton(archive: &[Record], space: &SearchSpace) -> FeasibilitySkeleton {
    let points: Vec<Vec<f64>> = archive
        .iter()
        .filter(|r| r.feasible())
        .filter_map(|r| space.vector(&r.x))
        .map(|x| space.to_unit(&x))
        .collect();
    let n = points.len();
    if n < SKELETON_MIN_FEASIBLE {
        return FeasibilitySkeleton {
            n_feasible: n,
            ..FeasibilitySkeleton::default()
        };
    }
    let k = SKELETON_NEIGHBOURS.max(2).min(n - 1);
    let dist = |i: usize, j: usize| {
        points[i]
            .iter()
            .zip(&points[j])
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f64>()
            .sqrt()
    };

    let mut adjacency = vec![Vec::new(); n];
    let mut edges = Vec::new();
    let mut linked = HashSet::new();
    for i in 0..n {
        let mut others: Vec<(usize, f64)> = (0..n).filter(|j| *j != i).map(|j| (j, dist(i, j))).collect();
        others.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        for (j, d) in others.into_iter().take(k) {
            // The graph is undirected: keep a pair once, whichever end listed it.
            let (from, to) = (i.min(j), i.max(j));
            if linked.insert((from, to)) {
                adjacency[from].push(to);
                adjacency[to].push(from);
                edges.push(SkeletonEdge { from, to, distance: d });
            }
        }
    }

    let mut seen = vec![false; n];
    let mut components = Vec::new();
    for start in 0..n {
        if seen[start] {
            continue;
        }
        seen[start] = true;
        let mut stack = vec![start];
        let mut size = 0;
        while let Some(u) = stack.pop() {
            size += 1;
            for v in &adjacency[u] {
                if !seen[*v] {
                    seen[*v] = true;
                    stack.push(*v);
                }
            }
        }
        components.push(size);
    }
    components.sort_unstable_by(|a, b| b.cmp(a));

    edges.sort_by(|a, b| {
        b.distance
            .total_cmp(&a.distance)
            .then_with(|| (a.from, a.to).cmp(&(b.from, b.to)))
    });
    edges.truncate(SKELETON_TOP_EDGES);

    FeasibilitySkeleton {
        n_feasible: n,
        n_components: components.len(),
        components,
        bottleneck_edges: edges,
    }
}

/// Everything attached to the artifact under `diagnostics`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub resistance: Resistance,
    pub variable_correlations: Correlations,
    pub feasibility_skeleton: FeasibilitySkeleton,
}

impl Diagnostics {
    pub fn collect(records: &[Record], archive: &[Record], space: &SearchSpace) -> Self {
        Self {
            resistance: resistance(records, DEFAULT_RESISTANCE_WINDOW),
            variable_correlations: variable_correlations(archive, space),
            feasibility_skeleton: feasibility_skeleton(archive, space),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::testing::{half_plane, square};
    use scout_types::{EvalResult, FailureReason};

    fn at(space: &SearchSpace, x: f64, y: f64) -> Record {
        let c = space.candidate(&[x, y]);
        Record::new(0, "t", c.clone(), half_plane(&c))
    }

    #[test]
    fn resistance_counts_window_only() {
        let space = square();
        let mut records = vec![at(&space, 9.0, 9.0); 5];
        records.extend(vec![at(&space, 1.0, 1.0); 3]);
        records.push(Record::new(
            9,
            "t",
            space.candidate(&[0.0, 0.0]),
            EvalResult::failure(FailureReason::Exception, "boom"),
        ));
        let summary = resistance(&records, 6);
        assert_eq!(summary.n, 6);
        assert_eq!(summary.feasible_rate, Some(0.5));
        assert_eq!(summary.failure_modes["none"], 5);
        assert_eq!(summary.failure_modes["exception"], 1);
        assert_eq!(summary.binding_constraints["sum_limit"], 2);
        assert_eq!(resistance(&[], 10), Resistance::default());
    }

    #[test]
    fn pearson_handles_degenerate_input() {
        let a = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert!((pearson(&a, &[2.0, 4.0, 6.0, 8.0, 10.0]).unwrap() - 1.0).abs() < 1e-12);
        assert!((pearson(&a, &[5.0, 4.0, 3.0, 2.0, 1.0]).unwrap() + 1.0).abs() < 1e-12);
        assert_eq!(pearson(&a, &[1.0; 5]), None);
        assert_eq!(pearson(&a[..4], &a[..4]), None);
    }

    #[test]
    fn correlations_follow_the_constraint() {
        let space = square();
        let archive: Vec<Record> = (0..12).map(|i| at(&space, i as f64 * 0.5, 1.0 + (i % 3) as f64)).collect();
        let corr = variable_correlations(&archive, &space);
        assert_eq!(corr.n, 12);
        assert!(corr.variables["x"].margin.unwrap() < -0.5);
        assert!(corr.variables["x"].score.unwrap() > 0.5);

        let few = variable_correlations(&archive[..4], &space);
        assert!(few.variables.is_empty());
    }

    #[test]
    fn skeleton_separates_distant_clusters() {
        let space = square();
        let cluster = |cx: f64, cy: f64| (0..10).map(move |i| (cx + 0.1 * (i % 5) as f64, cy + 0.1 * (i / 5) as f64));
        let archive: Vec<Record> = cluster(0.0, 0.0)
            .chain(cluster(6.0, 6.0))
            .map(|(x, y)| at(&space, x, y))
            .collect();
        let skeleton = feasibility_skeleton(&archive, &space);
        assert_eq!(skeleton.n_feasible, 20);
        assert_eq!(skeleton.components, vec![10, 10]);
        assert_eq!(skeleton.n_components, 2);
        assert_eq!(skeleton.bottleneck_edges.len(), SKELETON_TOP_EDGES);
        assert!(skeleton
            .bottleneck_edges
            .windows(2)
            .all(|w| w[0].distance >= w[1].distance));

        let small = feasibility_skeleton(&archive[..2], &space);
        assert_eq!(small.n_feasible, 2);
        assert_eq!(small.n_components, 0);
    }

    #[test]
    fn skeleton_keeps_edges_listed_only_by_the_far_end() {
        let space = square();
        // Nine tight points, each with exactly eight neighbours inside the
        // cluster, plus one outlier whose neighbours are all cluster points.
        let mut archive: Vec<Record> = (0..9)
            .map(|i| at(&space, 0.1 * (i % 3) as f64, 0.1 * (i / 3) as f64))
            .collect();
        archive.push(at(&space, 7.0, 7.0));

        let skeleton = feasibility_skeleton(&archive, &space);
        assert_eq!(skeleton.n_feasible, 10);
        assert_eq!(skeleton.components, vec![10]);
        assert_eq!(skeleton.bottleneck_edges.len(), SKELETON_TOP_EDGES);
        assert!(skeleton.bottleneck_edges[..8].iter().all(|e| e.to == 9 && e.from < 9));
        assert!(skeleton.bottleneck_edges[0].distance > 0.5);
        assert!(skeleton
            .bottleneck_edges
            .iter()
            .all(|e| e.from < e.to));
    }
}
