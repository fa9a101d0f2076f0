//! Deduplicating, diversity-pruned archive with optional Pareto extraction.
//!
//! Records are sorted feasible-first, deduplicated on variables rounded to
//! [`DEDUP_DECIMALS`], pruned to the configured cap by greedy farthest-point
//! selection in span-normalized space, and finally re-sorted so the archive
//! stays in feasible-first order.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

use scout_types::{ConfigError, Objective, Record, SearchSpace};

use crate::config::ArchiveConfig;

pub const DEDUP_DECIMALS: i32 = 8;
/// Two objective values closer than this compare equal for dominance.
const DOMINANCE_TOLERANCE: f64 = 1e-12;

/// Hashable form of `x` rounded to `decimals` places.
///
/// `-0.0` and `0.0` quantize to the same key.
pub(crate) fn quantized_key(x: &[f64], decimals: i32) -> Vec<u64> {
    let scale = 10f64.powi(decimals);
    x.iter()
        .map(|v| ((v * scale).round() + 0.0).to_bits())
        .collect()
}

/// Sort by feasible-first key and drop repeats of an already-seen vector.
///
/// The sort is stable, so among equal keys the earlier record is kept.
pub fn dedup(records: &[Record], space: &SearchSpace) -> Vec<Record> {
    let mut sorted: Vec<&Record> = records.iter().collect();
    sorted.sort_by_key(|r| r.key());
    let mut seen = HashSet::new();
    sorted
        .into_iter()
        .filter(|r| match space.vector(&r.x) {
            Some(x) => seen.insert(quantized_key(&x, DEDUP_DECIMALS)),
            None => false,
        })
        .cloned()
        .collect()
}

/// Greedy farthest-point selection of `k` distinct records.
///
/// Input is deduplicated first, so the result holds `min(k, unique)`
/// records. Selection starts from the best-ranked record and repeatedly adds
/// the one whose distance to the chosen set is largest; ties go to the
/// earliest.
pub fn prune_diverse(records: Vec<Record>, k: usize, space: &SearchSpace) -> Vec<Record> {
    let records = dedup(&records, space);
    if records.len() <= k {
        return records;
    }
    if k == 0 {
        return Vec::new();
    }
    let spans = space.spans();
    let lower = space.lower();
    let points: Vec<Vec<f64>> = records
        .iter()
        .map(|r| {
            let x = space.vector(&r.x).unwrap_or_else(|| space.midpoint());
            x.iter()
                .zip(lower.iter().zip(&spans))
                .map(|(v, (lo, s))| (v - lo) / s)
                .collect()
        })
        .collect();

    let mut chosen = vec![0usize];
    let mut taken = vec![false; records.len()];
    taken[0] = true;
    let mut nearest = vec![f64::INFINITY; records.len()];
    while chosen.len() < k {
        let last = &points[chosen[chosen.len() - 1]];
        let mut next: Option<(usize, f64)> = None;
        for (i, p) in points.iter().enumerate() {
            if taken[i] {
                continue;
            }
            nearest[i] = nearest[i].min(distance(p, last));
            if next.map_or(true, |(_, d)| nearest[i] > d) {
                next = Some((i, nearest[i]));
            }
        }
        match next {
            Some((i, _)) => {
                taken[i] = true;
                chosen.push(i);
            }
            None => break,
        }
    }

    let mut slots: Vec<Option<Record>> = records.into_iter().map(Some).collect();
    let mut out: Vec<Record> = chosen.into_iter().filter_map(|i| slots[i].take()).collect();
    out.sort_by_key(|r| r.key());
    out
}

fn distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

/// True if `a` is at least as good as `b` on every objective and strictly
/// better on one. Missing or non-finite outputs never dominate.
pub fn dominates(a: &Record, b: &Record, objectives: &[Objective]) -> bool {
    let mut strictly_better = false;
    for objective in objectives {
        let (Some(va), Some(vb)) = (
            a.result.evidence.outputs.get(&objective.key),
            b.result.evidence.outputs.get(&objective.key),
        ) else {
            return false;
        };
        if !(va.is_finite() && vb.is_finite()) {
            return false;
        }
        let (oa, ob) = (objective.oriented(*va), objective.oriented(*vb));
        if oa < ob - DOMINANCE_TOLERANCE {
            return false;
        }
        if oa > ob + DOMINANCE_TOLERANCE {
            strictly_better = true;
        }
    }
    strictly_better
}

/// Indices of the non-dominated feasible records.
///
/// `Ok(None)` when fewer than two objectives or two feasible records exist.
pub fn pareto_front(records: &[Record], objectives: &[Objective]) -> Result<Option<Vec<usize>>, ConfigError> {
    if objectives.is_empty() {
        return Err(ConfigError::EmptyObjectives);
    }
    let feasible: Vec<usize> = (0..records.len()).filter(|i| records[*i].feasible()).collect();
    if objectives.len() < 2 || feasible.len() < 2 {
        return Ok(None);
    }
    let front = feasible
        .iter()
        .copied()
        .filter(|i| {
            !feasible
                .iter()
                .any(|j| j != i && dominates(&records[*j], &records[*i], objectives))
        })
        .collect();
    Ok(Some(front))
}

/// The archive as published in the evidence artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Archive {
    pub entries: Vec<Record>,
    /// Indices into `entries`; absent unless Pareto extraction applied.
    #[serde(default)]
    pub pareto_front: Option<Vec<usize>>,
}

impl Archive {
    pub fn build(
        records: &[Record],
        space: &SearchSpace,
        config: &ArchiveConfig,
        objectives: &[Objective],
    ) -> Result<Self, ConfigError> {
        let unique = dedup(records, space);
        let n_unique = unique.len();
        let entries = prune_diverse(unique, config.cap, space);
        let pareto_front = if config.pareto {
            pareto_front(&entries, objectives)?
        } else {
            None
        };
        debug!(
            records = records.len(),
            unique = n_unique,
            kept = entries.len(),
            front = pareto_front.as_ref().map(Vec::len),
            "archive built"
        );
        Ok(Self { entries, pareto_front })
    }

    pub fn feasible(&self) -> impl Iterator<Item = &Record> {
        self.entries.iter().filter(|r| r.feasible())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
