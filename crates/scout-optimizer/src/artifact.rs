//! The evidence artifact: everything a run produced, content-addressed.
//!
//! The digest covers the `SearchSpec` and the per-stage records only. Archive,
//! diagnostics and timestamps are derived or incidental and stay outside it,
//! so two runs with the same inputs share both `digest` and `run_id`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use scout_types::{
    best_feasible_index, sentinel, Candidate, Evidence, Record, ScoutResult, SearchVariable, Verdict,
};

use crate::archive::Archive;
use crate::config::SearchSpec;
use crate::diagnostics::Diagnostics;
use crate::digest;
use crate::sampler::SamplingMethod;
use crate::scheduler::BudgetAllocation;

pub const SCHEMA_VERSION: &str = "scout.evidence.v1";

/// Wire form of one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordView {
    pub index: usize,
    pub phase: String,
    pub x: Candidate,
    pub verdict: Verdict,
    #[serde(with = "sentinel::score")]
    pub score: f64,
    #[serde(with = "sentinel::violation")]
    pub violation: f64,
    pub evidence: Evidence,
}

impl From<&Record> for RecordView {
    fn from(record: &Record) -> Self {
        Self {
            index: record.index,
            phase: record.phase.clone(),
            x: record.x.clone(),
            verdict: record.verdict(),
            score: record.score(),
            violation: record.violation(),
            evidence: record.result.evidence.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Completed,
    /// The global budget ran out during the stage.
    BudgetExhausted,
    /// The global budget was already spent when the stage came up.
    Skipped,
}

/// One stage's outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub name: String,
    pub method: String,
    /// Allocation the stage ran with, after any rescheduling.
    pub budget: usize,
    pub seed: u64,
    /// Bounds the stage sampled within (narrowed for local-refine stages).
    pub variables: Vec<SearchVariable>,
    pub status: StageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub records: Vec<RecordView>,
    /// Best passing record; `None` when every record failed.
    pub best_index: Option<usize>,
    pub digest: String,
}

#[derive(Serialize)]
struct StageContent<'a> {
    name: &'a str,
    method: &'a str,
    budget: usize,
    seed: u64,
    variables: &'a [SearchVariable],
    records: &'a [RecordView],
}

impl StageResult {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        method: impl Into<String>,
        budget: usize,
        seed: u64,
        variables: Vec<SearchVariable>,
        status: StageStatus,
        note: Option<String>,
        records: &[Record],
    ) -> ScoutResult<Self> {
        let name = name.into();
        let method = method.into();
        let views: Vec<RecordView> = records.iter().map(RecordView::from).collect();
        let digest = digest::content_digest(&StageContent {
            name: &name,
            method: &method,
            budget,
            seed,
            variables: &variables,
            records: &views,
        })?;
        Ok(Self {
            name,
            method,
            budget,
            seed,
            variables,
            status,
            note,
            records: views,
            best_index: best_feasible_index(records),
            digest,
        })
    }

    pub fn best(&self) -> Option<&RecordView> {
        self.best_index.and_then(|i| self.records.get(i))
    }
}

/// Configuration of a standalone sampling search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingPlan {
    pub method: SamplingMethod,
    pub budget: usize,
    pub seed: u64,
}

impl SamplingPlan {
    pub fn new(method: SamplingMethod, budget: usize, seed: u64) -> Self {
        Self { method, budget, seed }
    }
}

/// Result of a single deterministic sampling search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub variables: Vec<SearchVariable>,
    pub plan: SamplingPlan,
    pub status: StageStatus,
    pub records: Vec<RecordView>,
    pub best_index: Option<usize>,
    pub digest: String,
}

#[derive(Serialize)]
struct SearchContent<'a> {
    variables: &'a [SearchVariable],
    plan: &'a SamplingPlan,
    records: &'a [RecordView],
}

impl SearchResult {
    pub fn new(variables: Vec<SearchVariable>, plan: SamplingPlan, status: StageStatus, records: &[Record]) -> ScoutResult<Self> {
        let views: Vec<RecordView> = records.iter().map(RecordView::from).collect();
        let digest = digest::content_digest(&SearchContent {
            variables: &variables,
            plan: &plan,
            records: &views,
        })?;
        Ok(Self {
            variables,
            plan,
            status,
            records: views,
            best_index: best_feasible_index(records),
            digest,
        })
    }

    pub fn best(&self) -> Option<&RecordView> {
        self.best_index.and_then(|i| self.records.get(i))
    }
}

/// Best feasible record of the run; every field is null when none exists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BestSummary {
    pub stage: Option<String>,
    #[serde(with = "sentinel::optional")]
    pub score: Option<f64>,
    pub x: Option<Candidate>,
}

impl BestSummary {
    pub fn of(record: Option<&Record>) -> Self {
        match record.filter(|r| r.feasible()) {
            Some(r) => Self {
                stage: Some(r.phase.clone()),
                score: Some(r.score()),
                x: Some(r.x.clone()),
            },
            None => Self::default(),
        }
    }

    pub fn is_found(&self) -> bool {
        self.x.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArchiveView {
    pub entries: Vec<RecordView>,
    #[serde(default)]
    pub pareto_front: Option<Vec<usize>>,
}

impl From<&Archive> for ArchiveView {
    fn from(archive: &Archive) -> Self {
        Self {
            entries: archive.entries.iter().map(RecordView::from).collect(),
            pareto_front: archive.pareto_front.clone(),
        }
    }
}

/// Oracle-call accounting for the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSummary {
    pub limit: usize,
    pub spent: usize,
    pub exhausted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceArtifact {
    pub schema_version: String,
    pub run_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub spec: SearchSpec,
    pub stages: Vec<StageResult>,
    pub best: BestSummary,
    pub budget_allocation: BudgetAllocation,
    pub archive: ArchiveView,
    pub diagnostics: Diagnostics,
    pub evaluations: EvaluationSummary,
    /// Remembered rows used as extra surrogate training data.
    pub knowledge_rows: usize,
    pub digest: String,
}

#[derive(Serialize)]
struct RunContent<'a> {
    spec: &'a SearchSpec,
    stages: &'a [StageResult],
}

/// Digest of a run: the search spec plus every stage, records included.
pub fn run_digest(spec: &SearchSpec, stages: &[StageResult]) -> ScoutResult<String> {
    digest::content_digest(&RunContent { spec, stages })
}

impl EvidenceArtifact {
    pub fn stage(&self, name: &str) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// All records in stage order.
    pub fn records(&self) -> impl Iterator<Item = &RecordView> {
        self.stages.iter().flat_map(|s| s.records.iter())
    }

    /// Recompute the digest and compare it with the stored one.
    pub fn verify_digest(&self) -> ScoutResult<bool> {
        Ok(run_digest(&self.spec, &self.stages)? == self.digest)
    }

    pub fn to_json_pretty(&self) -> ScoutResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::testing::{half_plane, square};
    use scout_types::{EvalResult, FailureReason};

    fn records() -> Vec<Record> {
        let space = square();
        let mut out: Vec<Record> = [[9.0, 9.0], [3.0, 4.0], [7.0, 7.0]]
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let c = space.candidate(p);
                Record::new(i, "scan", c.clone(), half_plane(&c))
            })
            .collect();
        out.push(Record::new(
            3,
            "scan",
            space.candidate(&[0.0, 0.0]),
            EvalResult::failure(FailureReason::Exception, "boom"),
        ));
        out
    }

    fn stage(records: &[Record]) -> StageResult {
        StageResult::new(
            "scan",
            "halton",
            4,
            7,
            square().variables().to_vec(),
            StageStatus::Completed,
            None,
            records,
        )
        .unwrap()
    }

    #[test]
    fn record_view_wire_form() {
        let views = stage(&records()).records;
        let json = serde_json::to_value(&views).unwrap();
        assert_eq!(json[0]["verdict"], "FAIL");
        assert_eq!(json[1]["verdict"], "PASS");
        assert_eq!(json[1]["violation"], 0.0);
        assert!(json[3]["score"].is_null());
        assert!(json[3]["violation"].is_null());
        assert_eq!(json[3]["evidence"]["reason"], "exception");
    }

    #[test]
    fn stage_digest_depends_on_records() {
        let records = records();
        let full = stage(&records);
        assert_eq!(full.best_index, Some(2));
        assert_eq!(full.digest, stage(&records).digest);
        assert_ne!(full.digest, stage(&records[..3]).digest);
        assert_eq!(full.digest.len(), 64);
    }

    #[test]
    fn best_index_never_points_at_a_failure() {
        let records = records();
        let failing = [records[0].clone(), records[3].clone()];
        let stage = stage(&failing);
        assert_eq!(stage.best_index, None);
        assert!(stage.best().is_none());
        assert!(serde_json::to_value(&stage).unwrap()["best_index"].is_null());

        let plan = SamplingPlan::new(SamplingMethod::Halton, 2, 0);
        let search = SearchResult::new(square().variables().to_vec(), plan, StageStatus::Completed, &failing).unwrap();
        assert_eq!(search.best_index, None);
    }

    #[test]
    fn best_summary_is_null_without_feasible() {
        let records = records();
        let empty = serde_json::to_value(BestSummary::of(Some(&records[0]))).unwrap();
        assert!(empty["stage"].is_null() && empty["score"].is_null() && empty["x"].is_null());

        let best = BestSummary::of(Some(&records[2]));
        assert!(best.is_found());
        assert_eq!(best.score, Some(14.0));
        assert_eq!(best.stage.as_deref(), Some("scan"));
    }
}
