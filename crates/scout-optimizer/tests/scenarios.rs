//! End-to-end runs against small analytic evaluators.

use std::collections::BTreeMap;
use std::sync::Arc;

use scout_optimizer::{
    dedup, dominates, run, run_budgeted_search, AllocationRule, Archive, ArchiveConfig, EvidenceArtifact,
    JsonFileRepository,
    MemoryRepository, Orchestrator, Repository, SamplingMethod, SamplingPlan, SchedulerConfig, SearchSpec,
    StageSpec, StageStatus, SurrogateBackend, WorkerPoolConfig, NOTE_INSUFFICIENT_HISTORY,
};
use scout_types::{
    Candidate, ConfigError, ConstraintMargin, EvalResult, Objective, OracleError, Overrides, Record, ScoutError,
    SearchSpace, SearchVariable,
};

fn square() -> Vec<SearchVariable> {
    vec![SearchVariable::new("x", 0.0, 10.0), SearchVariable::new("y", 0.0, 10.0)]
}

fn objectives() -> Vec<Objective> {
    vec![Objective::maximize("sum")]
}

/// Feasible iff `x + y <= 15`; maximizes `x + y`.
fn half_plane(c: &Candidate) -> Result<EvalResult, OracleError> {
    let s = c.get("x").unwrap_or(0.0) + c.get("y").unwrap_or(0.0);
    let outputs = BTreeMap::from([("sum".to_string(), s)]);
    let constraints = vec![ConstraintMargin::new("sum_limit", 15.0 - s)];
    Ok(EvalResult::from_margins(outputs, constraints, &objectives()))
}

/// Infeasible everywhere; violation shrinks towards the origin.
fn walled_off(c: &Candidate) -> Result<EvalResult, OracleError> {
    let s = c.get("x").unwrap_or(0.0) + c.get("y").unwrap_or(0.0);
    let outputs = BTreeMap::from([("sum".to_string(), s)]);
    let constraints = vec![ConstraintMargin::new("wall", -1.0 - 0.1 * s)];
    Ok(EvalResult::from_margins(outputs, constraints, &objectives()))
}

fn hybrid(budget: usize, seed: u64) -> SearchSpec {
    SearchSpec::hybrid("half_plane", square(), objectives(), budget).with_seed(seed)
}

#[test]
fn scenario_a_finds_the_boundary() {
    let artifact = run(&(), &hybrid(200, 11), &Overrides, &half_plane).unwrap();

    assert_eq!(artifact.evaluations.limit, 200);
    assert!(artifact.evaluations.spent <= 200);
    assert!(artifact.best.is_found());
    let x = artifact.best.x.as_ref().unwrap();
    let sum = x.get("x").unwrap() + x.get("y").unwrap();
    assert!(sum <= 15.0 + 1e-9, "best point is infeasible: {sum}");
    assert!(sum >= 14.5, "best x + y = {sum}");
    assert!(artifact.verify_digest().unwrap());
    assert_eq!(artifact.stages.len(), 4);
    assert!(artifact.stages.iter().all(|s| s.status == StageStatus::Completed));
}

#[test]
fn scenario_b_scheduler_chases_feasibility() {
    let spec = hybrid(200, 5);
    let artifact = run(&(), &spec, &Overrides, &walled_off).unwrap();

    let allocation = &artifact.budget_allocation;
    let after = allocation.after_global.as_ref().unwrap();
    assert_eq!(after.stage, "global");
    assert_eq!(after.stats.n_feasible, 0);
    assert_eq!(after.rule, AllocationRule::NoFeasible);

    let initial = |name: &str| allocation.initial.iter().find(|s| s.name == name).unwrap().budget;
    let updated = |name: &str| after.updated.iter().find(|s| s.name == name).unwrap().budget;
    assert!(updated("surrogate") > initial("surrogate"));
    assert!(updated("surf") > initial("surf"));
    assert!(updated("local") < initial("local"));
    assert_eq!(&allocation.final_budgets[1..], &after.updated[..]);

    assert!(!artifact.best.is_found());
    let json = serde_json::to_value(&artifact).unwrap();
    assert!(json["best"]["score"].is_null());
    assert!(json["best"]["x"].is_null());
}

#[test]
fn scenario_c_ninth_decimal_collapses() {
    let space = SearchSpace::from_variables(square());
    let a = space.candidate(&[1.0, 2.0]);
    let b = space.candidate(&[1.0, 2.000000001]);
    let records = vec![
        Record::new(0, "scan", a.clone(), half_plane(&a).unwrap()),
        Record::new(1, "scan", b.clone(), half_plane(&b).unwrap()),
    ];
    assert_eq!(dedup(&records, &space).len(), 1);

    let archive = Archive::build(&records, &space, &ArchiveConfig::default(), &objectives()).unwrap();
    assert_eq!(archive.len(), 1);
}

#[test]
fn identical_runs_share_digest_and_run_id() {
    let spec = hybrid(120, 3).with_workers(WorkerPoolConfig::default().with_workers(4));
    let first = run(&(), &spec, &Overrides, &half_plane).unwrap();
    let second = run(&(), &spec, &Overrides, &half_plane).unwrap();
    assert_eq!(first.digest, second.digest);
    assert_eq!(first.run_id, second.run_id);
    for (a, b) in first.stages.iter().zip(&second.stages) {
        assert_eq!(a.digest, b.digest);
        assert_eq!(a.seed, b.seed);
    }

    let serial = run(&(), &spec.clone().with_workers(WorkerPoolConfig::default().with_workers(1)), &Overrides, &half_plane)
        .unwrap();
    assert_eq!(serial.stages, first.stages);

    let other = run(&(), &hybrid(120, 4), &Overrides, &half_plane).unwrap();
    assert_ne!(other.digest, first.digest);
}

#[test]
fn budget_exhaustion_is_recorded_not_raised() {
    let spec = SearchSpec::new("tight", SearchSpace::from_variables(square()))
        .with_objectives(objectives())
        .with_stage(StageSpec::sampling("scan", SamplingMethod::Halton, 24))
        .with_stage(StageSpec::surrogate("surrogate", 20))
        .with_stage(StageSpec::surf("surf", 10))
        .with_stage(StageSpec::local("local", 5))
        .with_max_evaluations(30)
        .with_scheduler(SchedulerConfig {
            enabled: false,
            ..SchedulerConfig::default()
        });
    let artifact = run(&(), &spec, &Overrides, &half_plane).unwrap();

    let statuses: Vec<StageStatus> = artifact.stages.iter().map(|s| s.status).collect();
    assert_eq!(
        statuses,
        vec![
            StageStatus::Completed,
            StageStatus::BudgetExhausted,
            StageStatus::BudgetExhausted,
            StageStatus::Skipped,
        ]
    );
    assert_eq!(artifact.stages[0].records.len(), 24);
    assert!(artifact.stages[1].records.is_empty());
    assert!(artifact.stages[3].records.is_empty());
    assert_eq!(artifact.records().count(), 30);
    assert_eq!(artifact.evaluations.spent, 30);
    assert!(artifact.evaluations.exhausted);
    assert!(artifact.budget_allocation.after_global.is_none());
}

#[test]
fn oracle_failures_become_records() {
    let flaky = |c: &Candidate| -> Result<EvalResult, OracleError> {
        let x = c.get("x").unwrap_or(0.0);
        let y = c.get("y").unwrap_or(0.0);
        if x > 8.0 {
            return Err(OracleError::new("solver diverged"));
        }
        if y > 9.0 {
            panic!("evaluator bug at y={y}");
        }
        if x < 1.0 {
            return Ok(EvalResult::feasible(f64::NAN));
        }
        half_plane(c)
    };
    let plan = SamplingPlan::new(SamplingMethod::Uniform, 120, 9);
    let result = run_budgeted_search(&(), square(), plan, &Overrides, &flaky).unwrap();

    assert_eq!(result.records.len(), 120);
    let reason = |r: &scout_optimizer::RecordView| r.evidence.reason.map(|v| v.to_string());
    let exceptions: Vec<_> = result
        .records
        .iter()
        .filter(|r| reason(r).as_deref() == Some("exception"))
        .collect();
    assert!(exceptions.iter().any(|r| r.evidence.message.as_deref() == Some("solver diverged")));
    assert!(exceptions
        .iter()
        .any(|r| r.evidence.message.as_deref().map_or(false, |m| m.contains("evaluator bug"))));
    assert!(result.records.iter().any(|r| reason(r).as_deref() == Some("nonfinite")));

    let json = serde_json::to_value(&result).unwrap();
    for record in json["records"].as_array().unwrap() {
        if record["evidence"]["reason"].is_string() {
            assert_eq!(record["verdict"], "FAIL");
            assert!(record["score"].is_null());
            assert!(record["violation"].is_null());
        }
    }
    let best = result.best().unwrap();
    assert!(best.evidence.reason.is_none());
}

#[test]
fn artifact_with_non_finite_outputs_reloads() -> anyhow::Result<()> {
    let blown = |c: &Candidate| -> Result<EvalResult, OracleError> {
        let x = c.get("x").unwrap_or(0.0);
        if x > 5.0 {
            let outputs = BTreeMap::from([("sum".to_string(), f64::NAN), ("peak".to_string(), f64::INFINITY)]);
            return Ok(EvalResult::from_margins(outputs, vec![], &objectives()));
        }
        half_plane(c)
    };
    let spec = SearchSpec::new("blown", SearchSpace::from_variables(square()))
        .with_objectives(objectives())
        .with_stage(StageSpec::sampling("scan", SamplingMethod::Halton, 20));
    let artifact = run(&(), &spec, &Overrides, &blown)?;
    let records = &artifact.stage("scan").unwrap().records;
    assert!(records.iter().any(|r| r.evidence.outputs["sum"].is_nan()));

    let json = artifact.to_json_pretty()?;
    let back: EvidenceArtifact = serde_json::from_str(&json)?;
    assert!(back.verify_digest()?);
    assert_eq!(back.digest, artifact.digest);
    assert_eq!(back.to_json_pretty()?, json);

    let reloaded = &back.stage("scan").unwrap().records;
    let blown_out = reloaded.iter().filter(|r| r.x.get("x").unwrap() > 5.0).collect::<Vec<_>>();
    assert!(!blown_out.is_empty());
    assert!(blown_out.iter().all(|r| r.evidence.outputs["sum"].is_nan()));
    assert!(blown_out.iter().all(|r| r.evidence.outputs["peak"].is_nan()));
    Ok(())
}

#[test]
fn surrogate_falls_back_without_history() {
    let spec = SearchSpec::new("cold", SearchSpace::from_variables(square()))
        .with_objectives(objectives())
        .with_stage(StageSpec::sampling("scan", SamplingMethod::Lhs, 8))
        .with_stage(StageSpec::surrogate("surrogate", 16))
        .with_backend(SurrogateBackend::RidgeOnly);
    let artifact = run(&(), &spec, &Overrides, &half_plane).unwrap();
    let surrogate = artifact.stage("surrogate").unwrap();
    assert_eq!(surrogate.note.as_deref(), Some(NOTE_INSUFFICIENT_HISTORY));
    assert_eq!(surrogate.status, StageStatus::Completed);
    assert!(!surrogate.records.is_empty());
}

#[test]
fn knowledge_round_trips_through_a_repository() {
    let repository = Arc::new(MemoryRepository::new());
    let spec = hybrid(80, 2);
    let first = Orchestrator::new(spec.clone())
        .with_repository(repository.clone())
        .run(&(), &Overrides, &half_plane)
        .unwrap();
    assert_eq!(first.knowledge_rows, 0);
    let saved = repository.len();
    assert_eq!(saved, first.archive.entries.len());

    let second = Orchestrator::new(spec)
        .with_repository(repository.clone())
        .run(&(), &Overrides, &half_plane)
        .unwrap();
    assert_eq!(second.knowledge_rows, saved);
    assert_eq!(repository.len(), saved + second.archive.entries.len());
}

#[test]
fn json_repository_persists_archive() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("knowledge.json");
    let repository = Arc::new(JsonFileRepository::new(&path));
    let artifact = Orchestrator::new(hybrid(60, 8))
        .with_repository(repository.clone())
        .run(&(), &Overrides, &half_plane)?;

    assert!(path.exists());
    let rows = repository.load()?;
    assert_eq!(rows.len(), artifact.archive.entries.len());
    assert!(rows.iter().any(|r| r.feasible));
    Ok(())
}

#[test]
fn pareto_front_over_two_objectives() {
    let two = vec![Objective::maximize("x"), Objective::minimize("y")];
    let oracle = |c: &Candidate| -> Result<EvalResult, OracleError> {
        let x = c.get("x").unwrap_or(0.0);
        let y = c.get("y").unwrap_or(0.0);
        let outputs = BTreeMap::from([("x".to_string(), x), ("y".to_string(), y)]);
        let constraints = vec![ConstraintMargin::new("disk", 64.0 - x * x - y * y)];
        Ok(EvalResult::from_margins(outputs, constraints, &two))
    };
    let spec = SearchSpec::new("pareto", SearchSpace::from_variables(square()))
        .with_objectives(two.clone())
        .with_stage(StageSpec::sampling("scan", SamplingMethod::Halton, 80))
        .with_archive(40, true);
    let artifact = run(&(), &spec, &Overrides, &oracle).unwrap();

    let front = artifact.archive.pareto_front.clone().unwrap();
    assert!(!front.is_empty());
    let entries = &artifact.archive.entries;
    let records: Vec<Record> = front
        .iter()
        .map(|i| {
            let e = &entries[*i];
            let result = EvalResult::feasible(e.score).with_evidence(e.evidence.clone());
            Record::new(e.index, e.phase.clone(), e.x.clone(), result)
        })
        .collect();
    for a in &records {
        for b in &records {
            assert!(!dominates(a, b, &two));
        }
    }
    assert!(entries.len() <= 40);
}

#[test]
fn configuration_errors_fail_fast() {
    let unknown = SearchSpec::new("s", SearchSpace::from_variables(square()))
        .with_stage(StageSpec::new("scan", "simplex", 10));
    assert!(matches!(
        run(&(), &unknown, &Overrides, &half_plane),
        Err(ScoutError::Config(ConfigError::UnknownMethod { .. }))
    ));

    let no_objectives = hybrid(40, 0).with_objectives(Vec::new()).with_archive(10, true);
    assert!(matches!(
        run(&(), &no_objectives, &Overrides, &half_plane),
        Err(ScoutError::Config(ConfigError::EmptyObjectives))
    ));

    let json = r#"{"variables": [{"name": "x", "lo": 3.0, "hi": 1.0}],
                   "stages": [{"name": "g", "method": "de", "budget": 10}]}"#;
    assert!(matches!(
        SearchSpec::from_json(json),
        Err(ScoutError::Config(ConfigError::InvalidBounds { .. }))
    ));
}
