use std::collections::BTreeMap;
use std::sync::Arc;

use scout_optimizer::{JsonFileRepository, Orchestrator, SearchSpec};
use scout_types::{Candidate, ConstraintMargin, EvalResult, Objective, OracleError, SearchVariable};
use tracing_subscriber::EnvFilter;

/// Toy plant design: bigger radius and field give more output, but the
/// coil stress limit and the footprint cap push back.
#[derive(Debug, Clone)]
struct Design {
    radius: f64,
    field: f64,
    stress_limit: f64,
}

fn build(base: &Design, overrides: &Candidate) -> Design {
    Design {
        radius: overrides.get("radius").unwrap_or(base.radius),
        field: overrides.get("field").unwrap_or(base.field),
        ..base.clone()
    }
}

fn objectives() -> Vec<Objective> {
    vec![Objective::maximize("output")]
}

fn evaluate(d: &Design) -> Result<EvalResult, OracleError> {
    if d.radius <= 0.0 {
        return Err(OracleError::new("radius must be positive"));
    }
    let output = d.field.powi(2) * d.radius.powi(3);
    let stress = d.field.powi(2) * d.radius / 4.0;
    let outputs = BTreeMap::from([("output".to_string(), output), ("stress".to_string(), stress)]);
    let constraints = vec![
        ConstraintMargin::new("coil_stress", (d.stress_limit - stress) / d.stress_limit),
        ConstraintMargin::new("footprint", (6.0 - d.radius) / 6.0),
    ];
    Ok(EvalResult::from_margins(outputs, constraints, &objectives()))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("🔎 Scout hybrid finder");

    // 1. Describe the space and the plan
    let base = Design {
        radius: 2.0,
        field: 5.0,
        stress_limit: 60.0,
    };
    let variables = vec![
        SearchVariable::new("radius", 0.5, 8.0),
        SearchVariable::new("field", 1.0, 12.0),
    ];
    let spec = SearchSpec::hybrid("toy_plant", variables, objectives(), 240).with_seed(7);

    // 2. Optional cross-run knowledge
    let mut orchestrator = Orchestrator::new(spec);
    if let Ok(path) = std::env::var("SCOUT_KNOWLEDGE_PATH") {
        println!("Using knowledge file {path}");
        orchestrator = orchestrator.with_repository(Arc::new(JsonFileRepository::new(path)));
    }

    // 3. Run
    let artifact = orchestrator.run(&base, &build, &evaluate)?;

    for stage in &artifact.stages {
        let feasible = stage.records.iter().filter(|r| r.violation == 0.0).count();
        println!(
            "  {:<10} {:<10} budget={:<4} evaluated={:<4} feasible={:<4} status={:?}{}",
            stage.name,
            stage.method,
            stage.budget,
            stage.records.len(),
            feasible,
            stage.status,
            stage.note.as_deref().map(|n| format!(" ({n})")).unwrap_or_default(),
        );
    }
    println!(
        "Spent {}/{} evaluations, archive holds {} entries",
        artifact.evaluations.spent,
        artifact.evaluations.limit,
        artifact.archive.entries.len()
    );

    match (&artifact.best.x, artifact.best.score) {
        (Some(x), Some(score)) => println!("✅ Best feasible design from {:?}: {x:?} output={score:.3}", artifact.best.stage),
        _ => println!("❌ No feasible design found"),
    }
    println!("Digest {} (run {})", artifact.digest, artifact.run_id);

    // 4. Full evidence on request
    if let Ok(out) = std::env::var("SCOUT_ARTIFACT_PATH") {
        std::fs::write(&out, artifact.to_json_pretty()?)?;
        println!("Wrote evidence artifact to {out}");
    }

    Ok(())
}
