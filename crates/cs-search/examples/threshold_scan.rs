use cs_search::cs_types::{
    BoxError, Evaluation, OrchestratorSpec, SearchMethod, SearchSpec, Stage, Variable,
};
use cs_search::{JsonMergeBuilder, SearchArtifact, SearchRunner, StageOrchestrator, Verifier};
use serde_json::{json, Value};

/// Accepts x above a threshold; margin is the distance past it.
struct Threshold(f64);

impl Verifier for Threshold {
    type Input = Value;

    fn verify(&self, input: &Value) -> Result<Evaluation, BoxError> {
        let x = input["x"].as_f64().ok_or("missing x")?;
        let eval = if x > self.0 {
            Evaluation::pass(x)
        } else {
            Evaluation::fail(x)
        };
        Ok(eval.with_evidence("min_margin_frac", json!((x - self.0) / self.0)))
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("certsearch threshold scan");

    let variables = vec![Variable::new("x", 0.0, 10.0)];
    let spec = SearchSpec::new(variables.clone(), 50, 7, SearchMethod::LowDiscrepancy)?;
    let result = SearchRunner::default().run(&Value::Null, &spec, &Threshold(5.0), &JsonMergeBuilder)?;

    println!(
        "Single search: {}/{} PASS, digest {}",
        result.pass_count(),
        result.candidates.len(),
        result.digest
    );
    if let Some(best) = result.best() {
        println!("Best candidate #{}: x = {:.4}", best.index, best.point["x"]);
    }

    let staged = OrchestratorSpec::new(variables)
        .add_stage(Stage::new("coarse", SearchMethod::Stratified).with_budget(32).with_seed(1))
        .add_stage(
            Stage::new("local", SearchMethod::LowDiscrepancy)
                .with_budget(16)
                .with_local_refine(0.2),
        )
        .add_stage(Stage::new("accel", SearchMethod::AcceptanceGuided).with_budget(8));
    let outcome = StageOrchestrator::default().run(&Value::Null, &staged, &Threshold(5.0), &JsonMergeBuilder)?;

    for stage in &outcome.stages {
        println!(
            "Stage {:<8} method {:<18} {} evaluations{}",
            stage.name,
            stage.result.spec.method(),
            stage.result.candidates.len(),
            stage
                .fallback_reason
                .as_ref()
                .map(|r| format!(" (fallback: {r})"))
                .unwrap_or_default()
        );
    }
    println!("Orchestrated digest {}", outcome.digest);

    let path = std::env::temp_dir().join("threshold_scan.json");
    SearchArtifact::new(result).write_json(&path)?;
    println!("Artifact written to {}", path.display());

    Ok(())
}
