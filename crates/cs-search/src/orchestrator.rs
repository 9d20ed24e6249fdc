//! Multi-stage search: coarse exploration, local refinement and
//! acceptance-guided acceleration over one set of original bounds.

use tracing::{info, warn};

use cs_types::{
    AccelerationError, BestCandidate, Candidate, CsResult, EngineConfig, OrchestratorResult,
    OrchestratorSpec, Point, SearchMethod, SearchResult, SearchSpec, Stage, StageOutcome, Variable,
};

use crate::collaborator::{Builder, Verifier};
use crate::runner::SearchRunner;
use crate::surrogate::{Accelerator, TrainingRow};

/// Runs the stages of an [`OrchestratorSpec`] in order.
///
/// State carried between stages is the best-so-far candidate plus every prior
/// record (the training set for acceptance-guided stages).
#[derive(Debug, Clone, Default)]
pub struct StageOrchestrator {
    runner: SearchRunner,
}

impl StageOrchestrator {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            runner: SearchRunner::new(config),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        self.runner.config()
    }

    pub fn run<B, V>(
        &self,
        base: &B::Base,
        spec: &OrchestratorSpec,
        verifier: &V,
        builder: &B,
    ) -> CsResult<OrchestratorResult>
    where
        B: Builder,
        V: Verifier<Input = B::Input>,
    {
        self.config().validate()?;
        spec.validate()?;

        info!(
            "Starting orchestrated search: {} stages over {} variables",
            spec.stages.len(),
            spec.variables.len()
        );

        let mut outcomes: Vec<StageOutcome> = Vec::with_capacity(spec.stages.len());
        let mut best: Option<BestCandidate> = None;

        for (stage_index, stage) in spec.stages.iter().enumerate() {
            let bounds = match (&best, stage.local_refine) {
                (Some(b), true) => local_bounds(
                    &spec.variables,
                    &b.candidate.point,
                    stage.local_shrink,
                    self.config().collapse_epsilon,
                ),
                _ => spec.variables.clone(),
            };

            let outcome = if stage.method == SearchMethod::AcceptanceGuided {
                self.run_accelerated(base, stage, bounds, &outcomes, verifier, builder)?
            } else {
                let search = SearchSpec::new(bounds, stage.budget, stage.seed, stage.method)?;
                StageOutcome {
                    name: stage.name.clone(),
                    declared_method: stage.method,
                    result: self.runner.run(base, &search, verifier, builder)?,
                    fallback_reason: None,
                }
            };

            if let Some(candidate) = outcome.result.best() {
                if candidate.improves_on(best.as_ref().map(|b| &b.candidate)) {
                    info!(
                        "New best from stage {} ({}): score {}",
                        stage_index, stage.name, candidate.score
                    );
                    best = Some(BestCandidate {
                        stage_index,
                        stage_name: stage.name.clone(),
                        candidate: candidate.clone(),
                    });
                }
            }
            outcomes.push(outcome);
        }

        let result = OrchestratorResult::new(spec.clone(), outcomes, best);
        info!(
            "Orchestrated search complete: {} evaluations, digest {}",
            result.total_evaluations(),
            result.digest
        );
        Ok(result)
    }

    fn run_accelerated<B, V>(
        &self,
        base: &B::Base,
        stage: &Stage,
        bounds: Vec<Variable>,
        prior: &[StageOutcome],
        verifier: &V,
        builder: &B,
    ) -> CsResult<StageOutcome>
    where
        B: Builder,
        V: Verifier<Input = B::Input>,
    {
        let config = self.config();
        let rows: Vec<TrainingRow> = prior
            .iter()
            .flat_map(|o| o.result.candidates.iter())
            .map(|c| {
                TrainingRow::from_candidate(
                    c,
                    &stage.acceleration.feasibility_margin_key,
                    &config.fallback_margin_key,
                )
            })
            .collect();

        let proposals = if rows.len() < config.min_training_rows {
            Err(AccelerationError::InsufficientTraining {
                have: rows.len(),
                need: config.min_training_rows,
            })
        } else {
            Accelerator::new(config).propose(
                &rows,
                &bounds,
                &stage.acceleration,
                stage.budget,
                stage.seed,
            )
        };

        match proposals {
            Ok(points) => {
                let search =
                    SearchSpec::new(bounds, stage.budget, stage.seed, SearchMethod::AcceptanceGuided)?;
                Ok(StageOutcome {
                    name: stage.name.clone(),
                    declared_method: stage.method,
                    result: self.runner.evaluate_points(base, search, points, verifier, builder)?,
                    fallback_reason: None,
                })
            }
            Err(reason) => {
                warn!(
                    "Stage {}: acceleration unavailable ({}), falling back to low_discrepancy",
                    stage.name, reason
                );
                let search =
                    SearchSpec::new(bounds, stage.budget, stage.seed, SearchMethod::LowDiscrepancy)?;
                Ok(StageOutcome {
                    name: stage.name.clone(),
                    declared_method: stage.method,
                    result: self.runner.run(base, &search, verifier, builder)?,
                    fallback_reason: Some(reason.to_string()),
                })
            }
        }
    }
}

/// Bounds shrunk around `best`, clamped into `original`.
///
/// Each variable keeps `shrink` of its original width centred on the best
/// value (the midpoint when the variable is missing from `best`). An interval
/// that collapses to a point is widened by `epsilon` inward.
pub fn local_bounds(original: &[Variable], best: &Point, shrink: f64, epsilon: f64) -> Vec<Variable> {
    original
        .iter()
        .map(|var| {
            let center = best
                .get(&var.name)
                .copied()
                .filter(|v| v.is_finite())
                .unwrap_or_else(|| var.midpoint())
                .clamp(var.lower, var.upper);
            let half = 0.5 * shrink * var.width();
            let mut lower = (center - half).max(var.lower);
            let mut upper = (center + half).min(var.upper);

            if upper <= lower {
                let eps = epsilon.max(4.0 * f64::EPSILON * center.abs());
                if var.width() <= eps {
                    lower = var.lower;
                    upper = var.upper;
                } else if center + eps <= var.upper {
                    lower = center;
                    upper = center + eps;
                } else {
                    lower = var.upper - eps;
                    upper = var.upper;
                }
            }
            Variable::new(var.name.clone(), lower, upper)
        })
        .collect()
}

/// Best PASS candidate of a finished orchestration, if any.
pub fn best_candidate(result: &OrchestratorResult) -> Option<&Candidate> {
    result.best.as_ref().map(|b| &b.candidate)
}

/// Flattened per-stage results, in stage order.
pub fn stage_results(result: &OrchestratorResult) -> impl Iterator<Item = &SearchResult> {
    result.stages.iter().map(|s| &s.result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborator::JsonMergeBuilder;
    use cs_types::{BoxError, CsError, Evaluation};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// PASS iff x + y < 1.5, score x + y, margin reported as evidence.
    struct DiagonalVerifier {
        calls: AtomicUsize,
    }

    impl DiagonalVerifier {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl Verifier for DiagonalVerifier {
        type Input = Value;

        fn verify(&self, input: &Value) -> Result<Evaluation, BoxError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let x = input["x"].as_f64().ok_or("missing x")?;
            let y = input["y"].as_f64().ok_or("missing y")?;
            let s = x + y;
            let eval = if s < 1.5 {
                Evaluation::pass(s)
            } else {
                Evaluation::fail(s)
            };
            Ok(eval.with_evidence("min_margin_frac", json!(1.5 - s)))
        }
    }

    fn variables() -> Vec<Variable> {
        vec![Variable::new("x", 0.0, 1.0), Variable::new("y", 0.0, 1.0)]
    }

    fn run(spec: &OrchestratorSpec, verifier: &DiagonalVerifier) -> CsResult<OrchestratorResult> {
        StageOrchestrator::default().run(&Value::Null, spec, verifier, &JsonMergeBuilder)
    }

    #[test]
    fn too_few_rows_falls_back_to_low_discrepancy() {
        let spec = OrchestratorSpec::new(variables())
            .add_stage(Stage::new("coarse", SearchMethod::Stratified).with_budget(8).with_seed(1))
            .add_stage(
                Stage::new("accel", SearchMethod::AcceptanceGuided)
                    .with_budget(10)
                    .with_seed(3),
            );
        let result = run(&spec, &DiagonalVerifier::new()).unwrap();
        let accel = &result.stages[1];
        assert!(accel.fell_back());
        assert_eq!(accel.declared_method, SearchMethod::AcceptanceGuided);
        assert_eq!(accel.result.spec.method(), SearchMethod::LowDiscrepancy);

        let direct = SearchRunner::default()
            .run(
                &Value::Null,
                &SearchSpec::new(variables(), 10, 3, SearchMethod::LowDiscrepancy).unwrap(),
                &DiagonalVerifier::new(),
                &JsonMergeBuilder,
            )
            .unwrap();
        assert_eq!(accel.result, direct);
        assert!(accel.fallback_reason.as_deref().unwrap().contains("training"));
    }

    /// Every point fails with no finite score.
    struct Infeasible;

    impl Verifier for Infeasible {
        type Input = Value;

        fn verify(&self, _input: &Value) -> Result<Evaluation, BoxError> {
            Ok(Evaluation::fail(f64::NEG_INFINITY))
        }
    }

    #[test]
    fn unfittable_history_falls_back_to_low_discrepancy() {
        // Plenty of rows, but none carries a finite score to fit against.
        let spec = OrchestratorSpec::new(variables())
            .add_stage(Stage::new("coarse", SearchMethod::Stratified).with_budget(24).with_seed(4))
            .add_stage(
                Stage::new("accel", SearchMethod::AcceptanceGuided)
                    .with_budget(8)
                    .with_seed(6),
            );
        let result = StageOrchestrator::default()
            .run(&Value::Null, &spec, &Infeasible, &JsonMergeBuilder)
            .unwrap();
        let accel = &result.stages[1];
        assert!(accel.fell_back());
        assert_eq!(accel.result.spec.method(), SearchMethod::LowDiscrepancy);

        let direct = SearchRunner::default()
            .run(
                &Value::Null,
                &SearchSpec::new(variables(), 8, 6, SearchMethod::LowDiscrepancy).unwrap(),
                &Infeasible,
                &JsonMergeBuilder,
            )
            .unwrap();
        assert_eq!(accel.result, direct);
        assert!(result.verify_digest());
    }

    #[test]
    fn accelerated_stage_uses_proposals() {
        let spec = OrchestratorSpec::new(variables())
            .add_stage(Stage::new("coarse", SearchMethod::Stratified).with_budget(40).with_seed(2))
            .add_stage(
                Stage::new("accel", SearchMethod::AcceptanceGuided)
                    .with_budget(6)
                    .with_seed(5),
            );
        let verifier = DiagonalVerifier::new();
        let result = run(&spec, &verifier).unwrap();
        let accel = &result.stages[1];
        assert!(!accel.fell_back(), "fell back: {:?}", accel.fallback_reason);
        assert_eq!(accel.result.spec.method(), SearchMethod::AcceptanceGuided);
        assert_eq!(accel.result.candidates.len(), 6);
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 46);
        assert!(result.verify_digest());
    }

    #[test]
    fn refinement_stays_near_best() {
        let spec = OrchestratorSpec::new(variables())
            .add_stage(Stage::new("grid", SearchMethod::Grid).with_budget(25))
            .add_stage(
                Stage::new("local", SearchMethod::Stratified)
                    .with_budget(12)
                    .with_local_refine(0.2),
            );
        let result = run(&spec, &DiagonalVerifier::new()).unwrap();
        let anchor = result.stages[0].result.best().unwrap().point.clone();
        for c in &result.stages[1].result.candidates {
            for name in ["x", "y"] {
                assert!((c.point[name] - anchor[name]).abs() <= 0.1 + 1e-12);
            }
        }
        let best = best_candidate(&result).unwrap();
        assert!(best.is_pass());
        assert!(best.score < 1.5);
    }

    #[test]
    fn tie_keeps_earlier_stage() {
        // Identical stages produce identical scores; stage 0 keeps the best.
        let stage = Stage::new("a", SearchMethod::Grid).with_budget(9);
        let spec = OrchestratorSpec::new(variables())
            .add_stage(stage.clone())
            .add_stage(Stage { name: "b".to_string(), ..stage });
        let result = run(&spec, &DiagonalVerifier::new()).unwrap();
        assert_eq!(result.best.as_ref().unwrap().stage_index, 0);
    }

    #[test]
    fn bad_stage_fails_before_any_call() {
        let spec = OrchestratorSpec::new(variables())
            .add_stage(Stage::new("ok", SearchMethod::Grid).with_budget(4))
            .add_stage(Stage::new("bad", SearchMethod::Grid).with_budget(0));
        let verifier = DiagonalVerifier::new();
        let err = run(&spec, &verifier).unwrap_err();
        assert!(matches!(err, CsError::NonPositiveBudget));
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn tampering_is_detected() {
        let spec = OrchestratorSpec::new(variables())
            .add_stage(Stage::new("coarse", SearchMethod::LowDiscrepancy).with_budget(12));
        let mut result = run(&spec, &DiagonalVerifier::new()).unwrap();
        assert!(result.verify_digest());
        result.stages[0].result.candidates[3].score += 1.0;
        assert!(!result.verify_digest());
    }

    #[test]
    fn digest_is_reproducible() {
        let spec = OrchestratorSpec::new(variables())
            .add_stage(Stage::new("coarse", SearchMethod::Stratified).with_budget(20).with_seed(9))
            .add_stage(
                Stage::new("accel", SearchMethod::AcceptanceGuided)
                    .with_budget(5)
                    .with_seed(1),
            );
        let a = run(&spec, &DiagonalVerifier::new()).unwrap();
        let b = run(&spec, &DiagonalVerifier::new()).unwrap();
        assert_eq!(a.digest, b.digest);
        assert_eq!(stage_results(&a).count(), 2);
    }

    #[test]
    fn local_bounds_shrink_and_clamp() {
        let vars = vec![Variable::new("a", 0.0, 10.0), Variable::new("b", -1.0, 1.0)];
        let best = Point::from([("a".to_string(), 9.5)]);
        let local = local_bounds(&vars, &best, 0.2, 1e-12);
        assert_eq!((local[0].lower, local[0].upper), (8.5, 10.0));
        // Missing variable centres on the midpoint.
        assert!((local[1].lower + 0.2).abs() < 1e-15);
        assert!((local[1].upper - 0.2).abs() < 1e-15);
    }

    #[test]
    fn collapsed_interval_is_widened_inward() {
        let vars = vec![Variable::new("a", 0.0, 10.0)];
        let best = Point::from([("a".to_string(), 10.0)]);
        // A vanishing shrink collapses the interval onto the upper bound.
        let local = local_bounds(&vars, &best, 1e-300, 1e-12);
        assert!(local[0].validate().is_ok());
        assert_eq!(local[0].upper, 10.0);
        assert!(local[0].lower < 10.0 && local[0].lower >= 10.0 - 1e-11);
    }
}
