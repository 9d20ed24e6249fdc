//! The evaluation loop: sample, build, verify, record.

use rayon::prelude::*;
use tracing::{debug, info};

use cs_types::{
    config_error, Candidate, CsError, CsResult, EngineConfig, Evaluation, Point, SearchResult,
    SearchSpec,
};

use crate::collaborator::{Builder, Verifier};
use crate::sampler::Sampler;

/// Drives one budgeted search against the external verifier.
///
/// Every candidate is verified exactly once, in index order. Collaborator
/// failures abort the run with the offending index; nothing is retried.
#[derive(Debug, Clone, Default)]
pub struct SearchRunner {
    config: EngineConfig,
}

impl SearchRunner {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Sample `spec` and evaluate every point.
    pub fn run<B, V>(
        &self,
        base: &B::Base,
        spec: &SearchSpec,
        verifier: &V,
        builder: &B,
    ) -> CsResult<SearchResult>
    where
        B: Builder,
        V: Verifier<Input = B::Input>,
    {
        let sampling = spec.method().sampling().ok_or_else(|| {
            config_error!(
                "{} search needs prior evaluations; run it as an orchestrated stage",
                spec.method()
            )
        })?;
        let points = Sampler::new(sampling, spec.seed()).sample(spec.variables(), spec.budget())?;
        self.evaluate_points(base, spec.clone(), points, verifier, builder)
    }

    /// Evaluate an explicit, already-bounded list of points under `spec`.
    pub fn evaluate_points<B, V>(
        &self,
        base: &B::Base,
        spec: SearchSpec,
        points: Vec<Point>,
        verifier: &V,
        builder: &B,
    ) -> CsResult<SearchResult>
    where
        B: Builder,
        V: Verifier<Input = B::Input>,
    {
        info!(
            "Running {} search: {} candidates over {} variables (seed {})",
            spec.method(),
            points.len(),
            spec.dimension(),
            spec.seed()
        );

        let evaluations: Vec<Evaluation> = if self.config.parallel_evaluation {
            let outcomes: Vec<CsResult<Evaluation>> = points
                .par_iter()
                .enumerate()
                .map(|(index, point)| evaluate_one(index, base, point, verifier, builder))
                .collect();
            // Collected in index order, so the first error is the lowest index.
            outcomes.into_iter().collect::<CsResult<_>>()?
        } else {
            points
                .iter()
                .enumerate()
                .map(|(index, point)| evaluate_one(index, base, point, verifier, builder))
                .collect::<CsResult<_>>()?
        };

        let candidates: Vec<Candidate> = points
            .into_iter()
            .zip(evaluations)
            .enumerate()
            .map(|(index, (point, evaluation))| Candidate::new(index, point, evaluation))
            .collect();

        let result = SearchResult::from_candidates(spec, candidates);
        match result.best() {
            Some(best) => info!(
                "Search complete: {}/{} PASS, best #{} score {}",
                result.pass_count(),
                result.candidates.len(),
                best.index,
                best.score
            ),
            None => info!(
                "Search complete: 0/{} PASS, no feasible candidate",
                result.candidates.len()
            ),
        }
        Ok(result)
    }
}

fn evaluate_one<B, V>(
    index: usize,
    base: &B::Base,
    point: &Point,
    verifier: &V,
    builder: &B,
) -> CsResult<Evaluation>
where
    B: Builder,
    V: Verifier<Input = B::Input>,
{
    let input = builder
        .build(base, point)
        .map_err(|source| CsError::Builder { index, source })?;
    let evaluation = verifier
        .verify(&input)
        .map_err(|source| CsError::Verifier { index, source })?;
    debug!("Candidate #{}: {} score {}", index, evaluation.verdict, evaluation.score);
    Ok(evaluation)
}
