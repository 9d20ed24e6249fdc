//! Acceptance-guided acceleration.
//!
//! Fits a ridge-regularized quadratic response surface of `score` over the
//! declared variables, optionally a second surface for the verified
//! feasibility margin, and ranks a Halton candidate pool by
//!
//! ```text
//! acquisition = (predicted − best_observed) + κ · σ · d_nn
//! ```
//!
//! where `σ` is the residual spread of the fit and `d_nn` the distance to
//! the nearest training point in standardized space. Pool points whose
//! predicted margin is not positive are discarded when a margin model exists.
//!
//! Nothing here is evaluated: proposals go back through the verifier like any
//! other candidate.

use nalgebra::{linalg::Cholesky, DMatrix, DVector};
use std::collections::HashSet;
use tracing::debug;

use cs_types::{
    AccelerationControls, AccelerationError, Candidate, EngineConfig, Point, SamplingMethod,
    Variable,
};

use crate::sampler::Sampler;

/// One prior evaluation used for training.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingRow {
    pub point: Point,
    pub score: f64,
    /// Verified feasibility margin, if the verifier reported one.
    pub margin: Option<f64>,
    pub feasible: bool,
}

impl TrainingRow {
    /// Build a row from a recorded candidate, reading the margin from
    /// `margin_key` and then `fallback_key`.
    pub fn from_candidate(candidate: &Candidate, margin_key: &str, fallback_key: &str) -> Self {
        let margin = candidate
            .evidence_f64(margin_key)
            .or_else(|| candidate.evidence_f64(fallback_key))
            .filter(|m| m.is_finite());
        Self {
            point: candidate.point.clone(),
            score: candidate.score,
            margin,
            feasible: candidate.is_pass(),
        }
    }
}

/// A fitted quadratic ridge surface.
#[derive(Debug, Clone)]
pub struct SurrogateFit {
    mean: Vec<f64>,
    scale: Vec<f64>,
    weights: DVector<f64>,
    sigma: f64,
    train: Vec<Vec<f64>>,
}

impl SurrogateFit {
    /// Fit `targets` against `inputs` (rows in variable order).
    pub fn fit(
        inputs: &[Vec<f64>],
        targets: &[f64],
        alpha: f64,
        target_name: &str,
    ) -> Result<Self, AccelerationError> {
        let n = inputs.len();
        let d = inputs.first().map_or(0, Vec::len);
        let need = 8.max(2 * d + 1);
        if n < need || d == 0 {
            return Err(AccelerationError::InsufficientTraining { have: n, need });
        }

        let mut mean = vec![0.0; d];
        for row in inputs {
            for (m, x) in mean.iter_mut().zip(row) {
                *m += x / n as f64;
            }
        }
        let mut scale = vec![0.0; d];
        for row in inputs {
            for j in 0..d {
                scale[j] += (row[j] - mean[j]).powi(2) / n as f64;
            }
        }
        for s in &mut scale {
            *s = s.sqrt();
            if *s <= 1e-12 {
                *s = 1.0;
            }
        }

        let train: Vec<Vec<f64>> = inputs
            .iter()
            .map(|row| standardize(row, &mean, &scale))
            .collect();
        let features: Vec<Vec<f64>> = train.iter().map(|x| quadratic_features(x)).collect();
        let p = features[0].len();
        let phi = DMatrix::from_fn(n, p, |i, j| features[i][j]);
        let y = DVector::from_column_slice(targets);

        let gram = phi.transpose() * &phi + DMatrix::<f64>::identity(p, p) * alpha;
        let rhs = phi.transpose() * &y;
        let cholesky = Cholesky::new(gram).ok_or_else(|| AccelerationError::SingularSystem {
            target: target_name.to_string(),
        })?;
        let weights = cholesky.solve(&rhs);
        if weights.iter().any(|w| !w.is_finite()) {
            return Err(AccelerationError::SingularSystem {
                target: target_name.to_string(),
            });
        }

        let residual = &phi * &weights - &y;
        let dof = n.saturating_sub(p).max(1);
        let sigma = (residual.dot(&residual) / dof as f64).sqrt();

        Ok(Self {
            mean,
            scale,
            weights,
            sigma,
            train,
        })
    }

    pub fn predict(&self, x: &[f64]) -> f64 {
        let features = quadratic_features(&standardize(x, &self.mean, &self.scale));
        features
            .iter()
            .zip(self.weights.iter())
            .map(|(f, w)| f * w)
            .sum()
    }

    /// `σ · d_nn` in standardized space.
    pub fn uncertainty(&self, x: &[f64]) -> f64 {
        let xn = standardize(x, &self.mean, &self.scale);
        let d_nn = self
            .train
            .iter()
            .map(|t| t.iter().zip(&xn).map(|(a, b)| (a - b).powi(2)).sum::<f64>())
            .fold(f64::INFINITY, f64::min);
        if d_nn.is_finite() {
            self.sigma * d_nn.sqrt()
        } else {
            0.0
        }
    }

    pub fn residual_sigma(&self) -> f64 {
        self.sigma
    }
}

fn standardize(x: &[f64], mean: &[f64], scale: &[f64]) -> Vec<f64> {
    x.iter()
        .zip(mean.iter().zip(scale))
        .map(|(v, (m, s))| (v - m) / s)
        .collect()
}

/// Bias, linear, squared and pairwise cross terms.
fn quadratic_features(xn: &[f64]) -> Vec<f64> {
    let d = xn.len();
    let mut out = Vec::with_capacity(1 + 2 * d + d * d.saturating_sub(1) / 2);
    out.push(1.0);
    out.extend_from_slice(xn);
    out.extend(xn.iter().map(|v| v * v));
    for i in 0..d {
        for j in (i + 1)..d {
            out.push(xn[i] * xn[j]);
        }
    }
    out
}

/// Proposes candidates for an acceptance-guided stage.
#[derive(Debug, Clone)]
pub struct Accelerator<'a> {
    config: &'a EngineConfig,
}

impl<'a> Accelerator<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        Self { config }
    }

    /// Rank a Halton pool over `bounds` and return the top `n_propose` points.
    pub fn propose(
        &self,
        rows: &[TrainingRow],
        bounds: &[Variable],
        controls: &AccelerationControls,
        n_propose: usize,
        seed: u64,
    ) -> Result<Vec<Point>, AccelerationError> {
        for v in bounds {
            if v.validate().is_err() {
                return Err(AccelerationError::InvalidBounds {
                    name: v.name.clone(),
                    lower: v.lower,
                    upper: v.upper,
                });
            }
        }
        let keys: Vec<&str> = bounds.iter().map(|v| v.name.as_str()).collect();

        let feasible: Vec<&TrainingRow> = rows.iter().filter(|r| r.feasible).collect();
        let training: Vec<&TrainingRow> = if feasible.len() >= self.config.min_training_rows {
            feasible.clone()
        } else {
            rows.iter().collect()
        };

        let (x_obj, y_obj) = design(&training, &keys, |r| Some(r.score));
        let objective = SurrogateFit::fit(&x_obj, &y_obj, controls.ridge_alpha, "score")?;

        let (x_mrg, y_mrg) = design(&training, &keys, |r| r.margin);
        let margin = match SurrogateFit::fit(&x_mrg, &y_mrg, controls.ridge_alpha, "margin") {
            Ok(fit) => Some(fit),
            Err(err) => {
                debug!("No feasibility-margin gate: {}", err);
                None
            }
        };

        let best = best_observed(&feasible)
            .or_else(|| best_observed(&rows.iter().collect::<Vec<_>>()))
            .ok_or(AccelerationError::NoObjective)?;

        let pool_size = self
            .config
            .min_pool_size
            .max(n_propose.saturating_mul(controls.pool_multiplier));
        let pool = Sampler::new(SamplingMethod::LowDiscrepancy, seed)
            .sample(bounds, pool_size)
            .map_err(|e| AccelerationError::Sampling(e.to_string()))?;

        let mut ranked: Vec<(f64, Point)> = Vec::new();
        for point in pool {
            let x: Vec<f64> = keys.iter().map(|k| point[*k]).collect();
            if let Some(gate) = &margin {
                let predicted_margin = gate.predict(&x);
                if !(predicted_margin.is_finite() && predicted_margin > 0.0) {
                    continue;
                }
            }
            let predicted = objective.predict(&x);
            if !predicted.is_finite() {
                continue;
            }
            let acquisition = (predicted - best) + controls.kappa * objective.uncertainty(&x);
            if acquisition.is_finite() {
                ranked.push((acquisition, point));
            }
        }
        // Stable: equal scores keep pool order.
        ranked.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut seen = HashSet::new();
        let mut proposals = Vec::with_capacity(n_propose);
        for (_, point) in ranked {
            let fingerprint: Vec<u64> = keys
                .iter()
                .map(|k| (point[*k] * 1e12).round().to_bits())
                .collect();
            if !seen.insert(fingerprint) {
                continue;
            }
            proposals.push(point);
            if proposals.len() >= n_propose {
                break;
            }
        }

        debug!(
            "Acceleration proposed {} of {} requested (pool {}, margin gate {})",
            proposals.len(),
            n_propose,
            pool_size,
            margin.is_some()
        );
        if proposals.is_empty() {
            return Err(AccelerationError::NoProposals);
        }
        Ok(proposals)
    }
}

/// Input matrix and targets from rows whose variables and target are finite.
fn design<F>(rows: &[&TrainingRow], keys: &[&str], target: F) -> (Vec<Vec<f64>>, Vec<f64>)
where
    F: Fn(&TrainingRow) -> Option<f64>,
{
    let mut xs = Vec::new();
    let mut ys = Vec::new();
    for row in rows {
        let Some(y) = target(row).filter(|y| y.is_finite()) else {
            continue;
        };
        let x: Option<Vec<f64>> = keys
            .iter()
            .map(|k| row.point.get(*k).copied().filter(|v| v.is_finite()))
            .collect();
        if let Some(x) = x {
            xs.push(x);
            ys.push(y);
        }
    }
    (xs, ys)
}

fn best_observed(rows: &[&TrainingRow]) -> Option<f64> {
    rows.iter()
        .map(|r| r.score)
        .filter(|s| s.is_finite())
        .fold(None, |acc: Option<f64>, s| Some(acc.map_or(s, |a| a.max(s))))
}
