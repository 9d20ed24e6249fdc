//! Engine configuration, passed explicitly to the runner and orchestrator.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::errors::{CsError, CsResult};

/// Tunables shared by every run of the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Prior evaluations required before an acceptance-guided stage trains.
    pub min_training_rows: usize,
    /// Lower bound on the acceleration candidate pool.
    pub min_pool_size: usize,
    /// Evidence key consulted when a stage's own margin key is absent.
    pub fallback_margin_key: String,
    /// Evaluate each sampled batch with rayon (trace order is preserved).
    pub parallel_evaluation: bool,
    /// Width given to a refinement interval that collapsed to a point.
    pub collapse_epsilon: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_training_rows: 16,
            min_pool_size: 64,
            fallback_margin_key: "worst_hard_margin_frac".to_string(),
            parallel_evaluation: false,
            collapse_epsilon: 1e-12,
        }
    }
}

impl EngineConfig {
    pub fn with_min_training_rows(mut self, n: usize) -> Self {
        self.min_training_rows = n;
        self
    }

    pub fn with_min_pool_size(mut self, n: usize) -> Self {
        self.min_pool_size = n;
        self
    }

    pub fn with_parallel_evaluation(mut self, enabled: bool) -> Self {
        self.parallel_evaluation = enabled;
        self
    }

    pub fn with_fallback_margin_key(mut self, key: impl Into<String>) -> Self {
        self.fallback_margin_key = key.into();
        self
    }

    /// Parse from JSON; missing fields take their defaults.
    pub fn from_json_str(text: &str) -> CsResult<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> CsResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> CsResult<()> {
        if !(self.collapse_epsilon.is_finite() && self.collapse_epsilon > 0.0) {
            return Err(CsError::Config(format!(
                "collapse_epsilon must be positive, got {}",
                self.collapse_epsilon
            )));
        }
        Ok(())
    }
}
