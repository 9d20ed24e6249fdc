//! Multi-stage search declarations.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::errors::{CsError, CsResult};
use crate::space::{validate_variables, SearchMethod, Variable, MAX_LOW_DISCREPANCY_DIMS};

/// Controls for acceptance-guided (surrogate) stages. Ignored otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccelerationControls {
    /// Candidate pool size as a multiple of the stage budget.
    pub pool_multiplier: usize,
    /// Exploration weight on the uncertainty proxy.
    pub kappa: f64,
    /// Ridge regularization coefficient.
    pub ridge_alpha: f64,
    /// Evidence key holding the verified feasibility margin.
    pub feasibility_margin_key: String,
}

impl Default for AccelerationControls {
    fn default() -> Self {
        Self {
            pool_multiplier: 50,
            kappa: 0.5,
            ridge_alpha: 1e-3,
            feasibility_margin_key: "min_margin_frac".to_string(),
        }
    }
}

/// One stage of an orchestrated search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub name: String,
    pub method: SearchMethod,
    pub budget: usize,
    pub seed: u64,
    /// Re-centre bounds on the best point found so far.
    pub local_refine: bool,
    /// Fraction of the original width kept when refining, in (0, 1].
    pub local_shrink: f64,
    #[serde(default)]
    pub acceleration: AccelerationControls,
}

impl Stage {
    pub fn new(name: impl Into<String>, method: SearchMethod) -> Self {
        Self {
            name: name.into(),
            method,
            budget: 64,
            seed: 0,
            local_refine: false,
            local_shrink: 0.35,
            acceleration: AccelerationControls::default(),
        }
    }

    pub fn with_budget(mut self, budget: usize) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_local_refine(mut self, shrink: f64) -> Self {
        self.local_refine = true;
        self.local_shrink = shrink;
        self
    }

    pub fn with_acceleration(mut self, controls: AccelerationControls) -> Self {
        self.acceleration = controls;
        self
    }

    pub fn validate(&self, dims: usize) -> CsResult<()> {
        if self.budget == 0 {
            return Err(CsError::NonPositiveBudget);
        }
        if !(self.local_shrink > 0.0 && self.local_shrink <= 1.0) {
            return Err(CsError::Config(format!(
                "stage {}: local_shrink must be in (0, 1], got {}",
                self.name, self.local_shrink
            )));
        }
        if self.method.uses_low_discrepancy() && dims > MAX_LOW_DISCREPANCY_DIMS {
            return Err(CsError::UnsupportedDimension {
                dims,
                max: MAX_LOW_DISCREPANCY_DIMS,
            });
        }
        if self.method == SearchMethod::AcceptanceGuided {
            let c = &self.acceleration;
            if c.pool_multiplier == 0 || !c.kappa.is_finite() || !(c.ridge_alpha >= 0.0) {
                return Err(CsError::Config(format!(
                    "stage {}: invalid acceleration controls",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

/// Original bounds plus the ordered stages to run over them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorSpec {
    pub variables: Vec<Variable>,
    pub stages: Vec<Stage>,
}

impl OrchestratorSpec {
    pub fn new(variables: Vec<Variable>) -> Self {
        Self {
            variables,
            stages: Vec::new(),
        }
    }

    pub fn add_stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Validate everything up front so no verifier call happens on a bad spec.
    pub fn validate(&self) -> CsResult<()> {
        validate_variables(&self.variables)?;
        if self.stages.is_empty() {
            return Err(CsError::Config("orchestrator spec has no stages".to_string()));
        }
        let mut names = HashSet::new();
        for stage in &self.stages {
            if !names.insert(stage.name.as_str()) {
                return Err(CsError::Config(format!("duplicate stage name: {}", stage.name)));
            }
            stage.validate(self.variables.len())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> OrchestratorSpec {
        OrchestratorSpec::new(vec![Variable::new("x", 0.0, 1.0)])
            .add_stage(Stage::new("coarse", SearchMethod::LowDiscrepancy).with_budget(16))
            .add_stage(
                Stage::new("refine", SearchMethod::Stratified)
                    .with_budget(8)
                    .with_local_refine(0.25),
            )
    }

    #[test]
    fn valid_spec_passes() {
        assert!(spec().validate().is_ok());
    }

    #[test]
    fn stage_defaults() {
        let stage = Stage::new("s", SearchMethod::AcceptanceGuided);
        assert_eq!(stage.budget, 64);
        assert_eq!(stage.local_shrink, 0.35);
        assert!(!stage.local_refine);
        assert_eq!(stage.acceleration.pool_multiplier, 50);
        assert_eq!(stage.acceleration.feasibility_margin_key, "min_margin_frac");
    }

    #[test]
    fn shrink_out_of_range_rejected() {
        let bad = spec().add_stage(Stage::new("bad", SearchMethod::Grid).with_local_refine(1.5));
        assert!(bad.validate().unwrap_err().is_config());

        let zero = spec().add_stage(Stage::new("zero", SearchMethod::Grid).with_local_refine(0.0));
        assert!(zero.validate().is_err());
    }

    #[test]
    fn duplicate_stage_rejected() {
        let dup = spec().add_stage(Stage::new("coarse", SearchMethod::Grid));
        assert!(dup.validate().is_err());
    }

    #[test]
    fn empty_stage_list_rejected() {
        let empty = OrchestratorSpec::new(vec![Variable::new("x", 0.0, 1.0)]);
        assert!(empty.validate().is_err());
    }

    #[test]
    fn stage_deserializes_with_default_controls() {
        let stage: Stage = serde_json::from_str(
            r#"{"name":"s","method":"grid","budget":4,"seed":1,"local_refine":false,"local_shrink":0.5}"#,
        )
        .unwrap();
        assert_eq!(stage.acceleration, AccelerationControls::default());
    }
}
