//! Search space definitions: variables, methods and the immutable search spec.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::errors::{CsError, CsResult};

/// Number of prime bases available to the low-discrepancy sampler.
pub const MAX_LOW_DISCREPANCY_DIMS: usize = 12;

/// A single bounded dimension of the search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    /// Name of the override key (e.g. "R0_m").
    pub name: String,
    pub lower: f64,
    pub upper: f64,
}

impl Variable {
    pub fn new(name: impl Into<String>, lower: f64, upper: f64) -> Self {
        Self {
            name: name.into(),
            lower,
            upper,
        }
    }

    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }

    pub fn midpoint(&self) -> f64 {
        0.5 * (self.lower + self.upper)
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && value <= self.upper
    }

    pub fn validate(&self) -> CsResult<()> {
        if !self.lower.is_finite() || !self.upper.is_finite() || self.lower >= self.upper {
            return Err(CsError::InvalidBounds {
                name: self.name.clone(),
                lower: self.lower,
                upper: self.upper,
            });
        }
        Ok(())
    }
}

/// Point-generation scheme used by the sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingMethod {
    /// Latin-hypercube stratification.
    Stratified,
    /// Halton radical-inverse sequence.
    LowDiscrepancy,
    /// Regular lexicographic mesh.
    Grid,
}

/// How a search (or orchestrated stage) generates its candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMethod {
    Stratified,
    LowDiscrepancy,
    Grid,
    /// Surrogate-ranked proposals trained on prior stages.
    AcceptanceGuided,
}

impl SearchMethod {
    /// The sampler backing this method, `None` for acceptance-guided stages.
    pub fn sampling(self) -> Option<SamplingMethod> {
        match self {
            Self::Stratified => Some(SamplingMethod::Stratified),
            Self::LowDiscrepancy => Some(SamplingMethod::LowDiscrepancy),
            Self::Grid => Some(SamplingMethod::Grid),
            Self::AcceptanceGuided => None,
        }
    }

    /// Whether this method draws from the Halton sequence (directly or as the
    /// acceleration pool / fallback).
    pub fn uses_low_discrepancy(self) -> bool {
        matches!(self, Self::LowDiscrepancy | Self::AcceptanceGuided)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stratified => "stratified",
            Self::LowDiscrepancy => "low_discrepancy",
            Self::Grid => "grid",
            Self::AcceptanceGuided => "acceptance_guided",
        }
    }
}

impl From<SamplingMethod> for SearchMethod {
    fn from(method: SamplingMethod) -> Self {
        match method {
            SamplingMethod::Stratified => Self::Stratified,
            SamplingMethod::LowDiscrepancy => Self::LowDiscrepancy,
            SamplingMethod::Grid => Self::Grid,
        }
    }
}

impl std::fmt::Display for SearchMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validate a variable list: non-empty, valid bounds, unique names.
pub fn validate_variables(variables: &[Variable]) -> CsResult<()> {
    if variables.is_empty() {
        return Err(CsError::Config("search space has no variables".to_string()));
    }
    let mut seen = HashSet::new();
    for var in variables {
        var.validate()?;
        if !seen.insert(var.name.as_str()) {
            return Err(CsError::DuplicateVariable {
                name: var.name.clone(),
            });
        }
    }
    Ok(())
}

/// Immutable description of one budgeted search.
///
/// Deserialization goes through [`SearchSpec::new`], so a spec read from
/// JSON carries the same guarantees as one built in code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSearchSpec")]
pub struct SearchSpec {
    variables: Vec<Variable>,
    budget: usize,
    seed: u64,
    method: SearchMethod,
}

/// Unvalidated wire form of [`SearchSpec`].
#[derive(Debug, Deserialize)]
struct RawSearchSpec {
    variables: Vec<Variable>,
    budget: usize,
    seed: u64,
    method: SearchMethod,
}

impl TryFrom<RawSearchSpec> for SearchSpec {
    type Error = CsError;

    fn try_from(raw: RawSearchSpec) -> CsResult<Self> {
        Self::new(raw.variables, raw.budget, raw.seed, raw.method)
    }
}

impl SearchSpec {
    /// Build and validate a spec. Fails fast on any configuration error.
    pub fn new(
        variables: Vec<Variable>,
        budget: usize,
        seed: u64,
        method: SearchMethod,
    ) -> CsResult<Self> {
        validate_variables(&variables)?;
        if budget == 0 {
            return Err(CsError::NonPositiveBudget);
        }
        if method.uses_low_discrepancy() && variables.len() > MAX_LOW_DISCREPANCY_DIMS {
            return Err(CsError::UnsupportedDimension {
                dims: variables.len(),
                max: MAX_LOW_DISCREPANCY_DIMS,
            });
        }
        Ok(Self {
            variables,
            budget,
            seed,
            method,
        })
    }

    /// Parse a JSON spec, keeping validation failures as configuration errors.
    pub fn from_json(text: &str) -> CsResult<Self> {
        let raw: RawSearchSpec = serde_json::from_str(text)?;
        Self::try_from(raw)
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn method(&self) -> SearchMethod {
        self.method
    }

    pub fn dimension(&self) -> usize {
        self.variables.len()
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> Vec<Variable> {
        vec![Variable::new("a", 0.0, 1.0), Variable::new("b", -5.0, 5.0)]
    }

    #[test]
    fn spec_accepts_valid_input() {
        let spec = SearchSpec::new(vars(), 32, 3, SearchMethod::Stratified).unwrap();
        assert_eq!(spec.dimension(), 2);
        assert_eq!(spec.budget(), 32);
        assert_eq!(spec.variable("b").unwrap().width(), 10.0);
    }

    #[test]
    fn inverted_bounds_rejected() {
        let err = SearchSpec::new(
            vec![Variable::new("x", 1.0, 1.0)],
            10,
            0,
            SearchMethod::Grid,
        )
        .unwrap_err();
        assert!(matches!(err, CsError::InvalidBounds { .. }));
    }

    #[test]
    fn non_finite_bounds_rejected() {
        let err = Variable::new("x", f64::NEG_INFINITY, 1.0).validate().unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn duplicate_names_rejected() {
        let err = SearchSpec::new(
            vec![Variable::new("x", 0.0, 1.0), Variable::new("x", 2.0, 3.0)],
            10,
            0,
            SearchMethod::Grid,
        )
        .unwrap_err();
        assert!(matches!(err, CsError::DuplicateVariable { .. }));
    }

    #[test]
    fn zero_budget_rejected() {
        let err = SearchSpec::new(vars(), 0, 0, SearchMethod::Grid).unwrap_err();
        assert!(matches!(err, CsError::NonPositiveBudget));
    }

    #[test]
    fn halton_dimension_cap() {
        let many: Vec<Variable> = (0..13)
            .map(|i| Variable::new(format!("v{i}"), 0.0, 1.0))
            .collect();
        let err = SearchSpec::new(many.clone(), 10, 0, SearchMethod::LowDiscrepancy).unwrap_err();
        assert!(matches!(err, CsError::UnsupportedDimension { dims: 13, max: 12 }));

        // Stratified sampling has no base cap.
        assert!(SearchSpec::new(many, 10, 0, SearchMethod::Stratified).is_ok());
    }

    #[test]
    fn deserialized_spec_is_validated() {
        let inverted = r#"{"variables":[{"name":"x","lower":5.0,"upper":1.0}],"budget":4,"seed":0,"method":"stratified"}"#;

        let err = SearchSpec::from_json(inverted).unwrap_err();
        assert!(err.is_config());
        assert!(matches!(err, CsError::InvalidBounds { .. }));

        let err = serde_json::from_str::<SearchSpec>(inverted).unwrap_err();
        assert!(err.to_string().contains("Invalid bounds"));

        let zero_budget = r#"{"variables":[{"name":"x","lower":0.0,"upper":1.0}],"budget":0,"seed":0,"method":"grid"}"#;
        assert!(matches!(
            SearchSpec::from_json(zero_budget).unwrap_err(),
            CsError::NonPositiveBudget
        ));
    }

    #[test]
    fn spec_json_round_trip() {
        let spec = SearchSpec::new(vars(), 16, 9, SearchMethod::LowDiscrepancy).unwrap();
        let json = serde_json::to_string(&spec).unwrap();
        assert_eq!(SearchSpec::from_json(&json).unwrap(), spec);
        assert_eq!(serde_json::from_str::<SearchSpec>(&json).unwrap(), spec);
    }

    #[test]
    fn method_serializes_snake_case() {
        let json = serde_json::to_string(&SearchMethod::AcceptanceGuided).unwrap();
        assert_eq!(json, "\"acceptance_guided\"");
        assert_eq!(SearchMethod::LowDiscrepancy.to_string(), "low_discrepancy");
        assert_eq!(SearchMethod::AcceptanceGuided.sampling(), None);
    }
}
