//! Boundary traits for the external builder and verifier.
//!
//! Both are single-method interfaces so callers can plug in the real
//! evaluator or a stub. They must be `Sync` because batches may be evaluated
//! in parallel.

use cs_types::canonical::canonical_f64;
use cs_types::{BoxError, Evaluation, Point};
use serde_json::Value;

/// Merges sampled overrides onto a base configuration.
pub trait Builder: Sync {
    type Base: Sync;
    type Input;

    fn build(&self, base: &Self::Base, overrides: &Point) -> Result<Self::Input, BoxError>;
}

/// The authoritative feasibility oracle.
///
/// Must be deterministic for a fixed input if digests are to be reproducible.
pub trait Verifier: Sync {
    type Input;

    fn verify(&self, input: &Self::Input) -> Result<Evaluation, BoxError>;
}

/// Builder for JSON-object configurations: overrides replace (or add) the
/// matching top-level keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMergeBuilder;

impl Builder for JsonMergeBuilder {
    type Base = Value;
    type Input = Value;

    fn build(&self, base: &Value, overrides: &Point) -> Result<Value, BoxError> {
        let mut merged = match base {
            Value::Object(map) => map.clone(),
            Value::Null => serde_json::Map::new(),
            other => {
                return Err(format!("base input must be a JSON object, got {other}").into());
            }
        };
        for (name, value) in overrides {
            merged.insert(name.clone(), canonical_f64(*value));
        }
        Ok(Value::Object(merged))
    }
}
