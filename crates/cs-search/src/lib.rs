//! # cs-search
//!
//! Deterministic budgeted search for certsearch.
//!
//! Provides seeded samplers (stratified, low-discrepancy, grid), the
//! verify-every-candidate search loop, multi-stage orchestration with local
//! refinement and surrogate-ranked acceleration, and digest-checked JSON
//! artifacts.

pub mod artifact;
mod collaborator;
mod orchestrator;
mod runner;
mod sampler;
mod surrogate;

pub use artifact::{ArtifactPayload, OrchestratorArtifact, RunArtifact, SearchArtifact};
pub use collaborator::{Builder, JsonMergeBuilder, Verifier};
pub use orchestrator::{best_candidate, local_bounds, stage_results, StageOrchestrator};
pub use runner::SearchRunner;
pub use sampler::{map_to_bounds, radical_inverse, Sampler, PRIME_BASES};
pub use surrogate::{Accelerator, SurrogateFit, TrainingRow};

pub use cs_types;
