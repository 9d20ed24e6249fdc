//! # cs-types
//!
//! Core data model for certsearch: variables and search specs, evaluated
//! candidates, stage declarations, results, engine configuration, the error
//! taxonomy and canonical SHA-256 digests.

pub mod candidate;
pub mod canonical;
pub mod config;
pub mod errors;
pub mod result;
pub mod space;
pub mod stage;

pub use candidate::*;
pub use config::*;
pub use errors::*;
pub use result::*;
pub use space::*;
pub use stage::*;
