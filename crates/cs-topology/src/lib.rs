//! # cs-topology
//!
//! Structural analysis of a completed certsearch trace: connected components
//! of the feasible set, Pareto dominance and fronts, and advisory interval
//! narrowing with repair contracts.
//!
//! Nothing in this crate calls a verifier or mutates a trace.

pub mod narrowing;
pub mod pareto;
pub mod topology;

pub use narrowing::{
    propose, quantile, DeadBin, NarrowingOptions, NarrowingReport, NarrowingSuggestion,
    Repairability, RepairContract,
};
pub use pareto::{
    classify, dominates, fronts, nondominated, pareto_candidates, ObjectiveRow, ParetoObjective,
    ParetoRow, ParetoStatus, Sense,
};
pub use topology::{numeric_value, RawPoint, TopologyGraph, TopologyOptions, TopologySummary};
