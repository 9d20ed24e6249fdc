//! Pareto dominance and non-dominated fronts.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use cs_types::Candidate;

/// Objective values of one point, by objective key.
pub type ObjectiveRow = BTreeMap<String, f64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sense {
    Min,
    Max,
}

impl Sense {
    /// True when `a` is strictly better than `b`.
    fn better(self, a: f64, b: f64) -> bool {
        match self {
            Sense::Min => a < b,
            Sense::Max => a > b,
        }
    }
}

impl fmt::Display for Sense {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Sense::Min => "min",
            Sense::Max => "max",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParetoObjective {
    pub key: String,
    pub sense: Sense,
}

impl ParetoObjective {
    pub fn min(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            sense: Sense::Min,
        }
    }

    pub fn max(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            sense: Sense::Max,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParetoStatus {
    NonDominated,
    Dominated,
    /// Missing or non-finite objective; never compared.
    Excluded,
}

/// An objective row tied back to its candidate index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParetoRow {
    pub index: usize,
    pub values: ObjectiveRow,
}

/// `a` is no worse than `b` on every objective and strictly better on one.
pub fn dominates(a: &[f64], b: &[f64], senses: &[Sense]) -> bool {
    let mut strictly_better = false;
    for ((&x, &y), &sense) in a.iter().zip(b).zip(senses) {
        if sense.better(y, x) {
            return false;
        }
        if sense.better(x, y) {
            strictly_better = true;
        }
    }
    strictly_better
}

fn objective_vector(row: &ObjectiveRow, objectives: &[ParetoObjective]) -> Option<Vec<f64>> {
    objectives
        .iter()
        .map(|o| row.get(&o.key).copied().filter(|v| v.is_finite()))
        .collect()
}

/// Status of every row against the others.
pub fn classify(rows: &[ObjectiveRow], objectives: &[ParetoObjective]) -> Vec<ParetoStatus> {
    let active: Vec<usize> = (0..rows.len()).collect();
    classify_subset(rows, objectives, &active)
}

fn classify_subset(rows: &[ObjectiveRow], objectives: &[ParetoObjective], active: &[usize]) -> Vec<ParetoStatus> {
    let senses: Vec<Sense> = objectives.iter().map(|o| o.sense).collect();
    let vectors: Vec<Option<Vec<f64>>> = rows.iter().map(|r| objective_vector(r, objectives)).collect();

    let mut status = vec![ParetoStatus::Excluded; rows.len()];
    for &i in active {
        let Some(vi) = &vectors[i] else {
            continue;
        };
        let dominated = active.iter().any(|&j| {
            j != i
                && vectors[j]
                    .as_ref()
                    .is_some_and(|vj| dominates(vj, vi, &senses))
        });
        status[i] = if dominated {
            ParetoStatus::Dominated
        } else {
            ParetoStatus::NonDominated
        };
    }
    status
}

/// Non-dominated mask; excluded rows are `false`.
pub fn nondominated(rows: &[ObjectiveRow], objectives: &[ParetoObjective]) -> Vec<bool> {
    classify(rows, objectives)
        .into_iter()
        .map(|s| s == ParetoStatus::NonDominated)
        .collect()
}

/// Successive non-dominated layers, at most `max_fronts` of them.
pub fn fronts(rows: &[ObjectiveRow], objectives: &[ParetoObjective], max_fronts: usize) -> Vec<Vec<usize>> {
    let mut remaining: Vec<usize> = (0..rows.len())
        .filter(|&i| objective_vector(&rows[i], objectives).is_some())
        .collect();
    let mut layers = Vec::new();
    while !remaining.is_empty() && layers.len() < max_fronts {
        let status = classify_subset(rows, objectives, &remaining);
        let (front, rest): (Vec<usize>, Vec<usize>) = remaining
            .iter()
            .partition(|&&i| status[i] == ParetoStatus::NonDominated);
        if front.is_empty() {
            break;
        }
        layers.push(front);
        remaining = rest;
    }
    layers
}

/// Objective rows for the PASS candidates.
///
/// Each objective is read from the candidate's point, then its evidence; the
/// key `"score"` falls back to the candidate score. Missing values are left
/// out of the row, which excludes the candidate from dominance.
pub fn pareto_candidates<'a, I>(candidates: I, objectives: &[ParetoObjective]) -> Vec<ParetoRow>
where
    I: IntoIterator<Item = &'a Candidate>,
{
    candidates
        .into_iter()
        .filter(|c| c.is_pass())
        .map(|c| {
            let values = objectives
                .iter()
                .filter_map(|o| {
                    let value = c
                        .value(&o.key)
                        .or_else(|| c.evidence_f64(&o.key))
                        .or_else(|| (o.key == "score").then_some(c.score))?;
                    Some((o.key.clone(), value))
                })
                .collect();
            ParetoRow {
                index: c.index,
                values,
            }
        })
        .collect()
}
