//! Advisory interval narrowing from an evaluated trace.
//!
//! Suggestions are never fed back into a search automatically; any narrowed
//! interval has to be re-verified by running a new search over it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

use cs_types::canonical::{canonical_f64, digest};
use cs_types::{config_error, validate_variables, Candidate, CsResult, Variable};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NarrowingOptions {
    pub bins: usize,
    pub min_samples_per_bin: usize,
    pub quantile_lo: f64,
    pub quantile_hi: f64,
    pub max_suggestions: usize,
}

impl Default for NarrowingOptions {
    fn default() -> Self {
        Self {
            bins: 12,
            min_samples_per_bin: 2,
            quantile_lo: 0.05,
            quantile_hi: 0.95,
            max_suggestions: 8,
        }
    }
}

impl NarrowingOptions {
    pub fn with_bins(mut self, bins: usize) -> Self {
        self.bins = bins;
        self
    }

    pub fn with_min_samples_per_bin(mut self, n: usize) -> Self {
        self.min_samples_per_bin = n;
        self
    }

    pub fn with_quantiles(mut self, lo: f64, hi: f64) -> Self {
        self.quantile_lo = lo;
        self.quantile_hi = hi;
        self
    }

    pub fn with_max_suggestions(mut self, n: usize) -> Self {
        self.max_suggestions = n;
        self
    }

    pub fn validate(&self) -> CsResult<()> {
        if self.bins == 0 {
            return Err(config_error!("narrowing needs at least one bin"));
        }
        let in_unit = |q: f64| (0.0..=1.0).contains(&q);
        if !in_unit(self.quantile_lo) || !in_unit(self.quantile_hi) || self.quantile_lo > self.quantile_hi {
            return Err(config_error!(
                "narrowing quantiles must satisfy 0 <= lo <= hi <= 1, got ({}, {})",
                self.quantile_lo,
                self.quantile_hi
            ));
        }
        Ok(())
    }
}

/// A bucket with enough samples and no PASS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadBin {
    pub var: String,
    pub bin_index: usize,
    pub lower: f64,
    pub upper: f64,
    pub n_total: usize,
    pub n_pass: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrowingSuggestion {
    pub var: String,
    pub current_interval: (f64, f64),
    pub suggested_interval: (f64, f64),
    /// PASS fraction among samples inside the suggested interval.
    pub pass_density: f64,
    pub dead_bins: usize,
    pub rationale: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Repairability {
    /// At least one PASS in the trace.
    Repairable,
    StructurallyInfeasible,
}

impl fmt::Display for Repairability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Repairability::Repairable => "REPAIRABLE",
            Repairability::StructurallyInfeasible => "STRUCTURALLY_INFEASIBLE",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrowingReport {
    pub n_total: usize,
    pub n_pass: usize,
    pub repairability: Repairability,
    pub options: NarrowingOptions,
    pub variables: Vec<Variable>,
    pub dead_bins: Vec<DeadBin>,
    pub suggestions: Vec<NarrowingSuggestion>,
}

/// Nearest-rank quantile: element `round(q · (n − 1))` of the sorted values.
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let k = (q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64).round() as usize;
    Some(sorted[k.min(sorted.len() - 1)])
}

/// Bin every variable, find dead bins and suggest PASS-concentrated intervals.
pub fn propose<'a, I>(variables: &[Variable], records: I, options: &NarrowingOptions) -> CsResult<NarrowingReport>
where
    I: IntoIterator<Item = &'a Candidate>,
{
    options.validate()?;
    validate_variables(variables)?;

    let records: Vec<&Candidate> = records.into_iter().collect();
    let n_total = records.len();
    let n_pass = records.iter().filter(|c| c.is_pass()).count();

    let mut dead_bins = Vec::new();
    let mut suggestions = Vec::new();
    let bins = options.bins;

    for var in variables {
        let (lo, hi) = (var.lower, var.upper);
        let width = var.width();
        let mut counts = vec![(0usize, 0usize); bins];
        let mut pass_values = Vec::new();

        for c in &records {
            let Some(x) = c.value(&var.name).filter(|v| v.is_finite()) else {
                continue;
            };
            let xc = x.clamp(lo, hi);
            let t = (xc - lo) / width;
            let idx = ((t * bins as f64) as usize).min(bins - 1);
            counts[idx].0 += 1;
            if c.is_pass() {
                counts[idx].1 += 1;
                pass_values.push(xc);
            }
        }

        let mut n_dead = 0;
        for (i, &(n, p)) in counts.iter().enumerate() {
            if n >= options.min_samples_per_bin && p == 0 {
                n_dead += 1;
                dead_bins.push(DeadBin {
                    var: var.name.clone(),
                    bin_index: i,
                    lower: lo + (i as f64 / bins as f64) * width,
                    upper: lo + ((i + 1) as f64 / bins as f64) * width,
                    n_total: n,
                    n_pass: 0,
                });
            }
        }

        let (Some(q_lo), Some(q_hi)) = (
            quantile(&pass_values, options.quantile_lo),
            quantile(&pass_values, options.quantile_hi),
        ) else {
            debug!("No PASS values for {}, no narrowing suggested", var.name);
            continue;
        };

        let pad = 0.05 * width;
        let mut suggested = ((q_lo - pad).max(lo), (q_hi + pad).min(hi));
        if suggested.1 <= suggested.0 {
            suggested = (lo, hi);
        }

        let (mut inside, mut inside_pass) = (0usize, 0usize);
        for c in &records {
            if let Some(x) = c.value(&var.name).filter(|v| v.is_finite()) {
                if suggested.0 <= x && x <= suggested.1 {
                    inside += 1;
                    if c.is_pass() {
                        inside_pass += 1;
                    }
                }
            }
        }
        let pass_density = inside_pass as f64 / inside.max(1) as f64;

        suggestions.push(NarrowingSuggestion {
            var: var.name.clone(),
            current_interval: (lo, hi),
            suggested_interval: suggested,
            pass_density,
            dead_bins: n_dead,
            rationale: format!(
                "PASS values concentrate in [{:.4}, {:.4}] (central quantiles) with pass density {:.2}; \
                 {}/{} bins dead. Advisory only: re-verify before use.",
                suggested.0, suggested.1, pass_density, n_dead, bins
            ),
        });
    }

    suggestions.sort_by(|a, b| {
        b.dead_bins
            .cmp(&a.dead_bins)
            .then(a.pass_density.total_cmp(&b.pass_density))
            .then_with(|| a.var.cmp(&b.var))
    });
    suggestions.truncate(options.max_suggestions);

    Ok(NarrowingReport {
        n_total,
        n_pass,
        repairability: if n_pass > 0 {
            Repairability::Repairable
        } else {
            Repairability::StructurallyInfeasible
        },
        options: options.clone(),
        variables: variables.to_vec(),
        dead_bins,
        suggestions,
    })
}

/// Governance record of which reformulations a repair may make.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairContract {
    pub forbid_constraint_relaxation: bool,
    pub max_delta_frac: f64,
    pub allowed_knobs: Vec<String>,
    pub base_intervals: BTreeMap<String, (f64, f64)>,
    pub notes: String,
}

impl RepairContract {
    /// `allowed_knobs` defaults to every interval name, sorted.
    pub fn new(
        base_intervals: BTreeMap<String, (f64, f64)>,
        allowed_knobs: Option<Vec<String>>,
        max_delta_frac: f64,
        forbid_relaxation: bool,
        notes: &str,
    ) -> Self {
        let allowed_knobs = match allowed_knobs {
            Some(knobs) if !knobs.is_empty() => knobs,
            _ => base_intervals.keys().cloned().collect(),
        };
        Self {
            forbid_constraint_relaxation: forbid_relaxation,
            max_delta_frac,
            allowed_knobs,
            base_intervals,
            notes: notes.trim().to_string(),
        }
    }

    /// Contract over the declared variables with the standard limits.
    pub fn from_variables(variables: &[Variable]) -> Self {
        let intervals = variables
            .iter()
            .map(|v| (v.name.clone(), (v.lower, v.upper)))
            .collect();
        Self::new(intervals, None, 0.10, true, "")
    }

    /// True when `name` may move by `delta` from its base value.
    pub fn permits(&self, name: &str, delta: f64) -> bool {
        let Some(&(lo, hi)) = self.base_intervals.get(name) else {
            return false;
        };
        self.allowed_knobs.iter().any(|k| k == name) && delta.abs() <= self.max_delta_frac * (hi - lo)
    }

    pub fn digest(&self) -> String {
        let intervals: serde_json::Map<String, serde_json::Value> = self
            .base_intervals
            .iter()
            .map(|(k, &(lo, hi))| (k.clone(), serde_json::json!([canonical_f64(lo), canonical_f64(hi)])))
            .collect();
        digest(&serde_json::json!({
            "forbid_constraint_relaxation": self.forbid_constraint_relaxation,
            "max_delta_frac": canonical_f64(self.max_delta_frac),
            "allowed_knobs": self.allowed_knobs,
            "base_intervals": intervals,
            "notes": self.notes,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cs_types::{Evaluation, Point};

    fn record(i: usize, values: &[(&str, f64)], pass: bool) -> Candidate {
        let point: Point = values.iter().map(|(k, v)| (k.to_string(), *v)).collect();
        let eval = if pass {
            Evaluation::pass(0.0)
        } else {
            Evaluation::fail(0.0)
        };
        Candidate::new(i, point, eval)
    }

    #[test]
    fn no_pass_means_no_suggestion() {
        let vars = vec![Variable::new("x", 0.0, 1.0)];
        let recs: Vec<Candidate> = (0..20).map(|i| record(i, &[("x", i as f64 / 20.0)], false)).collect();
        let report = propose(&vars, &recs, &NarrowingOptions::default()).unwrap();
        assert!(report.suggestions.is_empty());
        assert_eq!(report.repairability, Repairability::StructurallyInfeasible);
        assert_eq!(report.n_total, 20);
        assert!(!report.dead_bins.is_empty());
    }

    #[test]
    fn all_pass_keeps_full_interval() {
        let vars = vec![Variable::new("x", 0.0, 10.0)];
        let recs: Vec<Candidate> = (0..=100).map(|i| record(i, &[("x", i as f64 / 10.0)], true)).collect();
        let report = propose(&vars, &recs, &NarrowingOptions::default()).unwrap();
        let s = &report.suggestions[0];
        assert!(s.suggested_interval.0.abs() < 1e-12);
        assert!((s.suggested_interval.1 - 10.0).abs() < 1e-12);
        assert_eq!(s.pass_density, 1.0);
        assert_eq!(s.dead_bins, 0);
        assert_eq!(report.repairability, Repairability::Repairable);
    }

    #[test]
    fn dead_upper_half() {
        let vars = vec![Variable::new("x", 0.0, 12.0)];
        let mut recs = Vec::new();
        for bin in 0..12 {
            for _ in 0..2 {
                let x = bin as f64 + 0.5;
                recs.push(record(recs.len(), &[("x", x)], x < 6.0));
            }
        }
        let report = propose(&vars, &recs, &NarrowingOptions::default()).unwrap();
        let indices: Vec<usize> = report.dead_bins.iter().map(|d| d.bin_index).collect();
        assert_eq!(indices, vec![6, 7, 8, 9, 10, 11]);
        assert_eq!(report.dead_bins[0].lower, 6.0);

        let s = &report.suggestions[0];
        assert_eq!(s.dead_bins, 6);
        assert_eq!(s.suggested_interval.0, 0.0);
        assert!((s.suggested_interval.1 - 6.1).abs() < 1e-12);
        assert_eq!(s.pass_density, 1.0);
    }

    #[test]
    fn out_of_range_values_clamp_into_edge_bins() {
        let vars = vec![Variable::new("x", 0.0, 1.0)];
        let recs = vec![record(0, &[("x", -5.0)], false), record(1, &[("x", 7.0)], false)];
        let opts = NarrowingOptions::default().with_bins(4).with_min_samples_per_bin(1);
        let report = propose(&vars, &recs, &opts).unwrap();
        let indices: Vec<usize> = report.dead_bins.iter().map(|d| d.bin_index).collect();
        assert_eq!(indices, vec![0, 3]);
    }

    #[test]
    fn suggestions_rank_by_dead_bins_then_density() {
        let vars = vec![Variable::new("a", 0.0, 1.0), Variable::new("b", 0.0, 1.0)];
        // PASS iff a < 0.5; b uniform and uninformative.
        let recs: Vec<Candidate> = (0..40)
            .map(|i| {
                let a = (i as f64 + 0.5) / 40.0;
                let b = ((i * 7) % 40) as f64 / 40.0;
                record(i, &[("a", a), ("b", b)], a < 0.5)
            })
            .collect();
        let report = propose(&vars, &recs, &NarrowingOptions::default()).unwrap();
        assert_eq!(report.suggestions[0].var, "a");
        assert!(report.suggestions[0].dead_bins > report.suggestions[1].dead_bins);

        let one = propose(&vars, &recs, &NarrowingOptions::default().with_max_suggestions(1)).unwrap();
        assert_eq!(one.suggestions.len(), 1);
    }

    #[test]
    fn bad_options_are_config_errors() {
        let vars = vec![Variable::new("x", 0.0, 1.0)];
        let none: Vec<Candidate> = Vec::new();
        for opts in [
            NarrowingOptions::default().with_bins(0),
            NarrowingOptions::default().with_quantiles(0.9, 0.1),
            NarrowingOptions::default().with_quantiles(-0.1, 0.5),
        ] {
            assert!(propose(&vars, &none, &opts).unwrap_err().is_config());
        }
    }

    #[test]
    fn quantile_is_nearest_rank() {
        let xs = [5.0, 1.0, 3.0, 2.0, 4.0];
        assert_eq!(quantile(&xs, 0.0), Some(1.0));
        assert_eq!(quantile(&xs, 0.5), Some(3.0));
        assert_eq!(quantile(&xs, 1.0), Some(5.0));
        assert_eq!(quantile(&[], 0.5), None);
    }

    #[test]
    fn repair_contract_defaults() {
        let vars = vec![Variable::new("b", 0.0, 2.0), Variable::new("a", 0.0, 10.0)];
        let contract = RepairContract::from_variables(&vars);
        assert_eq!(contract.allowed_knobs, vec!["a", "b"]);
        assert!(contract.forbid_constraint_relaxation);
        assert!(contract.permits("a", 1.0));
        assert!(!contract.permits("a", 1.5));
        assert!(!contract.permits("c", 0.0));
        assert_eq!(contract.digest(), RepairContract::from_variables(&vars).digest());
    }
}
