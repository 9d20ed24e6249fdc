//! Similarity graph over feasible points and its connected components.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use cs_types::canonical::canonical_f64;
use cs_types::{config_error, Candidate, CsResult};

/// A raw input point: lever name to JSON value.
pub type RawPoint = Map<String, Value>;

/// Options for [`TopologyGraph::build`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyOptions {
    /// Keys to compare; inferred from the data when `None`.
    pub lever_keys: Option<Vec<String>>,
    /// Declared `(lower, upper)` per key; observed ranges fill the gaps.
    pub bounds: Option<BTreeMap<String, (f64, f64)>>,
    /// Edge threshold on the scaled RMS distance.
    pub eps: f64,
    /// Inputs beyond this count are dropped (truncation, not sampling).
    pub max_points: usize,
}

impl Default for TopologyOptions {
    fn default() -> Self {
        Self {
            lever_keys: None,
            bounds: None,
            eps: 0.18,
            max_points: 600,
        }
    }
}

impl TopologyOptions {
    pub fn with_lever_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lever_keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_bounds(mut self, bounds: BTreeMap<String, (f64, f64)>) -> Self {
        self.bounds = Some(bounds);
        self
    }

    pub fn with_eps(mut self, eps: f64) -> Self {
        self.eps = eps;
        self
    }

    pub fn with_max_points(mut self, max_points: usize) -> Self {
        self.max_points = max_points;
        self
    }

    pub fn validate(&self) -> CsResult<()> {
        if !(self.eps.is_finite() && self.eps >= 0.0) {
            return Err(config_error!("topology eps must be finite and non-negative, got {}", self.eps));
        }
        Ok(())
    }
}

/// Immutable feasibility graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyGraph {
    pub eps: f64,
    pub lever_keys: Vec<String>,
    /// Range used to normalize each lever.
    pub bounds: BTreeMap<String, (f64, f64)>,
    /// Lever-only numeric view of the retained points.
    pub points: Vec<BTreeMap<String, f64>>,
    pub edges: Vec<(usize, usize)>,
    /// Point indices per component, largest component first.
    pub components: Vec<Vec<usize>>,
}

/// Island statistics of a graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologySummary {
    pub n_points: usize,
    pub n_edges: usize,
    pub n_islands: usize,
    pub largest_island: usize,
    pub second_island: usize,
    /// `1 − largest / n`; `None` for an empty graph.
    pub fragmentation: Option<f64>,
}

/// A finite number, or a string that parses to one.
pub fn numeric_value(value: &Value) -> Option<f64> {
    let v = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    v.is_finite().then_some(v)
}

impl TopologyGraph {
    pub fn build(points: &[RawPoint], options: &TopologyOptions) -> CsResult<Self> {
        options.validate()?;
        let points = &points[..points.len().min(options.max_points)];

        let lever_keys = match &options.lever_keys {
            Some(keys) => keys.clone(),
            None => infer_lever_keys(points),
        };

        let mut bounds = BTreeMap::new();
        for key in &lever_keys {
            if let Some(&(lo, hi)) = options.bounds.as_ref().and_then(|b| b.get(key)) {
                if lo.is_finite() && hi.is_finite() {
                    bounds.insert(key.clone(), (lo, hi));
                    continue;
                }
            }
            let observed = points.iter().filter_map(|p| p.get(key).and_then(numeric_value));
            let range = observed.fold(None, |acc: Option<(f64, f64)>, v| {
                Some(acc.map_or((v, v), |(lo, hi)| (lo.min(v), hi.max(v))))
            });
            if let Some(range) = range {
                bounds.insert(key.clone(), range);
            }
        }
        let scales: Vec<(String, f64)> = bounds
            .iter()
            .map(|(k, &(lo, hi))| {
                let width = hi - lo;
                (k.clone(), if width > 0.0 { width } else { 1.0 })
            })
            .collect();

        let lever_points: Vec<BTreeMap<String, f64>> = points
            .iter()
            .map(|p| {
                lever_keys
                    .iter()
                    .filter_map(|k| p.get(k).and_then(numeric_value).map(|v| (k.clone(), v)))
                    .collect()
            })
            .collect();

        let n = lever_points.len();
        let mut edges = Vec::new();
        for i in 0..n {
            for j in (i + 1)..n {
                if scaled_distance(&lever_points[i], &lever_points[j], &scales) <= options.eps {
                    edges.push((i, j));
                }
            }
        }
        let components = connected_components(n, &edges);
        debug!(
            "Topology: {} points, {} edges, {} components (eps {})",
            n,
            edges.len(),
            components.len(),
            options.eps
        );

        Ok(Self {
            eps: options.eps,
            lever_keys,
            bounds,
            points: lever_points,
            edges,
            components,
        })
    }

    /// Graph over the points of PASS candidates.
    pub fn from_candidates<'a, I>(candidates: I, options: &TopologyOptions) -> CsResult<Self>
    where
        I: IntoIterator<Item = &'a Candidate>,
    {
        let points: Vec<RawPoint> = candidates
            .into_iter()
            .filter(|c| c.is_pass())
            .map(|c| {
                c.point
                    .iter()
                    .map(|(k, v)| (k.clone(), canonical_f64(*v)))
                    .collect()
            })
            .collect();
        Self::build(&points, options)
    }

    pub fn n_points(&self) -> usize {
        self.points.len()
    }

    pub fn n_edges(&self) -> usize {
        self.edges.len()
    }

    /// Index of the component containing point `index`.
    pub fn component_of(&self, index: usize) -> Option<usize> {
        self.components.iter().position(|c| c.binary_search(&index).is_ok())
    }

    pub fn summary(&self) -> TopologySummary {
        let n = self.n_points();
        let largest = self.components.first().map_or(0, Vec::len);
        TopologySummary {
            n_points: n,
            n_edges: self.n_edges(),
            n_islands: self.components.len(),
            largest_island: largest,
            second_island: self.components.get(1).map_or(0, Vec::len),
            fragmentation: (n > 0).then(|| 1.0 - largest as f64 / n as f64),
        }
    }
}

/// Sorted intersection of numeric keys across all points.
fn infer_lever_keys(points: &[RawPoint]) -> Vec<String> {
    let mut common: Option<BTreeSet<String>> = None;
    for p in points {
        let keys: BTreeSet<String> = p
            .iter()
            .filter(|(_, v)| numeric_value(v).is_some())
            .map(|(k, _)| k.clone())
            .collect();
        common = Some(match common {
            None => keys,
            Some(c) => c.intersection(&keys).cloned().collect(),
        });
    }
    common.unwrap_or_default().into_iter().collect()
}

/// RMS of scaled differences over keys present in both points.
fn scaled_distance(a: &BTreeMap<String, f64>, b: &BTreeMap<String, f64>, scales: &[(String, f64)]) -> f64 {
    let mut sum = 0.0;
    let mut n = 0usize;
    for (key, scale) in scales {
        if let (Some(x), Some(y)) = (a.get(key), b.get(key)) {
            let d = (x - y) / scale;
            sum += d * d;
            n += 1;
        }
    }
    if n == 0 {
        f64::INFINITY
    } else {
        (sum / n as f64).sqrt()
    }
}

/// Iterative DFS; components sorted by descending size, ties in discovery order.
fn connected_components(n: usize, edges: &[(usize, usize)]) -> Vec<Vec<usize>> {
    let mut adjacency = vec![Vec::new(); n];
    for &(i, j) in edges {
        adjacency[i].push(j);
        adjacency[j].push(i);
    }
    let mut seen = vec![false; n];
    let mut components = Vec::new();
    for start in 0..n {
        if seen[start] {
            continue;
        }
        seen[start] = true;
        let mut stack = vec![start];
        let mut component = Vec::new();
        while let Some(u) = stack.pop() {
            component.push(u);
            for &v in &adjacency[u] {
                if !seen[v] {
                    seen[v] = true;
                    stack.push(v);
                }
            }
        }
        component.sort_unstable();
        components.push(component);
    }
    components.sort_by(|a, b| b.len().cmp(&a.len()));
    components
}
