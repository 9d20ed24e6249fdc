//! Artifact loading and trace analysis behind the `certsearch` binary.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use tracing::info;

use cs_search::{ArtifactPayload, OrchestratorArtifact, SearchArtifact};
use cs_topology::{
    fronts, pareto_candidates, propose, NarrowingOptions, NarrowingReport, ParetoObjective, Sense,
    TopologyGraph, TopologyOptions, TopologySummary,
};
use cs_types::{Candidate, OrchestratorResult, SearchResult, Variable};

/// A verified artifact of either kind.
#[derive(Debug)]
pub enum LoadedArtifact {
    Search(SearchArtifact),
    Orchestrator(OrchestratorArtifact),
}

impl LoadedArtifact {
    /// Read `path`, dispatch on `schema_version` and check every digest.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading artifact {}", path.display()))?;
        let doc: Value = serde_json::from_str(&text).context("artifact is not valid JSON")?;
        let schema = doc
            .get("schema_version")
            .and_then(Value::as_str)
            .unwrap_or_default();

        if schema == <SearchResult as ArtifactPayload>::SCHEMA_VERSION {
            Ok(Self::Search(SearchArtifact::from_json_str(&text)?))
        } else if schema == <OrchestratorResult as ArtifactPayload>::SCHEMA_VERSION {
            Ok(Self::Orchestrator(OrchestratorArtifact::from_json_str(&text)?))
        } else {
            bail!("unrecognised artifact schema {schema:?}")
        }
    }

    pub fn schema_version(&self) -> &str {
        match self {
            Self::Search(a) => &a.schema_version,
            Self::Orchestrator(a) => &a.schema_version,
        }
    }

    pub fn digest(&self) -> &str {
        match self {
            Self::Search(a) => &a.digest,
            Self::Orchestrator(a) => &a.digest,
        }
    }

    pub fn run_id(&self) -> String {
        match self {
            Self::Search(a) => a.run_id.to_string(),
            Self::Orchestrator(a) => a.run_id.to_string(),
        }
    }

    pub fn variables(&self) -> &[Variable] {
        match self {
            Self::Search(a) => a.result.spec.variables(),
            Self::Orchestrator(a) => &a.result.spec.variables,
        }
    }

    /// Every recorded candidate, stages concatenated in order.
    pub fn trace(&self) -> Vec<&Candidate> {
        match self {
            Self::Search(a) => a.result.candidates.iter().collect(),
            Self::Orchestrator(a) => a.result.candidates().collect(),
        }
    }

    pub fn best(&self) -> Option<&Candidate> {
        match self {
            Self::Search(a) => a.result.best(),
            Self::Orchestrator(a) => a.result.best.as_ref().map(|b| &b.candidate),
        }
    }
}

/// Analysis knobs, from flags and environment.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzeOptions {
    pub topology: TopologyOptions,
    pub narrowing: NarrowingOptions,
    pub objectives: Vec<ParetoObjective>,
    pub max_fronts: usize,
}

impl Default for AnalyzeOptions {
    fn default() -> Self {
        Self {
            topology: TopologyOptions::default(),
            narrowing: NarrowingOptions::default(),
            objectives: vec![ParetoObjective::max("score")],
            max_fronts: 3,
        }
    }
}

/// Parse `key:min` or `key:max`.
pub fn parse_objective(text: &str) -> Result<ParetoObjective> {
    let Some((key, sense)) = text.rsplit_once(':') else {
        bail!("objective must look like key:min or key:max, got {text:?}");
    };
    let sense = match sense {
        "min" => Sense::Min,
        "max" => Sense::Max,
        other => bail!("unknown objective sense {other:?}"),
    };
    if key.is_empty() {
        bail!("objective key is empty");
    }
    Ok(ParetoObjective {
        key: key.to_string(),
        sense,
    })
}

#[derive(Debug, Serialize)]
pub struct BestSummary {
    pub index: usize,
    pub score: Value,
    pub x: Value,
}

#[derive(Debug, Serialize)]
pub struct ParetoSummary {
    pub objectives: Vec<ParetoObjective>,
    /// Trace positions per front, best front first.
    pub fronts: Vec<Vec<usize>>,
}

#[derive(Debug, Serialize)]
pub struct AnalysisReport {
    pub schema_version: String,
    pub run_id: String,
    pub digest: String,
    pub evaluations: usize,
    pub pass: usize,
    pub best: Option<BestSummary>,
    pub topology: TopologySummary,
    pub components: Vec<Vec<usize>>,
    pub pareto: ParetoSummary,
    pub narrowing: NarrowingReport,
}

/// Topology, Pareto fronts and narrowing over a verified artifact.
pub fn analyze(artifact: &LoadedArtifact, options: &AnalyzeOptions) -> Result<AnalysisReport> {
    let trace = artifact.trace();
    let pass_positions: Vec<usize> = trace
        .iter()
        .enumerate()
        .filter(|(_, c)| c.is_pass())
        .map(|(i, _)| i)
        .collect();

    let graph = TopologyGraph::from_candidates(trace.iter().copied(), &options.topology)?;
    // Graph nodes are the PASS candidates in trace order.
    let components = graph
        .components
        .iter()
        .map(|c| c.iter().map(|&node| pass_positions[node]).collect())
        .collect();

    let rows: Vec<_> = pareto_candidates(trace.iter().copied(), &options.objectives)
        .into_iter()
        .map(|r| r.values)
        .collect();
    let layers = fronts(&rows, &options.objectives, options.max_fronts)
        .into_iter()
        .map(|front| front.into_iter().map(|row| pass_positions[row]).collect())
        .collect();

    let narrowing = propose(artifact.variables(), trace.iter().copied(), &options.narrowing)?;

    let best = artifact.best().map(|c| BestSummary {
        index: c.index,
        score: cs_types::canonical::canonical_f64(c.score),
        x: cs_types::point_json(&c.point),
    });

    info!(
        "Analyzed {} candidates: {} PASS, {} islands",
        trace.len(),
        pass_positions.len(),
        graph.components.len()
    );

    Ok(AnalysisReport {
        schema_version: artifact.schema_version().to_string(),
        run_id: artifact.run_id(),
        digest: artifact.digest().to_string(),
        evaluations: trace.len(),
        pass: pass_positions.len(),
        best,
        topology: graph.summary(),
        components,
        pareto: ParetoSummary {
            objectives: options.objectives.clone(),
            fronts: layers,
        },
        narrowing,
    })
}
