use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod analyze;

use analyze::{analyze, parse_objective, AnalyzeOptions, LoadedArtifact};
use cs_topology::ParetoObjective;

#[derive(Parser, Debug)]
#[command(name = "certsearch", author, version, about = "Verify and analyze certsearch run artifacts", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check an artifact's schema and digests, then print its digest
    Verify {
        /// Artifact JSON written by a search or orchestrated run
        path: PathBuf,
    },
    /// Topology, Pareto fronts and interval narrowing over an artifact
    Analyze(AnalyzeArgs),
}

#[derive(Args, Debug)]
struct AnalyzeArgs {
    /// Artifact JSON written by a search or orchestrated run
    path: PathBuf,

    /// Pareto objective as key:min or key:max (repeatable, default score:max)
    #[arg(long = "objective", value_name = "KEY:SENSE", value_parser = parse_objective)]
    objectives: Vec<ParetoObjective>,

    /// Neighbour radius in normalized units
    #[arg(long, env = "CERTSEARCH_TOPOLOGY_EPS")]
    eps: Option<f64>,

    /// Histogram bins per variable for dead-zone detection
    #[arg(long, env = "CERTSEARCH_NARROWING_BINS")]
    bins: Option<usize>,

    /// Number of Pareto layers to report
    #[arg(long, default_value_t = 3)]
    max_fronts: usize,
}

impl AnalyzeArgs {
    fn options(&self) -> AnalyzeOptions {
        let mut options = AnalyzeOptions::default();
        if let Some(eps) = self.eps {
            options.topology.eps = eps;
        }
        if let Some(bins) = self.bins {
            options.narrowing.bins = bins;
        }
        if !self.objectives.is_empty() {
            options.objectives = self.objectives.clone();
        }
        options.max_fronts = self.max_fronts;
        options
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Command::Verify { path } => {
            let artifact = LoadedArtifact::load(&path)?;
            info!("{} verified ({})", path.display(), artifact.schema_version());
            println!("{}", artifact.digest());
        }
        Command::Analyze(args) => {
            let artifact = LoadedArtifact::load(&args.path)?;
            let report = analyze(&artifact, &args.options())?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}
