use clap::{Parser, Subcommand};
use scorealign::batch::{self, BatchManifest};
use scorealign::{
    AlignError, AlignmentOracle, OracleOutput, Performance, PipelineConfig, PrecomputedOracle,
    ScoreDocument,
};
use std::path::{Path, PathBuf};
use std::process;

/// Score-to-performance alignment and feature extraction
#[derive(Parser)]
#[command(name = "scorealign")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Pipeline configuration (YAML)
    #[arg(long, global = true, env = "SCOREALIGN_CONFIG")]
    config: Option<PathBuf>,

    /// Seed for tempo jitter, overriding the configuration
    #[arg(long, global = true, env = "SCOREALIGN_SEED")]
    seed: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Align one performance and write its features as JSON
    Align {
        /// Score document (YAML/JSON)
        #[arg(long)]
        score: PathBuf,

        /// Performance document (YAML/JSON)
        #[arg(long)]
        performance: PathBuf,

        /// Precomputed correspondence table
        #[arg(long, requires = "matches")]
        corresp: Option<PathBuf>,

        /// Precomputed match list
        #[arg(long = "match", id = "matches", requires = "corresp")]
        matches: Option<PathBuf>,

        /// Reference MIDI rendering of the score, for running the oracle
        #[arg(long, requires = "performance_midi", conflicts_with = "corresp")]
        reference_midi: Option<PathBuf>,

        /// Performance MIDI, for running the oracle
        #[arg(long, requires = "reference_midi")]
        performance_midi: Option<PathBuf>,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Run every job of a manifest in parallel
    Batch {
        /// Batch manifest (YAML)
        #[arg(long)]
        manifest: PathBuf,
    },
}

fn load_config(path: Option<&Path>, seed: Option<u64>) -> Result<PipelineConfig, AlignError> {
    let mut config = match path {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    if seed.is_some() {
        config.jitter_seed = seed;
    }
    Ok(config)
}

#[allow(clippy::too_many_arguments)]
fn align(
    config: &PipelineConfig,
    score: &Path,
    performance: &Path,
    corresp: Option<PathBuf>,
    matches: Option<PathBuf>,
    reference_midi: Option<PathBuf>,
    performance_midi: Option<PathBuf>,
    output: Option<PathBuf>,
) -> Result<(), AlignError> {
    let score_doc = ScoreDocument::load(score)?;
    let performance_doc = Performance::load(performance)?;

    let oracle_output: OracleOutput = match (corresp, matches, reference_midi, performance_midi) {
        (Some(corresp), Some(matches), _, _) => {
            PrecomputedOracle::new(corresp, matches).align(score, performance)?
        }
        (_, _, Some(reference), Some(performed)) => {
            config.oracle.process_oracle().align(&reference, &performed)?
        }
        _ => {
            return Err(AlignError::Config(
                "give --corresp and --match, or --reference-midi and --performance-midi"
                    .to_string(),
            ))
        }
    };

    let mut rng = config.rng(0);
    let features = scorealign::process_pair(
        &score_doc,
        &performance_doc,
        &oracle_output,
        config,
        &mut rng,
    )?;

    match output {
        Some(path) => {
            batch::write_features(&path, &features)?;
            tracing::info!(path = %path.display(), notes = features.notes.len(), "Wrote features");
        }
        None => println!("{}", serde_json::to_string_pretty(&features)?),
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match load_config(cli.config.as_deref(), cli.seed) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Configuration error: {}", e);
            process::exit(2);
        }
    };

    match cli.command {
        Commands::Align {
            score,
            performance,
            corresp,
            matches,
            reference_midi,
            performance_midi,
            output,
        } => {
            if let Err(e) = align(
                &config,
                &score,
                &performance,
                corresp,
                matches,
                reference_midi,
                performance_midi,
                output,
            ) {
                tracing::error!("Alignment failed: {}", e);
                process::exit(1);
            }
        }
        Commands::Batch { manifest } => {
            let manifest = match BatchManifest::load(&manifest) {
                Ok(manifest) => manifest,
                Err(e) => {
                    tracing::error!("Error reading manifest '{}': {}", manifest.display(), e);
                    process::exit(1);
                }
            };
            let summary = batch::run_batch(&manifest.jobs, &config);
            for failure in &summary.failed {
                eprintln!("FAILED {}: {}", failure.name, failure.reason);
            }
            eprintln!(
                "{} of {} jobs succeeded",
                summary.succeeded.len(),
                summary.total()
            );
            if summary.all_failed() {
                process::exit(1);
            }
        }
    }
}
