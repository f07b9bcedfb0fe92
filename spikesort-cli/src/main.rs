//! spikesort CLI - Command-line interface for batch spike sorting.
//!
//! Reads threshold-crossed waveforms of one or more electrodes from a JSON
//! document, sorts every electrode and writes labels, cluster sizes and the
//! merge history back out as JSON.
#![allow(clippy::uninlined_format_args)]

use clap::{Parser, Subcommand};
use log::info;
use serde::{Deserialize, Serialize};
use spikesort_algorithms::{sort_electrodes, ElectrodeInput, SortOutcome};
use spikesort_core::config::SortConfig;
use spikesort_core::waveform::{Polarity, RawWaveforms};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Sorting error: {0}")]
    Core(#[from] spikesort_core::Error),
}

/// Automated spike sorting for extracellular recordings.
#[derive(Parser)]
#[command(name = "spikesort")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sort every electrode of an input document
    Sort {
        /// Input JSON document
        input: PathBuf,

        /// Output file path (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// JSON file with a full or partial sort configuration
        #[arg(long)]
        config: Option<PathBuf>,

        /// Random seed
        #[arg(long)]
        seed: Option<u64>,

        /// Bisection rounds of the initial clustering
        #[arg(long)]
        bisections: Option<u32>,

        /// Minimum spikes per initial cluster
        #[arg(long)]
        min_spikes: Option<usize>,

        /// Percent of variance the retained components must exceed
        #[arg(long)]
        variance_target: Option<f64>,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Show information about an input document
    Info {
        /// Input JSON document
        input: PathBuf,
    },
}

/// One electrode as stored in the input document.
#[derive(Debug, Deserialize)]
struct ElectrodeRecord {
    id: u32,
    threshold: f64,
    samples: usize,
    waveforms: Vec<Vec<i16>>,
}

impl ElectrodeRecord {
    fn into_input(self) -> Result<ElectrodeInput> {
        Ok(ElectrodeInput {
            id: self.id,
            threshold: self.threshold,
            waveforms: RawWaveforms::from_columns(self.samples, &self.waveforms)?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct InputDocument {
    electrodes: Vec<ElectrodeRecord>,
}

#[derive(Debug, Serialize)]
struct ElectrodeResult {
    id: u32,
    #[serde(flatten)]
    outcome: SortOutcome,
}

#[derive(Debug, Serialize)]
struct OutputDocument {
    electrodes: Vec<ElectrodeResult>,
}

fn read_document(path: &Path) -> Result<InputDocument> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

fn load_config(path: Option<&Path>) -> Result<SortConfig> {
    match path {
        Some(path) => Ok(serde_json::from_reader(BufReader::new(File::open(path)?))?),
        None => Ok(SortConfig::default()),
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Sort {
            input,
            output,
            config,
            seed,
            bisections,
            min_spikes,
            variance_target,
            verbose,
        } => {
            init_logging(verbose);

            let mut config = load_config(config.as_deref())?;
            if let Some(seed) = seed {
                config.seed = seed;
            }
            if let Some(bisections) = bisections {
                config.cluster.bisections = bisections;
            }
            if let Some(min_spikes) = min_spikes {
                config.cluster.min_spikes = min_spikes;
            }
            if let Some(target) = variance_target {
                config.reduce.variance_target = target;
            }

            let start = Instant::now();
            let document = read_document(&input)?;
            let inputs = document
                .electrodes
                .into_iter()
                .map(ElectrodeRecord::into_input)
                .collect::<Result<Vec<_>>>()?;
            info!("read {} electrodes from {}", inputs.len(), input.display());

            let outcomes = sort_electrodes(&inputs, &config)?;
            let result = OutputDocument {
                electrodes: inputs
                    .iter()
                    .zip(outcomes)
                    .map(|(electrode, outcome)| ElectrodeResult {
                        id: electrode.id,
                        outcome,
                    })
                    .collect(),
            };

            match output {
                Some(path) => {
                    let mut writer = BufWriter::new(File::create(&path)?);
                    serde_json::to_writer_pretty(&mut writer, &result)?;
                    writer.flush()?;
                    info!("wrote {}", path.display());
                }
                None => {
                    let stdout = std::io::stdout();
                    let mut writer = stdout.lock();
                    serde_json::to_writer_pretty(&mut writer, &result)?;
                    writeln!(writer)?;
                }
            }

            info!("sorted in {:.2}s", start.elapsed().as_secs_f64());
            for electrode in &result.electrodes {
                let stats = &electrode.outcome.statistics;
                info!(
                    "electrode {}: {} spikes, {} -> {} clusters, cutoff {:.4}",
                    electrode.id,
                    stats.spikes,
                    stats.initial_clusters,
                    stats.final_clusters,
                    electrode.outcome.cutoff
                );
            }
        }

        Commands::Info { input } => {
            let document = read_document(&input)?;
            println!("File: {}", input.display());
            println!("Electrodes: {}", document.electrodes.len());
            println!(
                "{:>8} {:>8} {:>8} {:>9} {:>8} {:>8}",
                "id", "spikes", "samples", "polarity", "min", "max"
            );
            println!("{:-<56}", "");
            for electrode in &document.electrodes {
                let (min, max) = electrode
                    .waveforms
                    .iter()
                    .flatten()
                    .fold((i16::MAX, i16::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
                let polarity = match Polarity::of_threshold(electrode.threshold) {
                    Polarity::Positive => "positive",
                    Polarity::Negative => "negative",
                };
                if electrode.waveforms.is_empty() {
                    println!(
                        "{:>8} {:>8} {:>8} {:>9} {:>8} {:>8}",
                        electrode.id, 0, electrode.samples, polarity, "-", "-"
                    );
                } else {
                    println!(
                        "{:>8} {:>8} {:>8} {:>9} {:>8} {:>8}",
                        electrode.id,
                        electrode.waveforms.len(),
                        electrode.samples,
                        polarity,
                        min,
                        max
                    );
                }
            }
        }
    }

    Ok(())
}
