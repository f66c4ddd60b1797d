//! rustmd CLI entry point.
//!
//! Converts spectra datasets into MD event workspaces and inspects them.
#![allow(
    clippy::uninlined_format_args,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss,
    clippy::too_many_lines
)]

use clap::{Parser, Subcommand, ValueEnum};

use rustmd_algorithms::{ConversionConfig, ConversionStatus, ConvertToMd, TransformMode};
use rustmd_core::{BoxController, MatrixWorkspace, Property, SpectraSource};
use rustmd_io::{load_conversion_config, load_workspace, write_summary, ConversionSummary};
use std::path::PathBuf;
use std::time::Instant;
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    RustmdIo(#[from] rustmd_io::Error),

    #[error("Core error: {0}")]
    Core(#[from] rustmd_core::Error),

    #[error("{0}")]
    Usage(String),
}

/// Coordinate transform selection.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    /// Bin centre and vertical axis copied through
    Direct,
    /// Momentum-transfer magnitude (not available yet)
    Modq,
    /// Momentum transfer in the crystal frame plus energy transfer
    Q3d,
}

impl From<Mode> for TransformMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Direct => TransformMode::Direct,
            Mode::Modq => TransformMode::ModQ,
            Mode::Q3d => TransformMode::Q3D,
        }
    }
}

/// Spectrum-to-MD event conversion.
#[derive(Parser)]
#[command(name = "rustmd")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbose output (debug logging)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a spectra dataset into an MD event workspace
    Convert {
        /// Input dataset (JSON)
        input: PathBuf,

        /// Conversion settings (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Coordinate transform, overrides the settings file
        #[arg(short, long, value_enum)]
        mode: Option<Mode>,

        /// Children per dimension when a box splits
        #[arg(long)]
        split_into: Option<usize>,

        /// Events a leaf may hold before it splits
        #[arg(long)]
        split_threshold: Option<usize>,

        /// Depth at which boxes stop splitting
        #[arg(long)]
        max_depth: Option<usize>,

        /// Incident energy (meV) used when the run has no Ei log
        #[arg(long)]
        incident_energy: Option<f64>,

        /// Transform spectra on the calling thread only
        #[arg(long)]
        serial: bool,

        /// Write a JSON summary of the result
        #[arg(short, long)]
        summary: Option<PathBuf>,
    },

    /// Show information about a spectra dataset
    Info {
        /// Input dataset (JSON)
        input: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    match cli.command {
        Commands::Convert {
            input,
            config,
            mode,
            split_into,
            split_threshold,
            max_depth,
            incident_energy,
            serial,
            summary,
        } => {
            let source = load_workspace(&input)?;
            let mut config = match &config {
                Some(path) => load_conversion_config(path)?,
                None => ConversionConfig::default(),
            };
            if let Some(mode) = mode {
                config.mode = mode.into();
            }
            config.box_controller = override_controller(
                &config.box_controller,
                split_into,
                split_threshold,
                max_depth,
            )?;
            if let Some(energy) = incident_energy {
                config.incident_energy = Some(energy);
            }
            if serial {
                config.parallel = false;
            }
            if config.dimensions.is_empty() {
                config = with_data_bounds(config, &source)?;
            }

            let converter = ConvertToMd::new(config);
            let mut workspace = converter.create_workspace()?;
            let start = Instant::now();
            let mut next_report = 0.1;
            let report = converter.execute_with_progress(&source, &mut workspace, |update| {
                if update.fraction() >= next_report {
                    eprintln!("{:>3.0}% ({} / {} detectors)", update.fraction() * 100.0, update.done, update.total);
                    while next_report <= update.fraction() {
                        next_report += 0.1;
                    }
                }
            })?;
            let elapsed = start.elapsed();

            if report.status == ConversionStatus::Cancelled {
                println!("Conversion cancelled");
            }
            println!(
                "Converted {} detectors in {:.2}s",
                report.detectors_processed,
                elapsed.as_secs_f64()
            );
            println!("Events added: {}", report.events_added);
            println!("Events dropped: {}", report.events_dropped);
            println!("Bins skipped: {}", report.bins_skipped);
            if let Some(ei) = report.incident_energy {
                println!("Incident energy: {} meV", ei);
            }
            println!(
                "Boxes: {} ({} splits, max depth {})",
                workspace.num_boxes(),
                report.splits,
                workspace.max_leaf_depth()
            );
            println!(
                "Total signal: {} (error^2 {})",
                workspace.root_signal(),
                workspace.root_error_squared()
            );

            if let Some(path) = summary {
                write_summary(&path, &ConversionSummary::new(&report, &workspace))?;
                log::info!("wrote summary to {}", path.display());
            }
        }

        Commands::Info { input } => {
            let source = load_workspace(&input)?;
            println!("File: {}", input.display());
            println!("Spectra: {}", source.num_spectra());
            println!("Bins: {}", source.total_bins());
            if !source.x_unit.is_empty() {
                println!("X unit: {}", source.x_unit);
            }
            if let Some((lo, hi)) = source.x_range() {
                println!("X range: {} - {}", lo, hi);
            }
            if let Some((lo, hi)) = source.vertical_axis.as_deref().and_then(range_of) {
                println!("Vertical axis range: {} - {}", lo, hi);
            }
            if let Some(lattice) = &source.sample.lattice {
                println!(
                    "Lattice: a={:?} angles={:?}",
                    lattice.lengths, lattice.angles
                );
            }
            for (name, property) in &source.run.properties {
                match property {
                    Property::Number(v) => println!("  {name} = {v}"),
                    Property::Text(s) => println!("  {name} = \"{s}\""),
                    Property::TimeSeries(series) => println!(
                        "  {name}: time series, {} entries, first {:?}",
                        series.len(),
                        property.first_time_series_value()
                    ),
                }
            }
        }
    }

    Ok(())
}

/// Applies command-line overrides to the splitting policy.
fn override_controller(
    base: &BoxController,
    split_into: Option<usize>,
    split_threshold: Option<usize>,
    max_depth: Option<usize>,
) -> Result<BoxController> {
    let mut controller = base.clone();
    if let Some(n) = split_into {
        controller = controller.with_split_into(n);
    }
    if let Some(n) = split_threshold {
        controller = controller.with_split_threshold(n);
    }
    if let Some(n) = max_depth {
        controller = controller.with_max_depth(n);
    }
    controller.validate()?;
    Ok(controller)
}

/// Fills direct-mode dimensions from the extent of the data.
fn with_data_bounds(config: ConversionConfig, source: &MatrixWorkspace) -> Result<ConversionConfig> {
    if config.mode != TransformMode::Direct || !config.other_dimensions.is_empty() {
        return Err(CliError::Usage(format!(
            "{} conversion needs dimensions in a settings file (--config)",
            config.mode
        )));
    }
    let x = source
        .x_range()
        .ok_or_else(|| CliError::Usage("dataset has no bins".to_string()))?;
    let y = source
        .vertical_axis
        .as_deref()
        .and_then(range_of)
        .ok_or_else(|| CliError::Usage("dataset has no vertical axis".to_string()))?;
    Ok(config.with_dimension_bounds(&[padded(x), padded(y)])?)
}

fn range_of(values: &[f64]) -> Option<(f64, f64)> {
    values.iter().copied().fold(None, |acc, v| match acc {
        None => Some((v, v)),
        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
    })
}

/// Makes the upper bound exclusive of the largest value.
fn padded((lo, hi): (f64, f64)) -> (f64, f64) {
    let pad = ((hi - lo).abs() * 1e-6).max(hi.abs().max(1.0) * 1e-9);
    (lo, hi + pad)
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn test_padded_upper_bound_is_exclusive() {
        for value in [0.0, -3.0, 20.0, 1.0e7, 4.0e12, -2.5e15] {
            let (lo, hi) = padded((value, value));
            assert_eq!(lo, value);
            assert!(hi > value, "no room above {value}");
        }
        let (lo, hi) = padded((-1.0, 5.0));
        assert_eq!(lo, -1.0);
        assert!(hi > 5.0 && hi < 5.001);
    }

    #[test]
    fn test_range_of() {
        assert_eq!(range_of(&[3.0, -1.0, 2.0]), Some((-1.0, 3.0)));
        assert_eq!(range_of(&[]), None);
    }
}
