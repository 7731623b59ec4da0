//! locthk: run the local thickness pipeline on one image file.
//!
//! The four stages are delegated to external programs named in a JSON
//! stage configuration (see [`command`]). Parameters are asked for on the
//! terminal, pre-filled from the last confirmed run, unless `--batch` is
//! given.
//!
//! # Usage
//!
//! ```text
//! locthk --stages stages.json [OPTIONS] <IMAGE_PATH>
//! ```

#![allow(clippy::print_stdout)]

mod command;
mod dialog;
mod image_io;
mod prefs_file;
mod raster;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use anyhow::Context as _;
use clap::Parser;
use locthk_pipeline::diagnostics::Clock;
use locthk_pipeline::status::TracingStatus;
use locthk_pipeline::{Controller, PresetDialog, Registry, RunOutcome};
use tracing_subscriber::EnvFilter;

use crate::command::{CommandStages, StagesConfig};
use crate::dialog::{CliDialog, TerminalDialog};
use crate::prefs_file::JsonFilePreferences;

/// Compute the local thickness map of an 8-bit grayscale image.
///
/// Runs distance map, distance ridge, local thickness, and cleanup in
/// sequence, then writes the result as `<name>_LocThk.tif` next to the
/// input unless `--output` says otherwise.
#[derive(Parser)]
#[command(name = "locthk", version)]
struct Cli {
    /// Path to the source image (PNG, TIFF, BMP).
    image_path: PathBuf,

    /// JSON file naming the program to run for each stage.
    #[arg(long)]
    stages: PathBuf,

    /// Where to write the result (default: next to the input).
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Preference file (default: `<config dir>/locthk/prefs.json`).
    #[arg(long)]
    prefs: Option<PathBuf>,

    /// Confirm the parameters without prompting.
    #[arg(long)]
    batch: bool,

    /// Threshold to confirm with in batch mode.
    #[arg(long, requires = "batch", allow_negative_numbers = true)]
    threshold: Option<i32>,

    /// Inverse setting to confirm with in batch mode.
    #[arg(long, requires = "batch")]
    inverse: Option<bool>,

    /// Convert non-grayscale sources to 8-bit grayscale instead of refusing them.
    #[arg(long)]
    convert: bool,

    /// Print diagnostics as JSON instead of the text report.
    #[arg(long)]
    json: bool,

    /// Log at debug level (overridden by `RUST_LOG`).
    #[arg(long, short)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let config = StagesConfig::load(&cli.stages)?;
    let mut stages = CommandStages::new(config).context("could not create scratch directory")?;
    process(cli, &mut stages).map(drop)
}

/// Run the pipeline on the source named by `cli` and write the result.
///
/// Returns the path written, or `None` if the dialog was cancelled.
fn process(cli: &Cli, stages: &mut CommandStages) -> anyhow::Result<Option<PathBuf>> {
    let prefs_path = match &cli.prefs {
        Some(path) => path.clone(),
        None => JsonFilePreferences::default_path()
            .context("no configuration directory on this platform; pass --prefs")?,
    };
    let prefs = JsonFilePreferences::open(prefs_path)?;
    tracing::debug!(prefs = %prefs.path().display(), "using preferences");

    let source_image = image_io::load_source(&cli.image_path, cli.convert)?;
    let (width, height) = source_image.dimensions();
    tracing::info!(path = %cli.image_path.display(), width, height, "source loaded");
    let mut registry = Registry::new();
    let source = registry.add_locked(image_io::source_title(&cli.image_path), source_image);

    let dialog = if cli.batch {
        CliDialog::Preset(PresetDialog::Accept {
            threshold: cli.threshold,
            inverse: cli.inverse,
        })
    } else {
        CliDialog::Terminal(TerminalDialog::stdio())
    };

    let mut controller =
        Controller::new(&mut registry, &mut *stages, prefs, dialog).with_status(TracingStatus);
    let (outcome, diagnostics) = controller.run_with_diagnostics(source, &StdClock)?;
    drop(controller);

    if cli.json {
        let json = serde_json::to_string_pretty(&diagnostics)
            .context("could not serialize diagnostics")?;
        println!("{json}");
    } else if !diagnostics.cancelled {
        println!("{}", diagnostics.report());
    }

    let completion = match outcome {
        RunOutcome::Cancelled => {
            tracing::debug!("cancelled at the parameter dialog");
            return Ok(None);
        }
        RunOutcome::Completed(completion) => completion,
    };

    let output = cli
        .output
        .clone()
        .unwrap_or_else(|| image_io::default_output_path(&cli.image_path, &completion.title));
    let result = registry.take(completion.result)?;
    image_io::save_result(&result, &output)
        .with_context(|| format!("could not write {}", output.display()))?;
    tracing::info!(output = %output.display(), title = %completion.title, "result written");
    Ok(Some(output))
}

/// [`Clock`] implementation backed by [`std::time::Instant`].
struct StdClock;

impl Clock for StdClock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn elapsed(&self, since: &Instant) -> Duration {
        since.elapsed()
    }
}
