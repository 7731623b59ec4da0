//! Stage backend that runs one external program per stage.
//!
//! Images cross the process boundary as TIFF files in a scratch
//! directory that lives as long as the backend. Stage programs may
//! answer with 32-bit float grayscale TIFF. The stage configuration
//! names a program and an argument template for each stage:
//!
//! ```json
//! {
//!   "distance_map": { "program": "edt", "args": ["{params}", "{input}", "{output}"] },
//!   "distance_ridge": { "program": "ridge", "args": ["{input}", "{output}"] },
//!   "local_thickness": { "program": "thickness", "args": ["{input}", "{output}"] },
//!   "clean_local_thickness": { "program": "cleanup", "args": ["{input}", "{output}"] }
//! }
//! ```
//!
//! `{input}` and `{output}` are replaced by file paths wherever they
//! appear. An argument that is exactly `{params}` expands to the stage's
//! parameter tokens (`threshold=128`, optionally followed by `inverse`)
//! and disappears for stages without parameters.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use locthk_pipeline::{DistanceMapParams, StageError, StageKind, ThicknessStages};
use serde::Deserialize;
use tempfile::TempDir;

use crate::raster::Raster;

const INPUT_PLACEHOLDER: &str = "{input}";
const OUTPUT_PLACEHOLDER: &str = "{output}";
const PARAMS_PLACEHOLDER: &str = "{params}";

/// How to invoke one stage.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageCommand {
    /// Executable, looked up on `PATH` if not a path.
    pub program: PathBuf,
    /// Argument template.
    #[serde(default)]
    pub args: Vec<String>,
}

/// Commands for all four stages.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StagesConfig {
    /// Geometry to distance map.
    pub distance_map: StageCommand,
    /// Distance map to distance ridge.
    pub distance_ridge: StageCommand,
    /// Distance ridge to local thickness.
    pub local_thickness: StageCommand,
    /// Local thickness to cleaned-up local thickness.
    pub clean_local_thickness: StageCommand,
}

/// Errors loading a [`StagesConfig`].
#[derive(Debug, thiserror::Error)]
pub enum StagesConfigError {
    /// The file could not be read.
    #[error("could not read stage configuration {path}: {source}")]
    Read {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not a valid stage configuration.
    #[error("invalid stage configuration {path}: {source}")]
    Parse {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
}

impl StagesConfig {
    /// Read a JSON stage configuration.
    ///
    /// # Errors
    ///
    /// Returns [`StagesConfigError`] if the file is unreadable or
    /// malformed.
    pub fn load(path: &Path) -> Result<Self, StagesConfigError> {
        let text = fs::read_to_string(path).map_err(|source| StagesConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| StagesConfigError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    /// Command configured for `kind`.
    #[must_use]
    pub const fn command(&self, kind: StageKind) -> &StageCommand {
        match kind {
            StageKind::DistanceMap => &self.distance_map,
            StageKind::DistanceRidge => &self.distance_ridge,
            StageKind::LocalThickness => &self.local_thickness,
            StageKind::CleanLocalThickness => &self.clean_local_thickness,
        }
    }
}

/// Runs each stage as a child process.
pub struct CommandStages {
    config: StagesConfig,
    scratch: TempDir,
    invocations: u32,
}

impl CommandStages {
    /// Backend with a fresh scratch directory.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the scratch directory cannot be created.
    pub fn new(config: StagesConfig) -> std::io::Result<Self> {
        let scratch = tempfile::Builder::new().prefix("locthk-").tempdir()?;
        tracing::debug!(scratch = %scratch.path().display(), "stage scratch directory");
        Ok(Self {
            config,
            scratch,
            invocations: 0,
        })
    }

    /// Directory stage files are exchanged through.
    #[cfg(test)]
    pub fn scratch_dir(&self) -> &Path {
        self.scratch.path()
    }

    fn invoke(
        &mut self,
        kind: StageKind,
        input: &Raster,
        params: Option<&DistanceMapParams>,
    ) -> Result<Raster, StageError> {
        self.invocations += 1;
        let n = self.invocations;
        let input_path = self.scratch.path().join(format!("{n:02}-{}-in.tif", kind.name()));
        let output_path = self.scratch.path().join(format!("{n:02}-{}-out.tif", kind.name()));

        input
            .write_tiff(&input_path)
            .map_err(|e| StageError::with_source("could not write stage input", e))?;

        let command = self.config.command(kind);
        let encoded = params.map(DistanceMapParams::encode).unwrap_or_default();
        let args = expand_args(&command.args, &input_path, &output_path, &encoded);
        tracing::debug!(program = %command.program.display(), ?args, "spawning stage");

        let result = Command::new(&command.program)
            .args(&args)
            .output()
            .map_err(|e| {
                StageError::with_source(
                    format!("could not start {}", command.program.display()),
                    e,
                )
            })
            .and_then(|out| {
                if out.status.success() {
                    Ok(())
                } else {
                    let stderr = String::from_utf8_lossy(&out.stderr);
                    Err(StageError::new(format!(
                        "{} exited with {}: {}",
                        command.program.display(),
                        out.status,
                        stderr.trim(),
                    )))
                }
            })
            .and_then(|()| {
                Raster::read_tiff(&output_path)
                    .map_err(|e| StageError::with_source("could not read stage output", e))
            });

        for path in [&input_path, &output_path] {
            if let Err(e) = fs::remove_file(path)
                && e.kind() != std::io::ErrorKind::NotFound
            {
                tracing::debug!(
                    path = %path.display(),
                    error = %e,
                    "could not remove scratch file",
                );
            }
        }
        result
    }
}

impl ThicknessStages<Raster> for CommandStages {
    fn distance_map(
        &mut self,
        source: &Raster,
        params: &DistanceMapParams,
    ) -> Result<Raster, StageError> {
        self.invoke(StageKind::DistanceMap, source, Some(params))
    }

    fn distance_ridge(&mut self, distance_map: &Raster) -> Result<Raster, StageError> {
        self.invoke(StageKind::DistanceRidge, distance_map, None)
    }

    fn local_thickness(&mut self, ridge: &Raster) -> Result<Raster, StageError> {
        self.invoke(StageKind::LocalThickness, ridge, None)
    }

    fn clean_local_thickness(&mut self, thickness: &Raster) -> Result<Raster, StageError> {
        self.invoke(StageKind::CleanLocalThickness, thickness, None)
    }
}

/// Substitute paths and parameters into an argument template.
fn expand_args(template: &[String], input: &Path, output: &Path, params: &str) -> Vec<OsString> {
    let input = input.to_string_lossy();
    let output = output.to_string_lossy();
    let mut args = Vec::with_capacity(template.len());
    for arg in template {
        if arg == PARAMS_PLACEHOLDER {
            args.extend(params.split_whitespace().map(OsString::from));
        } else {
            let expanded = arg
                .replace(INPUT_PLACEHOLDER, &input)
                .replace(OUTPUT_PLACEHOLDER, &output);
            args.push(OsString::from(expanded));
        }
    }
    args
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use image::{DynamicImage, GrayImage, Luma};

    use super::*;
    use crate::raster::GrayF32Image;

    fn gray8(width: u32, height: u32) -> Raster {
        Raster::Dynamic(DynamicImage::ImageLuma8(GrayImage::new(width, height)))
    }

    fn template(args: &[&str]) -> Vec<String> {
        args.iter().map(|&a| a.to_owned()).collect()
    }

    #[test]
    fn params_placeholder_expands_to_tokens() {
        let args = expand_args(
            &template(&["--run", "{params}", "{input}", "{output}"]),
            Path::new("/tmp/in.tif"),
            Path::new("/tmp/out.tif"),
            "threshold=200 inverse",
        );
        assert_eq!(
            args,
            ["--run", "threshold=200", "inverse", "/tmp/in.tif", "/tmp/out.tif"],
        );
    }

    #[test]
    fn params_placeholder_vanishes_without_params() {
        let args = expand_args(
            &template(&["{params}", "{input}"]),
            Path::new("in.tif"),
            Path::new("out.tif"),
            "",
        );
        assert_eq!(args, ["in.tif"]);
    }

    #[test]
    fn placeholders_expand_inside_arguments() {
        let args = expand_args(
            &template(&["--in={input}", "--out={output}"]),
            Path::new("a.tif"),
            Path::new("b.tif"),
            "",
        );
        assert_eq!(args, ["--in=a.tif", "--out=b.tif"]);
    }

    #[test]
    fn config_parses_all_stages() {
        let config: StagesConfig = serde_json::from_str(
            r#"{
                "distance_map": { "program": "edt", "args": ["{params}"] },
                "distance_ridge": { "program": "ridge" },
                "local_thickness": { "program": "lt" },
                "clean_local_thickness": { "program": "ltc" }
            }"#,
        )
        .unwrap();
        assert_eq!(
            config.command(StageKind::DistanceMap).args,
            ["{params}"],
        );
        assert!(config.command(StageKind::DistanceRidge).args.is_empty());
        assert_eq!(
            config.command(StageKind::CleanLocalThickness).program,
            Path::new("ltc"),
        );
    }

    #[test]
    fn config_missing_stage_is_rejected() {
        let result = serde_json::from_str::<StagesConfig>(
            r#"{ "distance_map": { "program": "edt" } }"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = StagesConfig::load(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, StagesConfigError::Read { .. }));
    }

    #[cfg(unix)]
    fn copy_everywhere() -> StagesConfig {
        let cp = StageCommand {
            program: PathBuf::from("cp"),
            args: template(&["{input}", "{output}"]),
        };
        StagesConfig {
            distance_map: cp.clone(),
            distance_ridge: cp.clone(),
            local_thickness: cp.clone(),
            clean_local_thickness: cp,
        }
    }

    #[cfg(unix)]
    #[test]
    fn copying_stage_round_trips_image() {
        let mut stages = CommandStages::new(copy_everywhere()).unwrap();
        let source = Raster::Dynamic(DynamicImage::ImageLuma8(GrayImage::from_fn(6, 4, |x, y| {
            Luma([u8::try_from(x * 10 + y).unwrap()])
        })));

        let params = DistanceMapParams {
            threshold: 128,
            inverse: false,
        };
        let output = stages.distance_map(&source, &params).unwrap();

        assert_eq!(output, source);
        let leftovers = fs::read_dir(stages.scratch_dir()).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[cfg(unix)]
    #[test]
    fn float_stage_output_is_read_back() {
        let mut stages = CommandStages::new(copy_everywhere()).unwrap();
        let thickness = Raster::GrayF32(GrayF32Image::from_fn(5, 2, |x, y| {
            Luma([f32::from(u8::try_from(x + y).unwrap()) * 1.5])
        }));

        let cleaned = stages.clean_local_thickness(&thickness).unwrap();

        assert_eq!(cleaned, thickness);
    }

    #[cfg(unix)]
    #[test]
    fn failing_program_reports_exit_status() {
        let mut config = copy_everywhere();
        config.distance_ridge = StageCommand {
            program: PathBuf::from("false"),
            args: Vec::new(),
        };
        let mut stages = CommandStages::new(config).unwrap();
        let source = gray8(2, 2);

        let err = stages.distance_ridge(&source).unwrap_err();
        assert!(err.message().starts_with("false exited with"), "{}", err.message());
    }

    #[test]
    fn missing_program_cannot_start() {
        let missing = StageCommand {
            program: PathBuf::from("locthk-no-such-program"),
            args: Vec::new(),
        };
        let config = StagesConfig {
            distance_map: missing.clone(),
            distance_ridge: missing.clone(),
            local_thickness: missing.clone(),
            clean_local_thickness: missing,
        };
        let mut stages = CommandStages::new(config).unwrap();
        let source = gray8(2, 2);

        let err = stages.local_thickness(&source).unwrap_err();
        assert_eq!(err.message(), "could not start locthk-no-such-program");
    }
}
