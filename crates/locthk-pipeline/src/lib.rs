//! locthk-pipeline: local thickness controller (sans-IO).
//!
//! Runs a grayscale image through four externally implemented stages:
//! distance map -> distance ridge -> local thickness -> cleaned-up local
//! thickness. Each intermediate is released as soon as the next stage
//! has produced its output; the final image is renamed
//! `<source stem>_LocThk` and left in the registry.
//!
//! This crate has **no I/O dependencies**. The registry, stage backend,
//! preference store, dialog and status sink are all traits supplied by
//! the host. `locthk-cli` provides file-backed implementations.

pub mod controller;
pub mod diagnostics;
pub mod dialog;
pub mod pipeline;
pub mod prefs;
pub mod registry;
pub mod stages;
pub mod status;
pub mod title;
pub mod types;

pub use controller::Controller;
pub use dialog::{Acquisition, DialogResponse, ParameterDialog, ParameterForm, PresetDialog};
pub use prefs::{MemoryPreferences, PrefValue, PreferenceStore, PrefsError};
pub use registry::{ImageId, ImageRegistry, Registry, RegistryError};
pub use stages::{DistanceMapParams, StageError, StageKind, ThicknessStages};
pub use status::StatusSink;
pub use title::strip_extension;
pub use types::{Completion, PipelineError, RunOutcome, Settings};
