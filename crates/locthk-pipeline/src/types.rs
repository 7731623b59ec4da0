//! Shared types for the local thickness pipeline.

use serde::{Deserialize, Serialize};

use crate::prefs::PrefsError;
use crate::registry::{ImageId, RegistryError};
use crate::stages::{StageError, StageKind};

/// Suffix appended to the derived title of the final image.
pub const RESULT_SUFFIX: &str = "_LocThk";

/// The two user-facing parameters of a run.
///
/// `threshold` follows the 8-bit convention: pixels with a value below
/// the threshold are background. When `inverse` is set the polarity
/// flips and pixels at or above the threshold are background.
///
/// The threshold is deliberately not range-checked. Whatever the user
/// enters is handed to the distance map stage, which owns its own
/// validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Settings {
    /// Binarization threshold, nominally 1 to 255.
    pub threshold: i32,
    /// Treat values at or above the threshold as background.
    pub inverse: bool,
}

impl Settings {
    /// Threshold used when the preference store has no value.
    pub const DEFAULT_THRESHOLD: i32 = 128;
    /// Polarity used when the preference store has no value.
    pub const DEFAULT_INVERSE: bool = false;
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            threshold: Self::DEFAULT_THRESHOLD,
            inverse: Self::DEFAULT_INVERSE,
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The user dismissed the parameter dialog. Nothing was processed
    /// and the preference store was not touched.
    Cancelled,
    /// All four stages ran and the result is live in the registry.
    Completed(Completion),
}

impl RunOutcome {
    /// The completion record, if the run was not cancelled.
    #[must_use]
    pub const fn completion(&self) -> Option<&Completion> {
        match self {
            Self::Cancelled => None,
            Self::Completed(c) => Some(c),
        }
    }
}

/// Summary of a completed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    /// Handle of the cleaned-up local thickness image.
    pub result: ImageId,
    /// Title the result was renamed to (`<stem>_LocThk`).
    pub title: String,
    /// Settings the run was performed with.
    pub settings: Settings,
    /// Intermediate handles released during the run, in release order.
    pub released: Vec<ImageId>,
}

/// Errors that can abort a run once the parameters are confirmed.
///
/// Cancelling the dialog is not an error; see [`RunOutcome::Cancelled`].
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A stage backend failed to produce its output.
    #[error("{} failed: {source}", stage.command())]
    Stage {
        /// Which stage failed.
        stage: StageKind,
        /// The backend's error.
        #[source]
        source: StageError,
    },

    /// The registry rejected a handle (unknown or already freed).
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The confirmed settings could not be written back.
    #[error(transparent)]
    Preferences(#[from] PrefsError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_match_documented_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.threshold, 128);
        assert!(!settings.inverse);
    }

    #[test]
    fn cancelled_outcome_has_no_completion() {
        assert!(RunOutcome::Cancelled.completion().is_none());
    }

    #[test]
    fn stage_error_names_the_failing_command() {
        let err = PipelineError::Stage {
            stage: StageKind::LocalThickness,
            source: StageError::new("out of memory"),
        };
        assert_eq!(
            err.to_string(),
            "Distance Ridge to Local Thickness failed: out of memory",
        );
    }

    #[test]
    fn registry_error_is_transparent() {
        let err = PipelineError::from(RegistryError::UnknownImage(ImageId::new(7)));
        assert_eq!(err.to_string(), "no image with id 7 in the registry");
    }
}
