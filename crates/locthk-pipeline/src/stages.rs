//! The four processing stages as a typed backend interface.
//!
//! The controller does not know how a distance map or a ridge is
//! computed. It hands each stage an explicit input image and receives a
//! new one back; whatever implements [`ThicknessStages`] does the work.

use std::error::Error;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies one of the four stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Geometry to distance map.
    DistanceMap,
    /// Distance map to distance ridge.
    DistanceRidge,
    /// Distance ridge to local thickness.
    LocalThickness,
    /// Local thickness to cleaned-up local thickness.
    CleanLocalThickness,
}

impl StageKind {
    /// All stages in execution order.
    pub const ALL: [Self; 4] = [
        Self::DistanceMap,
        Self::DistanceRidge,
        Self::LocalThickness,
        Self::CleanLocalThickness,
    ];

    /// Zero-based position in the pipeline.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::DistanceMap => 0,
            Self::DistanceRidge => 1,
            Self::LocalThickness => 2,
            Self::CleanLocalThickness => 3,
        }
    }

    /// Short machine name, also used as the key in stage configuration.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::DistanceMap => "distance_map",
            Self::DistanceRidge => "distance_ridge",
            Self::LocalThickness => "local_thickness",
            Self::CleanLocalThickness => "clean_local_thickness",
        }
    }

    /// Command name under which hosts register the stage.
    #[must_use]
    pub const fn command(self) -> &'static str {
        match self {
            Self::DistanceMap => "Geometry to Distance Map",
            Self::DistanceRidge => "Distance Map to Distance Ridge",
            Self::LocalThickness => "Distance Ridge to Local Thickness",
            Self::CleanLocalThickness => "Local Thickness to Cleaned-Up Local Thickness",
        }
    }

    /// Suffix appended to the source stem to title this stage's output.
    #[must_use]
    pub const fn title_suffix(self) -> &'static str {
        match self {
            Self::DistanceMap => "_DM",
            Self::DistanceRidge => "_DR",
            Self::LocalThickness => "_LT",
            Self::CleanLocalThickness => "_LTC",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.command())
    }
}

/// Parameters of the distance map stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistanceMapParams {
    /// Binarization threshold.
    pub threshold: i32,
    /// Background is at or above the threshold.
    pub inverse: bool,
}

impl DistanceMapParams {
    /// Flag token present in the encoding only when `inverse` is set.
    pub const INVERSE_TOKEN: &'static str = "inverse";

    /// Host option-string encoding: `threshold=<n>` followed by the
    /// inverse token when set.
    #[must_use]
    pub fn encode(&self) -> String {
        if self.inverse {
            format!("threshold={} {}", self.threshold, Self::INVERSE_TOKEN)
        } else {
            format!("threshold={}", self.threshold)
        }
    }
}

/// A stage backend failed.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct StageError {
    message: String,
    #[source]
    source: Option<Box<dyn Error + Send + Sync>>,
}

impl StageError {
    /// Error with a message and no underlying cause.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Error wrapping an underlying cause.
    pub fn with_source(
        message: impl Into<String>,
        source: impl Into<Box<dyn Error + Send + Sync>>,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// The error message, without the source chain.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Processing backend: one method per stage, each taking its input
/// explicitly and returning a freshly allocated output.
///
/// Implementations must not retain or mutate the input. The controller
/// registers the output and releases the input afterwards.
pub trait ThicknessStages<I> {
    /// Binarize `source` at the threshold and compute its distance map.
    ///
    /// # Errors
    ///
    /// Returns [`StageError`] if the backend cannot produce the output.
    fn distance_map(&mut self, source: &I, params: &DistanceMapParams) -> Result<I, StageError>;

    /// Extract the distance ridge from a distance map.
    ///
    /// # Errors
    ///
    /// Returns [`StageError`] if the backend cannot produce the output.
    fn distance_ridge(&mut self, distance_map: &I) -> Result<I, StageError>;

    /// Compute local thickness from a distance ridge.
    ///
    /// # Errors
    ///
    /// Returns [`StageError`] if the backend cannot produce the output.
    fn local_thickness(&mut self, ridge: &I) -> Result<I, StageError>;

    /// Clean up the edges of a local thickness map.
    ///
    /// # Errors
    ///
    /// Returns [`StageError`] if the backend cannot produce the output.
    fn clean_local_thickness(&mut self, thickness: &I) -> Result<I, StageError>;
}

impl<I, T: ThicknessStages<I> + ?Sized> ThicknessStages<I> for &mut T {
    fn distance_map(&mut self, source: &I, params: &DistanceMapParams) -> Result<I, StageError> {
        (**self).distance_map(source, params)
    }

    fn distance_ridge(&mut self, distance_map: &I) -> Result<I, StageError> {
        (**self).distance_ridge(distance_map)
    }

    fn local_thickness(&mut self, ridge: &I) -> Result<I, StageError> {
        (**self).local_thickness(ridge)
    }

    fn clean_local_thickness(&mut self, thickness: &I) -> Result<I, StageError> {
        (**self).clean_local_thickness(thickness)
    }
}
