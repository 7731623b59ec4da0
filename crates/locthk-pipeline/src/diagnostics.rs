//! Run diagnostics: per-stage timing and the images each stage produced.
//!
//! Timestamps come from an injected [`Clock`] so the library stays free
//! of platform time sources. The CLI supplies one backed by
//! [`std::time::Instant`].
//!
//! Durations are serialized as fractional seconds (`f64`) for JSON
//! compatibility, since `std::time::Duration` does not implement serde
//! traits.

use std::fmt::Write as _;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::registry::ImageId;
use crate::stages::StageKind;

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Source of timestamps.
pub trait Clock {
    /// Opaque point in time.
    type Instant;

    /// The current instant.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

/// Clock that never advances. Every measured duration is zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrozenClock;

impl Clock for FrozenClock {
    type Instant = ();

    fn now(&self) {}

    fn elapsed(&self, _since: &()) -> Duration {
        Duration::ZERO
    }
}

/// Diagnostics for one stage invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Which stage ran.
    pub stage: StageKind,
    /// Handle of the image it produced.
    pub output: ImageId,
    /// Wall-clock duration of the stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
}

/// Diagnostics collected from a single run.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunDiagnostics {
    /// Stages in execution order. Empty when the run was cancelled.
    pub stages: Vec<StageDiagnostics>,
    /// Time spent waiting on the parameter dialog (seconds).
    #[serde(with = "duration_serde")]
    pub dialog_duration: Duration,
    /// Total wall-clock duration of the run (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Whether the user cancelled the dialog.
    pub cancelled: bool,
    /// Title of the final image, when the run completed.
    pub result_title: Option<String>,
    /// Intermediates released during the run.
    pub released: Vec<ImageId>,
}

impl RunDiagnostics {
    /// Time spent inside stage backends.
    #[must_use]
    pub fn stage_time(&self) -> Duration {
        self.stages.iter().map(|s| s.duration).sum()
    }

    /// Human-readable multi-line report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut out = String::new();
        if self.cancelled {
            let _ = writeln!(out, "Run cancelled at the parameter dialog");
            return out;
        }

        let _ = writeln!(out, "{:<48} {:>8} {:>12}", "Stage", "Output", "Time (ms)");
        let _ = writeln!(out, "{}", "-".repeat(70));
        for stage in &self.stages {
            let _ = writeln!(
                out,
                "{:<48} {:>8} {:>12.3}",
                stage.stage.command(),
                stage.output,
                stage.duration.as_secs_f64() * 1000.0,
            );
        }
        let _ = writeln!(out, "{}", "-".repeat(70));
        let _ = writeln!(
            out,
            "{:<57} {:>12.3}",
            "Stages total",
            self.stage_time().as_secs_f64() * 1000.0,
        );
        let _ = writeln!(
            out,
            "{:<57} {:>12.3}",
            "Run total",
            self.total_duration.as_secs_f64() * 1000.0,
        );
        if let Some(title) = &self.result_title {
            let _ = writeln!(out, "Result: {title}");
        }
        let _ = writeln!(out, "Released intermediates: {}", self.released.len());
        out
    }
}
