//! One-call driver over the incremental [`pipeline`](crate::pipeline)
//! states.
//!
//! [`Controller`] bundles the host collaborators (registry, stage
//! backend, preference store, dialog, status sink) and runs a source
//! image through every state in order, reporting progress between
//! stages.

use crate::diagnostics::{Clock, FrozenClock, RunDiagnostics, StageDiagnostics};
use crate::dialog::ParameterDialog;
use crate::pipeline::{Acquired, Pipeline};
use crate::prefs::PreferenceStore;
use crate::registry::{ImageId, ImageRegistry};
use crate::stages::{StageKind, ThicknessStages};
use crate::status::{Silent, StatusSink};
use crate::types::{PipelineError, RunOutcome};

/// Status message reported when a run completes.
pub const DONE_STATUS: &str = "Done";

/// Host collaborators for a run.
///
/// Every field accepts either an owned value or a `&mut` borrow, since
/// each collaborator trait is implemented for `&mut T`.
pub struct Controller<R, S, P, D, T = Silent> {
    registry: R,
    stages: S,
    prefs: P,
    dialog: D,
    status: T,
}

impl<R, S, P, D> Controller<R, S, P, D, Silent> {
    /// Controller that reports no progress.
    pub const fn new(registry: R, stages: S, prefs: P, dialog: D) -> Self {
        Self {
            registry,
            stages,
            prefs,
            dialog,
            status: Silent,
        }
    }
}

impl<R, S, P, D, T> Controller<R, S, P, D, T> {
    /// Replace the status sink.
    pub fn with_status<U>(self, status: U) -> Controller<R, S, P, D, U> {
        Controller {
            registry: self.registry,
            stages: self.stages,
            prefs: self.prefs,
            dialog: self.dialog,
            status,
        }
    }

    /// The image registry.
    pub const fn registry(&self) -> &R {
        &self.registry
    }

    /// Mutable access to the image registry, e.g. to load a source.
    pub const fn registry_mut(&mut self) -> &mut R {
        &mut self.registry
    }

    /// The preference store.
    pub const fn prefs(&self) -> &P {
        &self.prefs
    }

    /// The stage backend.
    pub const fn stages(&self) -> &S {
        &self.stages
    }

    /// Give back the registry, dropping the other collaborators.
    pub fn into_registry(self) -> R {
        self.registry
    }
}

impl<R, S, P, D, T> Controller<R, S, P, D, T>
where
    R: ImageRegistry,
    S: ThicknessStages<R::Image>,
    P: PreferenceStore,
    D: ParameterDialog,
    T: StatusSink,
{
    /// Run every stage on `source`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if the source is not live, the settings
    /// cannot be saved, or a stage fails. Intermediates produced before
    /// the failure have been released when the error is returned.
    pub fn run(&mut self, source: ImageId) -> Result<RunOutcome, PipelineError> {
        self.run_with_diagnostics(source, &FrozenClock)
            .map(|(outcome, _)| outcome)
    }

    /// Run every stage on `source`, timing each one with `clock`.
    ///
    /// # Errors
    ///
    /// Same as [`run`](Self::run).
    pub fn run_with_diagnostics<C: Clock>(
        &mut self,
        source: ImageId,
        clock: &C,
    ) -> Result<(RunOutcome, RunDiagnostics), PipelineError> {
        let run_start = clock.now();
        let mut diagnostics = RunDiagnostics::default();

        let awaiting = Pipeline::new(source).prepare(&mut self.registry)?;
        let dialog_start = clock.now();
        let acquired = awaiting.acquire(&mut self.prefs, &mut self.dialog)?;
        diagnostics.dialog_duration = clock.elapsed(&dialog_start);

        let configured = match acquired {
            Acquired::Cancelled => {
                diagnostics.cancelled = true;
                diagnostics.total_duration = clock.elapsed(&run_start);
                return Ok((RunOutcome::Cancelled, diagnostics));
            }
            Acquired::Configured(configured) => configured,
        };
        tracing::info!(
            source = %source,
            threshold = configured.settings().threshold,
            inverse = configured.settings().inverse,
            "starting local thickness",
        );

        let registry = &mut self.registry;
        let stages = &mut self.stages;
        let status = &mut self.status;
        let mut timed = |kind: StageKind, start: C::Instant, output: ImageId| {
            diagnostics.stages.push(StageDiagnostics {
                stage: kind,
                output,
                duration: clock.elapsed(&start),
            });
            status.progress(stage_progress(kind));
        };

        let start = clock.now();
        let mapped = configured.distance_map(registry, stages)?;
        timed(StageKind::DistanceMap, start, mapped.distance_map());

        let start = clock.now();
        let ridge = mapped.distance_ridge(registry, stages)?;
        timed(StageKind::DistanceRidge, start, ridge.ridge());

        let start = clock.now();
        let thickness = ridge.local_thickness(registry, stages)?;
        timed(StageKind::LocalThickness, start, thickness.thickness());

        let start = clock.now();
        let cleaned = thickness.clean(registry, stages)?;
        timed(StageKind::CleanLocalThickness, start, cleaned.cleaned());

        let completion = cleaned.finish(registry)?;
        self.status.status(DONE_STATUS);

        diagnostics.result_title = Some(completion.title.clone());
        diagnostics.released.clone_from(&completion.released);
        diagnostics.total_duration = clock.elapsed(&run_start);
        Ok((RunOutcome::Completed(completion), diagnostics))
    }
}

/// Progress reported once `kind` has produced its output.
#[allow(clippy::cast_precision_loss)]
fn stage_progress(kind: StageKind) -> f64 {
    (kind.index() + 1) as f64 / StageKind::ALL.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_reaches_one_at_last_stage() {
        assert!((stage_progress(StageKind::DistanceMap) - 0.25).abs() < f64::EPSILON);
        assert!((stage_progress(StageKind::CleanLocalThickness) - 1.0).abs() < f64::EPSILON);
    }
}
