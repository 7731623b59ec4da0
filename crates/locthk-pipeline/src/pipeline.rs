//! Incremental controller: advance the run one state at a time.
//!
//! Each state is its own type and each transition consumes `self`, so
//! stages cannot be skipped, repeated or reordered:
//!
//! ```rust
//! # use locthk_pipeline::{ImageId, ImageRegistry, ThicknessStages, PipelineError};
//! # use locthk_pipeline::pipeline::{Acquired, Pipeline};
//! # use locthk_pipeline::prefs::MemoryPreferences;
//! # use locthk_pipeline::dialog::PresetDialog;
//! # fn run<R: ImageRegistry, S: ThicknessStages<R::Image>>(
//! #     registry: &mut R, stages: &mut S, source: ImageId,
//! # ) -> Result<(), PipelineError> {
//! let mut prefs = MemoryPreferences::new();
//! let acquired = Pipeline::new(source)
//!     .prepare(registry)?
//!     .acquire(&mut prefs, &mut PresetDialog::accept_defaults())?;
//! if let Acquired::Configured(configured) = acquired {
//!     let _completion = configured
//!         .distance_map(registry, stages)?
//!         .distance_ridge(registry, stages)?
//!         .local_thickness(registry, stages)?
//!         .clean(registry, stages)?
//!         .finish(registry)?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Image lifetime
//!
//! A running state holds exactly one stage output. Every transition
//! registers the new output first and only then releases the one it
//! consumed, so at most two outputs are live at any instant. When a
//! stage fails, the transition releases the output it was holding
//! before returning the error. The source image is never released.

use crate::dialog::{Acquisition, ParameterDialog, acquire_settings};
use crate::prefs::PreferenceStore;
use crate::registry::{ImageId, ImageRegistry, RegistryError};
use crate::stages::{DistanceMapParams, StageError, StageKind, ThicknessStages};
use crate::title::{result_title, strip_extension};
use crate::types::{Completion, PipelineError, Settings};

/// Common surface of every controller state.
pub trait PipelineState: Sized {
    /// Human-readable state name.
    const NAME: &'static str;

    /// The stage output this state owns, if any.
    fn held(&self) -> Option<ImageId>;

    /// Abandon the run, releasing the owned stage output.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] if the owned image is no longer live.
    fn abort<R: ImageRegistry + ?Sized>(self, registry: &mut R) -> Result<(), RegistryError> {
        match self.held() {
            Some(id) => registry.release(id),
            None => Ok(()),
        }
    }
}

// ───────────────────────── Idle ──────────────────────────────────────

/// Entry point of the controller.
pub struct Pipeline;

impl Pipeline {
    /// Start a run on `source`. Nothing is touched yet.
    #[allow(clippy::new_ret_no_self)]
    pub const fn new(source: ImageId) -> Idle {
        Idle { source }
    }
}

/// A run that has not looked at its source yet.
#[must_use = "controller states are consumed by advancing; call .prepare() to continue"]
#[derive(Debug)]
pub struct Idle {
    source: ImageId,
}

impl Idle {
    /// The source image.
    #[must_use]
    pub const fn source(&self) -> ImageId {
        self.source
    }

    /// Unlock the source and derive the output stem from its title.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Registry`] if the source is not live.
    pub fn prepare<R: ImageRegistry + ?Sized>(
        self,
        registry: &mut R,
    ) -> Result<AwaitingParams, PipelineError> {
        registry.unlock(self.source)?;
        let title = registry.title(self.source)?;
        let stem = strip_extension(Some(title)).unwrap_or_default().to_owned();
        tracing::debug!(source = %self.source, %stem, "source prepared");
        Ok(AwaitingParams {
            source: self.source,
            stem,
        })
    }
}

impl PipelineState for Idle {
    const NAME: &'static str = "idle";

    fn held(&self) -> Option<ImageId> {
        None
    }
}

// ───────────────────────── AwaitingParams ────────────────────────────

/// A run waiting for the user to confirm its parameters.
#[must_use = "controller states are consumed by advancing; call .acquire() to continue"]
#[derive(Debug)]
pub struct AwaitingParams {
    source: ImageId,
    stem: String,
}

/// Result of [`AwaitingParams::acquire`].
#[derive(Debug)]
pub enum Acquired {
    /// Parameters confirmed and saved.
    Configured(Configured),
    /// The user cancelled. The run is over and nothing was allocated.
    Cancelled,
}

impl AwaitingParams {
    /// Source title with its extension stripped.
    #[must_use]
    pub fn stem(&self) -> &str {
        &self.stem
    }

    /// Show the parameter dialog pre-filled from `store`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Preferences`] if the confirmed settings
    /// cannot be saved.
    pub fn acquire<P, D>(self, store: &mut P, dialog: &mut D) -> Result<Acquired, PipelineError>
    where
        P: PreferenceStore + ?Sized,
        D: ParameterDialog + ?Sized,
    {
        Ok(match acquire_settings(store, dialog)? {
            Acquisition::Cancelled => Acquired::Cancelled,
            Acquisition::Confirmed(settings) => Acquired::Configured(Configured {
                source: self.source,
                stem: self.stem,
                settings,
            }),
        })
    }
}

impl PipelineState for AwaitingParams {
    const NAME: &'static str = "awaiting_params";

    fn held(&self) -> Option<ImageId> {
        None
    }
}

// ───────────────────────── Running(1): Configured ────────────────────

/// Parameters confirmed; the distance map stage is next.
#[must_use = "controller states are consumed by advancing; call .distance_map() to continue"]
#[derive(Debug)]
pub struct Configured {
    source: ImageId,
    stem: String,
    settings: Settings,
}

impl Configured {
    /// The confirmed settings.
    #[must_use]
    pub const fn settings(&self) -> Settings {
        self.settings
    }

    /// Parameters the distance map stage will receive.
    #[must_use]
    pub const fn params(&self) -> DistanceMapParams {
        DistanceMapParams {
            threshold: self.settings.threshold,
            inverse: self.settings.inverse,
        }
    }

    /// Compute the distance map of the source.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Stage`] if the backend fails and
    /// [`PipelineError::Registry`] if the source is gone.
    pub fn distance_map<R, S>(
        self,
        registry: &mut R,
        stages: &mut S,
    ) -> Result<DistanceMapped, PipelineError>
    where
        R: ImageRegistry + ?Sized,
        S: ThicknessStages<R::Image> + ?Sized,
    {
        let params = self.params();
        tracing::debug!(params = %params.encode(), "distance map parameters");
        let output = run_stage(
            registry,
            StageKind::DistanceMap,
            &self.stem,
            Input::Source(self.source),
            |image| stages.distance_map(image, &params),
        )?;
        Ok(DistanceMapped {
            run: Held {
                stem: self.stem,
                settings: self.settings,
                current: output,
                released: Vec::new(),
            },
        })
    }
}

impl PipelineState for Configured {
    const NAME: &'static str = "configured";

    fn held(&self) -> Option<ImageId> {
        None
    }
}

/// State shared by every running step once a stage output exists.
#[derive(Debug)]
struct Held {
    stem: String,
    settings: Settings,
    current: ImageId,
    released: Vec<ImageId>,
}

impl Held {
    fn advance<R, F>(
        mut self,
        registry: &mut R,
        kind: StageKind,
        stage: F,
    ) -> Result<Self, PipelineError>
    where
        R: ImageRegistry + ?Sized,
        F: FnOnce(&R::Image) -> Result<R::Image, StageError>,
    {
        let output = run_stage(
            registry,
            kind,
            &self.stem,
            Input::Intermediate(self.current),
            stage,
        )?;
        self.released.push(self.current);
        self.current = output;
        Ok(self)
    }
}

// ───────────────────────── Running(2): DistanceMapped ────────────────

/// The distance map exists; the distance ridge stage is next.
#[must_use = "controller states are consumed by advancing; call .distance_ridge() to continue"]
#[derive(Debug)]
pub struct DistanceMapped {
    run: Held,
}

impl DistanceMapped {
    /// Handle of the distance map.
    #[must_use]
    pub const fn distance_map(&self) -> ImageId {
        self.run.current
    }

    /// Extract the distance ridge and release the distance map.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Stage`] if the backend fails, after
    /// releasing the distance map.
    pub fn distance_ridge<R, S>(
        self,
        registry: &mut R,
        stages: &mut S,
    ) -> Result<RidgeExtracted, PipelineError>
    where
        R: ImageRegistry + ?Sized,
        S: ThicknessStages<R::Image> + ?Sized,
    {
        let run = self
            .run
            .advance(registry, StageKind::DistanceRidge, |image| {
                stages.distance_ridge(image)
            })?;
        Ok(RidgeExtracted { run })
    }
}

impl PipelineState for DistanceMapped {
    const NAME: &'static str = "distance_mapped";

    fn held(&self) -> Option<ImageId> {
        Some(self.run.current)
    }
}

// ───────────────────────── Running(3): RidgeExtracted ────────────────

/// The distance ridge exists; the local thickness stage is next.
#[must_use = "controller states are consumed by advancing; call .local_thickness() to continue"]
#[derive(Debug)]
pub struct RidgeExtracted {
    run: Held,
}

impl RidgeExtracted {
    /// Handle of the distance ridge.
    #[must_use]
    pub const fn ridge(&self) -> ImageId {
        self.run.current
    }

    /// Compute local thickness and release the ridge.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Stage`] if the backend fails, after
    /// releasing the ridge.
    pub fn local_thickness<R, S>(
        self,
        registry: &mut R,
        stages: &mut S,
    ) -> Result<ThicknessComputed, PipelineError>
    where
        R: ImageRegistry + ?Sized,
        S: ThicknessStages<R::Image> + ?Sized,
    {
        let run = self
            .run
            .advance(registry, StageKind::LocalThickness, |image| {
                stages.local_thickness(image)
            })?;
        Ok(ThicknessComputed { run })
    }
}

impl PipelineState for RidgeExtracted {
    const NAME: &'static str = "ridge_extracted";

    fn held(&self) -> Option<ImageId> {
        Some(self.run.current)
    }
}

// ───────────────────────── Running(4): ThicknessComputed ─────────────

/// The local thickness map exists; clean-up is next.
#[must_use = "controller states are consumed by advancing; call .clean() to continue"]
#[derive(Debug)]
pub struct ThicknessComputed {
    run: Held,
}

impl ThicknessComputed {
    /// Handle of the local thickness map.
    #[must_use]
    pub const fn thickness(&self) -> ImageId {
        self.run.current
    }

    /// Clean up the thickness map and release the raw one.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Stage`] if the backend fails, after
    /// releasing the raw thickness map.
    pub fn clean<R, S>(self, registry: &mut R, stages: &mut S) -> Result<Cleaned, PipelineError>
    where
        R: ImageRegistry + ?Sized,
        S: ThicknessStages<R::Image> + ?Sized,
    {
        let run = self
            .run
            .advance(registry, StageKind::CleanLocalThickness, |image| {
                stages.clean_local_thickness(image)
            })?;
        Ok(Cleaned { run })
    }
}

impl PipelineState for ThicknessComputed {
    const NAME: &'static str = "thickness_computed";

    fn held(&self) -> Option<ImageId> {
        Some(self.run.current)
    }
}

// ───────────────────────── Done ──────────────────────────────────────

/// All stages ran; the cleaned-up map is waiting to be handed over.
#[must_use = "controller states are consumed by advancing; call .finish() to continue"]
#[derive(Debug)]
pub struct Cleaned {
    run: Held,
}

impl Cleaned {
    /// Handle of the cleaned-up local thickness map.
    #[must_use]
    pub const fn cleaned(&self) -> ImageId {
        self.run.current
    }

    /// Rename the result to `<stem>_LocThk`, make it the active image
    /// and hand it over to the registry.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Registry`] if the result is not live.
    pub fn finish<R: ImageRegistry + ?Sized>(
        self,
        registry: &mut R,
    ) -> Result<Completion, PipelineError> {
        let Held {
            stem,
            settings,
            current,
            released,
        } = self.run;
        let title = result_title(&stem);
        registry.rename(current, title.clone())?;
        registry.set_active(current)?;
        tracing::info!(result = %current, %title, "local thickness ready");
        Ok(Completion {
            result: current,
            title,
            settings,
            released,
        })
    }
}

impl PipelineState for Cleaned {
    const NAME: &'static str = "cleaned";

    fn held(&self) -> Option<ImageId> {
        Some(self.run.current)
    }
}

// ───────────────────────── Stage step ────────────────────────────────

/// Input of a stage step and whether the step owns it.
#[derive(Debug, Clone, Copy)]
enum Input {
    /// The caller's image. Never released.
    Source(ImageId),
    /// A previous stage's output. Released once the new output exists,
    /// or on failure.
    Intermediate(ImageId),
}

impl Input {
    const fn id(self) -> ImageId {
        match self {
            Self::Source(id) | Self::Intermediate(id) => id,
        }
    }
}

/// Run one stage on `input`, register its output, then release `input`
/// if it is an intermediate.
fn run_stage<R, F>(
    registry: &mut R,
    kind: StageKind,
    stem: &str,
    input: Input,
    stage: F,
) -> Result<ImageId, PipelineError>
where
    R: ImageRegistry + ?Sized,
    F: FnOnce(&R::Image) -> Result<R::Image, StageError>,
{
    tracing::info!(stage = kind.name(), input = %input.id(), "{}", kind.command());

    let produced = match registry.image(input.id()) {
        Ok(image) => stage(image).map_err(|source| PipelineError::Stage { stage: kind, source }),
        Err(e) => Err(e.into()),
    };
    let output = match produced {
        Ok(image) => registry.add(format!("{stem}{}", kind.title_suffix()), image),
        Err(e) => {
            if let Input::Intermediate(id) = input {
                discard(registry, id);
            }
            return Err(e);
        }
    };

    tracing::info!(stage = kind.name(), output = %output, "stage finished");

    if let Input::Intermediate(id) = input {
        if let Err(e) = registry.release(id) {
            discard(registry, output);
            return Err(e.into());
        }
        tracing::debug!(released = %id, "intermediate released");
    }
    Ok(output)
}

/// Release an intermediate on an error path. A second failure here is
/// logged and swallowed so the original error reaches the caller.
fn discard<R: ImageRegistry + ?Sized>(registry: &mut R, id: ImageId) {
    match registry.release(id) {
        Ok(()) => tracing::warn!(image = %id, "released intermediate after failure"),
        Err(e) => tracing::warn!(image = %id, error = %e, "could not release intermediate"),
    }
}
