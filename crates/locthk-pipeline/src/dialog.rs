//! Parameter dialog and settings acquisition.

use crate::prefs::{PreferenceStore, PrefsError};
use crate::types::Settings;

/// Title of the parameter dialog.
pub const DIALOG_TITLE: &str = "EDT...";

/// Label of the threshold field.
pub const THRESHOLD_LABEL: &str = "Threshold (1 to 255; value < thresh is background)";

/// Label of the inverse checkbox.
pub const INVERSE_LABEL: &str = "Inverse case (background when value >= thresh)";

/// Contents of the modal form shown before a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterForm {
    /// Window title.
    pub title: &'static str,
    /// Label of the numeric field.
    pub threshold_label: &'static str,
    /// Pre-filled threshold.
    pub threshold: i32,
    /// Label of the checkbox.
    pub inverse_label: &'static str,
    /// Pre-filled checkbox state.
    pub inverse: bool,
}

impl ParameterForm {
    /// Form pre-filled with `settings`.
    #[must_use]
    pub const fn new(settings: Settings) -> Self {
        Self {
            title: DIALOG_TITLE,
            threshold_label: THRESHOLD_LABEL,
            threshold: settings.threshold,
            inverse_label: INVERSE_LABEL,
            inverse: settings.inverse,
        }
    }
}

/// What the user did with the form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogResponse {
    /// OK was pressed. The numeric field is returned as typed.
    Confirmed {
        /// Raw contents of the threshold field.
        threshold: String,
        /// Final checkbox state.
        inverse: bool,
    },
    /// Cancel was pressed or the dialog was closed.
    Cancelled,
}

/// A blocking, modal parameter prompt.
pub trait ParameterDialog {
    /// Show `form` and wait for the user.
    fn show(&mut self, form: &ParameterForm) -> DialogResponse;
}

impl<T: ParameterDialog + ?Sized> ParameterDialog for &mut T {
    fn show(&mut self, form: &ParameterForm) -> DialogResponse {
        (**self).show(form)
    }
}

/// Non-interactive dialog that answers from preset values.
///
/// Used for batch runs: fields left as `None` keep their pre-filled
/// value, mirroring a macro that only names some options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresetDialog {
    /// Confirm, overriding the named fields.
    Accept {
        /// Replacement for the threshold field.
        threshold: Option<i32>,
        /// Replacement for the checkbox.
        inverse: Option<bool>,
    },
    /// Cancel.
    Cancel,
}

impl PresetDialog {
    /// Confirm the pre-filled form unchanged.
    #[must_use]
    pub const fn accept_defaults() -> Self {
        Self::Accept {
            threshold: None,
            inverse: None,
        }
    }
}

impl ParameterDialog for PresetDialog {
    fn show(&mut self, form: &ParameterForm) -> DialogResponse {
        match *self {
            Self::Accept { threshold, inverse } => DialogResponse::Confirmed {
                threshold: threshold.unwrap_or(form.threshold).to_string(),
                inverse: inverse.unwrap_or(form.inverse),
            },
            Self::Cancel => DialogResponse::Cancelled,
        }
    }
}

/// Result of [`acquire_settings`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquisition {
    /// The user confirmed these settings; they have been saved.
    Confirmed(Settings),
    /// The user cancelled; nothing was saved.
    Cancelled,
}

/// Read a numeric field the way a host numeric field does.
///
/// The text is parsed as a real number and truncated toward zero,
/// saturating at the `i32` bounds. Text that is not a number reads as 0.
/// No range check is applied.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn threshold_from_field(text: &str) -> i32 {
    text.trim().parse::<f64>().map_or(0, |v| v as i32)
}

/// Load the saved settings, show them in `dialog`, and save whatever the
/// user confirms.
///
/// Both keys are written on confirmation even if nothing changed.
/// Cancelling leaves `store` untouched.
///
/// # Errors
///
/// Returns [`PrefsError`] if the confirmed settings cannot be written.
pub fn acquire_settings<S, D>(store: &mut S, dialog: &mut D) -> Result<Acquisition, PrefsError>
where
    S: PreferenceStore + ?Sized,
    D: ParameterDialog + ?Sized,
{
    let form = ParameterForm::new(Settings::load(store));
    match dialog.show(&form) {
        DialogResponse::Cancelled => {
            tracing::debug!("parameter dialog cancelled");
            Ok(Acquisition::Cancelled)
        }
        DialogResponse::Confirmed { threshold, inverse } => {
            let settings = Settings {
                threshold: threshold_from_field(&threshold),
                inverse,
            };
            settings.save(store)?;
            tracing::debug!(?settings, "parameters confirmed");
            Ok(Acquisition::Confirmed(settings))
        }
    }
}
