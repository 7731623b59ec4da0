//! Key-value preference store and the settings persisted in it.
//!
//! The store is injected rather than global so a run can be driven
//! against an in-memory map in tests and a file on disk in the CLI.
//! Values are loosely typed: a host may hand back a real where an
//! integer was written, and lookups coerce where it is unambiguous and
//! fall back to the caller's default otherwise.

use std::collections::BTreeMap;
use std::error::Error;

use serde::{Deserialize, Serialize};

use crate::types::Settings;

/// Key under which the threshold is stored.
pub const THRESHOLD_KEY: &str = "edtS1.thresh";

/// Key under which the inverse flag is stored.
pub const INVERSE_KEY: &str = "edtS1.inverse";

/// A single stored preference value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrefValue {
    /// Boolean flag.
    Bool(bool),
    /// Whole number.
    Int(i64),
    /// Real number.
    Real(f64),
    /// Free text.
    Text(String),
}

impl PrefValue {
    /// Interpret the value as an `i32`, truncating reals toward zero.
    ///
    /// Returns `None` for booleans, unparseable text and out-of-range
    /// numbers.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Self::Int(v) => i32::try_from(*v).ok(),
            Self::Real(v) if v.is_finite() && v.abs() <= f64::from(i32::MAX) => Some(*v as i32),
            Self::Text(s) => s.trim().parse::<f64>().ok().and_then(|v| Self::Real(v).as_i32()),
            Self::Real(_) | Self::Bool(_) => None,
        }
    }

    /// Interpret the value as a `bool`. Text `"true"`/`"false"` is accepted.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Text(s) => s.trim().parse().ok(),
            Self::Int(_) | Self::Real(_) => None,
        }
    }
}

impl From<i32> for PrefValue {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<bool> for PrefValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

/// A preference write could not be persisted.
#[derive(Debug, thiserror::Error)]
#[error("failed to persist preference {key}: {source}")]
pub struct PrefsError {
    key: String,
    #[source]
    source: Box<dyn Error + Send + Sync>,
}

impl PrefsError {
    /// Wrap a backend failure that occurred while writing `key`.
    pub fn new(key: impl Into<String>, source: impl Into<Box<dyn Error + Send + Sync>>) -> Self {
        Self {
            key: key.into(),
            source: source.into(),
        }
    }

    /// The key whose write failed.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Persistent key-value settings.
pub trait PreferenceStore {
    /// Raw value stored under `key`, if any.
    fn get(&self, key: &str) -> Option<PrefValue>;

    /// Store `value` under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`PrefsError`] if a persistent backend cannot write.
    fn set(&mut self, key: &str, value: PrefValue) -> Result<(), PrefsError>;

    /// Store several values as one update.
    ///
    /// If any write fails, values already written in this call are put
    /// back to what they were before. A key that was absent stays at its
    /// new value, since the store has no removal. Persistent stores should
    /// override this to write once.
    ///
    /// # Errors
    ///
    /// Returns the first [`PrefsError`] raised.
    fn set_many(&mut self, entries: &[(&str, PrefValue)]) -> Result<(), PrefsError> {
        let previous: Vec<Option<PrefValue>> =
            entries.iter().map(|(key, _)| self.get(key)).collect();
        for (done, (key, value)) in entries.iter().enumerate() {
            if let Err(e) = self.set(key, value.clone()) {
                for ((key, _), old) in entries[..done].iter().zip(&previous).rev() {
                    let Some(old) = old else { continue };
                    if let Err(restore) = self.set(key, old.clone()) {
                        tracing::warn!(key, error = %restore, "could not restore preference");
                    }
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Integer stored under `key`, or `default` when absent or not numeric.
    fn get_int(&self, key: &str, default: i32) -> i32 {
        self.get(key).and_then(|v| v.as_i32()).unwrap_or(default)
    }

    /// Boolean stored under `key`, or `default` when absent or not boolean.
    fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
    }
}

impl<T: PreferenceStore + ?Sized> PreferenceStore for &mut T {
    fn get(&self, key: &str) -> Option<PrefValue> {
        (**self).get(key)
    }

    fn set(&mut self, key: &str, value: PrefValue) -> Result<(), PrefsError> {
        (**self).set(key, value)
    }

    fn set_many(&mut self, entries: &[(&str, PrefValue)]) -> Result<(), PrefsError> {
        (**self).set_many(entries)
    }
}

/// Preference store backed by an in-memory map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryPreferences {
    values: BTreeMap<String, PrefValue>,
}

impl MemoryPreferences {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over stored entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PrefValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl PreferenceStore for MemoryPreferences {
    fn get(&self, key: &str) -> Option<PrefValue> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: PrefValue) -> Result<(), PrefsError> {
        self.values.insert(key.to_owned(), value);
        Ok(())
    }
}

impl Settings {
    /// Load settings from `store`, using the defaults for missing keys.
    pub fn load<S: PreferenceStore + ?Sized>(store: &S) -> Self {
        Self {
            threshold: store.get_int(THRESHOLD_KEY, Self::DEFAULT_THRESHOLD),
            inverse: store.get_bool(INVERSE_KEY, Self::DEFAULT_INVERSE),
        }
    }

    /// Write both settings to `store` as one update.
    ///
    /// # Errors
    ///
    /// Returns [`PrefsError`] if the update fails. The previously stored
    /// pair is left in place.
    pub fn save<S: PreferenceStore + ?Sized>(&self, store: &mut S) -> Result<(), PrefsError> {
        store.set_many(&[
            (THRESHOLD_KEY, self.threshold.into()),
            (INVERSE_KEY, self.inverse.into()),
        ])
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn empty_store_yields_defaults() {
        let store = MemoryPreferences::new();
        assert_eq!(Settings::load(&store), Settings::default());
    }

    #[test]
    fn saved_settings_load_back_equal() {
        for settings in [
            Settings { threshold: 1, inverse: false },
            Settings { threshold: 128, inverse: true },
            Settings { threshold: 255, inverse: true },
            Settings { threshold: -4, inverse: false },
        ] {
            let mut store = MemoryPreferences::new();
            settings.save(&mut store).unwrap();
            assert_eq!(Settings::load(&store), settings);
        }
    }

    #[test]
    fn save_writes_both_keys() {
        let mut store = MemoryPreferences::new();
        Settings::default().save(&mut store).unwrap();
        assert_eq!(store.get(THRESHOLD_KEY), Some(PrefValue::Int(128)));
        assert_eq!(store.get(INVERSE_KEY), Some(PrefValue::Bool(false)));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn real_threshold_is_truncated() {
        let mut store = MemoryPreferences::new();
        store.set(THRESHOLD_KEY, PrefValue::Real(99.9)).unwrap();
        assert_eq!(store.get_int(THRESHOLD_KEY, 0), 99);
    }

    #[test]
    fn textual_values_are_coerced() {
        let mut store = MemoryPreferences::new();
        store.set(THRESHOLD_KEY, PrefValue::Text(" 42 ".into())).unwrap();
        store.set(INVERSE_KEY, PrefValue::Text("true".into())).unwrap();
        assert_eq!(
            Settings::load(&store),
            Settings { threshold: 42, inverse: true },
        );
    }

    #[test]
    fn mistyped_values_fall_back_to_defaults() {
        let mut store = MemoryPreferences::new();
        store.set(THRESHOLD_KEY, PrefValue::Bool(true)).unwrap();
        store.set(INVERSE_KEY, PrefValue::Int(1)).unwrap();
        assert_eq!(Settings::load(&store), Settings::default());
    }

    #[test]
    fn oversized_integer_falls_back_to_default() {
        let mut store = MemoryPreferences::new();
        store.set(THRESHOLD_KEY, PrefValue::Int(i64::MAX)).unwrap();
        assert_eq!(store.get_int(THRESHOLD_KEY, 128), 128);
    }

    /// Accepts writes until `fail_key` is written.
    struct FailsOn {
        inner: MemoryPreferences,
        fail_key: &'static str,
    }

    impl PreferenceStore for FailsOn {
        fn get(&self, key: &str) -> Option<PrefValue> {
            self.inner.get(key)
        }

        fn set(&mut self, key: &str, value: PrefValue) -> Result<(), PrefsError> {
            if key == self.fail_key {
                return Err(PrefsError::new(key, "read-only"));
            }
            self.inner.set(key, value)
        }
    }

    #[test]
    fn failed_save_keeps_previous_pair() {
        let before = Settings {
            threshold: 10,
            inverse: true,
        };
        let mut inner = MemoryPreferences::new();
        before.save(&mut inner).unwrap();
        let mut store = FailsOn {
            inner,
            fail_key: INVERSE_KEY,
        };

        let err = Settings {
            threshold: 200,
            inverse: false,
        }
        .save(&mut store)
        .unwrap_err();

        assert_eq!(err.key(), INVERSE_KEY);
        assert_eq!(Settings::load(&store), before);
    }

    #[test]
    fn untagged_json_round_trip_keeps_types() {
        let mut store = MemoryPreferences::new();
        Settings { threshold: 200, inverse: true }.save(&mut store).unwrap();
        let json = serde_json::to_string(&store).unwrap();
        assert_eq!(json, r#"{"edtS1.inverse":true,"edtS1.thresh":200}"#);
        let back: MemoryPreferences = serde_json::from_str(&json).unwrap();
        assert_eq!(back, store);
    }
}
