//! Preference store persisted as a JSON object on disk.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use locthk_pipeline::{MemoryPreferences, PrefValue, PreferenceStore, PrefsError};

/// Errors opening a preference file.
#[derive(Debug, thiserror::Error)]
pub enum PrefsFileError {
    /// The file exists but could not be read.
    #[error("could not read preferences from {path}: {source}")]
    Read {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The file is not a JSON object of preference values.
    #[error("preferences in {path} are not valid: {source}")]
    Parse {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
}

/// Preferences loaded from, and written back to, one JSON file.
///
/// Every write rewrites the whole file so a confirmed run is persisted
/// before any stage starts. A write that cannot be persisted leaves both
/// the file and the in-memory values as they were.
#[derive(Debug)]
pub struct JsonFilePreferences {
    path: PathBuf,
    values: MemoryPreferences,
}

impl JsonFilePreferences {
    /// `<config dir>/locthk/prefs.json`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("locthk").join("prefs.json"))
    }

    /// Load `path`. A missing file is an empty store.
    ///
    /// # Errors
    ///
    /// Returns [`PrefsFileError`] if the file exists but cannot be read
    /// or parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PrefsFileError> {
        let path = path.into();
        let values = match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).map_err(|source| PrefsFileError::Parse {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => MemoryPreferences::new(),
            Err(source) => return Err(PrefsFileError::Read { path, source }),
        };
        tracing::debug!(path = %path.display(), "preferences loaded");
        Ok(Self { path, values })
    }

    /// The backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.values)?;
        fs::write(&self.path, json + "\n")
    }
}

impl PreferenceStore for JsonFilePreferences {
    fn get(&self, key: &str) -> Option<PrefValue> {
        self.values.get(key)
    }

    fn set(&mut self, key: &str, value: PrefValue) -> Result<(), PrefsError> {
        self.set_many(&[(key, value)])
    }

    fn set_many(&mut self, entries: &[(&str, PrefValue)]) -> Result<(), PrefsError> {
        let previous = self.values.clone();
        for (key, value) in entries {
            self.values.set(key, value.clone())?;
        }
        if let Err(e) = self.persist() {
            self.values = previous;
            let keys: Vec<&str> = entries.iter().map(|(key, _)| *key).collect();
            return Err(PrefsError::new(keys.join(", "), e));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use locthk_pipeline::Settings;

    use super::*;

    #[test]
    fn missing_file_is_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let prefs = JsonFilePreferences::open(dir.path().join("prefs.json")).unwrap();
        assert_eq!(Settings::load(&prefs), Settings::default());
    }

    #[test]
    fn saved_settings_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("prefs.json");
        let settings = Settings {
            threshold: 33,
            inverse: true,
        };

        let mut prefs = JsonFilePreferences::open(&path).unwrap();
        settings.save(&mut prefs).unwrap();

        let reopened = JsonFilePreferences::open(&path).unwrap();
        assert_eq!(Settings::load(&reopened), settings);
    }

    #[test]
    fn file_is_plain_json_object() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        let mut prefs = JsonFilePreferences::open(&path).unwrap();
        Settings::default().save(&mut prefs).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "edtS1.thresh": 128, "edtS1.inverse": false }),
        );
    }

    #[test]
    fn malformed_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        fs::write(&path, "[1, 2").unwrap();
        let err = JsonFilePreferences::open(&path).unwrap_err();
        assert!(matches!(err, PrefsFileError::Parse { .. }));
    }

    #[test]
    fn failed_save_keeps_previous_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        let before = Settings {
            threshold: 10,
            inverse: true,
        };
        let mut prefs = JsonFilePreferences::open(&path).unwrap();
        before.save(&mut prefs).unwrap();

        // A directory where the file should be makes the write fail.
        fs::remove_file(&path).unwrap();
        fs::create_dir(&path).unwrap();
        let err = Settings {
            threshold: 200,
            inverse: false,
        }
        .save(&mut prefs)
        .unwrap_err();

        assert_eq!(err.key(), "edtS1.thresh, edtS1.inverse");
        assert_eq!(Settings::load(&prefs), before);
    }

    #[test]
    fn unwritable_location_surfaces_key() {
        let dir = tempfile::tempdir().unwrap();
        let parent = dir.path().join("locthk");
        let mut prefs = JsonFilePreferences::open(parent.join("prefs.json")).unwrap();
        // A regular file where the parent directory should be.
        fs::write(&parent, "").unwrap();

        let err = prefs.set("edtS1.thresh", PrefValue::Int(1)).unwrap_err();
        assert_eq!(err.key(), "edtS1.thresh");
    }
}
