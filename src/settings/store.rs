use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::warn;

use crate::settings::types::CaptureSettings;

/// Settings persistence errors.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("settings file is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Persistent capture settings backed by a JSON file.
pub struct SettingsStore {
    path: PathBuf,
    data: Mutex<CaptureSettings>,
}

impl SettingsStore {
    /// Create a new store, loading from disk if the file exists.
    ///
    /// An unreadable file is logged and replaced by defaults.
    pub fn new(path: PathBuf) -> Self {
        let data = Self::load(&path).unwrap_or_else(|e| {
            warn!("Ignoring settings at {}: {e}", path.display());
            CaptureSettings::default()
        });
        Self {
            path,
            data: Mutex::new(data),
        }
    }

    /// Load settings from a JSON file, returning default on missing file.
    pub fn load(path: &Path) -> Result<CaptureSettings, SettingsError> {
        if !path.exists() {
            return Ok(CaptureSettings::default());
        }
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Save current settings to disk atomically (write .tmp then rename).
    pub fn save(&self) -> Result<(), SettingsError> {
        let data = self.data.lock().clone();
        let json = serde_json::to_string_pretty(&data)?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &json)?;
        std::fs::rename(&tmp_path, &self.path)?;

        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current settings.
    pub fn get(&self) -> CaptureSettings {
        self.data.lock().clone()
    }

    /// Modify settings in memory. Call [`save`](Self::save) to persist.
    pub fn update(&self, change: impl FnOnce(&mut CaptureSettings)) {
        change(&mut *self.data.lock());
    }

    /// Restore defaults in memory.
    pub fn reset_to_defaults(&self) {
        *self.data.lock() = CaptureSettings::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::types::{DisplayModeId, PixelFormat};
    use tempfile::TempDir;

    /// Helper: create a store backed by a temp directory.
    fn temp_store() -> (SettingsStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("capture.json");
        let store = SettingsStore::new(path);
        (store, dir)
    }

    #[test]
    fn load_returns_default_when_file_missing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nonexistent.json");
        let result = SettingsStore::load(&path).unwrap();
        assert_eq!(result, CaptureSettings::default());
    }

    #[test]
    fn load_parses_valid_json_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("capture.json");
        let json = r#"{"deviceIndex":1,"displayMode":"Hi50","pixelFormat":"bgra8"}"#;
        std::fs::write(&path, json).unwrap();

        let result = SettingsStore::load(&path).unwrap();
        assert_eq!(result.device_index, 1);
        assert_eq!(result.display_mode, DisplayModeId::HD1080I50);
        assert_eq!(result.pixel_format, PixelFormat::Bgra8);
    }

    #[test]
    fn load_returns_error_for_invalid_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("capture.json");
        std::fs::write(&path, "not valid json!!!").unwrap();

        let result = SettingsStore::load(&path);
        assert!(matches!(result, Err(SettingsError::Parse(_))));
    }

    #[test]
    fn new_falls_back_to_defaults_for_invalid_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("capture.json");
        std::fs::write(&path, "{").unwrap();
        let store = SettingsStore::new(path);
        assert_eq!(store.get(), CaptureSettings::default());
    }

    #[test]
    fn save_round_trips_through_load() {
        let (store, dir) = temp_store();
        store.update(|s| {
            s.device_index = 3;
            s.display_mode = DisplayModeId::HD720P5994;
        });
        store.save().unwrap();

        let loaded = SettingsStore::load(&dir.path().join("capture.json")).unwrap();
        assert_eq!(loaded.device_index, 3);
        assert_eq!(loaded.display_mode, DisplayModeId::HD720P5994);
    }

    #[test]
    fn save_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("deep").join("capture.json");
        let store = SettingsStore::new(path.clone());
        store.save().unwrap();

        assert!(path.exists());
    }

    #[test]
    fn save_is_atomic() {
        let (store, dir) = temp_store();
        store.save().unwrap();

        // After a successful save, no .tmp file should remain
        let tmp_path = dir.path().join("capture.json.tmp");
        assert!(
            !tmp_path.exists(),
            ".tmp file should be cleaned up after rename"
        );
    }

    #[test]
    fn new_loads_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("capture.json");
        let settings = CaptureSettings {
            pixel_format: PixelFormat::Rgb10,
            ..CaptureSettings::default()
        };
        std::fs::write(&path, serde_json::to_string(&settings).unwrap()).unwrap();

        let store = SettingsStore::new(path);
        assert_eq!(store.get().pixel_format, PixelFormat::Rgb10);
    }

    #[test]
    fn reset_to_defaults_discards_changes() {
        let (store, _dir) = temp_store();
        store.update(|s| s.dual_stream_3d = true);
        store.reset_to_defaults();
        assert_eq!(store.get(), CaptureSettings::default());
    }
}
