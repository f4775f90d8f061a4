//! User settings for a watched tree

use std::path::{Path, PathBuf};

use drive_fs::ConfigStore;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default settings file name
pub const DEFAULT_SETTINGS_FILE: &str = "parameters.json";

/// Default manifest file name, stored next to the settings file
pub const DEFAULT_MANIFEST_FILE: &str = "files.json";

/// Parameters describing one watched tree and its remote mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Name of the base folder on the remote service
    pub drive_folder_name: String,
    /// Absolute path of the local directory to mirror
    pub path_to_folder: PathBuf,
    /// Run a full-scan push every time the monitor starts
    #[serde(default)]
    pub update_on_start: bool,
    /// Persist the manifest between runs
    #[serde(default)]
    pub update_save: bool,
}

impl Settings {
    /// Load settings from a JSON, TOML or YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigMissing`] when the file does not exist, and a
    /// parse error when it cannot be read as settings.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::ConfigMissing {
                path: path.to_path_buf(),
            });
        }
        let settings: Settings = ConfigStore::new().load(path)?;
        tracing::debug!(path = %path.display(), "Loaded settings");
        Ok(settings)
    }

    /// Save settings atomically, format chosen by extension.
    pub fn save(&self, path: &Path) -> Result<()> {
        ConfigStore::new().save(path, self)?;
        Ok(())
    }

    /// Check that the settings describe a usable tree.
    pub fn validate(&self) -> Result<()> {
        if self.drive_folder_name.trim().is_empty() {
            return Err(Error::InvalidSettings {
                message: "drive_folder_name must not be empty".into(),
            });
        }
        if !self.path_to_folder.is_absolute() {
            return Err(Error::InvalidSettings {
                message: format!(
                    "path_to_folder must be absolute, got {}",
                    self.path_to_folder.display()
                ),
            });
        }
        if !self.path_to_folder.is_dir() {
            return Err(Error::InvalidSettings {
                message: format!(
                    "path_to_folder {} is not a directory",
                    self.path_to_folder.display()
                ),
            });
        }
        Ok(())
    }
}
