//! Interactive settings prompts
//!
//! Uses dialoguer for terminal-based input. The engine never prompts; the
//! answers are saved and handed to it as [`Settings`].

use std::path::{Path, PathBuf};

use colored::Colorize;
use dialoguer::{Confirm, Input};
use drive_core::Settings;

use crate::cli::Paths;
use crate::error::Result;

/// Base folder name offered when there is no previous answer
const DEFAULT_FOLDER_NAME: &str = "Backup";

/// Prompt for every setting, offering `current` values as defaults.
pub fn prompt_settings(current: Option<&Settings>) -> Result<Settings> {
    println!();

    let drive_folder_name: String = Input::new()
        .with_prompt("Drive folder name")
        .default(
            current
                .map(|s| s.drive_folder_name.clone())
                .unwrap_or_else(|| DEFAULT_FOLDER_NAME.to_string()),
        )
        .validate_with(|name: &String| {
            if name.trim().is_empty() {
                Err("folder name must not be empty")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let mut folder_input = Input::<String>::new()
        .with_prompt("Local folder to watch")
        .validate_with(|path: &String| validate_folder(Path::new(path)));
    if let Some(current) = current {
        folder_input = folder_input.default(current.path_to_folder.display().to_string());
    }
    let path_to_folder = PathBuf::from(folder_input.interact_text()?);

    let update_on_start = Confirm::new()
        .with_prompt("Upload the whole folder every time the monitor starts?")
        .default(current.is_some_and(|s| s.update_on_start))
        .interact()?;

    let update_save = Confirm::new()
        .with_prompt("Remember uploaded files between runs?")
        .default(current.is_none_or(|s| s.update_save))
        .interact()?;

    Ok(Settings {
        drive_folder_name: drive_folder_name.trim().to_string(),
        path_to_folder,
        update_on_start,
        update_save,
    })
}

fn validate_folder(path: &Path) -> std::result::Result<(), String> {
    if !path.is_absolute() {
        return Err("enter an absolute path".to_string());
    }
    if !path.is_dir() {
        return Err(format!("{} is not a directory", path.display()));
    }
    Ok(())
}

/// Prompt, then save the settings and prepare the manifest file.
pub fn configure(paths: &Paths) -> Result<Settings> {
    let current = Settings::load(&paths.settings).ok();
    let settings = prompt_settings(current.as_ref())?;
    save(&settings, paths)?;

    println!(
        "{} Settings saved to {}",
        "OK".green().bold(),
        paths.settings.display().to_string().cyan()
    );
    Ok(settings)
}

/// Write `settings` and, when the manifest is persisted, start an empty
/// manifest file unless one exists.
pub fn save(settings: &Settings, paths: &Paths) -> Result<()> {
    settings.validate()?;
    settings.save(&paths.settings)?;

    if settings.update_save && !paths.manifest.exists() {
        drive_fs::write_atomic(&paths.manifest, b"{}")?;
        tracing::info!(path = %paths.manifest.display(), "Created empty manifest");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn paths_in(dir: &Path) -> Paths {
        Paths {
            settings: dir.join("parameters.json"),
            manifest: dir.join("files.json"),
            log_file: dir.join("history.log"),
        }
    }

    fn settings_for(root: &Path, update_save: bool) -> Settings {
        Settings {
            drive_folder_name: "Backup".into(),
            path_to_folder: root.to_path_buf(),
            update_on_start: false,
            update_save,
        }
    }

    #[test]
    fn save_writes_settings_and_empty_manifest() {
        let temp = TempDir::new().unwrap();
        let paths = paths_in(temp.path());
        let settings = settings_for(temp.path(), true);

        save(&settings, &paths).unwrap();

        assert_eq!(Settings::load(&paths.settings).unwrap(), settings);
        let manifest = drive_core::ManifestStore::open(&paths.manifest).unwrap();
        assert!(manifest.is_empty());
    }

    #[test]
    fn save_keeps_existing_manifest() {
        let temp = TempDir::new().unwrap();
        let paths = paths_in(temp.path());
        std::fs::write(&paths.manifest, "{\"a.txt\": {}}").unwrap();

        save(&settings_for(temp.path(), true), &paths).unwrap();

        assert_eq!(
            std::fs::read_to_string(&paths.manifest).unwrap(),
            "{\"a.txt\": {}}"
        );
    }

    #[test]
    fn save_without_persistence_writes_no_manifest() {
        let temp = TempDir::new().unwrap();
        let paths = paths_in(temp.path());

        save(&settings_for(temp.path(), false), &paths).unwrap();

        assert!(!paths.manifest.exists());
    }

    #[test]
    fn folder_validation() {
        let temp = TempDir::new().unwrap();
        assert!(validate_folder(temp.path()).is_ok());
        assert!(validate_folder(Path::new("relative")).is_err());
        assert!(validate_folder(&temp.path().join("missing")).is_err());
    }
}
