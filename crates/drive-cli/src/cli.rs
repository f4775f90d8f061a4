//! CLI argument parsing using clap derive

use std::path::{Path, PathBuf};

use clap::Parser;
use drive_core::config::{DEFAULT_MANIFEST_FILE, DEFAULT_SETTINGS_FILE};

use crate::error::{CliError, Result};

/// Log file written next to the settings file unless `--log-file` is given
pub const DEFAULT_LOG_FILE: &str = "history.log";

/// drive-sync - Mirror a local directory onto Google Drive
///
/// Watches the configured directory and uploads every change to a base
/// folder on Drive. Settings live in `parameters.json` under the user's
/// config directory; run with `--settings` to create or change them.
#[derive(Parser, Debug)]
#[command(name = "drive-sync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Prompt for settings and save them before starting
    #[arg(short = 's', long)]
    pub settings: bool,

    /// Push the whole tree before watching
    #[arg(short, long)]
    pub push: bool,

    /// Push the whole tree and exit without watching
    #[arg(long)]
    pub once: bool,

    /// Maximum number of concurrent uploads
    #[arg(long, default_value_t = 4, value_name = "N")]
    pub workers: usize,

    /// OAuth access token for the Drive API
    #[arg(long, env = "DRIVE_SYNC_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Override the Drive API endpoint
    #[arg(long, value_name = "URL")]
    pub api_base: Option<String>,

    /// Settings file (JSON, TOML or YAML)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Manifest file, next to the settings file by default
    #[arg(long, value_name = "PATH")]
    pub manifest: Option<PathBuf>,

    /// Log file, next to the settings file by default
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Enable debug output
    #[arg(short, long)]
    pub verbose: bool,
}

/// Files the CLI reads and writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub settings: PathBuf,
    pub manifest: PathBuf,
    pub log_file: PathBuf,
}

impl Cli {
    /// Resolve file locations from the flags and the platform config
    /// directory.
    pub fn paths(&self) -> Result<Paths> {
        let settings = match &self.config {
            Some(path) => path.clone(),
            None => dirs::config_dir()
                .ok_or_else(|| {
                    CliError::user("cannot determine the config directory; pass --config")
                })?
                .join("drive-sync")
                .join(DEFAULT_SETTINGS_FILE),
        };
        Ok(self.paths_from(settings))
    }

    fn paths_from(&self, settings: PathBuf) -> Paths {
        let dir = settings.parent().map(Path::to_path_buf).unwrap_or_default();
        Paths {
            manifest: self
                .manifest
                .clone()
                .unwrap_or_else(|| dir.join(DEFAULT_MANIFEST_FILE)),
            log_file: self
                .log_file
                .clone()
                .unwrap_or_else(|| dir.join(DEFAULT_LOG_FILE)),
            settings,
        }
    }
}
