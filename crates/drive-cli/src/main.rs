//! drive-sync CLI
//!
//! Loads (or interactively creates) the settings, connects to Google Drive
//! and runs the monitor until interrupted.

mod cli;
mod error;
mod gdrive;
mod interactive;
mod logging;

use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use drive_core::{EngineOptions, ManifestStore, Monitor, Settings, SyncReport};
use tokio_util::sync::CancellationToken;

use cli::{Cli, Paths};
use error::{CliError, Result};
use gdrive::DriveClient;

fn main() {
    if let Err(e) = run() {
        eprintln!("{}: {}", "error".red().bold(), e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let paths = cli.paths()?;

    logging::init(cli.verbose, Some(&paths.log_file))?;
    tracing::debug!(settings = %paths.settings.display(), "Resolved paths");

    let settings = load_settings(&cli, &paths)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let report = runtime.block_on(sync(&cli, settings, &paths))?;

    print_report(&report);
    Ok(())
}

/// Settings from disk, prompting when asked to or when none exist yet.
fn load_settings(cli: &Cli, paths: &Paths) -> Result<Settings> {
    if cli.settings {
        return interactive::configure(paths);
    }
    match Settings::load(&paths.settings) {
        Ok(settings) => Ok(settings),
        Err(drive_core::Error::ConfigMissing { path }) => {
            println!(
                "{} No settings found at {}",
                "=>".blue().bold(),
                path.display().to_string().cyan()
            );
            interactive::configure(paths)
        }
        Err(e) => Err(e.into()),
    }
}

async fn sync(cli: &Cli, settings: Settings, paths: &Paths) -> Result<SyncReport> {
    let token = cli.token.clone().ok_or_else(|| {
        CliError::user("no Drive access token; pass --token or set DRIVE_SYNC_TOKEN")
    })?;
    let client = Arc::new(DriveClient::new(token, cli.api_base.as_deref())?);

    let manifest = Arc::new(ManifestStore::from_settings(&settings, &paths.manifest));
    let options = EngineOptions::default().with_workers(cli.workers);
    let monitor = Monitor::new(settings, client, manifest, options)?
        .ignore_file(&paths.settings)
        .ignore_file(&paths.log_file);

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, finishing in-flight uploads");
            interrupt.cancel();
        }
    });

    if cli.once {
        return Ok(monitor.push_until(&cancel).await?);
    }

    println!(
        "{} Watching {} (Ctrl+C to stop)",
        "=>".blue().bold(),
        monitor.root().display().to_string().cyan()
    );
    Ok(monitor.run(cli.push, cancel).await?)
}

fn print_report(report: &SyncReport) {
    println!(
        "{} {} created, {} updated, {} moved, {} deleted, {} unchanged",
        "Done:".green().bold(),
        report.created,
        report.updated,
        report.moved,
        report.deleted,
        report.unchanged
    );
    if !report.is_success() {
        println!(
            "{} {} path(s) could not be synchronized:",
            "warning:".yellow().bold(),
            report.errors.len()
        );
        for error in &report.errors {
            println!("  {} {}", "-".yellow(), error);
        }
    }
}
