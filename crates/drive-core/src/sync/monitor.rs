//! Monitor loop: base folder, push and live watch
//!
//! [`Monitor`] holds what a session needs before talking to the remote
//! service. [`Monitor::start`] resolves the base folder and yields an
//! [`Engine`], which runs full-scan pushes and live watching on top of one
//! dispatcher and one manifest.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::{Dispatcher, Reconciler, SyncReport};
use crate::config::{EngineOptions, Settings};
use crate::index::{RemoteTreeIndex, resolve_base_folder};
use crate::manifest::ManifestStore;
use crate::remote::{RemoteClient, RemoteId};
use crate::source::watch::{self, WatchConfig};
use crate::source::{ChangeEvent, FullScan, IgnoreRules};
use crate::Result;

/// Capacity of the channel between the scanner thread and the dispatcher
const SCAN_BUFFER: usize = 256;

/// Driver for one watched tree.
pub struct Monitor {
    settings: Settings,
    root: PathBuf,
    client: Arc<dyn RemoteClient>,
    manifest: Arc<ManifestStore>,
    options: EngineOptions,
    ignore: IgnoreRules,
}

impl Monitor {
    /// Validate `settings` and prepare a monitor.
    ///
    /// The manifest file is never mirrored, even when it lives inside the
    /// watched tree.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSettings`](crate::Error::InvalidSettings) when
    /// the settings do not describe an existing absolute directory.
    pub fn new(
        settings: Settings,
        client: Arc<dyn RemoteClient>,
        manifest: Arc<ManifestStore>,
        options: EngineOptions,
    ) -> Result<Self> {
        settings.validate()?;
        let root = drive_fs::canonical_root(&settings.path_to_folder)?;

        let mut ignore = IgnoreRules::new();
        if let Some(path) = manifest.path() {
            ignore = ignore.with_file(&root, path);
        }

        Ok(Self {
            settings,
            root,
            client,
            manifest,
            options,
            ignore,
        })
    }

    /// Never mirror `file` either, such as the settings file.
    pub fn ignore_file(mut self, file: &Path) -> Self {
        self.ignore = self.ignore.with_file(&self.root, file);
        self
    }

    /// Canonical watched root
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn manifest(&self) -> &Arc<ManifestStore> {
        &self.manifest
    }

    /// Resolve or create the base folder and wire up the engine.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BaseFolderUnavailable`](crate::Error::BaseFolderUnavailable)
    /// when the base folder cannot be found or created after retries. This
    /// is the only remote failure that stops a session.
    pub async fn start(&self) -> Result<Engine> {
        let retry = self.options.retry;
        let base_id =
            resolve_base_folder(self.client.as_ref(), &self.settings.drive_folder_name, retry)
                .await?;

        let index = Arc::new(RemoteTreeIndex::new(
            self.client.clone(),
            base_id.clone(),
            retry,
        ));
        let reconciler = Arc::new(Reconciler::new(
            self.root.clone(),
            self.client.clone(),
            index,
            self.manifest.clone(),
            self.ignore.clone(),
            retry,
        ));
        let dispatcher = Dispatcher::new(reconciler, self.options.max_workers);

        tracing::info!(
            root = %self.root.display(),
            base_folder = %self.settings.drive_folder_name,
            remote_id = %base_id,
            "Monitor started"
        );

        Ok(Engine {
            root: self.root.clone(),
            base_id,
            manifest: self.manifest.clone(),
            dispatcher,
            options: self.options.clone(),
            ignore: self.ignore.clone(),
        })
    }

    /// Start and run one full-scan push.
    pub async fn push(&self) -> Result<SyncReport> {
        self.push_until(&CancellationToken::new()).await
    }

    /// Start and run one full-scan push that stops early when `cancel`
    /// fires. Work already dispatched still finishes and the manifest is
    /// flushed before returning.
    pub async fn push_until(&self, cancel: &CancellationToken) -> Result<SyncReport> {
        self.start().await?.push(cancel).await
    }

    /// Start, push when asked to, then watch until `cancel` fires.
    ///
    /// A push runs when `force_update` or the `update_on_start` setting is
    /// set. Per-path failures are reported, not returned.
    pub async fn run(&self, force_update: bool, cancel: CancellationToken) -> Result<SyncReport> {
        let engine = self.start().await?;
        let mut report = SyncReport::default();

        if force_update || self.settings.update_on_start {
            report.merge(engine.push(&cancel).await?);
        }
        if !cancel.is_cancelled() {
            report.merge(engine.watch(&cancel).await?);
        }

        tracing::info!(
            changes = report.total_changes(),
            errors = report.errors.len(),
            "Monitor stopped"
        );
        Ok(report)
    }
}

/// A started session: base folder resolved, dispatcher ready.
pub struct Engine {
    root: PathBuf,
    base_id: RemoteId,
    manifest: Arc<ManifestStore>,
    dispatcher: Dispatcher,
    options: EngineOptions,
    ignore: IgnoreRules,
}

impl Engine {
    /// Id of the base folder
    pub fn base_id(&self) -> &RemoteId {
        &self.base_id
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        self.dispatcher.reconciler()
    }

    pub fn index(&self) -> &Arc<RemoteTreeIndex> {
        self.reconciler().index()
    }

    /// Dispatch one event.
    pub fn submit(&self, event: ChangeEvent) {
        self.dispatcher.submit(event);
    }

    /// Wait for all dispatched work and return what it did.
    pub async fn drain(&self) -> SyncReport {
        self.dispatcher.drain().await;
        self.dispatcher.take_report()
    }

    /// Persist the manifest if it changed. Failures are logged; the next
    /// flush tries again.
    pub fn flush(&self) {
        if let Err(e) = self.manifest.flush() {
            tracing::warn!(error = %e, "Failed to persist manifest");
        }
    }

    fn flush_ticker(&self) -> Interval {
        let period = self.options.flush_interval.max(Duration::from_millis(10));
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }

    /// Drain while keeping the periodic flush going.
    async fn drain_flushing(&self, ticker: &mut Interval) -> SyncReport {
        let drained = self.dispatcher.drain();
        tokio::pin!(drained);
        loop {
            tokio::select! {
                _ = &mut drained => break,
                _ = ticker.tick() => self.flush(),
            }
        }
        self.dispatcher.take_report()
    }

    /// Walk the whole tree and reconcile every difference.
    ///
    /// Cancellation stops submitting scan results; work already dispatched
    /// drains and the manifest is flushed either way.
    pub async fn push(&self, cancel: &CancellationToken) -> Result<SyncReport> {
        tracing::info!(root = %self.root.display(), "Starting full-scan push");

        let (tx, mut rx) = mpsc::channel(SCAN_BUFFER);
        let root = self.root.clone();
        let manifest = self.manifest.clone();
        let ignore = self.ignore.clone();
        let scanner = tokio::task::spawn_blocking(move || {
            for event in FullScan::new(&root, manifest, ignore) {
                if tx.blocking_send(event).is_err() {
                    break;
                }
            }
        });

        let mut ticker = self.flush_ticker();
        let mut scan_errors = Vec::new();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Push cancelled, finishing dispatched work");
                    break;
                }
                received = rx.recv() => match received {
                    Some(Ok(event)) => self.dispatcher.submit(event),
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "Scan skipped an entry");
                        scan_errors.push(e.to_string());
                    }
                    None => break,
                },
                _ = ticker.tick() => self.flush(),
            }
        }
        drop(rx);
        scanner.await?;

        let mut report = self.drain_flushing(&mut ticker).await;
        for error in scan_errors {
            report.record_error(error);
        }
        self.flush();

        tracing::info!(
            created = report.created,
            updated = report.updated,
            deleted = report.deleted,
            unchanged = report.unchanged,
            errors = report.errors.len(),
            "Push finished"
        );
        Ok(report)
    }

    /// Reconcile live changes until `cancel` fires.
    ///
    /// On cancellation the watcher forwards what it still held back, the
    /// dispatched work drains and the manifest is flushed.
    ///
    /// # Errors
    ///
    /// Fails when the file watcher cannot be started.
    pub async fn watch(&self, cancel: &CancellationToken) -> Result<SyncReport> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let config = WatchConfig {
            root: self.root.clone(),
            ignore: self.ignore.clone(),
            debounce: self.options.debounce,
            rename_window: self.options.rename_window,
        };
        let watcher = watch::spawn(config, self.manifest.clone(), tx, cancel.clone())?;

        let mut ticker = self.flush_ticker();
        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Some(event) => {
                        tracing::debug!(event = %event, "Local change");
                        self.dispatcher.submit(event);
                    }
                    None => break,
                },
                _ = ticker.tick() => self.flush(),
            }
        }
        watcher.await?;

        let report = self.drain_flushing(&mut ticker).await;
        self.flush();
        Ok(report)
    }
}
