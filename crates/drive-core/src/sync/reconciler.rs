//! Per-path reconciliation
//!
//! The reconciler turns one [`ChangeEvent`] into the remote calls that make
//! the mirrored object match the local file, then records the result in the
//! manifest. It never decides ordering: the dispatcher guarantees that one
//! path is reconciled by one task at a time.
//!
//! Path states:
//!
//! ```text
//! Untracked -> Modified -> Reconciling -> Synced
//! Synced    -> Modified -> Reconciling -> Synced | Deleted
//! ```
//!
//! A failed remote call leaves the path in `Modified` or `Reconciling`; the
//! next event for it starts over.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use drive_fs::{RelPath, compute_content_checksum};

use crate::index::RemoteTreeIndex;
use crate::manifest::{ManifestEntry, ManifestStore};
use crate::remote::{RemoteClient, RemoteId, RetryPolicy};
use crate::source::{ChangeEvent, ChangeKind, EventSource, FullScan, IgnoreRules};
use crate::{Error, Result};

/// Where a path stands relative to its remote copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathState {
    /// Never synchronized
    Untracked,
    /// Remote copy matches the last known local content
    Synced,
    /// Local change seen, upload not started
    Modified,
    /// Remote call in progress or failed
    Reconciling,
    /// Remote copy removed after a local delete
    Deleted,
}

/// Result of reconciling one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// New remote file
    Created(RemoteId),
    /// Existing remote file received new content
    Updated(RemoteId),
    /// Remote object moved to the event's path
    Moved(RemoteId),
    /// Remote file removed
    Deleted,
    /// Remote folder resolved or created
    FolderEnsured(RemoteId),
    /// Remote folder removed along with the tracked files below it
    FolderDeleted { entries: usize },
    /// Content identical to the remote copy; nothing sent
    Unchanged,
    /// Nothing to do for this path
    Skipped,
}

/// An [`Outcome`] plus any events the reconciliation uncovered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    pub outcome: Outcome,
    /// Further events to dispatch, such as the content of a directory that
    /// appeared in one piece
    pub follow_up: Vec<ChangeEvent>,
}

impl Reconciled {
    pub fn new(outcome: Outcome) -> Self {
        Self {
            outcome,
            follow_up: Vec::new(),
        }
    }
}

impl From<Outcome> for Reconciled {
    fn from(outcome: Outcome) -> Self {
        Self::new(outcome)
    }
}

/// Brings remote objects in line with local paths.
pub struct Reconciler {
    root: PathBuf,
    client: Arc<dyn RemoteClient>,
    retry: RetryPolicy,
    index: Arc<RemoteTreeIndex>,
    manifest: Arc<ManifestStore>,
    ignore: IgnoreRules,
    states: Mutex<HashMap<RelPath, PathState>>,
}

impl Reconciler {
    /// `root` must be the canonical watched directory.
    pub fn new(
        root: PathBuf,
        client: Arc<dyn RemoteClient>,
        index: Arc<RemoteTreeIndex>,
        manifest: Arc<ManifestStore>,
        ignore: IgnoreRules,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            root,
            client,
            retry,
            index,
            manifest,
            ignore,
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest(&self) -> &Arc<ManifestStore> {
        &self.manifest
    }

    pub fn index(&self) -> &Arc<RemoteTreeIndex> {
        &self.index
    }

    fn states(&self) -> MutexGuard<'_, HashMap<RelPath, PathState>> {
        self.states.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, path: &RelPath, state: PathState) {
        self.states().insert(path.clone(), state);
    }

    /// Current state of `path`.
    pub fn state(&self, path: &RelPath) -> PathState {
        if let Some(state) = self.states().get(path) {
            return *state;
        }
        if self.manifest.contains(path) {
            PathState::Synced
        } else {
            PathState::Untracked
        }
    }

    /// Reconcile one event.
    ///
    /// # Errors
    ///
    /// Returns the remote or local error that stopped the reconciliation
    /// once retries are exhausted. The path is left out of sync; nothing
    /// else is affected.
    pub async fn reconcile(&self, event: &ChangeEvent) -> Result<Reconciled> {
        if self.ignore.is_ignored(&event.path) {
            return Ok(Outcome::Skipped.into());
        }
        tracing::debug!(event = %event, "Reconciling");

        match (event.kind, &event.old_path) {
            (ChangeKind::Created | ChangeKind::Modified, _) | (ChangeKind::Renamed, None) => {
                self.sync_path(&event.path, event.source).await
            }
            (ChangeKind::Deleted, _) => self.delete_path(&event.path).await.map(Into::into),
            (ChangeKind::Renamed, Some(old)) => self.rename_path(old, &event.path).await,
        }
    }

    /// Mirror whatever is currently at `path`.
    async fn sync_path(&self, path: &RelPath, source: EventSource) -> Result<Reconciled> {
        let native = path.to_native(&self.root);
        let metadata = match tokio::fs::symlink_metadata(&native).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return self.delete_path(path).await.map(Into::into);
            }
            Err(e) => return Err(Error::local_io(path, e)),
        };

        if metadata.is_symlink() {
            tracing::debug!(path = %path, "Skipping symbolic link");
            return Ok(Outcome::Skipped.into());
        }

        if metadata.is_dir() {
            let id = self.index.resolve_or_create_folder(path).await?;
            let mut reconciled = Reconciled::new(Outcome::FolderEnsured(id));
            // A scan visits subdirectories itself; a live directory may
            // have arrived with content that produced no events.
            if source == EventSource::Live {
                reconciled.follow_up = self.expand(path).await?;
            }
            return Ok(reconciled);
        }

        self.upload(path, &native).await.map(Into::into)
    }

    /// Changes found below a directory that appeared in one piece.
    async fn expand(&self, dir: &RelPath) -> Result<Vec<ChangeEvent>> {
        let root = self.root.clone();
        let dir = dir.clone();
        let manifest = self.manifest.clone();
        let ignore = self.ignore.clone();

        let events = tokio::task::spawn_blocking(move || {
            FullScan::subtree(&root, &dir, manifest, ignore).collect::<Vec<_>>()
        })
        .await?;

        Ok(events
            .into_iter()
            .filter_map(|event| {
                event
                    .map_err(|e| tracing::warn!(error = %e, "Skipping unreadable entry"))
                    .ok()
            })
            .collect())
    }

    /// Upload the file at `path` if its content differs from the remote copy.
    async fn upload(&self, path: &RelPath, native: &Path) -> Result<Outcome> {
        let Some(name) = path.file_name() else {
            return Ok(Outcome::Skipped);
        };
        self.set_state(path, PathState::Modified);

        let modified: DateTime<Utc> = match tokio::fs::metadata(native)
            .await
            .and_then(|metadata| metadata.modified())
        {
            Ok(time) => time.into(),
            Err(e) if e.kind() == ErrorKind::NotFound => return self.delete_path(path).await,
            Err(e) => return Err(Error::local_io(path, e)),
        };
        let content = match tokio::fs::read(native).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return self.delete_path(path).await,
            Err(e) => return Err(Error::local_io(path, e)),
        };
        let fingerprint = compute_content_checksum(&content);

        let entry = self.manifest.lookup(path);
        if let Some(entry) = &entry
            && entry.fingerprint == fingerprint
        {
            if entry.modified_time != modified {
                self.manifest.touch(path, modified);
            }
            self.set_state(path, PathState::Synced);
            tracing::debug!(path = %path, "Content unchanged, nothing to upload");
            return Ok(Outcome::Unchanged);
        }

        self.set_state(path, PathState::Reconciling);
        let outcome = match entry {
            Some(entry) => {
                let client = self.client.as_ref();
                let id = &entry.remote_id;
                match self
                    .retry
                    .run("update_file", || client.update_file(id, &content))
                    .await
                {
                    Ok(object) => Outcome::Updated(object.id),
                    Err(e) if e.is_not_found() => {
                        tracing::warn!(
                            path = %path,
                            remote_id = %entry.remote_id,
                            "Remote copy vanished, uploading again"
                        );
                        self.manifest.remove(path);
                        Outcome::Created(self.create_file(path, name, &content).await?)
                    }
                    Err(e) => return Err(Error::remote("update_file", path, e)),
                }
            }
            None => Outcome::Created(self.create_file(path, name, &content).await?),
        };

        let remote_id = match &outcome {
            Outcome::Created(id) | Outcome::Updated(id) => id.clone(),
            _ => return Ok(outcome),
        };
        self.manifest.upsert(
            path.clone(),
            ManifestEntry::new(remote_id.clone(), modified, fingerprint),
        );
        self.set_state(path, PathState::Synced);

        match outcome {
            Outcome::Created(_) => {
                tracing::info!(path = %path, remote_id = %remote_id, "Uploaded new file");
            }
            _ => tracing::info!(path = %path, remote_id = %remote_id, "Updated remote file"),
        }
        Ok(outcome)
    }

    /// Create the remote file for `path` under its parent folder.
    ///
    /// A not-found answer means a cached ancestor was removed remotely; the
    /// cached chain is dropped and the create is tried once more.
    async fn create_file(&self, path: &RelPath, name: &str, content: &[u8]) -> Result<RemoteId> {
        let parent = path.parent().unwrap_or_default();
        let parent_id = self.index.resolve_or_create_folder(&parent).await?;
        let client = self.client.as_ref();

        match self
            .retry
            .run("create_file", || client.create_file(&parent_id, name, content))
            .await
        {
            Ok(object) => Ok(object.id),
            Err(e) if e.is_not_found() && !parent.is_root() => {
                tracing::warn!(
                    path = %path,
                    folder = %parent,
                    "Cached remote folder vanished, resolving again"
                );
                let top = parent
                    .segments()
                    .next()
                    .map(RelPath::new)
                    .transpose()?
                    .unwrap_or_default();
                self.index.invalidate(&top);

                let parent_id = self.index.resolve_or_create_folder(&parent).await?;
                self.retry
                    .run("create_file", || client.create_file(&parent_id, name, content))
                    .await
                    .map(|object| object.id)
                    .map_err(|e| Error::remote("create_file", path, e))
            }
            Err(e) => Err(Error::remote("create_file", path, e)),
        }
    }

    /// Delete by id, treating an already missing object as deleted.
    async fn delete_remote(&self, path: &RelPath, id: &RemoteId) -> Result<()> {
        let client = self.client.as_ref();
        match self.retry.run("delete", || client.delete(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                tracing::debug!(path = %path, remote_id = %id, "Remote object already gone");
                Ok(())
            }
            Err(e) => Err(Error::remote("delete", path, e)),
        }
    }

    /// Propagate the removal of `path`, a file or a directory.
    async fn delete_path(&self, path: &RelPath) -> Result<Outcome> {
        if path.is_root() {
            return Ok(Outcome::Skipped);
        }

        if let Some(entry) = self.manifest.lookup(path) {
            self.set_state(path, PathState::Reconciling);
            self.delete_remote(path, &entry.remote_id).await?;
            self.manifest.remove(path);
            self.set_state(path, PathState::Deleted);
            tracing::info!(path = %path, remote_id = %entry.remote_id, "Deleted remote file");
            return Ok(Outcome::Deleted);
        }

        // Not a tracked file; maybe a folder the engine knows about.
        let cached = self.index.cached(path);
        if cached.is_none() && !self.manifest.has_entries_under(path) {
            tracing::debug!(path = %path, "Untracked path removed, nothing to delete");
            return Ok(Outcome::Skipped);
        }

        let folder_id = match cached {
            Some(id) => Some(id),
            None => self.index.find_folder(path).await?,
        };
        if let Some(id) = &folder_id {
            self.delete_remote(path, id).await?;
        }

        let removed = self.manifest.remove_prefix(path);
        self.index.invalidate(path);
        self.states().retain(|tracked, _| !tracked.starts_with(path));
        for (file, _) in &removed {
            self.set_state(file, PathState::Deleted);
        }

        match folder_id {
            Some(id) => {
                tracing::info!(
                    path = %path,
                    remote_id = %id,
                    entries = removed.len(),
                    "Deleted remote folder"
                );
                Ok(Outcome::FolderDeleted {
                    entries: removed.len(),
                })
            }
            None => Ok(Outcome::Skipped),
        }
    }

    /// Propagate a rename from `old` to `new`.
    async fn rename_path(&self, old: &RelPath, new: &RelPath) -> Result<Reconciled> {
        if self.ignore.is_ignored(old) {
            return self.sync_path(new, EventSource::Live).await;
        }

        let native = new.to_native(&self.root);
        let metadata = match tokio::fs::symlink_metadata(&native).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return self.delete_path(old).await.map(Into::into);
            }
            Err(e) => return Err(Error::local_io(new, e)),
        };
        if metadata.is_dir() {
            return self.rename_folder(old, new).await;
        }

        let Some(entry) = self.manifest.lookup(old) else {
            return self.sync_path(new, EventSource::Live).await;
        };
        let (Some(parent), Some(name)) = (new.parent(), new.file_name()) else {
            return Ok(Outcome::Skipped.into());
        };

        // Renaming over a tracked file replaces it.
        if self.manifest.contains(new) {
            self.delete_path(new).await?;
        }

        let parent_id = self.index.resolve_or_create_folder(&parent).await?;
        self.set_state(old, PathState::Reconciling);
        let client = self.client.as_ref();
        let id = &entry.remote_id;

        match self
            .retry
            .run("move", || client.move_object(id, &parent_id, name))
            .await
        {
            Ok(moved) => {
                self.manifest.rekey(old, new.clone());
                self.set_state(old, PathState::Deleted);
                self.set_state(new, PathState::Synced);
                tracing::info!(from = %old, to = %new, remote_id = %moved.id, "Moved remote file");

                // The content may have changed along with the name.
                if let Outcome::Updated(_) = self.upload(new, &native).await? {
                    tracing::debug!(path = %new, "Renamed file also had new content");
                }
                Ok(Outcome::Moved(moved.id).into())
            }
            Err(e) if e.is_unsupported() => {
                tracing::debug!(from = %old, to = %new, "Move unsupported, re-uploading");
                self.delete_path(old).await?;
                self.upload(new, &native).await.map(Into::into)
            }
            Err(e) if e.is_not_found() => {
                tracing::warn!(from = %old, to = %new, "Remote copy vanished before move");
                self.manifest.remove(old);
                self.set_state(old, PathState::Deleted);
                self.upload(new, &native).await.map(Into::into)
            }
            Err(e) => Err(Error::remote("move", old, e)),
        }
    }

    /// Propagate a directory rename by moving the remote folder.
    async fn rename_folder(&self, old: &RelPath, new: &RelPath) -> Result<Reconciled> {
        let old_id = match self.index.cached(old) {
            Some(id) if !old.is_root() => Some(id),
            _ => self.index.find_folder(old).await?,
        };
        let (Some(old_id), Some(parent), Some(name)) = (old_id, new.parent(), new.file_name())
        else {
            // Nothing remote to move; mirror the new location from scratch.
            self.manifest.remove_prefix(old);
            self.index.invalidate(old);
            return self.sync_path(new, EventSource::Live).await;
        };

        let parent_id = self.index.resolve_or_create_folder(&parent).await?;
        let client = self.client.as_ref();

        match self
            .retry
            .run("move", || client.move_object(&old_id, &parent_id, name))
            .await
        {
            Ok(moved) => {
                let entries = self.manifest.rekey_prefix(old, new);
                self.index.rekey(old, new.clone(), moved.id.clone());
                self.states().retain(|tracked, _| !tracked.starts_with(old));
                tracing::info!(
                    from = %old,
                    to = %new,
                    remote_id = %moved.id,
                    entries,
                    "Moved remote folder"
                );
                Ok(Reconciled {
                    outcome: Outcome::Moved(moved.id),
                    follow_up: self.expand(new).await?,
                })
            }
            Err(e) if e.is_unsupported() => {
                tracing::debug!(from = %old, to = %new, "Move unsupported, re-uploading folder");
                self.delete_path(old).await?;
                self.sync_path(new, EventSource::Live).await
            }
            Err(e) if e.is_not_found() => {
                tracing::warn!(from = %old, to = %new, "Remote folder vanished before move");
                self.manifest.remove_prefix(old);
                self.index.invalidate(old);
                self.sync_path(new, EventSource::Live).await
            }
            Err(e) => Err(Error::remote("move", old, e)),
        }
    }
}
