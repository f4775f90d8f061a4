//! Remote tree index: folder path to remote id cache
//!
//! Resolving `a/b/c` on the remote service costs one lookup per segment.
//! The index remembers folder ids it has seen so later files under the same
//! folders skip those lookups. A cached id is only a positive hint: a miss
//! always falls through to the service, and nothing here assumes the cache
//! is complete.
//!
//! Each path owns a [`OnceCell`]. Concurrent resolutions of the same path
//! await the same cell, so at most one lookup-or-create is in flight per
//! folder and a missing folder is created once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use drive_fs::RelPath;
use tokio::sync::OnceCell;

use crate::remote::{Listing, RemoteClient, RemoteId, RetryPolicy};
use crate::{Error, Result};

type Cells = HashMap<RelPath, Arc<OnceCell<RemoteId>>>;

/// Cached mapping of folder paths below the base folder to remote ids.
pub struct RemoteTreeIndex {
    client: Arc<dyn RemoteClient>,
    retry: RetryPolicy,
    root_id: RemoteId,
    cells: Mutex<Cells>,
}

impl RemoteTreeIndex {
    /// Create an index rooted at the base folder `root_id`.
    pub fn new(client: Arc<dyn RemoteClient>, root_id: RemoteId, retry: RetryPolicy) -> Self {
        Self {
            client,
            retry,
            root_id,
            cells: Mutex::new(HashMap::new()),
        }
    }

    /// Id of the base folder
    pub fn root_id(&self) -> &RemoteId {
        &self.root_id
    }

    fn lock(&self) -> MutexGuard<'_, Cells> {
        self.cells.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn cell(&self, path: &RelPath) -> Arc<OnceCell<RemoteId>> {
        self.lock().entry(path.clone()).or_default().clone()
    }

    /// Cached id for `path`, without contacting the service.
    pub fn cached(&self, path: &RelPath) -> Option<RemoteId> {
        if path.is_root() {
            return Some(self.root_id.clone());
        }
        self.lock().get(path).and_then(|cell| cell.get().cloned())
    }

    /// Number of folders with a known id, excluding the base folder.
    pub fn len(&self) -> usize {
        self.lock().values().filter(|cell| cell.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record a known folder id.
    pub fn insert(&self, path: RelPath, id: RemoteId) {
        if path.is_root() {
            return;
        }
        self.lock()
            .insert(path, Arc::new(OnceCell::new_with(Some(id))));
    }

    /// Forget `path` and every folder below it.
    pub fn invalidate(&self, path: &RelPath) {
        if path.is_root() {
            self.lock().clear();
            return;
        }
        self.lock().retain(|cached, _| !cached.starts_with(path));
    }

    /// Replace the subtree at `old` with a single entry for the moved folder.
    ///
    /// Folders below the new location are looked up again on demand.
    pub fn rekey(&self, old: &RelPath, new: RelPath, id: RemoteId) {
        self.invalidate(old);
        self.invalidate(&new);
        self.insert(new, id);
    }

    /// Resolve the folder at `path`, creating any missing segment.
    ///
    /// Each segment is looked up by name under its parent. When several
    /// folders share the name, the first listed one is used and a warning is
    /// logged; duplicates are never merged or created.
    pub async fn resolve_or_create_folder(&self, path: &RelPath) -> Result<RemoteId> {
        let mut parent_id = self.root_id.clone();
        let mut current = RelPath::root();

        for segment in path.segments() {
            current = current.join(segment)?;
            let cell = self.cell(&current);
            let parent = parent_id.clone();
            let id = cell
                .get_or_try_init(|| self.lookup_or_create(&parent, segment, &current))
                .await?;
            parent_id = id.clone();
        }

        Ok(parent_id)
    }

    /// Resolve the folder at `path` without creating anything.
    ///
    /// Returns `None` as soon as one segment is missing remotely.
    pub async fn find_folder(&self, path: &RelPath) -> Result<Option<RemoteId>> {
        let mut parent_id = self.root_id.clone();
        let mut current = RelPath::root();

        for segment in path.segments() {
            current = current.join(segment)?;
            let cell = self.cell(&current);
            if let Some(id) = cell.get() {
                parent_id = id.clone();
                continue;
            }

            match self.lookup(&parent_id, segment, &current).await? {
                Some(id) => {
                    // Another task may have filled the cell meanwhile; its
                    // value wins.
                    let _ = cell.set(id.clone());
                    parent_id = cell.get().cloned().unwrap_or(id);
                }
                None => return Ok(None),
            }
        }

        Ok(Some(parent_id))
    }

    async fn lookup(
        &self,
        parent: &RemoteId,
        name: &str,
        path: &RelPath,
    ) -> Result<Option<RemoteId>> {
        let matches = Listing::new(self.client.as_ref(), self.retry, Some(parent), Some(name))
            .folders_named(name)
            .await
            .map_err(|e| Error::remote("list", path, e))?;

        if matches.len() > 1 {
            let duplicate = Error::duplicate_name(Some(parent), name, matches.len());
            tracing::warn!(path = %path, "{duplicate}");
        }

        Ok(matches.into_iter().next().map(|folder| folder.id))
    }

    async fn lookup_or_create(
        &self,
        parent: &RemoteId,
        name: &str,
        path: &RelPath,
    ) -> Result<RemoteId> {
        if let Some(id) = self.lookup(parent, name, path).await? {
            tracing::debug!(path = %path, remote_id = %id, "Found remote folder");
            return Ok(id);
        }

        let client = self.client.as_ref();
        let created = self
            .retry
            .run("create_folder", || client.create_folder(Some(parent), name))
            .await
            .map_err(|e| Error::remote("create_folder", path, e))?;

        tracing::info!(path = %path, remote_id = %created.id, "Created remote folder");
        Ok(created.id)
    }
}

/// Find the base folder by name among the remote root's children, creating
/// it when absent.
///
/// # Errors
///
/// Returns [`Error::BaseFolderUnavailable`] once retries are exhausted.
pub async fn resolve_base_folder(
    client: &dyn RemoteClient,
    name: &str,
    retry: RetryPolicy,
) -> Result<RemoteId> {
    let unavailable = |source| Error::BaseFolderUnavailable {
        name: name.to_string(),
        source,
    };

    let matches = Listing::new(client, retry, None, Some(name))
        .folders_named(name)
        .await
        .map_err(unavailable)?;

    if let Some(first) = matches.first() {
        if matches.len() > 1 {
            let duplicate = Error::duplicate_name(None, name, matches.len());
            tracing::warn!("{duplicate}");
        }
        tracing::info!(name, remote_id = %first.id, "Using existing base folder");
        return Ok(first.id.clone());
    }

    let created = retry
        .run("create_folder", || client.create_folder(None, name))
        .await
        .map_err(unavailable)?;

    tracing::info!(name, remote_id = %created.id, "Created base folder");
    Ok(created.id)
}
