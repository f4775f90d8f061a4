//! Manifest store: local path to remote object mapping
//!
//! The manifest remembers, for every synchronized file, which remote object
//! mirrors it and what its content looked like at the time. It is held in
//! memory and persisted as a JSON object keyed by relative path:
//!
//! ```json
//! {
//!   "a/b.txt": {
//!     "remote_id": "1x2y3z",
//!     "modified_time": "2024-05-01T12:00:00.123456789Z",
//!     "fingerprint": "sha256:..."
//!   }
//! }
//! ```
//!
//! Mutations only touch memory. [`ManifestStore::flush`] writes the whole
//! mapping with write-new-then-rename, so the previous file stays readable
//! until the new one is complete.

mod entry;

pub use entry::ManifestEntry;

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use drive_fs::{RelPath, io};
use fs2::FileExt;

use crate::config::Settings;
use crate::{Error, Result};

type Entries = BTreeMap<RelPath, ManifestEntry>;

/// Single owner of all manifest entries.
#[derive(Debug, Default)]
pub struct ManifestStore {
    /// Backing file; `None` keeps the manifest in memory only
    path: Option<PathBuf>,
    entries: RwLock<Entries>,
    dirty: AtomicBool,
    flush_lock: Mutex<()>,
}

impl ManifestStore {
    /// A manifest that is never persisted.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the manifest backed by `path`.
    ///
    /// A missing or empty file is an empty manifest; the file is created on
    /// the first flush.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ManifestCorrupt`] when the file cannot be parsed and
    /// an I/O error when it cannot be read.
    pub fn open(path: &Path) -> Result<Self> {
        let entries = if path.exists() {
            read_entries(path)?
        } else {
            Entries::new()
        };

        tracing::debug!(path = %path.display(), entries = entries.len(), "Loaded manifest");
        Ok(Self {
            path: Some(path.to_path_buf()),
            entries: RwLock::new(entries),
            dirty: AtomicBool::new(false),
            flush_lock: Mutex::new(()),
        })
    }

    /// Load the manifest, starting empty if it is unreadable.
    ///
    /// An empty manifest only costs extra remote lookups, so a damaged file
    /// never stops a run. The bad file is replaced on the next flush.
    pub fn open_or_reset(path: &Path) -> Self {
        match Self::open(path) {
            Ok(store) => store,
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Manifest unreadable, starting from an empty manifest"
                );
                Self {
                    path: Some(path.to_path_buf()),
                    ..Self::default()
                }
            }
        }
    }

    /// Persistent manifest when `update_save` is set, in-memory otherwise.
    pub fn from_settings(settings: &Settings, path: &Path) -> Self {
        if settings.update_save {
            Self::open_or_reset(path)
        } else {
            Self::in_memory()
        }
    }

    /// Backing file, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_persistent(&self) -> bool {
        self.path.is_some()
    }

    /// True when memory holds changes not yet flushed.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    fn read(&self) -> RwLockReadGuard<'_, Entries> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn entries_mut(&self) -> RwLockWriteGuard<'_, Entries> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Write access that marks the store dirty.
    ///
    /// The flag is raised while the guard is held, so a flush that clears it
    /// afterwards cannot serialize the mapping before this write lands.
    fn write(&self) -> RwLockWriteGuard<'_, Entries> {
        let guard = self.entries_mut();
        self.dirty.store(true, Ordering::Release);
        guard
    }

    pub fn lookup(&self, path: &RelPath) -> Option<ManifestEntry> {
        self.read().get(path).cloned()
    }

    pub fn contains(&self, path: &RelPath) -> bool {
        self.read().contains_key(path)
    }

    /// Insert or replace the entry for `path`.
    pub fn upsert(&self, path: RelPath, entry: ManifestEntry) {
        self.write().insert(path, entry);
    }

    pub fn remove(&self, path: &RelPath) -> Option<ManifestEntry> {
        if !self.contains(path) {
            return None;
        }
        self.write().remove(path)
    }

    /// Refresh the recorded modification time of an unchanged file.
    pub fn touch(&self, path: &RelPath, modified_time: DateTime<Utc>) -> bool {
        let mut entries = self.entries_mut();
        match entries.get_mut(path) {
            Some(entry) => {
                if entry.modified_time != modified_time {
                    entry.modified_time = modified_time;
                    self.dirty.store(true, Ordering::Release);
                }
                true
            }
            None => false,
        }
    }

    /// True when some entry lives strictly below `dir`.
    pub fn has_entries_under(&self, dir: &RelPath) -> bool {
        self.read()
            .keys()
            .any(|path| path != dir && path.starts_with(dir))
    }

    /// Remove every entry strictly below `dir`.
    pub fn remove_prefix(&self, dir: &RelPath) -> Vec<(RelPath, ManifestEntry)> {
        if !self.has_entries_under(dir) {
            return Vec::new();
        }
        let mut entries = self.write();
        let doomed: Vec<RelPath> = entries
            .keys()
            .filter(|path| *path != dir && path.starts_with(dir))
            .cloned()
            .collect();
        doomed
            .into_iter()
            .filter_map(|path| entries.remove(&path).map(|entry| (path, entry)))
            .collect()
    }

    /// Move the entry for `old` to `new`, replacing anything at `new`.
    pub fn rekey(&self, old: &RelPath, new: RelPath) -> bool {
        if !self.contains(old) {
            return false;
        }
        let mut entries = self.write();
        match entries.remove(old) {
            Some(entry) => {
                entries.insert(new, entry);
                true
            }
            None => false,
        }
    }

    /// Move every entry below `old_dir` to the same place below `new_dir`.
    pub fn rekey_prefix(&self, old_dir: &RelPath, new_dir: &RelPath) -> usize {
        let moved = self.remove_prefix(old_dir);
        if moved.is_empty() {
            return 0;
        }
        let mut entries = self.write();
        let mut count = 0;
        for (path, entry) in moved {
            if let Some(rebased) = path.rebase(old_dir, new_dir) {
                entries.insert(rebased, entry);
                count += 1;
            }
        }
        count
    }

    /// All tracked paths, sorted.
    pub fn paths(&self) -> Vec<RelPath> {
        self.read().keys().cloned().collect()
    }

    /// Copy of the whole mapping.
    pub fn snapshot(&self) -> BTreeMap<RelPath, ManifestEntry> {
        self.read().clone()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Persist the full mapping.
    ///
    /// Flushes serialize against each other; concurrent mutations keep
    /// going in memory and mark the store dirty for the next flush. A no-op
    /// for in-memory stores and when nothing changed.
    pub fn flush(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let _guard = self.flush_lock.lock().unwrap_or_else(|e| e.into_inner());
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        let content = {
            let entries = self.read();
            serde_json::to_vec_pretty(&*entries)
        };
        let written = content
            .map_err(Error::from)
            .and_then(|bytes| io::write_atomic(path, &bytes).map_err(Error::from));

        match written {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "Flushed manifest");
                Ok(())
            }
            Err(e) => {
                self.dirty.store(true, Ordering::Release);
                Err(e)
            }
        }
    }
}

/// Read entries through a shared lock so a concurrent writer in another
/// process cannot hand us a torn file.
fn read_entries(path: &Path) -> Result<Entries> {
    let file = File::open(path).map_err(|e| drive_fs::Error::io(path, e))?;
    FileExt::lock_shared(&file).map_err(|_| drive_fs::Error::LockFailed {
        path: path.to_path_buf(),
    })?;

    let mut content = String::new();
    (&file)
        .read_to_string(&mut content)
        .map_err(|e| drive_fs::Error::io(path, e))?;

    if content.trim().is_empty() {
        return Ok(Entries::new());
    }

    serde_json::from_str(&content).map_err(|e| Error::ManifestCorrupt {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}
