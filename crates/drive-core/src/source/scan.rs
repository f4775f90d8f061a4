//! Full recursive scan of the watched tree
//!
//! The scan compares what is on disk with the manifest and yields only the
//! work that is actually needed:
//!
//! - every directory as `created`, parents before children, so empty
//!   folders are mirrored
//! - files without a manifest entry as `created`
//! - files whose modification time moved and whose fingerprint changed as
//!   `modified`; a moved time with identical content only refreshes the
//!   manifest
//! - manifest entries whose file is gone as `deleted`, after the walk
//!
//! Entries are visited in sorted order, so running the scan twice over an
//! unchanged tree yields the same sequence. Symbolic links are not followed.

use std::collections::HashSet;
use std::fs::{self, FileType};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use drive_fs::{RelPath, compute_file_checksum};

use super::{ChangeEvent, EventSource, IgnoreRules};
use crate::manifest::ManifestStore;
use crate::{Error, Result};

type DirEntries = std::vec::IntoIter<(PathBuf, FileType)>;

/// Lazy, finite iterator over the changes found by walking the tree.
pub struct FullScan {
    root: PathBuf,
    manifest: Arc<ManifestStore>,
    ignore: IgnoreRules,
    start: Option<(PathBuf, RelPath)>,
    stack: Vec<DirEntries>,
    seen: HashSet<RelPath>,
    track_deletions: bool,
    deletions: Option<std::vec::IntoIter<RelPath>>,
}

impl FullScan {
    /// Scan the whole tree under `root`, which must be canonical.
    pub fn new(root: &Path, manifest: Arc<ManifestStore>, ignore: IgnoreRules) -> Self {
        Self {
            root: root.to_path_buf(),
            manifest,
            ignore,
            start: Some((root.to_path_buf(), RelPath::root())),
            stack: Vec::new(),
            seen: HashSet::new(),
            track_deletions: true,
            deletions: None,
        }
    }

    /// Scan only below `dir`, without reporting deletions.
    ///
    /// Used when a directory appears with content already inside it.
    pub fn subtree(
        root: &Path,
        dir: &RelPath,
        manifest: Arc<ManifestStore>,
        ignore: IgnoreRules,
    ) -> Self {
        Self {
            start: Some((dir.to_native(root), dir.clone())),
            track_deletions: false,
            ..Self::new(root, manifest, ignore)
        }
    }

    fn open_dir(&mut self, dir: &Path, rel: &RelPath) -> Result<()> {
        let mut entries = fs::read_dir(dir)
            .and_then(|iter| {
                iter.map(|entry| entry.and_then(|e| Ok((e.path(), e.file_type()?))))
                    .collect::<std::io::Result<Vec<_>>>()
            })
            .map_err(|e| Error::local_io(rel, e))?;
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        self.stack.push(entries.into_iter());
        Ok(())
    }

    fn evaluate_file(&mut self, rel: RelPath, path: &Path) -> Result<Option<ChangeEvent>> {
        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::local_io(&rel, e)),
        };
        let modified: DateTime<Utc> = metadata
            .modified()
            .map_err(|e| Error::local_io(&rel, e))?
            .into();

        self.seen.insert(rel.clone());

        let Some(entry) = self.manifest.lookup(&rel) else {
            return Ok(Some(ChangeEvent::created(rel, EventSource::Scan)));
        };

        if entry.modified_time == modified {
            tracing::trace!(path = %rel, "Unchanged since last sync");
            return Ok(None);
        }

        match compute_file_checksum(path) {
            Ok(fingerprint) if fingerprint == entry.fingerprint => {
                tracing::debug!(path = %rel, "Content unchanged, refreshing recorded time");
                self.manifest.touch(&rel, modified);
                Ok(None)
            }
            Ok(_) => Ok(Some(ChangeEvent::modified(rel, EventSource::Scan))),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                self.seen.remove(&rel);
                Ok(None)
            }
            Err(e) => Err(Error::local_io(&rel, e)),
        }
    }

    /// Tracked paths neither visited nor present on disk.
    fn vanished(&self) -> Vec<RelPath> {
        self.manifest
            .paths()
            .into_iter()
            .filter(|path| !self.seen.contains(path) && !self.ignore.is_ignored(path))
            .filter(|path| {
                matches!(
                    fs::symlink_metadata(path.to_native(&self.root)),
                    Err(e) if e.kind() == ErrorKind::NotFound
                )
            })
            .collect()
    }
}

impl Iterator for FullScan {
    type Item = Result<ChangeEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some((dir, rel)) = self.start.take()
            && let Err(e) = self.open_dir(&dir, &rel)
        {
            return Some(Err(e));
        }

        while let Some(entries) = self.stack.last_mut() {
            let Some((path, file_type)) = entries.next() else {
                self.stack.pop();
                continue;
            };

            let rel = match RelPath::from_native(&self.root, &path) {
                Ok(rel) => rel,
                Err(e) => return Some(Err(e.into())),
            };
            if file_type.is_symlink() || self.ignore.is_ignored(&rel) {
                continue;
            }

            if file_type.is_dir() {
                if let Err(e) = self.open_dir(&path, &rel) {
                    return Some(Err(e));
                }
                return Some(Ok(ChangeEvent::created(rel, EventSource::Scan)));
            }

            if !file_type.is_file() {
                continue;
            }
            match self.evaluate_file(rel, &path) {
                Ok(Some(event)) => return Some(Ok(event)),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }

        if !self.track_deletions {
            return None;
        }
        if self.deletions.is_none() {
            self.deletions = Some(self.vanished().into_iter());
        }
        self.deletions
            .as_mut()
            .and_then(Iterator::next)
            .map(|path| Ok(ChangeEvent::deleted(path, EventSource::Scan)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ManifestEntry;
    use crate::remote::RemoteId;
    use crate::source::ChangeKind;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn rel(path: &str) -> RelPath {
        RelPath::new(path).unwrap()
    }

    fn tree() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let root = drive_fs::canonical_root(dir.path()).unwrap();
        (dir, root)
    }

    fn scan(root: &Path, manifest: &Arc<ManifestStore>) -> Vec<(ChangeKind, String)> {
        FullScan::new(root, manifest.clone(), IgnoreRules::new())
            .map(|event| {
                let event = event.unwrap();
                (event.kind, event.path.to_string())
            })
            .collect()
    }

    fn record(manifest: &ManifestStore, root: &Path, path: &str) {
        let native = rel(path).to_native(root);
        let modified: DateTime<Utc> = fs::metadata(&native).unwrap().modified().unwrap().into();
        let fingerprint = compute_file_checksum(&native).unwrap();
        manifest.upsert(
            rel(path),
            ManifestEntry::new(RemoteId::new(path), modified, fingerprint),
        );
    }

    #[test]
    fn new_tree_yields_folders_before_their_files() {
        let (_dir, root) = tree();
        fs::create_dir_all(root.join("a/empty")).unwrap();
        fs::write(root.join("a/b.txt"), "b").unwrap();
        fs::write(root.join("top.txt"), "top").unwrap();

        let events = scan(&root, &Arc::new(ManifestStore::in_memory()));

        assert_eq!(
            events,
            vec![
                (ChangeKind::Created, "a".to_string()),
                (ChangeKind::Created, "a/b.txt".to_string()),
                (ChangeKind::Created, "a/empty".to_string()),
                (ChangeKind::Created, "top.txt".to_string()),
            ]
        );
    }

    #[test]
    fn recorded_files_are_skipped() {
        let (_dir, root) = tree();
        fs::write(root.join("same.txt"), "same").unwrap();
        let manifest = Arc::new(ManifestStore::in_memory());
        record(&manifest, &root, "same.txt");

        assert!(scan(&root, &manifest).is_empty());
    }

    #[test]
    fn newer_time_with_same_content_only_touches_manifest() {
        let (_dir, root) = tree();
        fs::write(root.join("same.txt"), "same").unwrap();
        let manifest = Arc::new(ManifestStore::in_memory());
        record(&manifest, &root, "same.txt");

        let mut entry = manifest.lookup(&rel("same.txt")).unwrap();
        let on_disk = entry.modified_time;
        entry.modified_time = on_disk - chrono::Duration::seconds(60);
        manifest.upsert(rel("same.txt"), entry);

        assert!(scan(&root, &manifest).is_empty());
        assert_eq!(manifest.lookup(&rel("same.txt")).unwrap().modified_time, on_disk);
    }

    #[test]
    fn changed_content_is_modified() {
        let (_dir, root) = tree();
        fs::write(root.join("doc.txt"), "v1").unwrap();
        let manifest = Arc::new(ManifestStore::in_memory());
        record(&manifest, &root, "doc.txt");

        let mut entry = manifest.lookup(&rel("doc.txt")).unwrap();
        entry.modified_time -= chrono::Duration::seconds(60);
        entry.fingerprint = "sha256:stale".into();
        manifest.upsert(rel("doc.txt"), entry);

        assert_eq!(
            scan(&root, &manifest),
            vec![(ChangeKind::Modified, "doc.txt".to_string())]
        );
    }

    #[test]
    fn vanished_files_are_deleted_after_walk() {
        let (_dir, root) = tree();
        fs::write(root.join("kept.txt"), "kept").unwrap();
        let manifest = Arc::new(ManifestStore::in_memory());
        record(&manifest, &root, "kept.txt");
        manifest.upsert(
            rel("gone/old.txt"),
            ManifestEntry::new(RemoteId::new("old"), Utc::now(), "sha256:old"),
        );

        assert_eq!(
            scan(&root, &manifest),
            vec![(ChangeKind::Deleted, "gone/old.txt".to_string())]
        );
    }

    #[test]
    fn subtree_scan_reports_no_deletions() {
        let (_dir, root) = tree();
        fs::create_dir_all(root.join("new/inner")).unwrap();
        fs::write(root.join("new/inner/x.txt"), "x").unwrap();
        let manifest = Arc::new(ManifestStore::in_memory());
        manifest.upsert(
            rel("elsewhere.txt"),
            ManifestEntry::new(RemoteId::new("e"), Utc::now(), "sha256:e"),
        );

        let events: Vec<String> =
            FullScan::subtree(&root, &rel("new"), manifest, IgnoreRules::new())
                .map(|event| event.unwrap().path.to_string())
                .collect();

        assert_eq!(events, vec!["new/inner", "new/inner/x.txt"]);
    }

    #[test]
    fn ignored_files_are_not_reported() {
        let (_dir, root) = tree();
        fs::write(root.join("files.json"), "{}").unwrap();
        fs::write(root.join(".files.json.1.0.tmp"), "").unwrap();
        fs::write(root.join("real.txt"), "real").unwrap();
        let ignore = IgnoreRules::new().with_file(&root, &root.join("files.json"));

        let events: Vec<String> =
            FullScan::new(&root, Arc::new(ManifestStore::in_memory()), ignore)
                .map(|event| event.unwrap().path.to_string())
                .collect();

        assert_eq!(events, vec!["real.txt"]);
    }
}
