//! Change source: local changes in one normalized shape
//!
//! Two producers feed the reconciler:
//!
//! - [`scan`]: a finite full walk of the watched tree, compared against the
//!   manifest
//! - [`watch`]: live filesystem notifications, debounced and with renames
//!   correlated by [`EventNormalizer`]
//!
//! Both emit [`ChangeEvent`]s relative to the watched root.

mod normalizer;
pub mod scan;
pub mod watch;

pub use normalizer::{EventNormalizer, RawEvent};
pub use scan::FullScan;

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use drive_fs::RelPath;

/// What happened to a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
    Renamed,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
            Self::Renamed => "renamed",
        };
        f.write_str(name)
    }
}

/// Which producer emitted an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventSource {
    /// Full recursive scan; the scan itself visits every subdirectory
    Scan,
    /// Live notification; a new directory may arrive with content already
    /// inside it
    Live,
}

/// A normalized local change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub path: RelPath,
    /// Previous location, set for [`ChangeKind::Renamed`] only
    pub old_path: Option<RelPath>,
    pub source: EventSource,
}

impl ChangeEvent {
    pub fn new(kind: ChangeKind, path: RelPath, source: EventSource) -> Self {
        Self {
            kind,
            path,
            old_path: None,
            source,
        }
    }

    pub fn created(path: RelPath, source: EventSource) -> Self {
        Self::new(ChangeKind::Created, path, source)
    }

    pub fn modified(path: RelPath, source: EventSource) -> Self {
        Self::new(ChangeKind::Modified, path, source)
    }

    pub fn deleted(path: RelPath, source: EventSource) -> Self {
        Self::new(ChangeKind::Deleted, path, source)
    }

    pub fn renamed(from: RelPath, to: RelPath, source: EventSource) -> Self {
        Self {
            kind: ChangeKind::Renamed,
            path: to,
            old_path: Some(from),
            source,
        }
    }
}

impl fmt::Display for ChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.old_path {
            Some(old) => write!(f, "{} {} -> {}", self.kind, old, self.path),
            None => write!(f, "{} {}", self.kind, self.path),
        }
    }
}

/// Paths inside the watched tree that are never mirrored.
///
/// Always covers the temp files left by in-flight atomic writes; the
/// manifest and settings files are added when they live inside the tree.
#[derive(Debug, Clone, Default)]
pub struct IgnoreRules {
    exact: HashSet<RelPath>,
}

impl IgnoreRules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ignore `file` when it lies inside `root`.
    pub fn with_file(mut self, root: &Path, file: &Path) -> Self {
        let file = canonical_file(file).unwrap_or_else(|| file.to_path_buf());
        if let Ok(rel) = RelPath::from_native(root, &file)
            && !rel.is_root()
        {
            tracing::debug!(path = %rel, "Ignoring engine file inside watched tree");
            self.exact.insert(rel);
        }
        self
    }

    pub fn is_ignored(&self, path: &RelPath) -> bool {
        if path.is_root() {
            return false;
        }
        if self.exact.contains(path) {
            return true;
        }
        path.file_name().is_some_and(drive_fs::io::is_temp_artifact)
    }
}

/// Canonical form of `file` whose parent exists, even if `file` does not yet.
fn canonical_file(file: &Path) -> Option<std::path::PathBuf> {
    let parent = file.parent()?;
    let name = file.file_name()?;
    drive_fs::canonical_root(parent)
        .ok()
        .map(|dir| dir.join(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn rel(path: &str) -> RelPath {
        RelPath::new(path).unwrap()
    }

    #[test]
    fn temp_artifacts_are_ignored() {
        let rules = IgnoreRules::new();
        assert!(rules.is_ignored(&rel("a/.files.json.42.0.tmp")));
        assert!(!rules.is_ignored(&rel("a/notes.tmp")));
        assert!(!rules.is_ignored(&rel("a/b.txt")));
    }

    #[test]
    fn engine_files_inside_root_are_ignored() {
        let dir = TempDir::new().unwrap();
        let root = drive_fs::canonical_root(dir.path()).unwrap();
        let rules = IgnoreRules::new().with_file(&root, &root.join("files.json"));

        assert!(rules.is_ignored(&rel("files.json")));
        assert!(!rules.is_ignored(&rel("sub/files.json")));
    }

    #[test]
    fn files_outside_root_add_nothing() {
        let root = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();
        let root_path = drive_fs::canonical_root(root.path()).unwrap();
        let rules = IgnoreRules::new().with_file(&root_path, &other.path().join("files.json"));

        assert!(!rules.is_ignored(&rel("files.json")));
    }

    #[test]
    fn renamed_event_displays_both_paths() {
        let event = ChangeEvent::renamed(rel("a.txt"), rel("b.txt"), EventSource::Live);
        assert_eq!(event.to_string(), "renamed a.txt -> b.txt");
    }
}
