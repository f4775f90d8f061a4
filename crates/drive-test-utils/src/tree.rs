//! [`TestTree`]: a temporary watched directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use drive_core::Settings;
use tempfile::TempDir;

/// A temporary directory standing in for the watched tree, with helpers
/// that keep modification times strictly increasing per file.
///
/// Filesystems with coarse timestamps can give a rewritten file the same
/// modification time it had before; [`TestTree::write`] bumps the time so
/// the engine always sees a rewrite as a change in time.
///
/// # Example
///
/// ```rust,no_run
/// use drive_test_utils::TestTree;
///
/// let tree = TestTree::new();
/// tree.write("a/b.txt", "hello");
/// tree.rename("a/b.txt", "a/c.txt");
/// assert!(tree.path("a/c.txt").exists());
/// ```
pub struct TestTree {
    temp_dir: TempDir,
    root: PathBuf,
}

impl Default for TestTree {
    fn default() -> Self {
        Self::new()
    }
}

impl TestTree {
    /// Create an empty temporary directory.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("TestTree::new: failed to create temp dir");
        let root = drive_fs::canonical_root(temp_dir.path())
            .expect("TestTree::new: failed to canonicalize temp dir");
        Self { temp_dir, root }
    }

    /// Canonical root of the tree.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The underlying temporary directory, kept alive by this value.
    pub fn temp_dir(&self) -> &TempDir {
        &self.temp_dir
    }

    /// Native path of a slash-separated relative path.
    pub fn path(&self, relative: &str) -> PathBuf {
        relative
            .split('/')
            .filter(|s| !s.is_empty())
            .fold(self.root.clone(), |acc, s| acc.join(s))
    }

    /// Write a file, creating parent directories.
    pub fn write(&self, relative: &str, content: impl AsRef<[u8]>) -> PathBuf {
        let path = self.path(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("TestTree::write: failed to create parents");
        }
        let previous = fs::metadata(&path).and_then(|m| m.modified()).ok();
        fs::write(&path, content).expect("TestTree::write: failed to write file");

        if let Some(previous) = previous {
            let now = SystemTime::now();
            let bumped = now.max(previous + Duration::from_secs(1));
            fs::File::options()
                .write(true)
                .open(&path)
                .and_then(|file| file.set_modified(bumped))
                .expect("TestTree::write: failed to bump modification time");
        }
        path
    }

    /// Create a directory and its parents.
    pub fn mkdir(&self, relative: &str) -> PathBuf {
        let path = self.path(relative);
        fs::create_dir_all(&path).expect("TestTree::mkdir: failed to create directory");
        path
    }

    /// Remove a file or a directory tree.
    pub fn remove(&self, relative: &str) {
        let path = self.path(relative);
        if path.is_dir() {
            fs::remove_dir_all(&path).expect("TestTree::remove: failed to remove directory");
        } else {
            fs::remove_file(&path).expect("TestTree::remove: failed to remove file");
        }
    }

    /// Rename a file or directory, creating the destination's parents.
    pub fn rename(&self, from: &str, to: &str) -> PathBuf {
        let target = self.path(to);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).expect("TestTree::rename: failed to create parents");
        }
        fs::rename(self.path(from), &target).expect("TestTree::rename: failed to rename");
        target
    }

    pub fn read(&self, relative: &str) -> Vec<u8> {
        fs::read(self.path(relative)).expect("TestTree::read: failed to read file")
    }

    /// Settings mirroring this tree into a base folder called `folder`.
    pub fn settings(&self, folder: &str) -> Settings {
        Settings {
            drive_folder_name: folder.to_string(),
            path_to_folder: self.root.clone(),
            update_on_start: false,
            update_save: false,
        }
    }
}
