//! Root-relative path handling
//!
//! Every path the sync engine reasons about is relative to the watched
//! directory. [`RelPath`] keeps that form canonical: forward slashes, no
//! empty, `.` or `..` segments, and the empty string for the root itself.
//! Native paths only appear at I/O boundaries.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A normalized path relative to the watched root.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RelPath {
    inner: String,
}

impl RelPath {
    /// The watched root itself.
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a relative path, accepting either slash style.
    ///
    /// `.` segments and repeated separators are dropped. A `..` segment or
    /// an absolute path is rejected.
    pub fn new(path: &str) -> Result<Self> {
        let unified = path.replace('\\', "/");
        if unified.starts_with('/') {
            return Err(Error::InvalidPath {
                path: path.to_string(),
                reason: "absolute path".into(),
            });
        }

        let mut segments = Vec::new();
        for segment in unified.split('/') {
            match segment {
                "" | "." => continue,
                ".." => {
                    return Err(Error::InvalidPath {
                        path: path.to_string(),
                        reason: "parent segment".into(),
                    });
                }
                other => segments.push(other),
            }
        }

        Ok(Self {
            inner: segments.join("/"),
        })
    }

    /// Express `path` relative to `root`.
    ///
    /// Both paths must already be in the same form (both canonical, or both
    /// as handed out by the same walker).
    pub fn from_native(root: &Path, path: &Path) -> Result<Self> {
        let relative = path.strip_prefix(root).map_err(|_| Error::PathOutsideRoot {
            path: path.to_path_buf(),
            root: root.to_path_buf(),
        })?;

        let mut segments = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(name) => match name.to_str() {
                    Some(name) => segments.push(name.to_owned()),
                    None => {
                        return Err(Error::InvalidPath {
                            path: path.to_string_lossy().into_owned(),
                            reason: "name is not valid UTF-8".into(),
                        });
                    }
                },
                Component::CurDir => {}
                _ => {
                    return Err(Error::PathOutsideRoot {
                        path: path.to_path_buf(),
                        root: root.to_path_buf(),
                    });
                }
            }
        }

        Ok(Self {
            inner: segments.join("/"),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.inner
    }

    pub fn is_root(&self) -> bool {
        self.inner.is_empty()
    }

    /// Iterate the path segments from the root down.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.inner.split('/').filter(|s| !s.is_empty())
    }

    /// Number of segments; the root has depth zero.
    pub fn depth(&self) -> usize {
        self.segments().count()
    }

    /// Parent directory. The root has no parent; a top-level entry's parent
    /// is the root.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        match self.inner.rfind('/') {
            Some(idx) => Some(Self {
                inner: self.inner[..idx].to_string(),
            }),
            None => Some(Self::root()),
        }
    }

    /// Last segment, `None` for the root.
    pub fn file_name(&self) -> Option<&str> {
        if self.is_root() {
            return None;
        }
        self.inner.rsplit('/').next()
    }

    /// Append a single segment or a relative sub-path.
    pub fn join(&self, segment: &str) -> Result<Self> {
        let tail = Self::new(segment)?;
        Ok(self.join_rel(&tail))
    }

    fn join_rel(&self, tail: &RelPath) -> Self {
        if self.is_root() {
            return tail.clone();
        }
        if tail.is_root() {
            return self.clone();
        }
        Self {
            inner: format!("{}/{}", self.inner, tail.inner),
        }
    }

    /// Segment-aware prefix test: `a/b/c` starts with `a/b`, `a/bc` does not.
    pub fn starts_with(&self, prefix: &RelPath) -> bool {
        if prefix.is_root() {
            return true;
        }
        self.inner == prefix.inner
            || (self.inner.starts_with(&prefix.inner)
                && self.inner.as_bytes().get(prefix.inner.len()) == Some(&b'/'))
    }

    /// Remove `prefix` from the front of this path.
    pub fn strip_prefix(&self, prefix: &RelPath) -> Option<Self> {
        if !self.starts_with(prefix) {
            return None;
        }
        if prefix.is_root() {
            return Some(self.clone());
        }
        let rest = self.inner[prefix.inner.len()..].trim_start_matches('/');
        Some(Self {
            inner: rest.to_string(),
        })
    }

    /// Move this path from under `from` to under `to`.
    pub fn rebase(&self, from: &RelPath, to: &RelPath) -> Option<Self> {
        self.strip_prefix(from).map(|rest| to.join_rel(&rest))
    }

    /// Resolve against the watched root on disk.
    pub fn to_native(&self, root: &Path) -> PathBuf {
        self.segments().fold(root.to_path_buf(), |acc, s| acc.join(s))
    }
}

impl fmt::Display for RelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            write!(f, ".")
        } else {
            write!(f, "{}", self.inner)
        }
    }
}

impl AsRef<str> for RelPath {
    fn as_ref(&self) -> &str {
        &self.inner
    }
}

impl TryFrom<String> for RelPath {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(&value)
    }
}

impl TryFrom<&str> for RelPath {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl From<RelPath> for String {
    fn from(path: RelPath) -> Self {
        path.inner
    }
}

/// Canonicalize the watched root without UNC prefixes on Windows.
///
/// Change notifications report canonical paths, so the root used to strip
/// them must be canonical as well.
pub fn canonical_root(path: &Path) -> Result<PathBuf> {
    dunce::canonicalize(path).map_err(|e| Error::io(path, e))
}
