//! Error types for drive-core

use std::path::PathBuf;

use drive_fs::RelPath;

use crate::remote::{RemoteError, RemoteId};

/// Result type for drive-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in drive-core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Settings file not found at expected path
    #[error("Settings not found at {path}")]
    ConfigMissing { path: PathBuf },

    /// Settings present but unusable
    #[error("Invalid settings: {message}")]
    InvalidSettings { message: String },

    /// Persisted manifest could not be parsed
    #[error("Manifest at {path} is corrupt: {message}")]
    ManifestCorrupt { path: PathBuf, message: String },

    /// A remote call failed for a local path
    #[error("Remote {operation} failed for {path}: {source}")]
    Remote {
        operation: &'static str,
        path: RelPath,
        #[source]
        source: RemoteError,
    },

    /// Reading a local file failed
    #[error("Local I/O error at {path}: {source}")]
    LocalIo {
        path: RelPath,
        #[source]
        source: std::io::Error,
    },

    /// Several remote folders share one name under one parent
    #[error("{count} remote folders named {name:?} under {parent}; using the first")]
    DuplicateRemoteName {
        parent: String,
        name: String,
        count: usize,
    },

    /// The base folder could not be looked up or created
    #[error("Base folder {name:?} could not be resolved or created: {source}")]
    BaseFolderUnavailable {
        name: String,
        #[source]
        source: RemoteError,
    },

    /// Filesystem notification setup failed
    #[error("File watcher error: {0}")]
    Watch(#[from] notify::Error),

    /// Background task failed to complete
    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    // Transparent wrappers for underlying crate errors
    /// Filesystem error from drive-fs
    #[error(transparent)]
    Fs(#[from] drive_fs::Error),

    /// Standard I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn remote(operation: &'static str, path: &RelPath, source: RemoteError) -> Self {
        Self::Remote {
            operation,
            path: path.clone(),
            source,
        }
    }

    pub fn local_io(path: &RelPath, source: std::io::Error) -> Self {
        Self::LocalIo {
            path: path.clone(),
            source,
        }
    }

    pub fn duplicate_name(parent: Option<&RemoteId>, name: &str, count: usize) -> Self {
        Self::DuplicateRemoteName {
            parent: parent.map_or_else(|| "the remote root".to_string(), |p| p.to_string()),
            name: name.to_string(),
            count,
        }
    }

    /// True when retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Remote { source, .. } if source.is_transient())
    }
}
