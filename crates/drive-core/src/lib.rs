//! Synchronization engine for drive-sync
//!
//! Mirrors a local directory tree onto a hierarchical remote object store.
//! The crate provides:
//!
//! - **Manifest store**: durable local path to remote object mapping
//! - **Remote tree index**: cached folder path to remote id resolution with
//!   single-flight folder creation
//! - **Change source**: full-scan and live (notify based) change events in one
//!   normalized shape
//! - **Reconciler**: per-path remote create/update/move/delete decisions
//! - **Monitor**: the driver tying the pieces together, with a bounded worker
//!   pool and per-path ordering
//!
//! # Architecture
//!
//! ```text
//!                 drive-cli (bootstrap, remote client)
//!                        |
//!                   drive-core
//!                        |
//!                    drive-fs
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use drive_core::{EngineOptions, ManifestStore, Monitor, Settings};
//!
//! async fn example(client: Arc<dyn drive_core::RemoteClient>) -> drive_core::Result<()> {
//!     let settings = Settings::load("parameters.json".as_ref())?;
//!     let manifest = Arc::new(ManifestStore::from_settings(&settings, "files.json".as_ref()));
//!     let monitor = Monitor::new(settings, client, manifest, EngineOptions::default())?;
//!     let report = monitor.push().await?;
//!     println!("{} files uploaded", report.created);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod index;
pub mod manifest;
pub mod remote;
pub mod source;
pub mod sync;

pub use config::{EngineOptions, Settings};
pub use error::{Error, Result};
pub use index::RemoteTreeIndex;
pub use manifest::{ManifestEntry, ManifestStore};
pub use remote::{
    ListPage, Listing, RemoteClient, RemoteError, RemoteId, RemoteKind, RemoteObject, RetryPolicy,
};
pub use source::{ChangeEvent, ChangeKind, EventSource, IgnoreRules};
pub use sync::{
    Dispatcher, Engine, Monitor, Outcome, PathState, Reconciled, Reconciler, SyncReport,
};

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn error_config_missing_displays_path() {
        let path = PathBuf::from("/path/to/parameters.json");
        let error = Error::ConfigMissing { path: path.clone() };

        let display = format!("{}", error);
        assert!(
            display.contains("/path/to/parameters.json"),
            "Error display should contain the path, got: {}",
            display
        );
    }

    #[test]
    fn remote_error_wraps_operation_and_path() {
        let error = Error::remote(
            "create_file",
            &drive_fs::RelPath::new("a/b.txt").unwrap(),
            RemoteError::transient("connection reset"),
        );

        let display = format!("{}", error);
        assert!(display.contains("create_file"));
        assert!(display.contains("a/b.txt"));
        assert!(error.is_transient());
    }
}
