//! Local filesystem primitives for drive-sync
//!
//! Provides root-relative path handling, content fingerprints, crash-safe
//! writes and format-agnostic configuration loading.

pub mod checksum;
pub mod config;
pub mod error;
pub mod io;
pub mod path;

pub use checksum::{compute_content_checksum, compute_file_checksum};
pub use config::ConfigStore;
pub use error::{Error, Result};
pub use io::write_atomic;
pub use path::{RelPath, canonical_root};
