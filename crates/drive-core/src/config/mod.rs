//! Configuration for the sync engine
//!
//! - [`Settings`]: the user-facing parameters file (remote folder name, local
//!   root, push and persistence switches)
//! - [`EngineOptions`]: tuning knobs for the worker pool, change source and
//!   retry policy

mod options;
mod settings;

pub use options::EngineOptions;
pub use settings::{DEFAULT_MANIFEST_FILE, DEFAULT_SETTINGS_FILE, Settings};
