//! Shared test utilities for the drive-sync workspace.
//!
//! This crate provides the fixtures the engine's test suites share. It is a
//! dev-dependency only, never published.
//!
//! # Modules
//!
//! - [`remote`]: [`MemoryRemote`], an in-memory remote service with call
//!   recording and fault injection
//! - [`tree`]: [`TestTree`], a temporary watched directory builder

pub mod remote;
pub mod tree;

pub use remote::{Call, MemoryRemote, Op};
pub use tree::TestTree;
