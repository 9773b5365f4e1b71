//! ctask - a dependency-aware, caching task runner
//!
//! ctask reads named shell commands from a project manifest, resolves their
//! dependencies, renders command templates, skips work whose inputs are
//! unchanged and runs the rest through the host shell.

// Public modules
pub mod cli;
pub mod config;
pub mod error;
pub mod runner;

// Re-export commonly used types
pub use error::{Result, TaskError};

/// Current version of ctask
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
