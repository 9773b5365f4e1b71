//! Manifest loading and export
//!
//! This module discovers `ctask.yml` / `ctask.toml` manifests, parses them
//! into the task model and writes the model back out.

pub mod export;
pub mod parse;
pub mod types;

// Re-export main types
pub use export::*;
pub use parse::*;
pub use types::*;
