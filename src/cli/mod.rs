//! CLI interface and argument parsing
//!
//! A thin front-end over the runner: `run`, `list` and `export`.

pub mod app;

// Re-export main types
pub use app::*;
