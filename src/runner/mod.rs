//! Task execution engine
//!
//! This module holds the core of ctask: the task model, dependency
//! resolution, template rendering, the fingerprint cache and the engine that
//! drives them.

pub mod cache;
pub mod command;
pub mod context;
pub mod engine;
pub mod graph;
pub mod manifest;
pub mod task;
pub mod template;

// Re-export main types
pub use cache::*;
pub use command::*;
pub use context::*;
pub use engine::*;
pub use graph::*;
pub use manifest::*;
pub use task::*;
pub use template::*;
