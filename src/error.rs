//! Error types for ctask

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for ctask operations
pub type Result<T> = std::result::Result<T, TaskError>;

/// Main error type for ctask
#[derive(Error, Debug)]
pub enum TaskError {
    /// Manifest-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Dependency graph errors
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// Template rendering errors
    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    /// Task execution errors
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TaskError {
    /// Process exit status that mirrors this error.
    ///
    /// A failed command propagates the child's own exit code; everything
    /// else maps to `1`.
    pub fn exit_code(&self) -> i32 {
        match self {
            TaskError::Execution(ExecutionError::CommandFailed { code, .. }) => *code,
            _ => 1,
        }
    }
}

/// Manifest discovery, parsing and validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No task manifest found (searched: {0})")]
    NotFound(String),

    #[error("Failed to read '{path}': {error}")]
    Read { path: PathBuf, error: String },

    #[error("Failed to parse manifest: {0}")]
    Parse(String),

    #[error("Invalid task '{task}': {reason}")]
    InvalidTask { task: String, reason: String },

    #[error("Task '{0}' is defined more than once")]
    DuplicateTask(String),

    #[error("Unsupported manifest format: {0}")]
    UnsupportedFormat(PathBuf),

    #[error("No task given and the manifest declares no default task")]
    NoDefaultTask,
}

/// Dependency resolution errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum GraphError {
    #[error("{}", unknown_task_message(.name, .referrer.as_deref()))]
    UnknownTask {
        name: String,
        referrer: Option<String>,
    },

    #[error("Cyclic dependency detected: {}", .cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },
}

fn unknown_task_message(name: &str, referrer: Option<&str>) -> String {
    match referrer {
        Some(referrer) => format!("Task '{}' (required by '{}') is not defined", name, referrer),
        None => format!("Task '{}' is not defined", name),
    }
}

/// Template rendering errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("Missing required argument '{name}'")]
    MissingArgument { name: String },

    #[error("Invalid template syntax: {message}")]
    Syntax { message: String },

    #[error("Template rendering failed: {message}")]
    Render { message: String },
}

impl TemplateError {
    pub(crate) fn syntax(message: impl Into<String>) -> Self {
        TemplateError::Syntax {
            message: message.into(),
        }
    }

    pub(crate) fn render(message: impl Into<String>) -> Self {
        TemplateError::Render {
            message: message.into(),
        }
    }
}

/// Task execution errors
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Task '{task}' failed with exit code {code}")]
    CommandFailed { task: String, code: i32 },

    #[error("Task '{task}' could not be started: {error}")]
    Spawn { task: String, error: String },

    #[error("Task '{task}': {source}")]
    Prepare {
        task: String,
        #[source]
        source: TemplateError,
    },
}

/// Fingerprint store errors. These never abort a run.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache I/O error on '{path}': {error}")]
    Io { path: PathBuf, error: io::Error },

    #[error("Corrupt cache record '{path}': {error}")]
    Json {
        path: PathBuf,
        error: serde_json::Error,
    },
}

/// Specialized result type for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Specialized result type for graph resolution
pub type GraphResult<T> = std::result::Result<T, GraphError>;

/// Specialized result type for template rendering
pub type TemplateResult<T> = std::result::Result<T, TemplateError>;

/// Specialized result type for execution operations
pub type ExecutionResult<T> = std::result::Result<T, ExecutionError>;

/// Specialized result type for fingerprint store operations
pub type CacheResult<T> = std::result::Result<T, CacheError>;
