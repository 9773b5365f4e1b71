//! Task model
//!
//! The normalized, format-independent representation of a task. Manifest
//! parsers produce these; the resolver, renderer, cache and engine consume
//! them and never mutate them.

use std::collections::BTreeMap;

/// Names starting with this prefix are hidden from listings.
pub const HIDDEN_PREFIX: char = '_';

/// The command of a task
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Command {
    /// No command: the task only groups its dependencies
    #[default]
    NoCommand,

    /// A single command string
    Single(String),

    /// Tokens rendered one by one and joined with a space
    Tokens(Vec<String>),
}

impl Command {
    pub fn is_none(&self) -> bool {
        matches!(self, Command::NoCommand)
    }

    /// The unrendered command as it would be shown to a user
    pub fn display(&self) -> String {
        match self {
            Command::NoCommand => String::new(),
            Command::Single(cmd) => cmd.clone(),
            Command::Tokens(tokens) => tokens.join(" "),
        }
    }
}

/// A named argument a task accepts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskArg {
    pub name: String,
    pub default: Option<String>,
}

impl TaskArg {
    pub fn new(name: impl Into<String>) -> Self {
        TaskArg {
            name: name.into(),
            default: None,
        }
    }

    pub fn with_default(name: impl Into<String>, default: impl Into<String>) -> Self {
        TaskArg {
            name: name.into(),
            default: Some(default.into()),
        }
    }
}

/// A reference to a task that must run first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDependency {
    /// Name of the referenced task
    pub task: String,

    /// Positional arguments bound for the dependency
    pub args: Vec<String>,

    /// Environment the dependency should run in
    pub environment: Option<String>,
}

impl TaskDependency {
    pub fn new(task: impl Into<String>) -> Self {
        TaskDependency {
            task: task.into(),
            args: Vec::new(),
            environment: None,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }
}

/// Partial task applied when the current platform matches.
///
/// `None` fields fall through to the base task.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TaskOverride {
    pub command: Option<Command>,
    pub args: Option<Vec<TaskArg>>,
    pub depends_on: Option<Vec<TaskDependency>>,
    pub cwd: Option<String>,
    pub env: Option<BTreeMap<String, String>>,
    pub inputs: Option<Vec<String>>,
    pub outputs: Option<Vec<String>>,
    pub clean_env: Option<bool>,
}

impl TaskOverride {
    pub fn is_empty(&self) -> bool {
        *self == TaskOverride::default()
    }
}

/// A single task definition
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Task {
    /// Task name, unique within a manifest
    pub name: String,

    pub command: Command,

    /// Positional arguments, in declaration order
    pub args: Vec<TaskArg>,

    /// Dependencies, in declaration order
    pub depends_on: Vec<TaskDependency>,

    /// Working directory, relative to the project root
    pub cwd: Option<String>,

    /// Extra environment variables for the command
    pub env: BTreeMap<String, String>,

    pub description: Option<String>,

    /// Drop inherited environment variables except a minimal allow-list
    pub clean_env: bool,

    pub default_environment: Option<String>,

    /// Glob patterns of files the task reads
    pub inputs: Vec<String>,

    /// Glob patterns of files the task produces
    pub outputs: Vec<String>,

    /// Per-platform overrides keyed by platform identifier (`linux-64`, ...)
    pub platforms: BTreeMap<String, TaskOverride>,
}

impl Task {
    /// Create a task with a single command
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Task {
            name: name.into(),
            command: Command::Single(command.into()),
            ..Default::default()
        }
    }

    /// Create a task that only groups dependencies
    pub fn alias(name: impl Into<String>, depends_on: &[&str]) -> Self {
        Task {
            name: name.into(),
            depends_on: depends_on.iter().map(|d| TaskDependency::new(*d)).collect(),
            ..Default::default()
        }
    }

    pub fn with_dependency(mut self, dependency: TaskDependency) -> Self {
        self.depends_on.push(dependency);
        self
    }

    pub fn with_arg(mut self, arg: TaskArg) -> Self {
        self.args.push(arg);
        self
    }

    /// True when the task has no command of its own
    pub fn is_alias(&self) -> bool {
        self.command.is_none()
    }

    pub fn is_hidden(&self) -> bool {
        self.name.starts_with(HIDDEN_PREFIX)
    }

    /// True when the task declares inputs or outputs and can be cached
    pub fn is_cache_eligible(&self) -> bool {
        !self.inputs.is_empty() || !self.outputs.is_empty()
    }

    /// Return this task with the override for `platform` merged in.
    ///
    /// Name, description, default environment and the override table itself
    /// are never overridden.
    pub fn resolve_for_platform(&self, platform: &str) -> Task {
        let Some(ov) = self.platforms.get(platform) else {
            return self.clone();
        };

        let mut task = self.clone();
        if let Some(command) = &ov.command {
            task.command = command.clone();
        }
        if let Some(args) = &ov.args {
            task.args = args.clone();
        }
        if let Some(depends_on) = &ov.depends_on {
            task.depends_on = depends_on.clone();
        }
        if let Some(cwd) = &ov.cwd {
            task.cwd = Some(cwd.clone());
        }
        if let Some(env) = &ov.env {
            task.env = env.clone();
        }
        if let Some(inputs) = &ov.inputs {
            task.inputs = inputs.clone();
        }
        if let Some(outputs) = &ov.outputs {
            task.outputs = outputs.clone();
        }
        if let Some(clean_env) = ov.clean_env {
            task.clean_env = clean_env;
        }
        task
    }

    /// Names of the direct dependencies, in declaration order
    pub fn dependency_names(&self) -> Vec<String> {
        self.depends_on.iter().map(|d| d.task.clone()).collect()
    }
}
