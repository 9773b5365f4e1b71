//! Resolved manifest: an ordered, name-indexed task list

use crate::error::{ConfigError, ConfigResult};
use crate::runner::Task;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The tasks of one manifest, in declaration order
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    /// Path of the manifest file, if it came from disk
    pub path: Option<PathBuf>,

    /// Task run when none is named
    pub default_task: Option<String>,

    /// Interpreter argv prefix, e.g. `["bash", "-c"]`
    pub interpreter: Option<Vec<String>>,

    tasks: Vec<Task>,
    index: HashMap<String, usize>,
}

/// One row of a task listing
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct TaskSummary {
    pub name: String,
    pub description: Option<String>,
    pub dependencies: Vec<String>,
    pub hidden: bool,
}

impl Manifest {
    /// Build a manifest, rejecting duplicate task names
    pub fn new(tasks: Vec<Task>) -> ConfigResult<Self> {
        let mut index = HashMap::with_capacity(tasks.len());
        for (i, task) in tasks.iter().enumerate() {
            if index.insert(task.name.clone(), i).is_some() {
                return Err(ConfigError::DuplicateTask(task.name.clone()));
            }
        }

        Ok(Manifest {
            path: None,
            default_task: None,
            interpreter: None,
            tasks,
            index,
        })
    }

    pub fn with_path(mut self, path: PathBuf) -> Self {
        self.path = Some(path);
        self
    }

    pub fn with_default_task(mut self, name: Option<String>) -> Self {
        self.default_task = name;
        self
    }

    pub fn with_interpreter(mut self, interpreter: Option<Vec<String>>) -> Self {
        self.interpreter = interpreter;
        self
    }

    /// Look up a task by name
    pub fn get(&self, name: &str) -> Option<&Task> {
        self.index.get(name).map(|&i| &self.tasks[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// All tasks in declaration order
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Directory the manifest lives in, used as the project root
    pub fn root_dir(&self) -> Option<&Path> {
        self.path.as_deref().and_then(Path::parent)
    }

    /// Every task with its listing metadata, hidden tasks included
    pub fn list(&self) -> Vec<TaskSummary> {
        self.tasks
            .iter()
            .map(|task| TaskSummary {
                name: task.name.clone(),
                description: task.description.clone(),
                dependencies: task.dependency_names(),
                hidden: task.is_hidden(),
            })
            .collect()
    }
}
