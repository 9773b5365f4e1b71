//! Manifest discovery and parsing

use crate::config::types::{
    RawArg, RawCommand, RawDefinition, RawDependency, RawDependsOn, RawManifest, RawTask,
    RawTaskTable, Scalar,
};
use crate::error::{ConfigError, ConfigResult};
use crate::runner::{Command, Manifest, Task, TaskArg, TaskDependency, TaskOverride};
use std::collections::{BTreeMap, HashSet};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Manifest file names searched for, in priority order
pub const CONFIG_FILE_NAMES: &[&str] = &["ctask.yml", "ctask.yaml", "ctask.toml"];

/// Everything a parser extracts from one manifest file
#[derive(Debug, Clone, Default)]
pub struct ParsedManifest {
    /// Tasks in declaration order
    pub tasks: Vec<Task>,
    pub default_task: Option<String>,
    pub interpreter: Option<Vec<String>>,
}

impl ParsedManifest {
    /// Build a [`Manifest`], checking names and the default task
    pub fn into_manifest(self, path: Option<PathBuf>) -> ConfigResult<Manifest> {
        if let Some(default) = &self.default_task {
            if !self.tasks.iter().any(|t| &t.name == default) {
                return Err(ConfigError::Parse(format!(
                    "default task '{}' is not defined",
                    default
                )));
            }
        }

        let mut manifest = Manifest::new(self.tasks)?
            .with_default_task(self.default_task)
            .with_interpreter(self.interpreter);
        if let Some(path) = path {
            manifest = manifest.with_path(path);
        }
        Ok(manifest)
    }
}

/// A manifest format. Each format turns source text into the same task model.
pub trait ManifestParser {
    fn parse(&self, source: &str) -> ConfigResult<ParsedManifest>;
}

/// `ctask.yml` / `ctask.yaml`
#[derive(Debug, Clone, Copy, Default)]
pub struct YamlManifestParser;

impl ManifestParser for YamlManifestParser {
    fn parse(&self, source: &str) -> ConfigResult<ParsedManifest> {
        if source.trim().is_empty() {
            return Ok(ParsedManifest::default());
        }
        let raw: RawManifest =
            serde_yaml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))?;
        normalize_manifest(raw)
    }
}

/// `ctask.toml`
#[derive(Debug, Clone, Copy, Default)]
pub struct TomlManifestParser;

impl ManifestParser for TomlManifestParser {
    fn parse(&self, source: &str) -> ConfigResult<ParsedManifest> {
        let raw: RawManifest =
            toml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))?;
        normalize_manifest(raw)
    }
}

/// Pick a parser from the file extension
pub fn parser_for(path: &Path) -> ConfigResult<Box<dyn ManifestParser>> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("yml") | Some("yaml") => Ok(Box::new(YamlManifestParser)),
        Some("toml") => Ok(Box::new(TomlManifestParser)),
        _ => Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
    }
}

/// Find the manifest by searching the current and parent directories
pub fn find_manifest() -> ConfigResult<PathBuf> {
    let cwd = env::current_dir().map_err(|e| ConfigError::Read {
        path: PathBuf::from("."),
        error: e.to_string(),
    })?;
    find_manifest_from(cwd)
}

/// Find the manifest starting from a specific directory
pub fn find_manifest_from(start_dir: PathBuf) -> ConfigResult<PathBuf> {
    let mut current_dir = start_dir;
    let mut searched_paths = Vec::new();

    loop {
        for file_name in CONFIG_FILE_NAMES {
            let candidate = current_dir.join(file_name);
            searched_paths.push(candidate.display().to_string());

            if candidate.is_file() {
                return Ok(candidate);
            }
        }

        match current_dir.parent() {
            Some(parent) => current_dir = parent.to_path_buf(),
            None => return Err(ConfigError::NotFound(searched_paths.join(", "))),
        }
    }
}

/// Read and parse a manifest file
pub fn load_manifest(path: &Path) -> ConfigResult<Manifest> {
    let parser = parser_for(path)?;
    let contents = fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.to_path_buf(),
        error: e.to_string(),
    })?;

    let parsed = parser.parse(&contents)?;
    debug!(path = %path.display(), tasks = parsed.tasks.len(), "loaded manifest");

    let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    parsed.into_manifest(Some(path))
}

/// Load an explicit manifest, or discover one from the current directory
pub fn load_manifest_auto(explicit: Option<&Path>) -> ConfigResult<Manifest> {
    match explicit {
        Some(path) => load_manifest(path),
        None => load_manifest(&find_manifest()?),
    }
}

fn normalize_manifest(raw: RawManifest) -> ConfigResult<ParsedManifest> {
    let mut tasks = raw
        .tasks
        .0
        .into_iter()
        .map(|(name, task)| normalize_task(name, task))
        .collect::<ConfigResult<Vec<_>>>()?;

    for (platform, section) in raw.target {
        apply_target_section(&mut tasks, &platform, section.tasks)?;
    }

    Ok(ParsedManifest {
        tasks,
        default_task: raw.default,
        interpreter: raw.interpreter.map(|i| i.into_argv()),
    })
}

fn apply_target_section(
    tasks: &mut [Task],
    platform: &str,
    section: RawTaskTable,
) -> ConfigResult<()> {
    for (name, raw) in section.0 {
        let task = tasks
            .iter_mut()
            .find(|t| t.name == name)
            .ok_or_else(|| ConfigError::InvalidTask {
                task: name.clone(),
                reason: format!("override for '{}' has no base definition", platform),
            })?;

        let definition = match raw {
            RawTask::Command(cmd) => RawDefinition {
                cmd: Some(RawCommand::Single(cmd)),
                ..Default::default()
            },
            RawTask::Alias(deps) => RawDefinition {
                depends_on: Some(RawDependsOn::Many(
                    deps.into_iter().map(RawDependency::Name).collect(),
                )),
                ..Default::default()
            },
            RawTask::Definition(def) => *def,
        };

        let ov = normalize_override(&name, platform, definition)?;
        task.platforms.insert(platform.to_string(), ov);
    }
    Ok(())
}

/// Turn one raw entry into a [`Task`]
pub fn normalize_task(name: String, raw: RawTask) -> ConfigResult<Task> {
    if name.trim().is_empty() {
        return Err(ConfigError::InvalidTask {
            task: name,
            reason: "task name is empty".to_string(),
        });
    }

    let definition = match raw {
        RawTask::Command(cmd) => return Ok(Task::new(name, cmd)),
        RawTask::Alias(deps) => {
            return Ok(Task {
                name,
                depends_on: deps.into_iter().map(TaskDependency::new).collect(),
                ..Default::default()
            })
        }
        RawTask::Definition(def) => *def,
    };

    let mut platforms = BTreeMap::new();
    for (platform, ov) in definition.target {
        platforms.insert(platform.clone(), normalize_override(&name, &platform, ov)?);
    }

    let args = match definition.args {
        Some(args) => normalize_args(&name, args)?,
        None => Vec::new(),
    };

    Ok(Task {
        command: definition.cmd.map(normalize_command).unwrap_or_default(),
        args,
        depends_on: definition
            .depends_on
            .map(|d| d.into_vec().into_iter().map(normalize_dependency).collect())
            .unwrap_or_default(),
        cwd: definition.cwd,
        env: definition.env.map(normalize_env).unwrap_or_default(),
        description: definition.description,
        clean_env: definition.clean_env.unwrap_or(false),
        default_environment: definition.default_environment,
        inputs: definition.inputs.unwrap_or_default(),
        outputs: definition.outputs.unwrap_or_default(),
        platforms,
        name,
    })
}

fn normalize_override(task: &str, platform: &str, def: RawDefinition) -> ConfigResult<TaskOverride> {
    let invalid = |field: &str| ConfigError::InvalidTask {
        task: task.to_string(),
        reason: format!("'{}' cannot be overridden for platform '{}'", field, platform),
    };
    if def.description.is_some() {
        return Err(invalid("description"));
    }
    if def.default_environment.is_some() {
        return Err(invalid("default-environment"));
    }
    if !def.target.is_empty() {
        return Err(invalid("target"));
    }

    Ok(TaskOverride {
        command: def.cmd.map(normalize_command),
        args: def.args.map(|a| normalize_args(task, a)).transpose()?,
        depends_on: def
            .depends_on
            .map(|d| d.into_vec().into_iter().map(normalize_dependency).collect()),
        cwd: def.cwd,
        env: def.env.map(normalize_env),
        inputs: def.inputs,
        outputs: def.outputs,
        clean_env: def.clean_env,
    })
}

fn normalize_command(cmd: RawCommand) -> Command {
    match cmd {
        RawCommand::Single(cmd) => Command::Single(cmd),
        RawCommand::Tokens(tokens) => Command::Tokens(tokens),
    }
}

/// Argument names must be usable in templates, unique, and every argument
/// after one with a default must have a default too.
fn normalize_args(task: &str, raw: Vec<RawArg>) -> ConfigResult<Vec<TaskArg>> {
    let invalid = |reason: String| ConfigError::InvalidTask {
        task: task.to_string(),
        reason,
    };

    let mut seen = HashSet::new();
    let mut args = Vec::with_capacity(raw.len());
    for arg in raw {
        let arg = match arg {
            RawArg::Name(name) => TaskArg::new(name),
            RawArg::Detailed { arg, default } => TaskArg {
                name: arg,
                default: default.map(|d| d.to_string()),
            },
        };

        if !is_identifier(&arg.name) {
            return Err(invalid(format!("invalid argument name '{}'", arg.name)));
        }
        if !seen.insert(arg.name.clone()) {
            return Err(invalid(format!("argument '{}' is declared twice", arg.name)));
        }
        if arg.default.is_none() && args.iter().any(|a: &TaskArg| a.default.is_some()) {
            return Err(invalid(format!(
                "argument '{}' has no default but follows one that does",
                arg.name
            )));
        }
        args.push(arg);
    }
    Ok(args)
}

fn normalize_dependency(dep: RawDependency) -> TaskDependency {
    match dep {
        RawDependency::Name(name) => TaskDependency::new(name),
        RawDependency::Detailed {
            task,
            args,
            environment,
        } => TaskDependency {
            task,
            args: args.iter().map(ToString::to_string).collect(),
            environment,
        },
    }
}

fn normalize_env(env: BTreeMap<String, Scalar>) -> BTreeMap<String, String> {
    env.into_iter().map(|(k, v)| (k, v.to_string())).collect()
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
