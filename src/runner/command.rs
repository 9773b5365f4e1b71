//! Shell command execution
//!
//! The engine hands a fully rendered command to a [`Shell`]. The default
//! [`SubprocessShell`] runs it through the host interpreter and waits for it.

use crate::error::{ExecutionError, ExecutionResult};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{Command as StdCommand, Stdio};
use tracing::debug;

/// Variables kept when a task asks for a clean environment
pub const CLEAN_ENV_ALLOWLIST: &[&str] = &[
    "PATH",
    "HOME",
    "USER",
    "LOGNAME",
    "SHELL",
    "TERM",
    "LANG",
    "SYSTEMROOT",
    "COMSPEC",
    "TEMP",
    "TMP",
];

/// One command ready to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Task the command belongs to
    pub task: String,

    /// Rendered command line
    pub command: String,

    pub working_dir: PathBuf,

    /// The complete environment of the child process
    pub env: BTreeMap<String, String>,

    /// Environment the task was resolved for
    pub environment: String,
}

/// Something that can run a command and report its exit code
pub trait Shell {
    fn run(&mut self, invocation: &Invocation) -> ExecutionResult<i32>;
}

/// Runs commands through an interpreter such as `sh -c`
#[derive(Debug, Clone)]
pub struct SubprocessShell {
    interpreter: Vec<String>,
}

impl SubprocessShell {
    pub fn new(interpreter: Vec<String>) -> Self {
        SubprocessShell { interpreter }
    }

    /// The argv used for `command`
    pub fn argv(&self, command: &str) -> Vec<String> {
        let mut argv = self.interpreter.clone();
        argv.push(command.to_string());
        argv
    }
}

impl Shell for SubprocessShell {
    fn run(&mut self, invocation: &Invocation) -> ExecutionResult<i32> {
        let argv = self.argv(&invocation.command);
        let (program, args) = argv.split_first().ok_or_else(|| ExecutionError::Spawn {
            task: invocation.task.clone(),
            error: "no interpreter configured".to_string(),
        })?;

        debug!(
            task = %invocation.task,
            cwd = %invocation.working_dir.display(),
            environment = %invocation.environment,
            "spawning command"
        );

        let mut command = StdCommand::new(program);
        command
            .args(args)
            .current_dir(&invocation.working_dir)
            .env_clear()
            .envs(&invocation.env)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        let status = command.status().map_err(|e| ExecutionError::Spawn {
            task: invocation.task.clone(),
            error: e.to_string(),
        })?;

        // A child killed by a signal has no code; report it as a failure.
        Ok(status.code().unwrap_or(1))
    }
}

/// Build a child environment from the inherited variables and the task's own.
///
/// With `clean` set only [`CLEAN_ENV_ALLOWLIST`] survives from `ambient`.
/// Task variables always win.
pub fn build_env(
    ambient: &BTreeMap<String, String>,
    extra: &BTreeMap<String, String>,
    clean: bool,
) -> BTreeMap<String, String> {
    let mut env: BTreeMap<String, String> = if clean {
        ambient
            .iter()
            .filter(|(key, _)| CLEAN_ENV_ALLOWLIST.contains(&key.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    } else {
        ambient.clone()
    };
    env.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
    env
}
