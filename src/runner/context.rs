//! Execution context
//!
//! The context carries the host facts templates can see (platform, active
//! environment, manifest location) plus the settings that shape how commands
//! are invoked and how much is printed.

use colored::Colorize;
use std::collections::BTreeMap;
use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Execution context shared by every node of a run
#[derive(Debug, Clone)]
pub struct Context {
    /// Platform identifier, e.g. `linux-64` or `osx-arm64`
    pub platform: String,

    /// Name of the ambient active environment
    pub environment_name: String,

    /// Root path of the ambient active environment
    pub environment_root: PathBuf,

    /// Manifest file path
    pub manifest_path: Option<PathBuf>,

    /// Directory ctask was invoked from
    pub working_dir: PathBuf,

    /// Interpreter argv prefix (e.g. `["sh", "-c"]`)
    pub interpreter: Vec<String>,

    /// Environment variables inherited by commands
    pub ambient_env: BTreeMap<String, String>,

    /// Verbosity level
    pub verbosity: Verbosity,
}

/// Verbosity levels for output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    Silent = 0,
    Quiet = 1,
    Normal = 2,
    Verbose = 3,
}

impl Context {
    /// Create a context from the current process and host
    pub fn new() -> Self {
        let ambient_env = utf8_vars(env::vars_os());
        let (environment_name, environment_root) = active_environment(&ambient_env);

        Context {
            platform: host_platform(),
            environment_name,
            environment_root,
            manifest_path: None,
            working_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            interpreter: default_interpreter(),
            ambient_env,
            verbosity: Verbosity::Normal,
        }
    }

    /// Create a context with a specific working directory
    pub fn with_working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = dir;
        self
    }

    /// Set the manifest file path
    pub fn with_manifest_path(mut self, path: PathBuf) -> Self {
        self.manifest_path = Some(path);
        self
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = platform.into();
        self
    }

    /// Replace the inherited environment variables
    pub fn with_ambient_env(mut self, vars: BTreeMap<String, String>) -> Self {
        self.ambient_env = vars;
        self
    }

    /// Set the interpreter
    pub fn with_interpreter(mut self, interpreter: Vec<String>) -> Self {
        self.interpreter = interpreter;
        self
    }

    /// Set verbosity level
    pub fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Directory relative task paths resolve against: the manifest's
    /// directory, or the invocation directory when there is no manifest.
    pub fn project_dir(&self) -> PathBuf {
        self.manifest_path
            .as_ref()
            .and_then(|p| p.parent())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.working_dir.clone())
    }

    pub fn is_windows(&self) -> bool {
        self.platform.starts_with("win-")
    }

    pub fn is_linux(&self) -> bool {
        self.platform.starts_with("linux-")
    }

    pub fn is_macos(&self) -> bool {
        self.platform.starts_with("osx-")
    }

    pub fn is_unix(&self) -> bool {
        !self.is_windows()
    }

    /// Print a line about a command about to run
    pub fn print_run(&self, task_name: &str, command: &str) {
        if self.verbosity >= Verbosity::Normal {
            println!("{} {}: {}", "[run]".green().bold(), task_name, command);
        }
    }

    /// Print a line about a node skipped on a cache hit
    pub fn print_cached(&self, task_name: &str) {
        if self.verbosity >= Verbosity::Normal {
            println!("{} {}", "[cached]".cyan().bold(), task_name);
        }
    }

    /// Print a line about an alias node
    pub fn print_alias(&self, task_name: &str) {
        if self.verbosity >= Verbosity::Verbose {
            println!("{} {}", "[alias]".dimmed(), task_name);
        }
    }

    /// Print what a dry run would execute
    pub fn print_dry_run(&self, task_name: &str, command: &str) {
        if self.verbosity >= Verbosity::Quiet {
            println!("{} {}: {}", "[dry-run]".yellow().bold(), task_name, command);
        }
    }

    /// Print a failure line
    pub fn print_failed(&self, task_name: &str, code: i32) {
        if self.verbosity >= Verbosity::Quiet {
            eprintln!("{} {} (exit {})", "[failed]".red().bold(), task_name, code);
        }
    }

    /// Print detail lines, only in verbose mode
    pub fn print_detail(&self, label: &str, values: &[String]) {
        if self.verbosity >= Verbosity::Verbose && !values.is_empty() {
            println!("    {} {}", format!("{}:", label).dimmed(), values.join(", "));
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

/// Platform identifier of the host, in `<os>-<arch>` form
pub fn host_platform() -> String {
    let os = match env::consts::OS {
        "macos" => "osx",
        "windows" => "win",
        other => other,
    };
    let arch = match env::consts::ARCH {
        "x86_64" => "64",
        "x86" => "32",
        "aarch64" if os == "linux" => "aarch64",
        "aarch64" => "arm64",
        "powerpc64" => "ppc64le",
        other => other,
    };
    format!("{}-{}", os, arch)
}

/// Default interpreter for the host
pub fn default_interpreter() -> Vec<String> {
    if cfg!(windows) {
        vec!["cmd".to_string(), "/d".to_string(), "/c".to_string()]
    } else {
        vec!["sh".to_string(), "-c".to_string()]
    }
}

/// Keep the variables whose name and value are both valid UTF-8
fn utf8_vars(vars: impl IntoIterator<Item = (OsString, OsString)>) -> BTreeMap<String, String> {
    let mut kept = BTreeMap::new();
    for (name, value) in vars {
        match (name.into_string(), value.into_string()) {
            (Ok(name), Ok(value)) => {
                kept.insert(name, value);
            }
            (Ok(name), Err(_)) => {
                warn!(name = %name, "skipping environment variable with non UTF-8 value");
            }
            (Err(name), _) => {
                warn!(name = %name.to_string_lossy(), "skipping environment variable with non UTF-8 name");
            }
        }
    }
    kept
}

/// Active environment name and root from the inherited variables
fn active_environment(vars: &BTreeMap<String, String>) -> (String, PathBuf) {
    match vars.get("CONDA_PREFIX") {
        Some(prefix) if !prefix.is_empty() => {
            let root = PathBuf::from(prefix);
            let name = vars
                .get("CONDA_DEFAULT_ENV")
                .cloned()
                .or_else(|| root.file_name().map(|n| n.to_string_lossy().into_owned()))
                .unwrap_or_else(|| "base".to_string());
            (name, root)
        }
        _ => ("base".to_string(), PathBuf::new()),
    }
}
