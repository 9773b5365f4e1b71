//! Main CLI application

use crate::config::{export_toml, load_manifest_auto};
use crate::error::ConfigError;
use crate::runner::{
    Context, Engine, FingerprintCache, Manifest, RunOptions, SubprocessShell, Verbosity,
};
use anyhow::Context as _;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use colored::Colorize;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Build the clap command
pub fn build_command() -> Command {
    Command::new("ctask")
        .version(crate::VERSION)
        .about("A dependency-aware, caching task runner")
        .arg(
            Arg::new("file")
                .short('f')
                .long("file")
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .help("Path to the task manifest (ctask.yml or ctask.toml)")
                .global(true),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .help("Only print command output and errors")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .arg(
            Arg::new("silent")
                .short('s')
                .long("silent")
                .help("Print no output")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Print verbose output")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(
            Command::new("run")
                .about("Run a task and its dependencies")
                .arg(Arg::new("task").value_name("TASK").help("Task to run"))
                .arg(
                    Arg::new("args")
                        .value_name("ARGS")
                        .help("Positional arguments for the task")
                        .num_args(0..)
                        .trailing_var_arg(true)
                        .allow_hyphen_values(true),
                )
                .arg(
                    Arg::new("environment")
                        .short('e')
                        .long("environment")
                        .value_name("NAME")
                        .help("Environment to run the tasks in"),
                )
                .arg(
                    Arg::new("skip-deps")
                        .long("skip-deps")
                        .help("Run only the named task, not its dependencies")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("dry-run")
                        .short('n')
                        .long("dry-run")
                        .help("Print commands without running them")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("clean-env")
                        .long("clean-env")
                        .help("Run every command with a minimal environment")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("cwd")
                        .long("cwd")
                        .value_name("DIR")
                        .value_parser(value_parser!(PathBuf))
                        .help("Working directory for every command"),
                ),
        )
        .subcommand(
            Command::new("list")
                .about("List the tasks of the manifest")
                .arg(
                    Arg::new("all")
                        .short('a')
                        .long("all")
                        .help("Include hidden tasks")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .help("Print the listing as JSON")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("export")
                .about("Export the manifest as ctask.toml")
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .value_name("FILE")
                        .value_parser(value_parser!(PathBuf))
                        .help("Write to FILE instead of stdout"),
                ),
        )
}

/// Run the CLI with the process arguments, returning the exit code
pub fn run() -> anyhow::Result<i32> {
    run_from(std::env::args_os())
}

/// Run the CLI with explicit arguments
pub fn run_from<I, T>(args: I) -> anyhow::Result<i32>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let mut command = build_command();
    let matches = command.clone().get_matches_from(args);
    let verbosity = get_verbosity(&matches);

    let Some((name, sub_matches)) = matches.subcommand() else {
        command.print_help()?;
        println!();
        return Ok(0);
    };

    let manifest = load_manifest_auto(matches.get_one::<PathBuf>("file").map(PathBuf::as_path))?;
    debug!(manifest = ?manifest.path, tasks = manifest.len(), "manifest ready");

    match name {
        "run" => run_task(&manifest, sub_matches, verbosity),
        "list" => list_tasks(&manifest, sub_matches),
        "export" => export_manifest(&manifest, sub_matches),
        other => anyhow::bail!("unknown subcommand '{}'", other),
    }
}

fn run_task(manifest: &Manifest, matches: &ArgMatches, verbosity: Verbosity) -> anyhow::Result<i32> {
    let root = match matches.get_one::<String>("task") {
        Some(task) => task.clone(),
        None => manifest
            .default_task
            .clone()
            .ok_or(ConfigError::NoDefaultTask)?,
    };
    let args: Vec<String> = matches
        .get_many::<String>("args")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();
    let environment = matches.get_one::<String>("environment").map(String::as_str);

    let mut context = Context::new().with_verbosity(verbosity);
    if let Some(path) = &manifest.path {
        context = context.with_manifest_path(path.clone());
    }
    if let Some(interpreter) = &manifest.interpreter {
        context = context.with_interpreter(interpreter.clone());
    }

    let options = RunOptions {
        skip_deps: matches.get_flag("skip-deps"),
        dry_run: matches.get_flag("dry-run"),
        clean_env: matches.get_flag("clean-env"),
        cwd: matches
            .get_one::<PathBuf>("cwd")
            .map(|dir| context.working_dir.join(dir)),
    };

    let project_dir = context.project_dir();
    let cache = FingerprintCache::for_project(&project_dir);
    if let Some(cache) = &cache {
        debug!(dir = %cache.dir().display(), "using fingerprint cache");
    }

    let shell = SubprocessShell::new(context.interpreter.clone());
    let mut engine = Engine::new(manifest, &context, shell)
        .with_cache(cache)
        .with_options(options);

    engine.run(&root, &args, environment)?;
    Ok(0)
}

fn list_tasks(manifest: &Manifest, matches: &ArgMatches) -> anyhow::Result<i32> {
    let show_hidden = matches.get_flag("all");
    let tasks: Vec<_> = manifest
        .list()
        .into_iter()
        .filter(|t| show_hidden || !t.hidden)
        .collect();

    if matches.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&tasks)?);
        return Ok(0);
    }

    if tasks.is_empty() {
        println!("No tasks defined");
        return Ok(0);
    }

    let width = tasks.iter().map(|t| t.name.len()).max().unwrap_or(0);
    for task in &tasks {
        let mut line = format!("{:width$}", task.name, width = width).bold().to_string();
        if let Some(description) = &task.description {
            line.push_str("  ");
            line.push_str(description);
        }
        if !task.dependencies.is_empty() {
            let deps = format!("  [depends on: {}]", task.dependencies.join(", "));
            line.push_str(&deps.dimmed().to_string());
        }
        println!("{}", line);
    }
    Ok(0)
}

fn export_manifest(manifest: &Manifest, matches: &ArgMatches) -> anyhow::Result<i32> {
    let exported = export_toml(manifest)?;
    match matches.get_one::<PathBuf>("output") {
        Some(path) => write_export(path, &exported)?,
        None => print!("{}", exported),
    }
    Ok(0)
}

fn write_export(path: &Path, contents: &str) -> anyhow::Result<()> {
    fs::write(path, contents).with_context(|| format!("Failed to write '{}'", path.display()))
}

/// Get verbosity level from matches
fn get_verbosity(matches: &ArgMatches) -> Verbosity {
    if matches.get_flag("silent") {
        Verbosity::Silent
    } else if matches.get_flag("quiet") {
        Verbosity::Quiet
    } else if matches.get_flag("verbose") {
        Verbosity::Verbose
    } else {
        Verbosity::Normal
    }
}
