//! Execution engine
//!
//! Resolves the requested task, renders every node up front so template
//! errors abort before anything is spawned, then runs the nodes one by one,
//! consulting the fingerprint cache along the way.

use crate::error::{ExecutionError, Result, TemplateResult};
use crate::runner::{
    build_env, render, render_command, render_list, ArgumentBindings, CacheSubject, Context,
    FingerprintCache, GraphResolver, Invocation, Manifest, ResolvedNode, Scope, Shell,
};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Options that change how a run behaves
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Run only the requested task, not its dependencies
    pub skip_deps: bool,

    /// Print rendered commands without running them or touching the cache
    pub dry_run: bool,

    /// Force a clean environment for every node
    pub clean_env: bool,

    /// Working directory overriding every node's own
    pub cwd: Option<PathBuf>,
}

/// What happened to one node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    Executed,
    Cached,
    Alias,
    DryRun,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeReport {
    pub task: String,
    pub args: Vec<String>,
    pub status: NodeStatus,
}

/// Outcome of a successful run, in execution order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub nodes: Vec<NodeReport>,
}

impl RunReport {
    /// Names of the nodes with the given status
    pub fn with_status(&self, status: NodeStatus) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|n| n.status == status)
            .map(|n| n.task.as_str())
            .collect()
    }

    fn push(&mut self, node: &ResolvedNode, status: NodeStatus) {
        self.nodes.push(NodeReport {
            task: node.task.name.clone(),
            args: node.args.clone(),
            status,
        });
    }
}

/// A node with its command and patterns rendered
struct PreparedNode {
    node: ResolvedNode,
    environment: String,

    /// `None` for alias tasks
    command: Option<String>,
    working_dir: PathBuf,
    inputs: Vec<String>,
    outputs: Vec<String>,
}

impl PreparedNode {
    fn cache_subject(&self) -> CacheSubject {
        CacheSubject::new(
            &self.node,
            Some(&self.environment),
            self.inputs.clone(),
            self.outputs.clone(),
            self.working_dir.clone(),
        )
    }
}

/// Runs tasks of one manifest
pub struct Engine<'a, S: Shell> {
    manifest: &'a Manifest,
    context: &'a Context,
    cache: Option<FingerprintCache>,
    shell: S,
    options: RunOptions,
}

impl<'a, S: Shell> Engine<'a, S> {
    /// Create an engine without a fingerprint cache
    pub fn new(manifest: &'a Manifest, context: &'a Context, shell: S) -> Self {
        Engine {
            manifest,
            context,
            cache: None,
            shell,
            options: RunOptions::default(),
        }
    }

    pub fn with_cache(mut self, cache: Option<FingerprintCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn shell(&self) -> &S {
        &self.shell
    }

    /// Run `root` and everything it depends on.
    ///
    /// The first non-zero exit stops the run with
    /// [`ExecutionError::CommandFailed`] carrying that exit code.
    pub fn run(
        &mut self,
        root: &str,
        args: &[String],
        environment: Option<&str>,
    ) -> Result<RunReport> {
        let resolver = GraphResolver::new(self.manifest, &self.context.platform);
        let nodes = if self.options.skip_deps {
            vec![resolver.resolve_root(root, args, environment)?]
        } else {
            resolver.resolve(root, args, environment)?
        };

        let prepared = nodes
            .into_iter()
            .map(|node| {
                let task = node.task.name.clone();
                self.prepare(node, environment)
                    .map_err(|source| ExecutionError::Prepare { task, source })
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut report = RunReport::default();
        for node in &prepared {
            let status = self.execute(node)?;
            report.push(&node.node, status);
        }

        info!(root, nodes = report.nodes.len(), "run finished");
        Ok(report)
    }

    /// Bind arguments, pick the environment and render the command, working
    /// directory and cache patterns.
    fn prepare(&self, node: ResolvedNode, requested: Option<&str>) -> TemplateResult<PreparedNode> {
        let environment = self.effective_environment(&node, requested);
        let bindings = ArgumentBindings::bind(&node.task.args, &node.args)?;
        let scope = Scope::from_context(self.context)
            .with_environment(&environment)
            .with_bindings(&bindings);

        let command = render_command(&node.task.command, &scope)?;

        let project_dir = self.project_dir();
        let working_dir = match (&self.options.cwd, &node.task.cwd) {
            (Some(dir), _) => dir.clone(),
            (None, Some(cwd)) => project_dir.join(render(cwd, &scope)?),
            (None, None) => project_dir,
        };
        let inputs = render_list(&node.task.inputs, &scope)?;
        let outputs = render_list(&node.task.outputs, &scope)?;

        Ok(PreparedNode {
            node,
            environment,
            command,
            working_dir,
            inputs,
            outputs,
        })
    }

    fn execute(&mut self, prepared: &PreparedNode) -> Result<NodeStatus> {
        let node = &prepared.node;
        let name = node.name();

        if node.task.is_alias() {
            self.context.print_alias(name);
            return Ok(NodeStatus::Alias);
        }

        let subject = prepared.cache_subject();
        if !self.options.dry_run && subject.is_eligible() {
            if let Some(cache) = &self.cache {
                if cache.should_skip(&subject) {
                    self.context.print_cached(name);
                    return Ok(NodeStatus::Cached);
                }
            }
        }

        let command = prepared.command.clone().unwrap_or_default();

        if self.options.dry_run {
            self.context.print_dry_run(name, &command);
            return Ok(NodeStatus::DryRun);
        }

        self.context.print_run(name, &command);
        self.context.print_detail("inputs", &prepared.inputs);
        self.context.print_detail("outputs", &prepared.outputs);

        let invocation = Invocation {
            task: name.to_string(),
            command,
            working_dir: prepared.working_dir.clone(),
            env: build_env(
                &self.context.ambient_env,
                &node.task.env,
                node.task.clean_env || self.options.clean_env,
            ),
            environment: prepared.environment.clone(),
        };

        let code = self.shell.run(&invocation)?;
        if code != 0 {
            self.context.print_failed(name, code);
            return Err(ExecutionError::CommandFailed {
                task: name.to_string(),
                code,
            }
            .into());
        }

        if subject.is_eligible() {
            if let Some(cache) = &self.cache {
                if let Err(e) = cache.record(&subject) {
                    warn!(task = %name, error = %e, "could not record fingerprints");
                }
            }
        }

        debug!(task = %name, "task succeeded");
        Ok(NodeStatus::Executed)
    }

    /// Explicit environment, then the task's default, then the one its
    /// dependency entry asked for, then the ambient one.
    fn effective_environment(&self, node: &ResolvedNode, requested: Option<&str>) -> String {
        requested
            .or(node.task.default_environment.as_deref())
            .or(node.environment.as_deref())
            .unwrap_or(&self.context.environment_name)
            .to_string()
    }

    fn project_dir(&self) -> PathBuf {
        self.manifest
            .root_dir()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.context.project_dir())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{GraphError, TaskError, TemplateError};
    use crate::runner::{Command, Task, TaskArg, TaskDependency, TaskOverride, Verbosity};
    use std::collections::{BTreeMap, HashMap};
    use std::fs;
    use tempfile::TempDir;

    /// Shell double that records invocations and returns scripted exit codes
    #[derive(Default)]
    struct RecordingShell {
        calls: Vec<Invocation>,
        exit_codes: HashMap<String, i32>,
    }

    impl RecordingShell {
        fn failing(task: &str, code: i32) -> Self {
            RecordingShell {
                exit_codes: HashMap::from([(task.to_string(), code)]),
                ..Default::default()
            }
        }

        fn tasks(&self) -> Vec<&str> {
            self.calls.iter().map(|c| c.task.as_str()).collect()
        }
    }

    impl Shell for RecordingShell {
        fn run(&mut self, invocation: &Invocation) -> crate::error::ExecutionResult<i32> {
            self.calls.push(invocation.clone());
            Ok(self.exit_codes.get(&invocation.task).copied().unwrap_or(0))
        }
    }

    struct Project {
        dir: TempDir,
        context: Context,
    }

    impl Project {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let context = Context::new()
                .with_platform("linux-64")
                .with_working_dir(dir.path().to_path_buf())
                .with_manifest_path(dir.path().join("ctask.yml"))
                .with_ambient_env(BTreeMap::from([
                    ("PATH".to_string(), std::env::var("PATH").unwrap_or_default()),
                    ("OUTSIDE_SECRET".to_string(), "leak".to_string()),
                ]))
                .with_verbosity(Verbosity::Silent);
            Project { dir, context }
        }

        fn manifest(&self, tasks: Vec<Task>) -> Manifest {
            Manifest::new(tasks)
                .unwrap()
                .with_path(self.dir.path().join("ctask.yml"))
        }
    }

    fn chain() -> Vec<Task> {
        vec![
            Task::new("a", "echo a"),
            Task::new("b", "echo b").with_dependency(TaskDependency::new("a")),
            Task::new("c", "echo c").with_dependency(TaskDependency::new("b")),
        ]
    }

    #[test]
    fn test_runs_in_dependency_order() {
        let project = Project::new();
        let manifest = project.manifest(chain());
        let mut engine = Engine::new(&manifest, &project.context, RecordingShell::default());

        let report = engine.run("c", &[], None).unwrap();
        assert_eq!(engine.shell().tasks(), vec!["a", "b", "c"]);
        assert_eq!(report.with_status(NodeStatus::Executed), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_fail_fast_mirrors_exit_code() {
        let project = Project::new();
        let manifest = project.manifest(chain());
        let mut engine = Engine::new(&manifest, &project.context, RecordingShell::failing("b", 3));

        let err = engine.run("c", &[], None).unwrap_err();
        assert_eq!(err.exit_code(), 3);
        assert!(matches!(
            err,
            TaskError::Execution(ExecutionError::CommandFailed { ref task, code: 3 }) if task == "b"
        ));
        assert_eq!(engine.shell().tasks(), vec!["a", "b"]);
    }

    #[test]
    fn test_missing_argument_aborts_before_any_spawn() {
        let project = Project::new();
        let manifest = project.manifest(vec![
            Task::new("setup", "echo setup"),
            Task::new("deploy", "deploy {{ target }}")
                .with_arg(TaskArg::new("target"))
                .with_dependency(TaskDependency::new("setup")),
        ]);
        let mut engine = Engine::new(&manifest, &project.context, RecordingShell::default());

        let err = engine.run("deploy", &[], None).unwrap_err();
        assert!(matches!(
            err,
            TaskError::Execution(ExecutionError::Prepare {
                source: TemplateError::MissingArgument { ref name },
                ..
            }) if name == "target"
        ));
        assert!(engine.shell().calls.is_empty());
    }

    #[test]
    fn test_unknown_dependency_is_graph_error() {
        let project = Project::new();
        let manifest = project.manifest(vec![
            Task::new("a", "echo a").with_dependency(TaskDependency::new("ghost"))
        ]);
        let mut engine = Engine::new(&manifest, &project.context, RecordingShell::default());

        let err = engine.run("a", &[], None).unwrap_err();
        assert!(matches!(err, TaskError::Graph(GraphError::UnknownTask { .. })));
        assert!(engine.shell().calls.is_empty());
    }

    #[test]
    fn test_arguments_render_into_command() {
        let project = Project::new();
        let manifest = project.manifest(vec![Task::new("test", "pytest {{ path }} {{ flags }}")
            .with_arg(TaskArg::with_default("path", "tests/"))
            .with_arg(TaskArg::with_default("flags", "-v"))]);
        let mut engine = Engine::new(&manifest, &project.context, RecordingShell::default());

        engine.run("test", &[], None).unwrap();
        engine.run("test", &["src/".to_string()], None).unwrap();

        let commands: Vec<_> = engine.shell().calls.iter().map(|c| c.command.as_str()).collect();
        assert_eq!(commands, vec!["pytest tests/ -v", "pytest src/ -v"]);
    }

    #[test]
    fn test_dependency_args_and_environment() {
        let project = Project::new();
        let manifest = project.manifest(vec![
            Task::new("greet", "echo {{ who }} in {{ conda.environment_name }}")
                .with_arg(TaskArg::new("who")),
            Task::alias("all", &[])
                .with_dependency(TaskDependency::new("greet").with_args(vec!["alice".into()]))
                .with_dependency(
                    TaskDependency::new("greet")
                        .with_args(vec!["bob".into()])
                        .with_environment("py311"),
                ),
        ]);
        let mut engine = Engine::new(&manifest, &project.context, RecordingShell::default());

        let report = engine.run("all", &[], None).unwrap();
        let commands: Vec<_> = engine.shell().calls.iter().map(|c| c.command.clone()).collect();
        let ambient = &project.context.environment_name;
        assert_eq!(
            commands,
            vec![format!("echo alice in {}", ambient), "echo bob in py311".to_string()]
        );
        assert_eq!(report.with_status(NodeStatus::Alias), vec!["all"]);
    }

    #[test]
    fn test_explicit_environment_wins() {
        let project = Project::new();
        let mut task = Task::new("env", "echo {{ conda.environment_name }}");
        task.default_environment = Some("dev".to_string());
        let manifest = project.manifest(vec![task]);
        let mut engine = Engine::new(&manifest, &project.context, RecordingShell::default());

        engine.run("env", &[], None).unwrap();
        engine.run("env", &[], Some("prod")).unwrap();

        let commands: Vec<_> = engine.shell().calls.iter().map(|c| c.command.as_str()).collect();
        assert_eq!(commands, vec!["echo dev", "echo prod"]);
        assert_eq!(engine.shell().calls[1].environment, "prod");
    }

    #[test]
    fn test_working_dir_and_env() {
        let project = Project::new();
        let mut task = Task::new("build", "make");
        task.cwd = Some("{{ conda.platform }}/out".to_string());
        task.env.insert("MODE".to_string(), "release".to_string());
        let manifest = project.manifest(vec![task]);
        let mut engine = Engine::new(&manifest, &project.context, RecordingShell::default());

        engine.run("build", &[], None).unwrap();
        let call = &engine.shell().calls[0];
        assert_eq!(call.working_dir, project.dir.path().join("linux-64/out"));
        assert_eq!(call.env.get("MODE").map(String::as_str), Some("release"));
        assert!(call.env.contains_key("OUTSIDE_SECRET"));
    }

    #[test]
    fn test_clean_env_option_applies_to_all_nodes() {
        let project = Project::new();
        let manifest = project.manifest(chain());
        let options = RunOptions {
            clean_env: true,
            ..Default::default()
        };
        let mut engine = Engine::new(&manifest, &project.context, RecordingShell::default())
            .with_options(options);

        engine.run("c", &[], None).unwrap();
        for call in &engine.shell().calls {
            assert!(!call.env.contains_key("OUTSIDE_SECRET"));
            assert!(call.env.contains_key("PATH"));
        }
    }

    #[test]
    fn test_platform_override_is_applied() {
        let project = Project::new();
        let mut task = Task::new("build", "make");
        task.platforms.insert(
            "win-64".to_string(),
            TaskOverride {
                command: Some(Command::Single("nmake".to_string())),
                ..Default::default()
            },
        );
        let manifest = project.manifest(vec![task]);

        let mut engine = Engine::new(&manifest, &project.context, RecordingShell::default());
        engine.run("build", &[], None).unwrap();
        assert_eq!(engine.shell().calls[0].command, "make");

        let windows = project.context.clone().with_platform("win-64");
        let mut engine = Engine::new(&manifest, &windows, RecordingShell::default());
        engine.run("build", &[], None).unwrap();
        assert_eq!(engine.shell().calls[0].command, "nmake");
    }

    #[test]
    fn test_skip_deps_runs_only_root() {
        let project = Project::new();
        let manifest = project.manifest(chain());
        let options = RunOptions {
            skip_deps: true,
            ..Default::default()
        };
        let mut engine = Engine::new(&manifest, &project.context, RecordingShell::default())
            .with_options(options);

        engine.run("c", &[], None).unwrap();
        assert_eq!(engine.shell().tasks(), vec!["c"]);
    }

    #[test]
    fn test_dry_run_spawns_nothing_and_skips_cache() {
        let project = Project::new();
        let cache_dir = TempDir::new().unwrap();
        let mut task = Task::new("gen", "touch out.txt");
        task.outputs = vec!["out.txt".to_string()];
        let manifest = project.manifest(vec![task]);
        let options = RunOptions {
            dry_run: true,
            ..Default::default()
        };
        let mut engine = Engine::new(&manifest, &project.context, RecordingShell::default())
            .with_cache(Some(FingerprintCache::new(cache_dir.path().to_path_buf())))
            .with_options(options);

        let report = engine.run("gen", &[], None).unwrap();
        assert_eq!(report.with_status(NodeStatus::DryRun), vec!["gen"]);
        assert!(engine.shell().calls.is_empty());
        assert_eq!(fs::read_dir(cache_dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_cache_round_trip() {
        let project = Project::new();
        let cache_dir = TempDir::new().unwrap();
        let input = project.dir.path().join("src.txt");
        fs::write(&input, "hello").unwrap();

        let mut task = Task::new("build", "cp src.txt out.txt");
        task.inputs = vec!["src.txt".to_string()];
        let manifest = project.manifest(vec![task]);
        let mut engine = Engine::new(&manifest, &project.context, RecordingShell::default())
            .with_cache(Some(FingerprintCache::new(cache_dir.path().to_path_buf())));

        let first = engine.run("build", &[], None).unwrap();
        assert_eq!(first.with_status(NodeStatus::Executed), vec!["build"]);

        let second = engine.run("build", &[], None).unwrap();
        assert_eq!(second.with_status(NodeStatus::Cached), vec!["build"]);

        fs::write(&input, "hello!").unwrap();
        let third = engine.run("build", &[], None).unwrap();
        assert_eq!(third.with_status(NodeStatus::Executed), vec!["build"]);
        assert_eq!(engine.shell().calls.len(), 2);

        let fourth = engine.run("build", &[], None).unwrap();
        assert_eq!(fourth.with_status(NodeStatus::Cached), vec!["build"]);
    }

    #[test]
    fn test_failed_node_is_not_recorded() {
        let project = Project::new();
        let cache_dir = TempDir::new().unwrap();
        fs::write(project.dir.path().join("src.txt"), "x").unwrap();

        let mut task = Task::new("build", "false");
        task.inputs = vec!["src.txt".to_string()];
        let manifest = project.manifest(vec![task]);
        let mut engine = Engine::new(&manifest, &project.context, RecordingShell::failing("build", 1))
            .with_cache(Some(FingerprintCache::new(cache_dir.path().to_path_buf())));

        assert!(engine.run("build", &[], None).is_err());
        assert!(engine.run("build", &[], None).is_err());
        assert_eq!(engine.shell().calls.len(), 2);
    }

    #[test]
    fn test_tasks_without_patterns_always_run() {
        let project = Project::new();
        let cache_dir = TempDir::new().unwrap();
        let manifest = project.manifest(vec![Task::new("hello", "echo hi")]);
        let mut engine = Engine::new(&manifest, &project.context, RecordingShell::default())
            .with_cache(Some(FingerprintCache::new(cache_dir.path().to_path_buf())));

        engine.run("hello", &[], None).unwrap();
        engine.run("hello", &[], None).unwrap();
        assert_eq!(engine.shell().calls.len(), 2);
    }

    #[test]
    fn test_unwritable_cache_does_not_fail_the_run() {
        let project = Project::new();
        let scratch = TempDir::new().unwrap();
        let blocker = scratch.path().join("blocker");
        fs::write(&blocker, "not a directory").unwrap();
        fs::write(project.dir.path().join("src.txt"), "x").unwrap();

        let mut task = Task::new("build", "cp src.txt out.txt");
        task.inputs = vec!["src.txt".to_string()];
        let manifest = project.manifest(vec![task]);
        let mut engine = Engine::new(&manifest, &project.context, RecordingShell::default())
            .with_cache(Some(FingerprintCache::new(blocker.join("records"))));

        for _ in 0..2 {
            let report = engine.run("build", &[], None).unwrap();
            assert_eq!(report.with_status(NodeStatus::Executed), vec!["build"]);
        }
        assert_eq!(engine.shell().calls.len(), 2);
        assert!(blocker.is_file());
    }

    #[test]
    fn test_names_in_untaken_branches_need_not_resolve() {
        let project = Project::new();
        let manifest = project.manifest(vec![Task::new(
            "build",
            "{% if conda.is_win %}{{ conda.win_only }} {{ vcvars }}{% else %}make{% endif %}",
        )]);
        let mut engine = Engine::new(&manifest, &project.context, RecordingShell::default());

        engine.run("build", &[], None).unwrap();
        assert_eq!(engine.shell().calls[0].command, "make");

        let windows = project.context.clone().with_platform("win-64");
        let mut engine = Engine::new(&manifest, &windows, RecordingShell::default());
        let err = engine.run("build", &[], None).unwrap_err();
        assert!(matches!(
            err,
            TaskError::Execution(ExecutionError::Prepare {
                source: TemplateError::MissingArgument { ref name },
                ..
            }) if name == "vcvars"
        ));
        assert!(engine.shell().calls.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_clean_env_hides_outside_variables() {
        use crate::runner::SubprocessShell;

        let project = Project::new();
        let mut task = Task::new(
            "show",
            "printf '%s\\n' \"${OUTSIDE_SECRET:-absent}\" \"$DECLARED\" > seen.txt",
        );
        task.clean_env = true;
        task.env.insert("DECLARED".to_string(), "present".to_string());
        let manifest = project.manifest(vec![task]);
        let shell = SubprocessShell::new(project.context.interpreter.clone());
        let mut engine = Engine::new(&manifest, &project.context, shell);

        engine.run("show", &[], None).unwrap();
        let seen = fs::read_to_string(project.dir.path().join("seen.txt")).unwrap();
        assert_eq!(seen, "absent\npresent\n");
    }
}
