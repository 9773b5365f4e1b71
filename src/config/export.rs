//! Manifest export
//!
//! Writes the task model back out as a `ctask.toml` manifest: base tasks go
//! under `[tasks]`, platform overrides under `[target.<platform>.tasks]`.

use crate::error::{ConfigError, ConfigResult};
use crate::runner::{Command, Manifest, Task, TaskArg, TaskDependency, TaskOverride};
use std::collections::BTreeMap;
use toml::{Table, Value};

/// Render a manifest as TOML
pub fn export_toml(manifest: &Manifest) -> ConfigResult<String> {
    let mut doc = Table::new();

    if let Some(default) = &manifest.default_task {
        doc.insert("default".into(), Value::String(default.clone()));
    }
    if let Some(interpreter) = &manifest.interpreter {
        doc.insert("interpreter".into(), strings(interpreter));
    }

    let mut tasks = Table::new();
    let mut targets: BTreeMap<String, Table> = BTreeMap::new();
    for task in manifest.tasks() {
        tasks.insert(task.name.clone(), task_value(task));
        for (platform, ov) in &task.platforms {
            targets
                .entry(platform.clone())
                .or_default()
                .insert(task.name.clone(), override_value(ov));
        }
    }
    doc.insert("tasks".into(), Value::Table(tasks));

    if !targets.is_empty() {
        let mut target = Table::new();
        for (platform, platform_tasks) in targets {
            let mut section = Table::new();
            section.insert("tasks".into(), Value::Table(platform_tasks));
            target.insert(platform, Value::Table(section));
        }
        doc.insert("target".into(), Value::Table(target));
    }

    toml::to_string(&doc).map_err(|e| ConfigError::Parse(format!("cannot export manifest: {}", e)))
}

/// A task as a TOML value: a plain string for a bare command, a list for a
/// plain alias, a table otherwise.
fn task_value(task: &Task) -> Value {
    let simple_deps = task
        .depends_on
        .iter()
        .all(|d| d.args.is_empty() && d.environment.is_none());

    let mut table = Table::new();
    if let Some(cmd) = command_value(&task.command) {
        table.insert("cmd".into(), cmd);
    }
    if !task.args.is_empty() {
        table.insert("args".into(), args_value(&task.args));
    }
    if !task.depends_on.is_empty() {
        table.insert("depends-on".into(), depends_value(&task.depends_on));
    }
    if let Some(cwd) = &task.cwd {
        table.insert("cwd".into(), Value::String(cwd.clone()));
    }
    if !task.env.is_empty() {
        table.insert("env".into(), env_value(&task.env));
    }
    if let Some(description) = &task.description {
        table.insert("description".into(), Value::String(description.clone()));
    }
    if task.clean_env {
        table.insert("clean-env".into(), Value::Boolean(true));
    }
    if let Some(env) = &task.default_environment {
        table.insert("default-environment".into(), Value::String(env.clone()));
    }
    if !task.inputs.is_empty() {
        table.insert("inputs".into(), strings(&task.inputs));
    }
    if !task.outputs.is_empty() {
        table.insert("outputs".into(), strings(&task.outputs));
    }

    match (&task.command, table.len()) {
        (Command::Single(cmd), 1) => Value::String(cmd.clone()),
        (Command::NoCommand, 1) if simple_deps && table.contains_key("depends-on") => {
            strings(&task.dependency_names())
        }
        _ => Value::Table(table),
    }
}

fn override_value(ov: &TaskOverride) -> Value {
    let mut table = Table::new();
    if let Some(cmd) = ov.command.as_ref().and_then(command_value) {
        table.insert("cmd".into(), cmd);
    }
    if let Some(args) = &ov.args {
        table.insert("args".into(), args_value(args));
    }
    if let Some(deps) = &ov.depends_on {
        table.insert("depends-on".into(), depends_value(deps));
    }
    if let Some(cwd) = &ov.cwd {
        table.insert("cwd".into(), Value::String(cwd.clone()));
    }
    if let Some(env) = &ov.env {
        table.insert("env".into(), env_value(env));
    }
    if let Some(clean_env) = ov.clean_env {
        table.insert("clean-env".into(), Value::Boolean(clean_env));
    }
    if let Some(inputs) = &ov.inputs {
        table.insert("inputs".into(), strings(inputs));
    }
    if let Some(outputs) = &ov.outputs {
        table.insert("outputs".into(), strings(outputs));
    }

    match (&ov.command, table.len()) {
        (Some(Command::Single(cmd)), 1) => Value::String(cmd.clone()),
        _ => Value::Table(table),
    }
}

fn command_value(command: &Command) -> Option<Value> {
    match command {
        Command::NoCommand => None,
        Command::Single(cmd) => Some(Value::String(cmd.clone())),
        Command::Tokens(tokens) => Some(strings(tokens)),
    }
}

fn args_value(args: &[TaskArg]) -> Value {
    Value::Array(
        args.iter()
            .map(|arg| match &arg.default {
                None => Value::String(arg.name.clone()),
                Some(default) => {
                    let mut table = Table::new();
                    table.insert("arg".into(), Value::String(arg.name.clone()));
                    table.insert("default".into(), Value::String(default.clone()));
                    Value::Table(table)
                }
            })
            .collect(),
    )
}

fn depends_value(deps: &[TaskDependency]) -> Value {
    Value::Array(
        deps.iter()
            .map(|dep| {
                if dep.args.is_empty() && dep.environment.is_none() {
                    return Value::String(dep.task.clone());
                }
                let mut table = Table::new();
                table.insert("task".into(), Value::String(dep.task.clone()));
                if !dep.args.is_empty() {
                    table.insert("args".into(), strings(&dep.args));
                }
                if let Some(env) = &dep.environment {
                    table.insert("environment".into(), Value::String(env.clone()));
                }
                Value::Table(table)
            })
            .collect(),
    )
}

fn env_value(env: &BTreeMap<String, String>) -> Value {
    Value::Table(
        env.iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect(),
    )
}

fn strings(items: &[String]) -> Value {
    Value::Array(items.iter().cloned().map(Value::String).collect())
}
