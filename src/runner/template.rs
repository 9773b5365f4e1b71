//! Command template rendering
//!
//! Templates are Jinja, rendered with `minijinja` in strict mode: `{{ expr }}`
//! interpolation with filters, `{% if %}` blocks, `{# ... #}` comments and
//! `-` whitespace control. Rendering is pure: it only reads the [`Scope`] it
//! is given. Only the branches actually taken are evaluated.

use crate::error::{TemplateError, TemplateResult};
use crate::runner::{Command, Context, TaskArg};
use minijinja::{Environment, ErrorKind, UndefinedBehavior, Value};
use std::collections::BTreeMap;
use tracing::warn;

/// Namespace holding host facts
pub const PRIMARY_NAMESPACE: &str = "conda";

/// Legacy name for the same namespace
pub const LEGACY_NAMESPACE: &str = "pixi";

/// Variables a template is rendered against
#[derive(Debug, Clone, Default)]
pub struct Scope {
    /// Host facts, exposed under both namespace names
    namespace: BTreeMap<String, Value>,

    /// Top-level variables (argument bindings)
    vars: BTreeMap<String, Value>,
}

impl Scope {
    /// A scope with no variables at all
    pub fn empty() -> Self {
        Scope::default()
    }

    /// A scope exposing the host namespace built from `ctx`
    pub fn from_context(ctx: &Context) -> Self {
        let mut ns = BTreeMap::new();
        let path = |p: &std::path::Path| Value::from(p.display().to_string());

        ns.insert("platform".to_string(), Value::from(ctx.platform.as_str()));
        ns.insert("prefix".to_string(), path(&ctx.environment_root));
        ns.insert(
            "manifest_path".to_string(),
            ctx.manifest_path
                .as_deref()
                .map(path)
                .unwrap_or_else(|| Value::from("")),
        );
        ns.insert("init_cwd".to_string(), path(&ctx.working_dir));
        ns.insert("version".to_string(), Value::from(crate::VERSION));
        ns.insert("is_win".to_string(), Value::from(ctx.is_windows()));
        ns.insert("is_unix".to_string(), Value::from(ctx.is_unix()));
        ns.insert("is_linux".to_string(), Value::from(ctx.is_linux()));
        ns.insert("is_osx".to_string(), Value::from(ctx.is_macos()));

        Scope {
            namespace: ns,
            vars: BTreeMap::new(),
        }
        .with_environment(&ctx.environment_name)
    }

    /// Set the environment name seen by templates
    pub fn with_environment(mut self, name: &str) -> Self {
        self.namespace
            .insert("environment_name".to_string(), Value::from(name));
        self.namespace.insert(
            "environment".to_string(),
            Value::from_serialize(BTreeMap::from([("name", name)])),
        );
        self
    }

    /// Add argument bindings as top-level variables
    pub fn with_bindings(mut self, bindings: &ArgumentBindings) -> Self {
        for (name, value) in bindings.iter() {
            self.insert(name, Value::from(value));
        }
        self
    }

    pub fn insert(&mut self, name: &str, value: Value) {
        self.vars.insert(name.to_string(), value);
    }

    /// True when `name` resolves at the top level
    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
            || (!self.namespace.is_empty()
                && (name == PRIMARY_NAMESPACE || name == LEGACY_NAMESPACE))
    }

    /// The render context: both namespace names, then the variables, which
    /// win on a name clash.
    fn globals(&self) -> BTreeMap<String, Value> {
        let mut globals = BTreeMap::new();
        if !self.namespace.is_empty() {
            let ns = Value::from_serialize(&self.namespace);
            globals.insert(PRIMARY_NAMESPACE.to_string(), ns.clone());
            globals.insert(LEGACY_NAMESPACE.to_string(), ns);
        }
        globals.extend(self.vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        globals
    }
}

/// Values bound to a task's declared arguments
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgumentBindings {
    values: BTreeMap<String, String>,
}

impl ArgumentBindings {
    /// Bind positional values to declared arguments, falling back to defaults
    pub fn bind(args: &[TaskArg], values: &[String]) -> TemplateResult<Self> {
        if values.len() > args.len() {
            warn!(
                extra = values.len() - args.len(),
                "ignoring arguments beyond those the task declares"
            );
        }

        let mut bound = BTreeMap::new();
        for (i, arg) in args.iter().enumerate() {
            let value = values
                .get(i)
                .or(arg.default.as_ref())
                .ok_or_else(|| TemplateError::MissingArgument {
                    name: arg.name.clone(),
                })?;
            bound.insert(arg.name.clone(), value.clone());
        }

        Ok(ArgumentBindings { values: bound })
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

fn environment<'s>() -> Environment<'s> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_keep_trailing_newline(true);
    env
}

/// Render a template string
pub fn render(src: &str, scope: &Scope) -> TemplateResult<String> {
    if !has_markup(src) {
        return Ok(src.to_string());
    }

    let env = environment();
    let template = env
        .template_from_str(src)
        .map_err(|e| TemplateError::syntax(e.to_string()))?;

    template.render(scope.globals()).map_err(|e| {
        if !matches!(e.kind(), ErrorKind::UndefinedError) {
            return TemplateError::render(e.to_string());
        }
        // An unknown top-level name is an unbound argument; anything else is
        // a bad attribute of a known value.
        let mut missing: Vec<String> = template
            .undeclared_variables(false)
            .into_iter()
            .filter(|name| !scope.contains(name))
            .collect();
        missing.sort();
        match missing.into_iter().next() {
            Some(name) => TemplateError::MissingArgument { name },
            None => TemplateError::render(e.to_string()),
        }
    })
}

/// Render each item of a list independently
pub fn render_list(items: &[String], scope: &Scope) -> TemplateResult<Vec<String>> {
    items.iter().map(|item| render(item, scope)).collect()
}

/// Render a task command to the final command string.
///
/// Token commands are rendered token by token and joined with one space.
/// Returns `None` for tasks without a command.
pub fn render_command(command: &Command, scope: &Scope) -> TemplateResult<Option<String>> {
    match command {
        Command::NoCommand => Ok(None),
        Command::Single(src) => render(src, scope).map(Some),
        Command::Tokens(tokens) => Ok(Some(render_list(tokens, scope)?.join(" "))),
    }
}

fn has_markup(src: &str) -> bool {
    src.contains("{{") || src.contains("{%") || src.contains("{#")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn context(platform: &str) -> Context {
        Context::new()
            .with_platform(platform)
            .with_manifest_path(PathBuf::from("/project/ctask.yml"))
    }

    fn bindings(args: &[TaskArg], values: &[&str]) -> ArgumentBindings {
        let values: Vec<String> = values.iter().map(|s| s.to_string()).collect();
        ArgumentBindings::bind(args, &values).unwrap()
    }

    fn named(value: &str) -> Scope {
        let args = vec![TaskArg::with_default("name", value)];
        Scope::from_context(&context("linux-64")).with_bindings(&bindings(&args, &[]))
    }

    #[test]
    fn test_no_markup_fast_path() {
        assert_eq!(render("echo hello", &Scope::empty()).unwrap(), "echo hello");
    }

    #[test]
    fn test_argument_defaults_and_overrides() {
        let args = vec![
            TaskArg::with_default("path", "tests/"),
            TaskArg::with_default("flags", "-v"),
        ];

        let scope = Scope::empty().with_bindings(&bindings(&args, &[]));
        assert_eq!(render("{{ path }} {{ flags }}", &scope).unwrap(), "tests/ -v");

        let scope = Scope::empty().with_bindings(&bindings(&args, &["src/"]));
        assert_eq!(render("{{ path }} {{ flags }}", &scope).unwrap(), "src/ -v");
    }

    #[test]
    fn test_missing_argument_without_default() {
        let args = vec![TaskArg::new("target"), TaskArg::with_default("mode", "debug")];
        let err = ArgumentBindings::bind(&args, &[]).unwrap_err();
        assert_eq!(
            err,
            TemplateError::MissingArgument {
                name: "target".to_string()
            }
        );
    }

    #[test]
    fn test_undeclared_variable_is_missing_argument() {
        let err = render("echo {{ nope }}", &Scope::empty()).unwrap_err();
        assert!(matches!(err, TemplateError::MissingArgument { name } if name == "nope"));

        let err = render("echo {{ conda.platform }} {{ nope }}", &named("x")).unwrap_err();
        assert!(matches!(err, TemplateError::MissingArgument { name } if name == "nope"));
    }

    #[test]
    fn test_platform_conditional_with_both_namespaces() {
        for template in [
            "{% if conda.is_unix %}unix{% else %}win{% endif %}",
            "{% if pixi.is_unix %}unix{% else %}win{% endif %}",
        ] {
            let linux = Scope::from_context(&context("linux-64"));
            let windows = Scope::from_context(&context("win-64"));
            assert_eq!(render(template, &linux).unwrap(), "unix");
            assert_eq!(render(template, &windows).unwrap(), "win");
        }
    }

    #[test]
    fn test_namespace_aliases_render_identically() {
        let scope = Scope::from_context(&context("osx-arm64"));
        for field in ["platform", "manifest_path", "environment_name", "is_osx", "init_cwd"] {
            let primary = render(&format!("{{{{ conda.{} }}}}", field), &scope).unwrap();
            let legacy = render(&format!("{{{{ pixi.{} }}}}", field), &scope).unwrap();
            assert_eq!(primary, legacy, "field {}", field);
        }
        assert_eq!(render("{{ pixi.platform }}", &scope).unwrap(), "osx-arm64");
        assert_eq!(render("{{ conda.is_osx }}", &scope).unwrap(), "true");
        assert_eq!(
            render("{{ conda.manifest_path }}", &scope).unwrap(),
            "/project/ctask.yml"
        );
    }

    #[test]
    fn test_environment_name_and_nested_lookup() {
        let scope = Scope::from_context(&context("linux-64")).with_environment("py311");
        assert_eq!(
            render("{{ conda.environment_name }}/{{ pixi.environment.name }}", &scope).unwrap(),
            "py311/py311"
        );
    }

    #[test]
    fn test_elif_chain() {
        let template = "{% if conda.is_win %}w{% elif conda.is_osx %}m{% elif conda.is_linux %}l{% else %}?{% endif %}";
        assert_eq!(render(template, &Scope::from_context(&context("linux-64"))).unwrap(), "l");
        assert_eq!(render(template, &Scope::from_context(&context("osx-64"))).unwrap(), "m");
        assert_eq!(render(template, &Scope::from_context(&context("win-64"))).unwrap(), "w");
    }

    #[test]
    fn test_nested_conditionals_and_comparison() {
        let args = vec![TaskArg::with_default("mode", "release")];
        let scope = Scope::from_context(&context("linux-64")).with_bindings(&bindings(&args, &[]));
        let template = "build{% if conda.is_linux %}{% if mode == 'release' %} --release{% endif %}{% endif %}{# note #}";
        assert_eq!(render(template, &scope).unwrap(), "build --release");
    }

    #[test]
    fn test_filters_and_concatenation() {
        let scope = named("world");
        assert_eq!(render("{{ name | upper }}", &scope).unwrap(), "WORLD");
        assert_eq!(render("{{ name ~ '!' }}", &scope).unwrap(), "world!");
        assert_eq!(
            render("{{ conda.platform | replace('-', '_') }}", &scope).unwrap(),
            "linux_64"
        );
    }

    #[test]
    fn test_is_defined_test() {
        let template = "{% if name is defined %}{{ name }}{% else %}anon{% endif %}";
        assert_eq!(render(template, &named("ada")).unwrap(), "ada");
        assert_eq!(render(template, &Scope::empty()).unwrap(), "anon");
    }

    #[test]
    fn test_whitespace_control() {
        let scope = Scope::from_context(&context("linux-64"));
        assert_eq!(
            render("{%- if conda.is_unix -%} a {%- endif %}", &scope).unwrap(),
            "a"
        );
        assert_eq!(
            render("{% if conda.is_unix %} a {% endif %}", &scope).unwrap(),
            " a "
        );
    }

    #[test]
    fn test_trailing_newline_kept() {
        let scope = named("x");
        assert_eq!(render("echo {{ name }}\n", &scope).unwrap(), "echo x\n");
    }

    #[test]
    fn test_token_command_rendered_per_token() {
        let args = vec![TaskArg::with_default("name", "main")];
        let scope = Scope::empty().with_bindings(&bindings(&args, &[]));
        let command = Command::Tokens(vec!["python".into(), "src/{{ name }}.py".into()]);
        assert_eq!(
            render_command(&command, &scope).unwrap(),
            Some("python src/main.py".to_string())
        );
        assert_eq!(render_command(&Command::NoCommand, &scope).unwrap(), None);
    }

    #[test]
    fn test_render_list() {
        let args = vec![TaskArg::with_default("name", "main")];
        let scope = Scope::empty().with_bindings(&bindings(&args, &[]));
        let items = vec!["src/{{ name }}.py".to_string(), "tests/".to_string()];
        assert_eq!(
            render_list(&items, &scope).unwrap(),
            vec!["src/main.py".to_string(), "tests/".to_string()]
        );
        assert!(render_list(&[], &scope).unwrap().is_empty());
    }

    #[test]
    fn test_rendering_is_deterministic() {
        let scope = Scope::from_context(&context("linux-64"));
        let template = "{{ conda.platform }} {% if conda.is_unix %}sh{% endif %}";
        let first = render(template, &scope).unwrap();
        let second = render(template, &scope).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_syntax_errors() {
        for src in [
            "echo {{ name",
            "{% if conda.is_unix %}unix",
            "{% else %}x",
            "{% endif %}",
            "{% if %}x{% endif %}",
        ] {
            assert!(
                matches!(render(src, &named("x")), Err(TemplateError::Syntax { .. })),
                "expected syntax error for {:?}",
                src
            );
        }
    }

    #[test]
    fn test_unknown_attribute_is_render_error() {
        let scope = Scope::from_context(&context("linux-64"));
        assert!(matches!(
            render("{{ conda.nothing }}", &scope),
            Err(TemplateError::Render { .. })
        ));
    }

    #[test]
    fn test_untaken_branches_are_not_evaluated() {
        let scope = Scope::from_context(&context("linux-64"));
        let template = "{% if conda.is_win %}{{ conda.win_only }} {{ missing }}{% endif %}echo ok";
        assert_eq!(render(template, &scope).unwrap(), "echo ok");

        let windows = Scope::from_context(&context("win-64"));
        assert!(render(template, &windows).is_err());
    }
}
