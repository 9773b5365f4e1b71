//! Raw manifest types
//!
//! These mirror what a manifest file may contain before normalization. YAML
//! and TOML manifests share them; `parse.rs` turns them into [`Task`]s.
//!
//! [`Task`]: crate::runner::Task

use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;

/// Top-level manifest structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawManifest {
    /// Task run when none is named
    #[serde(default)]
    pub default: Option<String>,

    /// Interpreter used to run commands (e.g., "bash -c" or ["bash", "-c"])
    #[serde(default)]
    pub interpreter: Option<RawInterpreter>,

    /// Tasks in declaration order
    #[serde(default)]
    pub tasks: RawTaskTable,

    /// Per-platform task overrides: `[target.<platform>.tasks]`
    #[serde(default)]
    pub target: BTreeMap<String, RawTargetSection>,
}

/// The `tasks` table of one `target.<platform>` section
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTargetSection {
    #[serde(default)]
    pub tasks: RawTaskTable,
}

/// An interpreter given as one string or as an argv list
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RawInterpreter {
    Line(String),
    Argv(Vec<String>),
}

impl RawInterpreter {
    pub fn into_argv(self) -> Vec<String> {
        match self {
            RawInterpreter::Line(line) => line.split_whitespace().map(str::to_string).collect(),
            RawInterpreter::Argv(argv) => argv,
        }
    }
}

/// Task entries in the order they appear in the file.
///
/// Duplicate names are kept so the manifest can report them.
#[derive(Debug, Clone, Default)]
pub struct RawTaskTable(pub Vec<(String, RawTask)>);

impl<'de> Deserialize<'de> for RawTaskTable {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct TableVisitor;

        impl<'de> Visitor<'de> for TableVisitor {
            type Value = RawTaskTable;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a mapping of task names to task definitions")
            }

            fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
                Ok(RawTaskTable::default())
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::new();
                while let Some(name) = map.next_key::<String>()? {
                    let task = map
                        .next_value::<RawTask>()
                        .map_err(|e| de::Error::custom(format!("task '{}': {}", name, e)))?;
                    entries.push((name, task));
                }
                Ok(RawTaskTable(entries))
            }
        }

        deserializer.deserialize_any(TableVisitor)
    }
}

/// One task entry: a command string, a list of dependencies, or a table
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawTask {
    /// `build: make`
    Command(String),

    /// `all: [build, test]`
    Alias(Vec<String>),

    /// Full definition
    Definition(Box<RawDefinition>),
}

/// A task table. Also used for platform overrides, where every field is
/// optional and only the ones present replace the base task's.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RawDefinition {
    #[serde(default)]
    pub cmd: Option<RawCommand>,

    #[serde(default)]
    pub args: Option<Vec<RawArg>>,

    #[serde(default, alias = "depends_on")]
    pub depends_on: Option<RawDependsOn>,

    #[serde(default)]
    pub cwd: Option<String>,

    #[serde(default)]
    pub env: Option<BTreeMap<String, Scalar>>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default, alias = "clean_env")]
    pub clean_env: Option<bool>,

    #[serde(default, alias = "default_environment")]
    pub default_environment: Option<String>,

    #[serde(default)]
    pub inputs: Option<Vec<String>>,

    #[serde(default)]
    pub outputs: Option<Vec<String>>,

    /// Per-platform overrides nested in the task
    #[serde(default)]
    pub target: BTreeMap<String, RawDefinition>,
}

/// A command: one string or a list of tokens
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RawCommand {
    Single(String),
    Tokens(Vec<String>),
}

/// A declared argument: a bare name or `{arg, default}`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawArg {
    Name(String),
    Detailed {
        arg: String,
        #[serde(default)]
        default: Option<Scalar>,
    },
}

/// `depends-on`: one entry or a list of entries
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawDependsOn {
    One(RawDependency),
    Many(Vec<RawDependency>),
}

impl RawDependsOn {
    pub fn into_vec(self) -> Vec<RawDependency> {
        match self {
            RawDependsOn::One(dep) => vec![dep],
            RawDependsOn::Many(deps) => deps,
        }
    }
}

/// A dependency: a task name or `{task, args, environment}`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawDependency {
    Name(String),
    Detailed {
        task: String,
        #[serde(default)]
        args: Vec<Scalar>,
        #[serde(default)]
        environment: Option<String>,
    },
}

/// A scalar written where a string is expected (`PORT: 8080`)
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Str(String),
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Str(s) => f.write_str(s),
            Scalar::Bool(b) => write!(f, "{}", b),
            Scalar::Int(i) => write!(f, "{}", i),
            Scalar::Float(x) => write!(f, "{}", x),
        }
    }
}
