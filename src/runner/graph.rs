//! Dependency graph resolution
//!
//! Expands a requested task into the closure of its dependencies and
//! linearizes it so that every node comes after everything it depends on.

use crate::error::{GraphError, GraphResult};
use crate::runner::{Manifest, Task};
use std::collections::HashSet;
use tracing::debug;

/// A task bound to specific arguments and a target environment.
///
/// This is the unit of caching and execution: the same task with different
/// arguments or environment is a different node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedNode {
    /// The task with platform overrides already merged in
    pub task: Task,

    /// Positional arguments bound to the task
    pub args: Vec<String>,

    /// Environment requested for this node, if any
    pub environment: Option<String>,
}

impl ResolvedNode {
    pub fn name(&self) -> &str {
        &self.task.name
    }
}

/// Identity of a node during expansion
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct NodeKey {
    name: String,
    args: Vec<String>,
    environment: Option<String>,
}

/// Resolves execution order for tasks of one manifest on one platform
pub struct GraphResolver<'a> {
    manifest: &'a Manifest,
    platform: &'a str,
}

impl<'a> GraphResolver<'a> {
    pub fn new(manifest: &'a Manifest, platform: &'a str) -> Self {
        GraphResolver { manifest, platform }
    }

    /// Resolve `root` and its dependency closure into execution order.
    ///
    /// Every node appears exactly once, after all of its dependencies.
    /// Dependencies are emitted in declaration order.
    pub fn resolve(
        &self,
        root: &str,
        args: &[String],
        environment: Option<&str>,
    ) -> GraphResult<Vec<ResolvedNode>> {
        let root_key = NodeKey {
            name: root.to_string(),
            args: args.to_vec(),
            environment: environment.map(str::to_string),
        };

        let mut expansion = Expansion::default();
        self.visit(root_key, None, &mut expansion)?;

        debug!(
            root,
            nodes = expansion.order.len(),
            "resolved execution order"
        );
        Ok(expansion.order)
    }

    /// Resolve only the root node, without its dependencies
    pub fn resolve_root(
        &self,
        root: &str,
        args: &[String],
        environment: Option<&str>,
    ) -> GraphResult<ResolvedNode> {
        let task = self.lookup(root, None)?;
        Ok(ResolvedNode {
            task,
            args: args.to_vec(),
            environment: environment.map(str::to_string),
        })
    }

    fn lookup(&self, name: &str, referrer: Option<&str>) -> GraphResult<Task> {
        self.manifest
            .get(name)
            .map(|task| task.resolve_for_platform(self.platform))
            .ok_or_else(|| GraphError::UnknownTask {
                name: name.to_string(),
                referrer: referrer.map(str::to_string),
            })
    }

    fn visit(
        &self,
        key: NodeKey,
        referrer: Option<&str>,
        expansion: &mut Expansion,
    ) -> GraphResult<()> {
        if expansion.done.contains(&key) {
            return Ok(());
        }

        if let Some(pos) = expansion.stack.iter().position(|k| *k == key) {
            let mut cycle: Vec<String> = expansion.stack[pos..]
                .iter()
                .map(|k| k.name.clone())
                .collect();
            cycle.push(key.name.clone());
            return Err(GraphError::CyclicDependency { cycle });
        }

        let task = self.lookup(&key.name, referrer)?;

        expansion.stack.push(key.clone());
        for dep in &task.depends_on {
            let child = NodeKey {
                name: dep.task.clone(),
                args: dep.args.clone(),
                environment: dep.environment.clone(),
            };
            self.visit(child, Some(&task.name), expansion)?;
        }
        expansion.stack.pop();

        let node = ResolvedNode {
            task,
            args: key.args.clone(),
            environment: key.environment.clone(),
        };
        expansion.done.insert(key);
        expansion.order.push(node);
        Ok(())
    }
}

#[derive(Default)]
struct Expansion {
    /// Nodes on the current expansion path, outermost first
    stack: Vec<NodeKey>,
    /// Nodes already emitted
    done: HashSet<NodeKey>,
    order: Vec<ResolvedNode>,
}
