//! The task registry stores named units of work and how they are composed.
//!
//! A task is either a leaf, which wraps an action, or a group that runs
//! other tasks, referenced by name, in series or in parallel. Names are
//! only checked when a root task is [resolved](Registry::resolve) into a
//! [`Plan`], so groups may be registered before their children.

use std::collections::{HashMap, HashSet};
use std::fmt::{self, Debug, Display, Write};
use std::sync::Arc;

use petgraph::Graph;
use petgraph::graph::NodeIndex;

use crate::error::ConfigError;

/// Result of a single task action.
pub type TaskResult<T = ()> = anyhow::Result<T>;

/// The work performed by a leaf task.
pub type Action = Arc<dyn Fn() -> TaskResult + Send + Sync>;

/// How the children of a group are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compose {
    /// One after another, stopping at the first failure.
    Series,
    /// All at once, waiting for every child.
    Parallel,
}

impl Display for Compose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compose::Series => f.write_str("series"),
            Compose::Parallel => f.write_str("parallel"),
        }
    }
}

/// What a registered task does.
#[derive(Clone)]
pub enum Definition {
    Leaf(Action),
    Group(Compose, Vec<String>),
}

impl Definition {
    pub fn leaf<F>(action: F) -> Self
    where
        F: Fn() -> TaskResult + Send + Sync + 'static,
    {
        Definition::Leaf(Arc::new(action))
    }
}

impl Debug for Definition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Definition::Leaf(_) => write!(f, "Leaf(*)"),
            Definition::Group(kind, children) => write!(f, "Group({kind}, {children:?})"),
        }
    }
}

/// A root task with every reference resolved. Acyclic by construction.
#[derive(Clone)]
pub enum Plan {
    Leaf {
        name: Arc<str>,
        action: Action,
    },
    Group {
        name: Arc<str>,
        compose: Compose,
        children: Vec<Plan>,
    },
}

impl Plan {
    pub fn name(&self) -> &str {
        match self {
            Plan::Leaf { name, .. } | Plan::Group { name, .. } => name,
        }
    }

    /// Number of leaf invocations this plan performs when everything succeeds.
    pub fn leaves(&self) -> usize {
        match self {
            Plan::Leaf { .. } => 1,
            Plan::Group { children, .. } => children.iter().map(Plan::leaves).sum(),
        }
    }
}

impl Debug for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Plan::Leaf { name, .. } => write!(f, "Leaf({name})"),
            Plan::Group {
                name,
                compose,
                children,
            } => f
                .debug_struct("Group")
                .field("name", name)
                .field("compose", compose)
                .field("children", children)
                .finish(),
        }
    }
}

/// An explicit, owned set of named tasks. Independent registries (one per
/// profile, for instance) never share state.
#[derive(Default, Debug)]
pub struct Registry {
    tasks: HashMap<String, Definition>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        definition: Definition,
    ) -> Result<(), ConfigError> {
        let name = name.into();
        if self.tasks.contains_key(&name) {
            return Err(ConfigError::DuplicateTask(name));
        }

        tracing::trace!(task = %name, ?definition, "registered task");
        self.tasks.insert(name, definition);
        Ok(())
    }

    /// Registers a leaf task.
    pub fn leaf<F>(&mut self, name: impl Into<String>, action: F) -> Result<(), ConfigError>
    where
        F: Fn() -> TaskResult + Send + Sync + 'static,
    {
        self.register(name, Definition::leaf(action))
    }

    /// Builds a group over tasks that are already registered.
    pub fn compose<I, S>(&self, compose: Compose, children: I) -> Result<Definition, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let children: Vec<String> = children.into_iter().map(Into::into).collect();

        if let Some(missing) = children.iter().find(|c| !self.tasks.contains_key(*c)) {
            return Err(ConfigError::unknown(missing.clone()));
        }

        Ok(Definition::Group(compose, children))
    }

    pub fn series<I, S>(&mut self, name: impl Into<String>, children: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let definition = self.compose(Compose::Series, children)?;
        self.register(name, definition)
    }

    pub fn parallel<I, S>(&mut self, name: impl Into<String>, children: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let definition = self.compose(Compose::Parallel, children)?;
        self.register(name, definition)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    /// All task names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.tasks.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Tasks that no group refers to, sorted.
    pub fn roots(&self) -> Vec<&str> {
        let children: HashSet<&str> = self
            .tasks
            .values()
            .filter_map(|definition| match definition {
                Definition::Group(_, children) => Some(children.iter().map(String::as_str)),
                Definition::Leaf(_) => None,
            })
            .flatten()
            .collect();

        self.names()
            .into_iter()
            .filter(|name| !children.contains(name))
            .collect()
    }

    /// Expands `name` into a plan. The stack of tasks currently being
    /// resolved doubles as the in-progress marker for cycle detection.
    pub fn resolve(&self, name: &str) -> Result<Plan, ConfigError> {
        let mut stack = Vec::new();
        self.resolve_inner(name, None, &mut stack)
    }

    fn resolve_inner(
        &self,
        name: &str,
        referrer: Option<&str>,
        stack: &mut Vec<String>,
    ) -> Result<Plan, ConfigError> {
        if let Some(pos) = stack.iter().position(|n| n == name) {
            let mut cycle = stack[pos..].to_vec();
            cycle.push(name.to_string());
            return Err(ConfigError::CyclicDependency(cycle));
        }

        let definition = self
            .tasks
            .get(name)
            .ok_or_else(|| ConfigError::UnknownTask {
                name: name.to_string(),
                referenced_by: referrer.map(str::to_string),
            })?;

        match definition {
            Definition::Leaf(action) => Ok(Plan::Leaf {
                name: name.into(),
                action: action.clone(),
            }),
            Definition::Group(compose, children) => {
                stack.push(name.to_string());
                let children = children
                    .iter()
                    .map(|child| self.resolve_inner(child, Some(name), stack))
                    .collect::<Result<Vec<_>, _>>()?;
                stack.pop();

                Ok(Plan::Group {
                    name: name.into(),
                    compose: *compose,
                    children,
                })
            }
        }
    }

    /// Resolves every registered task and reports the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for name in self.names() {
            self.resolve(name)?;
        }
        Ok(())
    }

    /// Renders the resolved tree of `name`, one task per line.
    pub fn render_tree(&self, name: &str) -> Result<String, ConfigError> {
        let plan = self.resolve(name)?;
        let mut out = String::new();
        render_node(&mut out, &plan, "", "", "");
        Ok(out)
    }
}

fn render_node(out: &mut String, plan: &Plan, lead: &str, branch: &str, rest: &str) {
    match plan {
        Plan::Leaf { name, .. } => {
            let _ = writeln!(out, "{lead}{branch}{name}");
        }
        Plan::Group {
            name,
            compose,
            children,
        } => {
            let _ = writeln!(out, "{lead}{branch}{name} <{compose}>");
            let lead = format!("{lead}{rest}");
            for (i, child) in children.iter().enumerate() {
                if i + 1 == children.len() {
                    render_node(out, child, &lead, "└── ", "    ");
                } else {
                    render_node(out, child, &lead, "├── ", "│   ");
                }
            }
        }
    }
}

/// Renders every task as a Mermaid flowchart. Series edges are numbered in
/// execution order.
impl Display for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut graph = Graph::<&str, Option<usize>>::new();
        let mut nodes: HashMap<&str, NodeIndex> = HashMap::new();

        for name in self.names() {
            nodes.insert(name, graph.add_node(name));
        }

        for name in self.names() {
            if let Some(Definition::Group(compose, children)) = self.tasks.get(name) {
                for (i, child) in children.iter().enumerate() {
                    if let Some(&target) = nodes.get(child.as_str()) {
                        let label = (*compose == Compose::Series).then_some(i + 1);
                        graph.add_edge(nodes[name], target, label);
                    }
                }
            }
        }

        writeln!(f, "graph LR")?;

        for index in graph.node_indices() {
            let name = graph[index].replace('"', "\\\"");
            writeln!(f, "    {}[\"{}\"]", index.index(), name)?;
        }

        for edge in graph.edge_indices() {
            let Some((source, target)) = graph.edge_endpoints(edge) else {
                continue;
            };
            match graph[edge] {
                Some(order) => writeln!(
                    f,
                    "    {} -- \"{}\" --> {}",
                    source.index(),
                    order,
                    target.index()
                )?,
                None => writeln!(f, "    {} --> {}", source.index(), target.index())?,
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> TaskResult {
        Ok(())
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut registry = Registry::new();
        registry.leaf("build:style", noop).unwrap();

        let err = registry.leaf("build:style", noop).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateTask(name) if name == "build:style"));
    }

    #[test]
    fn roots_are_tasks_nobody_refers_to() {
        let mut registry = Registry::new();
        registry.leaf("clean", noop).unwrap();
        registry.leaf("build", noop).unwrap();
        registry.leaf("lint", noop).unwrap();
        registry.series("default", ["clean", "build"]).unwrap();

        assert_eq!(registry.roots(), vec!["default", "lint"]);
    }

    #[test]
    fn resolving_unknown_name_fails() {
        let registry = Registry::new();
        let err = registry.resolve("build").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::UnknownTask { name, referenced_by: None } if name == "build"
        ));
    }

    #[test]
    fn unknown_child_names_the_group() {
        let mut registry = Registry::new();
        registry
            .register(
                "build",
                Definition::Group(Compose::Parallel, vec!["build:css".into()]),
            )
            .unwrap();

        let err = registry.resolve("build").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::UnknownTask { name, referenced_by: Some(by) }
                if name == "build:css" && by == "build"
        ));
    }

    #[test]
    fn compose_requires_registered_children() {
        let mut registry = Registry::new();
        registry.leaf("a", noop).unwrap();

        assert!(registry.compose(Compose::Series, ["a"]).is_ok());
        let err = registry.compose(Compose::Series, ["a", "b"]).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownTask { name, .. } if name == "b"));
    }

    #[test]
    fn cycles_are_detected() {
        let mut registry = Registry::new();
        registry
            .register("a", Definition::Group(Compose::Series, vec!["b".into()]))
            .unwrap();
        registry
            .register("b", Definition::Group(Compose::Parallel, vec!["c".into(), "a".into()]))
            .unwrap();
        registry.leaf("c", noop).unwrap();

        let err = registry.resolve("a").unwrap_err();
        match err {
            ConfigError::CyclicDependency(path) => assert_eq!(path, vec!["a", "b", "a"]),
            other => panic!("unexpected error: {other}"),
        }
        assert!(registry.validate().is_err());
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let mut registry = Registry::new();
        registry
            .register("loop", Definition::Group(Compose::Series, vec!["loop".into()]))
            .unwrap();

        assert!(matches!(
            registry.resolve("loop"),
            Err(ConfigError::CyclicDependency(path)) if path == ["loop", "loop"]
        ));
    }

    #[test]
    fn diamonds_are_not_cycles() {
        let mut registry = Registry::new();
        registry.leaf("clean", noop).unwrap();
        registry.series("left", ["clean"]).unwrap();
        registry.series("right", ["clean"]).unwrap();
        registry.parallel("top", ["left", "right"]).unwrap();

        let plan = registry.resolve("top").unwrap();
        assert_eq!(plan.name(), "top");
        assert_eq!(plan.leaves(), 2);
        registry.validate().unwrap();
    }

    #[test]
    fn names_are_sorted() {
        let mut registry = Registry::new();
        registry.leaf("b", noop).unwrap();
        registry.leaf("a", noop).unwrap();
        registry.series("c", ["a", "b"]).unwrap();

        assert_eq!(registry.names(), vec!["a", "b", "c"]);
        assert!(registry.contains("c"));
        assert!(!registry.contains("d"));
    }

    #[test]
    fn tree_rendering() {
        let mut registry = Registry::new();
        registry.leaf("clean", noop).unwrap();
        registry.leaf("build:html", noop).unwrap();
        registry.leaf("build:style", noop).unwrap();
        registry.parallel("build", ["build:html", "build:style"]).unwrap();
        registry.series("default", ["clean", "build"]).unwrap();

        let tree = registry.render_tree("default").unwrap();
        let expected = "\
default <series>
├── clean
└── build <parallel>
    ├── build:html
    └── build:style
";
        assert_eq!(tree, expected);
    }

    #[test]
    fn mermaid_rendering() {
        let mut registry = Registry::new();
        registry.leaf("a", noop).unwrap();
        registry.leaf("b", noop).unwrap();
        registry.series("s", ["a", "b"]).unwrap();
        registry.parallel("p", ["a"]).unwrap();

        let text = registry.to_string();
        assert!(text.starts_with("graph LR\n"));
        // nodes are added in sorted order: a=0, b=1, p=2, s=3
        assert!(text.contains("    3 -- \"1\" --> 0\n"));
        assert!(text.contains("    3 -- \"2\" --> 1\n"));
        assert!(text.contains("    2 --> 0\n"));
    }
}
