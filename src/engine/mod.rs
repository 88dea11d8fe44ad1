//! All the task graph related abstractions.
//!
//! A [`TaskDefinition`] is a named unit of work with an explicit list of
//! dependencies. Definitions are collected by a [`TaskGraphBuilder`], which
//! validates them into an immutable [`TaskGraph`]. The [`Runner`] then
//! executes the part of the graph a requested target needs.
//!
//! ## Type erasure
//!
//! Tasks are contributed by unrelated plugins and refer to each other by
//! name, so their outputs are stored as [`TaskValue`]s: reference counted,
//! type-erased values. A task reads its inputs back through
//! [`Inputs::get`], which reports a mismatch as an ordinary task failure.

mod graph;
mod runner;

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

use anyhow::anyhow;

use crate::config::ResolvedConfig;
use crate::core::{CancelToken, TaskValue};

pub use graph::{TaskGraph, TaskGraphBuilder};
pub use runner::{Diagnostics, RunOptions, RunOutput, Runner, TaskExecution};

/// Result from a single executed task.
pub type TaskResult<T> = anyhow::Result<T>;

/// Type-erased task body.
type TaskAction = Arc<dyn Fn(&TaskContext<'_>, &Inputs) -> TaskResult<TaskValue> + Send + Sync>;

/// The context passed to every task execution.
///
/// It carries the resolved configuration of the invocation; there is no other
/// way for a task to reach configuration.
pub struct TaskContext<'a> {
    /// The merged configuration, shared by every task of the run.
    pub config: &'a ResolvedConfig,
    /// Name of the running task.
    pub name: &'a str,
    pub(crate) cancel: &'a CancelToken,
    /// Tracing span assigned to this task.
    pub(crate) span: tracing::Span,
}

impl TaskContext<'_> {
    /// Whether the invocation was cancelled while this task was running.
    /// Long tasks may poll this to stop early.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn span(&self) -> &tracing::Span {
        &self.span
    }
}

/// Results of a task's declared dependencies, keyed by task name.
#[derive(Debug, Clone, Default)]
pub struct Inputs {
    values: BTreeMap<String, TaskValue>,
}

impl Inputs {
    pub(crate) fn new(values: impl IntoIterator<Item = (String, TaskValue)>) -> Self {
        Self {
            values: values.into_iter().collect(),
        }
    }

    /// Returns the output of dependency `name` as a `T`.
    pub fn get<T: 'static>(&self, name: &str) -> TaskResult<&T> {
        let value = self
            .values
            .get(name)
            .ok_or_else(|| anyhow!("'{name}' is not a declared dependency"))?;

        value.downcast_ref::<T>().ok_or_else(|| {
            anyhow!(
                "dependency '{name}' produced {}, expected {}",
                value.type_name(),
                std::any::type_name::<T>()
            )
        })
    }

    pub fn value(&self, name: &str) -> Option<&TaskValue> {
        self.values.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A named task with explicit dependencies.
///
/// ```rust
/// use kiln::TaskDefinition;
///
/// let compile = TaskDefinition::build("compile")
///     .describe("Compiles the project")
///     .run(|ctx, _| Ok(ctx.config.get_str("solidity").map(String::from)));
///
/// let test = TaskDefinition::build("test")
///     .depends_on(["compile"])
///     .run(|_, inputs| {
///         let version = inputs.get::<Option<String>>("compile")?;
///         Ok(version.is_some())
///     });
///
/// assert_eq!(test.dependencies(), ["compile"]);
/// ```
#[derive(Clone)]
pub struct TaskDefinition {
    name: Cow<'static, str>,
    dependencies: Vec<String>,
    description: Option<String>,
    action: TaskAction,
}

impl TaskDefinition {
    /// The entry point for defining a task.
    pub fn build(name: impl Into<Cow<'static, str>>) -> TaskDef {
        TaskDef {
            name: name.into(),
            dependencies: Vec::new(),
            description: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub(crate) fn execute(&self, context: &TaskContext<'_>, inputs: &Inputs) -> TaskResult<TaskValue> {
        (self.action)(context, inputs)
    }
}

impl Debug for TaskDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDefinition")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

/// Builder returned by [`TaskDefinition::build`].
pub struct TaskDef {
    name: Cow<'static, str>,
    dependencies: Vec<String>,
    description: Option<String>,
}

impl TaskDef {
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Declares dependencies by name. Repeated names are ignored.
    pub fn depends_on<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for dependency in dependencies {
            let dependency = dependency.into();
            if !self.dependencies.contains(&dependency) {
                self.dependencies.push(dependency);
            }
        }
        self
    }

    pub fn run<F, R>(self, callback: F) -> TaskDefinition
    where
        F: Fn(&TaskContext<'_>, &Inputs) -> TaskResult<R> + Send + Sync + 'static,
        R: Send + Sync + 'static,
    {
        TaskDefinition {
            name: self.name,
            dependencies: self.dependencies,
            description: self.description,
            action: Arc::new(move |ctx, inputs| callback(ctx, inputs).map(TaskValue::new)),
        }
    }
}
