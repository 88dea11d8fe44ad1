use std::collections::{BTreeSet, HashMap, HashSet};

use petgraph::Direction;
use petgraph::Graph;
use petgraph::graph::NodeIndex;

use crate::engine::TaskDefinition;
use crate::error::GraphError;

/// Collects task definitions before they are validated into a [`TaskGraph`].
///
/// Registration order matters: it is used to break ties whenever several
/// tasks could run next, which keeps execution order reproducible.
#[derive(Debug, Default)]
pub struct TaskGraphBuilder {
    tasks: Vec<TaskDefinition>,
}

impl TaskGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_task(&mut self, definition: TaskDefinition) -> &mut Self {
        self.tasks.push(definition);
        self
    }

    pub fn add_tasks(&mut self, definitions: impl IntoIterator<Item = TaskDefinition>) -> &mut Self {
        self.tasks.extend(definitions);
        self
    }

    /// Validates the collected definitions.
    ///
    /// Fails when a name is used twice, when a dependency names no task, or
    /// when the dependencies form a cycle.
    pub fn build(self) -> Result<TaskGraph, GraphError> {
        let mut graph = Graph::with_capacity(self.tasks.len(), 0);
        let mut index = HashMap::with_capacity(self.tasks.len());

        for task in self.tasks {
            let name = task.name().to_string();
            if index.contains_key(&name) {
                return Err(GraphError::DuplicateTaskName(name));
            }
            index.insert(name, graph.add_node(task));
        }

        let mut edges = Vec::new();
        for node in graph.node_indices() {
            let task = &graph[node];
            for dependency in task.dependencies() {
                let Some(&source) = index.get(dependency) else {
                    return Err(GraphError::UnknownDependency {
                        task: task.name().to_string(),
                        dependency: dependency.clone(),
                    });
                };
                edges.push((source, node));
            }
        }

        for (source, target) in edges {
            graph.add_edge(source, target, ());
        }

        let graph = TaskGraph { graph, index };

        if let Some(cycle) = graph.find_cycle() {
            return Err(GraphError::CyclicDependency { cycle });
        }

        Ok(graph)
    }
}

/// A validated, immutable task graph.
///
/// Nodes are stored in registration order and edges point from a dependency
/// to the task that depends on it.
#[derive(Debug)]
pub struct TaskGraph {
    pub(crate) graph: Graph<TaskDefinition, ()>,
    pub(crate) index: HashMap<String, NodeIndex>,
}

impl TaskGraph {
    pub fn definition(&self, name: &str) -> Option<&TaskDefinition> {
        self.index.get(name).map(|&index| &self.graph[index])
    }

    /// Task names in registration order.
    pub fn task_names(&self) -> impl Iterator<Item = &str> {
        self.graph.node_weights().map(TaskDefinition::name)
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Returns the target and all of its transitive dependencies in an order
    /// where each task comes after everything it depends on. Among tasks that
    /// are ready at the same time, the one registered first goes first.
    pub fn resolve_subgraph(&self, target: &str) -> Result<Vec<String>, GraphError> {
        Ok(self
            .subgraph(target)?
            .into_iter()
            .map(|index| self.graph[index].name().to_string())
            .collect())
    }

    pub(crate) fn subgraph(&self, target: &str) -> Result<Vec<NodeIndex>, GraphError> {
        let &root = self
            .index
            .get(target)
            .ok_or_else(|| GraphError::UnknownTask(target.to_string()))?;

        let mut members = HashSet::from([root]);
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            for dependency in self.graph.neighbors_directed(node, Direction::Incoming) {
                if members.insert(dependency) {
                    stack.push(dependency);
                }
            }
        }

        let mut pending: HashMap<NodeIndex, usize> = members
            .iter()
            .map(|&node| (node, self.dependencies_of(node).len()))
            .collect();

        let mut ready: BTreeSet<NodeIndex> = pending
            .iter()
            .filter(|&(_, &count)| count == 0)
            .map(|(&node, _)| node)
            .collect();

        let mut order = Vec::with_capacity(members.len());
        while let Some(node) = ready.pop_first() {
            order.push(node);
            for dependent in self.graph.neighbors_directed(node, Direction::Outgoing) {
                if let Some(count) = pending.get_mut(&dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(dependent);
                    }
                }
            }
        }

        Ok(order)
    }

    /// Direct dependencies of `node`, in the order the task declared them.
    pub(crate) fn dependencies_of(&self, node: NodeIndex) -> Vec<NodeIndex> {
        self.graph[node]
            .dependencies()
            .iter()
            .filter_map(|name| self.index.get(name).copied())
            .collect()
    }

    /// Looks for a dependency cycle and returns it as a path of task names,
    /// starting and ending with the same task.
    fn find_cycle(&self) -> Option<Vec<String>> {
        let scc = petgraph::algo::tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| scc.len() > 1 || self.graph.contains_edge(scc[0], scc[0]))
            .min_by_key(|scc| scc.iter().min().copied())?;

        let members: HashSet<NodeIndex> = scc.iter().copied().collect();
        let start = scc.iter().min().copied()?;

        let mut path = vec![start];
        let mut visited = HashSet::from([start]);
        self.walk_cycle(&members, start, start, &mut path, &mut visited);

        Some(
            path.into_iter()
                .map(|index| self.graph[index].name().to_string())
                .collect(),
        )
    }

    fn walk_cycle(
        &self,
        members: &HashSet<NodeIndex>,
        node: NodeIndex,
        start: NodeIndex,
        path: &mut Vec<NodeIndex>,
        visited: &mut HashSet<NodeIndex>,
    ) -> bool {
        for dependency in self.dependencies_of(node) {
            if !members.contains(&dependency) {
                continue;
            }

            if dependency == start {
                path.push(start);
                return true;
            }

            if visited.insert(dependency) {
                path.push(dependency);
                if self.walk_cycle(members, dependency, start, path, visited) {
                    return true;
                }
                path.pop();
            }
        }

        false
    }
}

impl std::fmt::Display for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "graph LR")?;

        for index in self.graph.node_indices() {
            let name = self.graph[index].name().replace('"', "\\\"");
            writeln!(f, "    {}[\"{}\"]", index.index(), name)?;
        }

        for edge in self.graph.raw_edges() {
            writeln!(f, "    {} --> {}", edge.source().index(), edge.target().index())?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(name: &'static str, dependencies: &[&str]) -> TaskDefinition {
        TaskDefinition::build(name)
            .depends_on(dependencies.iter().copied())
            .run(|_, _| Ok(()))
    }

    fn build(tasks: Vec<TaskDefinition>) -> Result<TaskGraph, GraphError> {
        let mut builder = TaskGraphBuilder::new();
        builder.add_tasks(tasks);
        builder.build()
    }

    fn diamond() -> TaskGraph {
        build(vec![
            task("A", &[]),
            task("B", &["A"]),
            task("C", &["A"]),
            task("D", &["B", "C"]),
        ])
        .unwrap()
    }

    #[test]
    fn test_diamond_order() {
        let order = diamond().resolve_subgraph("D").unwrap();
        assert_eq!(order, vec!["A", "B", "C", "D"]);
    }

    #[test]
    fn test_subgraph_only_includes_dependencies() {
        let graph = diamond();
        assert_eq!(graph.resolve_subgraph("B").unwrap(), vec!["A", "B"]);
        assert_eq!(graph.resolve_subgraph("A").unwrap(), vec!["A"]);
    }

    #[test]
    fn test_ties_follow_registration_order() {
        let graph = build(vec![
            task("z", &[]),
            task("y", &[]),
            task("x", &["y", "z"]),
        ])
        .unwrap();

        assert_eq!(graph.resolve_subgraph("x").unwrap(), vec!["z", "y", "x"]);
    }

    #[test]
    fn test_dependency_registered_later() {
        let graph = build(vec![task("test", &["compile"]), task("compile", &[])]).unwrap();
        assert_eq!(graph.resolve_subgraph("test").unwrap(), vec!["compile", "test"]);
    }

    #[test]
    fn test_unknown_target() {
        let err = diamond().resolve_subgraph("E").unwrap_err();
        assert!(matches!(err, GraphError::UnknownTask(name) if name == "E"));
    }

    #[test]
    fn test_duplicate_name() {
        let err = build(vec![task("compile", &[]), task("compile", &[])]).unwrap_err();
        assert!(matches!(err, GraphError::DuplicateTaskName(name) if name == "compile"));
    }

    #[test]
    fn test_unknown_dependency() {
        let err = build(vec![task("test", &["compile"])]).unwrap_err();
        assert!(matches!(
            err,
            GraphError::UnknownDependency { task, dependency } if task == "test" && dependency == "compile"
        ));
    }

    #[test]
    fn test_cycle_is_named() {
        let err = build(vec![
            task("A", &["C"]),
            task("B", &["A"]),
            task("C", &["B"]),
            task("D", &[]),
        ])
        .unwrap_err();

        match err {
            GraphError::CyclicDependency { cycle } => {
                assert_eq!(cycle, vec!["A", "C", "B", "A"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_self_cycle() {
        let err = build(vec![task("A", &["A"])]).unwrap_err();
        assert!(matches!(
            err,
            GraphError::CyclicDependency { cycle } if cycle == vec!["A", "A"]
        ));
    }

    #[test]
    fn test_mermaid() {
        let rendered = build(vec![task("compile", &[]), task("test", &["compile"])])
            .unwrap()
            .to_string();

        assert_eq!(
            rendered,
            "graph LR\n    0[\"compile\"]\n    1[\"test\"]\n    0 --> 1\n"
        );
    }

    #[test]
    fn test_lookup_helpers() {
        let graph = diamond();
        assert_eq!(graph.len(), 4);
        assert_eq!(graph.task_names().collect::<Vec<_>>(), vec!["A", "B", "C", "D"]);
        assert_eq!(graph.definition("D").map(|t| t.dependencies().len()), Some(2));
        assert!(graph.definition("E").is_none());
    }
}
