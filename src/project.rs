use crate::config::{ConfigFragment, ConfigModel, Contributor, ResolvedConfig, resolve};
use crate::engine::{RunOptions, RunOutput, Runner, TaskGraph, TaskGraphBuilder};
use crate::error::{KilnError, RegistryError};
use crate::plugin::{PluginCatalog, PluginDescriptor, PluginRegistry};

/// The front door: collects plugins and user configuration for a single
/// invocation, then validates everything up front.
///
/// ```rust,no_run
/// use std::sync::Arc;
///
/// use kiln::{ConfigFragment, PluginCatalog, Project, RunOptions, SolcToolchain};
///
/// let catalog = PluginCatalog::builtin(Arc::new(SolcToolchain));
///
/// let prepared = Project::new()
///     .activate(&catalog, ["toolbox", "foundry"])?
///     .user(ConfigFragment::new().set("solidity", "0.8.19"))
///     .prepare()?;
///
/// prepared.run("compile", RunOptions::default())?;
/// # Ok::<(), kiln::KilnError>(())
/// ```
#[derive(Debug, Default)]
pub struct Project {
    registry: PluginRegistry,
    user: ConfigFragment,
    overrides: ConfigFragment,
}

impl Project {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a plugin; order of calls is registration order.
    pub fn plugin(mut self, descriptor: PluginDescriptor) -> Result<Self, RegistryError> {
        self.registry.register(descriptor)?;
        Ok(self)
    }

    /// Registers plugins from `catalog` by name, in the given order.
    pub fn activate<I, S>(mut self, catalog: &PluginCatalog, names: I) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        catalog.activate(names, &mut self.registry)?;
        Ok(self)
    }

    /// The user's own declarations; they take precedence over every plugin.
    pub fn user(mut self, fragment: ConfigFragment) -> Self {
        self.user = fragment;
        self
    }

    /// Values merged over the user's declarations, e.g. from the command line.
    pub fn overrides(mut self, fragment: ConfigFragment) -> Self {
        self.overrides = fragment;
        self
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Freezes the registry, resolves the configuration and builds the task
    /// graph. Nothing runs yet, so any error returned here has no side effects.
    pub fn prepare(mut self) -> Result<Prepared, KilnError> {
        self.registry.freeze();

        let mut model = ConfigModel::new();
        for (contributor, fragment) in self.registry.all_fragments() {
            model.declare(contributor, fragment)?;
        }
        model.declare(Contributor::User, self.user.overlay(&self.overrides)?)?;

        let finalized = model.finalize();
        let config = resolve(&finalized.plugins, &finalized.user)?;

        let mut builder = TaskGraphBuilder::new();
        builder.add_tasks(self.registry.all_task_definitions());
        let graph = builder.build()?;

        tracing::debug!(
            "prepared {} task(s) from {} plugin(s), config {}",
            graph.len(),
            self.registry.len(),
            config.fingerprint()
        );

        Ok(Prepared { config, graph })
    }
}

/// A validated invocation, ready to run any of its tasks.
#[derive(Debug)]
pub struct Prepared {
    pub config: ResolvedConfig,
    pub graph: TaskGraph,
}

impl Prepared {
    pub fn run(&self, target: &str, options: RunOptions) -> Result<RunOutput, KilnError> {
        Ok(Runner::new(options).run(&self.graph, target, &self.config)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::TaskDefinition;
    use crate::error::{ConfigError, GraphError};
    use serde_json::json;

    fn versioned(name: &str, version: &str) -> PluginDescriptor {
        PluginDescriptor::new(name).fragment(
            ConfigFragment::new()
                .set("solidity", version)
                .require("solidity"),
        )
    }

    #[test]
    fn test_user_wins_over_plugins() {
        let prepared = Project::new()
            .plugin(versioned("a", "0.8.17"))
            .unwrap()
            .plugin(versioned("b", "0.8.18"))
            .unwrap()
            .user(ConfigFragment::new().set("solidity", "0.8.19"))
            .prepare()
            .unwrap();

        assert_eq!(prepared.config.get_str("solidity"), Some("0.8.19"));
    }

    #[test]
    fn test_overrides_win_over_user() {
        let prepared = Project::new()
            .user(ConfigFragment::new().set("paths", json!({ "sources": "contracts", "tests": "test" })))
            .overrides(ConfigFragment::new().set("paths.sources", "src"))
            .prepare()
            .unwrap();

        assert_eq!(prepared.config.get_str("paths.sources"), Some("src"));
        assert_eq!(prepared.config.get_str("paths.tests"), Some("test"));
    }

    #[test]
    fn test_missing_required_key() {
        let plugin = PluginDescriptor::new("strict")
            .fragment(ConfigFragment::new().require("solidity"));

        let err = Project::new().plugin(plugin).unwrap().prepare().unwrap_err();
        assert!(matches!(
            err,
            KilnError::Config(ConfigError::UnresolvedRequiredKey { ref key, .. }) if key == "solidity"
        ));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_graph_errors_surface() {
        let plugin = PluginDescriptor::new("broken")
            .task(TaskDefinition::build("test").depends_on(["compile"]).run(|_, _| Ok(())));

        let err = Project::new().plugin(plugin).unwrap().prepare().unwrap_err();
        assert!(matches!(err, KilnError::Graph(GraphError::UnknownDependency { .. })));
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_runs_plugin_tasks() {
        let plugin = versioned("a", "0.8.19").task(
            TaskDefinition::build("version")
                .run(|ctx, _| Ok(ctx.config.get_str("solidity").unwrap_or_default().to_string())),
        );

        let prepared = Project::new().plugin(plugin).unwrap().prepare().unwrap();
        let output = prepared.run("version", RunOptions::default()).unwrap();

        assert_eq!(output.get::<String>().map(String::as_str), Some("0.8.19"));
    }
}
