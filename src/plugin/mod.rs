//! Plugins and the registry that collects them.
//!
//! A plugin is nothing more than a [`PluginDescriptor`]: a stable name plus
//! the configuration fragments and task definitions it contributes. Plugins
//! never reach into the core; everything they add flows through these two
//! extension points.

pub mod foundry;
pub mod toolbox;

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::{ConfigFragment, Contributor};
use crate::engine::TaskDefinition;
use crate::error::RegistryError;
use crate::toolchain::Toolchain;

/// Everything a single plugin contributes to an invocation.
///
/// ```rust
/// use kiln::{ConfigFragment, PluginDescriptor, TaskDefinition};
///
/// let plugin = PluginDescriptor::new("greeter")
///     .fragment(ConfigFragment::new().set("greeting", "hello"))
///     .task(TaskDefinition::build("greet").run(|ctx, _| {
///         Ok(ctx.config.get_str("greeting").unwrap_or_default().to_string())
///     }));
///
/// assert_eq!(plugin.name(), "greeter");
/// assert_eq!(plugin.ordinal(), None);
/// ```
#[derive(Debug, Clone)]
pub struct PluginDescriptor {
    name: String,
    ordinal: Option<usize>,
    fragments: Vec<ConfigFragment>,
    tasks: Vec<TaskDefinition>,
}

impl PluginDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ordinal: None,
            fragments: Vec::new(),
            tasks: Vec::new(),
        }
    }

    pub fn fragment(mut self, fragment: ConfigFragment) -> Self {
        self.fragments.push(fragment);
        self
    }

    pub fn task(mut self, task: TaskDefinition) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn tasks(mut self, tasks: impl IntoIterator<Item = TaskDefinition>) -> Self {
        self.tasks.extend(tasks);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Position in the registry, assigned on registration.
    pub fn ordinal(&self) -> Option<usize> {
        self.ordinal
    }

    pub fn fragments(&self) -> &[ConfigFragment] {
        &self.fragments
    }

    pub fn task_definitions(&self) -> &[TaskDefinition] {
        &self.tasks
    }

    pub fn contributor(&self) -> Contributor {
        Contributor::plugin(&self.name)
    }
}

/// Ordered, write-once collection of plugins for one invocation.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    plugins: Vec<PluginDescriptor>,
    frozen: bool,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a plugin. The order of registration is the order in which its
    /// configuration is applied and its tasks are registered.
    pub fn register(&mut self, mut descriptor: PluginDescriptor) -> Result<&PluginDescriptor, RegistryError> {
        if self.frozen {
            return Err(RegistryError::Frozen(descriptor.name));
        }

        if self.plugins.iter().any(|p| p.name == descriptor.name) {
            return Err(RegistryError::DuplicatePluginName(descriptor.name));
        }

        tracing::debug!("registering plugin '{}'", descriptor.name);

        descriptor.ordinal = Some(self.plugins.len());
        self.plugins.push(descriptor);
        Ok(&self.plugins[self.plugins.len() - 1])
    }

    /// Rejects any further registration.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn plugins(&self) -> &[PluginDescriptor] {
        &self.plugins
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Every contributed fragment, in registration order.
    pub fn all_fragments(&self) -> Vec<(Contributor, ConfigFragment)> {
        self.plugins
            .iter()
            .flat_map(|plugin| {
                plugin
                    .fragments
                    .iter()
                    .map(move |fragment| (plugin.contributor(), fragment.clone()))
            })
            .collect()
    }

    /// Every contributed task, in registration order.
    pub fn all_task_definitions(&self) -> Vec<TaskDefinition> {
        self.plugins
            .iter()
            .flat_map(|plugin| plugin.tasks.iter().cloned())
            .collect()
    }
}

type Constructor = Box<dyn Fn() -> PluginDescriptor + Send + Sync>;

/// Maps stable plugin names to the code that builds them, so plugins can be
/// activated by name from a configuration file.
#[derive(Default)]
pub struct PluginCatalog {
    constructors: BTreeMap<String, Constructor>,
}

impl PluginCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog of the plugins shipped with `kiln`, wired to `toolchain`.
    pub fn builtin(toolchain: Arc<dyn Toolchain>) -> Self {
        let mut catalog = Self::new();
        catalog
            .insert(toolbox::NAME, {
                let toolchain = toolchain.clone();
                move || toolbox::toolbox(toolchain.clone())
            })
            .insert(foundry::NAME, foundry::foundry);
        catalog
    }

    pub fn insert<F>(&mut self, name: impl Into<String>, constructor: F) -> &mut Self
    where
        F: Fn() -> PluginDescriptor + Send + Sync + 'static,
    {
        self.constructors.insert(name.into(), Box::new(constructor));
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    pub fn create(&self, name: &str) -> Result<PluginDescriptor, RegistryError> {
        self.constructors
            .get(name)
            .map(|constructor| constructor())
            .ok_or_else(|| RegistryError::UnknownPlugin(name.to_string()))
    }

    /// Registers the named plugins in the given order.
    pub fn activate<I, S>(&self, names: I, registry: &mut PluginRegistry) -> Result<(), RegistryError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for name in names {
            registry.register(self.create(name.as_ref())?)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for PluginCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.constructors.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::toolchain::SolcToolchain;

    fn plugin(name: &str) -> PluginDescriptor {
        PluginDescriptor::new(name)
            .fragment(ConfigFragment::new().set("owner", name))
            .task(TaskDefinition::build(format!("{name}:task")).run(|_, _| Ok(())))
    }

    #[test]
    fn test_register_assigns_ordinals() {
        let mut registry = PluginRegistry::new();
        registry.register(plugin("a")).unwrap();
        let b = registry.register(plugin("b")).unwrap();

        assert_eq!(b.ordinal(), Some(1));
        assert_eq!(
            registry.plugins().iter().map(PluginDescriptor::name).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
    }

    #[test]
    fn test_duplicate_name() {
        let mut registry = PluginRegistry::new();
        registry.register(plugin("toolbox")).unwrap();

        let err = registry.register(plugin("toolbox")).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicatePluginName(name) if name == "toolbox"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_frozen() {
        let mut registry = PluginRegistry::new();
        registry.freeze();

        let err = registry.register(plugin("late")).unwrap_err();
        assert!(matches!(err, RegistryError::Frozen(_)));
    }

    #[test]
    fn test_contributions_in_order() {
        let mut registry = PluginRegistry::new();
        registry.register(plugin("b")).unwrap();
        registry.register(plugin("a")).unwrap();

        let fragments = registry.all_fragments();
        assert_eq!(fragments[0].0, Contributor::plugin("b"));
        assert_eq!(fragments[1].1.get("owner"), Some(&json!("a")));

        let tasks = registry.all_task_definitions();
        assert_eq!(tasks[0].name(), "b:task");
        assert_eq!(tasks[1].name(), "a:task");
    }

    #[test]
    fn test_catalog_activation() {
        let catalog = PluginCatalog::builtin(Arc::new(SolcToolchain));
        assert_eq!(catalog.names().collect::<Vec<_>>(), vec!["foundry", "toolbox"]);

        let mut registry = PluginRegistry::new();
        catalog.activate(["toolbox", "foundry"], &mut registry).unwrap();
        assert_eq!(registry.plugins()[0].name(), "toolbox");
        assert_eq!(registry.plugins()[1].name(), "foundry");

        let err = catalog.activate(["hardhat-ethers"], &mut registry).unwrap_err();
        assert!(matches!(err, RegistryError::UnknownPlugin(name) if name == "hardhat-ethers"));
    }

    #[test]
    fn test_catalog_rejects_repeated_activation() {
        let catalog = PluginCatalog::builtin(Arc::new(SolcToolchain));
        let mut registry = PluginRegistry::new();

        let err = catalog
            .activate(["toolbox", "toolbox"], &mut registry)
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicatePluginName(_)));
    }
}
