use camino::Utf8PathBuf;
use thiserror::Error;

use crate::config::Contributor;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{contributor} declares key '{key}' more than once")]
    DuplicateKeyConflict { contributor: Contributor, key: String },

    #[error("Required key '{key}' (declared by {contributor}) is missing after merge")]
    UnresolvedRequiredKey { key: String, contributor: Contributor },

    #[error("Invalid value at '{key}':\n{source}")]
    InvalidValue {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid key path '{0}'")]
    InvalidKey(String),

    #[error("Couldn't read config file '{0}'.\n{1}")]
    Read(Utf8PathBuf, std::io::Error),

    #[error("Couldn't parse config file '{0}'.\n{1}")]
    Parse(Utf8PathBuf, anyhow::Error),

    #[error("Config file '{0}' must contain a table at the top level")]
    NotATable(Utf8PathBuf),
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Plugin '{0}' is already registered")]
    DuplicatePluginName(String),

    #[error("Unknown plugin '{0}'")]
    UnknownPlugin(String),

    #[error("Plugin '{0}' can't be registered, the registry is frozen")]
    Frozen(String),
}

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Task '{0}' is defined more than once")]
    DuplicateTaskName(String),

    #[error("Task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: String, dependency: String },

    #[error("Cyclic dependency: {}", .cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("Task '{0}' not found")]
    UnknownTask(String),
}

#[derive(Debug, Error)]
pub enum ToolchainError {
    #[error("Program '{0}' not found")]
    NotFound(String),

    #[error("Config key '{0}' is empty")]
    EmptyKey(String),

    #[error("Couldn't spawn '{0}'.\n{1}")]
    Spawn(String, std::io::Error),

    #[error("'{program}' timed out after {millis}ms")]
    Timeout { program: String, millis: u64 },

    #[error("Requested compiler {requested}, but '{program}' reports {found}")]
    VersionMismatch {
        program: String,
        requested: String,
        found: String,
    },

    #[error("'{program}' exited with {status}:\n{stderr}")]
    Exit {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("Compilation failed:\n{}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("\n"))]
    Diagnostics(Vec<crate::toolchain::Diagnostic>),

    #[error("Couldn't interpret compiler output.\n{0}")]
    Output(#[from] serde_json::Error),

    #[error("Invalid toolchain configuration.\n{0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    GlobPattern(#[from] glob::PatternError),

    #[error(transparent)]
    Glob(#[from] glob::GlobError),
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("Task '{task_name}':\n{cause:#}")]
    TaskFailed {
        task_name: String,
        cause: anyhow::Error,
    },

    #[error("Cancelled")]
    Cancelled,

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("Failed to build worker pool")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// Any failure of a single invocation.
#[derive(Debug, Error)]
pub enum KilnError {
    #[error("Error while resolving configuration:\n{0}")]
    Config(#[from] ConfigError),

    #[error("Error while registering plugins:\n{0}")]
    Registry(#[from] RegistryError),

    #[error("Error while building the task graph:\n{0}")]
    Graph(#[from] GraphError),

    #[error("Error while running tasks:\n{0}")]
    Run(#[from] RunError),
}

impl KilnError {
    /// Process exit code, distinct per failure kind.
    pub fn exit_code(&self) -> u8 {
        match self {
            KilnError::Config(_) | KilnError::Registry(_) => 2,
            KilnError::Graph(_) | KilnError::Run(RunError::Graph(_)) => 3,
            KilnError::Run(RunError::TaskFailed { .. }) => 4,
            KilnError::Run(RunError::Cancelled) => 130,
            KilnError::Run(RunError::Pool(_)) => 1,
        }
    }
}
