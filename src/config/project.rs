use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use serde_json::Value;

use crate::config::ResolvedConfig;
use crate::error::ConfigError;

/// Typed view over the well-known keys of a resolved configuration.
///
/// Plugins are free to store anything else next to these keys; such values
/// stay reachable through [`ResolvedConfig::get`].
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    pub solidity: SolidityConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub networks: BTreeMap<String, NetworkConfig>,
    #[serde(default = "default_network")]
    pub default_network: String,
}

fn default_network() -> String {
    "hardhat".to_string()
}

impl ProjectConfig {
    pub fn from_resolved(config: &ResolvedConfig) -> Result<Self, ConfigError> {
        config.extract()
    }

    /// The network selected by `defaultNetwork`, if it is defined.
    pub fn network(&self) -> Option<&NetworkConfig> {
        self.networks.get(&self.default_network)
    }
}

/// The `solidity` key accepts three shapes:
///
/// * `"0.8.19"`
/// * `{ version = "0.8.19", settings = { optimizer = { enabled = true } } }`
/// * `{ compilers = [ { version = "0.8.19" }, { version = "0.7.6" } ] }`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SolidityConfig {
    Version(String),
    Multiple { compilers: Vec<CompilerConfig> },
    Single(CompilerConfig),
}

impl SolidityConfig {
    /// Every configured compiler, in declaration order.
    pub fn compilers(&self) -> Vec<CompilerConfig> {
        match self {
            SolidityConfig::Version(version) => vec![CompilerConfig {
                version: version.clone(),
                settings: CompilerSettings::default(),
            }],
            SolidityConfig::Single(compiler) => vec![compiler.clone()],
            SolidityConfig::Multiple { compilers } => compilers.clone(),
        }
    }

    /// The compiler used for the project sources: the first one declared.
    pub fn primary(&self) -> Option<CompilerConfig> {
        self.compilers().into_iter().next()
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CompilerConfig {
    pub version: String,
    #[serde(default)]
    pub settings: CompilerSettings,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompilerSettings {
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    pub evm_version: Option<String>,
    #[serde(default)]
    pub remappings: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct OptimizerConfig {
    pub enabled: bool,
    pub runs: u32,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            runs: 200,
        }
    }
}

/// Project layout. Relative paths are taken relative to `root`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct PathsConfig {
    pub root: Utf8PathBuf,
    pub sources: Utf8PathBuf,
    pub tests: Utf8PathBuf,
    pub cache: Utf8PathBuf,
    pub artifacts: Utf8PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            root: ".".into(),
            sources: "contracts".into(),
            tests: "test".into(),
            cache: "cache".into(),
            artifacts: "artifacts".into(),
        }
    }
}

impl PathsConfig {
    /// Anchors `path` at the project root unless it is already absolute.
    pub fn resolve(&self, path: &Utf8Path) -> Utf8PathBuf {
        if path.is_absolute() {
            path.to_owned()
        } else {
            self.root.join(path)
        }
    }

    pub fn sources(&self) -> Utf8PathBuf {
        self.resolve(&self.sources)
    }

    pub fn tests(&self) -> Utf8PathBuf {
        self.resolve(&self.tests)
    }

    pub fn cache(&self) -> Utf8PathBuf {
        self.resolve(&self.cache)
    }

    pub fn artifacts(&self) -> Utf8PathBuf {
        self.resolve(&self.artifacts)
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    pub url: Option<String>,
    pub chain_id: Option<u64>,
    pub accounts: Option<Value>,
}
