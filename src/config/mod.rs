//! Configuration fragments and the per-contributor configuration model.
//!
//! Every plugin, as well as the user, contributes its settings as a
//! [`ConfigFragment`]: a list of dotted key paths (`paths.sources`,
//! `networks.hardhat.chainId`) bound to JSON-like values. Fragments are never
//! mutated once built; combining two of them produces a new fragment.
//!
//! The [`ConfigModel`] collects fragments keyed by the identity of whoever
//! contributed them and hands them to the resolver in precedence order.

mod file;
mod project;
mod resolved;
mod resolver;

use std::collections::BTreeSet;
use std::fmt::Display;

use serde_json::{Map, Value};

use crate::error::ConfigError;

pub use file::{CONFIG_FILE_NAMES, UserConfig, discover_config, load_config, parse_config, parse_override};
pub use project::{
    CompilerConfig, CompilerSettings, NetworkConfig, OptimizerConfig, PathsConfig, ProjectConfig,
    SolidityConfig,
};
pub use resolved::ResolvedConfig;
pub use resolver::resolve;

pub(crate) use resolver::{lookup, merge_at};

/// Identity of the party that produced a fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Contributor {
    /// A registered plugin, by its stable name.
    Plugin(String),
    /// The user's own declarations, always applied last.
    User,
}

impl Contributor {
    pub fn plugin(name: impl Into<String>) -> Self {
        Contributor::Plugin(name.into())
    }
}

impl Display for Contributor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Contributor::Plugin(name) => write!(f, "plugin '{name}'"),
            Contributor::User => write!(f, "user configuration"),
        }
    }
}

/// Splits a dotted key path into its segments.
pub(crate) fn split_key(key: &str) -> Result<Vec<&str>, ConfigError> {
    let segments: Vec<_> = key.split('.').collect();

    if segments.iter().any(|segment| segment.is_empty()) {
        return Err(ConfigError::InvalidKey(key.to_string()));
    }

    Ok(segments)
}

/// Two key paths overlap when one is equal to, or nested inside, the other.
fn overlaps(a: &[&str], b: &[&str]) -> bool {
    a.iter().zip(b.iter()).all(|(x, y)| x == y)
}

/// A set of configuration values contributed by a single party.
///
/// ```rust
/// use kiln::ConfigFragment;
///
/// let fragment = ConfigFragment::new()
///     .set("solidity", "0.8.19")
///     .set("paths.sources", "src")
///     .require("solidity");
///
/// assert_eq!(fragment.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigFragment {
    entries: Vec<(String, Value)>,
    required: BTreeSet<String>,
}

impl ConfigFragment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a fragment whose entries are the top-level keys of `map`.
    pub fn from_map(map: Map<String, Value>) -> Self {
        Self {
            entries: map.into_iter().collect(),
            required: BTreeSet::new(),
        }
    }

    /// Binds `key` to `value`. Setting the same key again replaces the value.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        let value = value.into();

        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }

        self
    }

    /// Marks `key` as mandatory: resolution fails unless some fragment sets it.
    pub fn require(mut self, key: impl Into<String>) -> Self {
        self.required.insert(key.into());
        self
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn required(&self) -> impl Iterator<Item = &str> {
        self.required.iter().map(String::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Applies every entry of this fragment onto `root`, in insertion order.
    pub(crate) fn apply_to(&self, root: &mut Value) -> Result<(), ConfigError> {
        for (key, value) in &self.entries {
            merge_at(root, &split_key(key)?, value.clone());
        }
        Ok(())
    }

    /// The nested mapping this fragment describes on its own.
    pub fn to_tree(&self) -> Result<Value, ConfigError> {
        let mut root = Value::Object(Map::new());
        self.apply_to(&mut root)?;
        Ok(root)
    }

    /// Returns a new fragment where `other` is merged over `self`.
    ///
    /// Nested mappings are merged key by key, everything else in `other`
    /// replaces what `self` had. Required keys of both are kept.
    pub fn overlay(&self, other: &ConfigFragment) -> Result<ConfigFragment, ConfigError> {
        let mut tree = self.to_tree()?;
        other.apply_to(&mut tree)?;

        let map = match tree {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        let mut merged = ConfigFragment::from_map(map);
        merged.required = self.required.union(&other.required).cloned().collect();
        Ok(merged)
    }

    fn conflicting_key<'a>(&'a self, other: &ConfigFragment) -> Result<Option<&'a str>, ConfigError> {
        for (key, _) in &self.entries {
            let a = split_key(key)?;
            for (other_key, _) in &other.entries {
                if overlaps(&a, &split_key(other_key)?) {
                    return Ok(Some(key));
                }
            }
        }
        Ok(None)
    }

    fn self_conflict(&self) -> Result<Option<&str>, ConfigError> {
        for (i, (key, _)) in self.entries.iter().enumerate() {
            let a = split_key(key)?;
            for (other_key, _) in &self.entries[i + 1..] {
                if overlaps(&a, &split_key(other_key)?) {
                    return Ok(Some(key));
                }
            }
        }
        Ok(None)
    }

    fn absorb(&mut self, other: ConfigFragment) {
        self.entries.extend(other.entries);
        self.required.extend(other.required);
    }
}

/// Fragments grouped by contributor, in the order resolution applies them.
#[derive(Debug, Clone, Default)]
pub struct Finalized {
    /// Plugin fragments in registration order.
    pub plugins: Vec<(Contributor, ConfigFragment)>,
    /// The user's fragment, applied last.
    pub user: ConfigFragment,
}

/// Collects configuration fragments keyed by contributor identity.
///
/// A contributor may declare several fragments, but they must not set the same
/// key twice: that is a mistake inside one contributor, not a question of
/// precedence. Collisions between different contributors are fine and are
/// settled later by the resolver.
#[derive(Debug, Default)]
pub struct ConfigModel {
    declared: Vec<(Contributor, ConfigFragment)>,
}

impl ConfigModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(
        &mut self,
        contributor: Contributor,
        fragment: ConfigFragment,
    ) -> Result<(), ConfigError> {
        if let Some(key) = fragment.self_conflict()? {
            return Err(ConfigError::DuplicateKeyConflict {
                contributor,
                key: key.to_string(),
            });
        }

        match self.declared.iter_mut().find(|(c, _)| *c == contributor) {
            Some((_, existing)) => {
                if let Some(key) = fragment.conflicting_key(existing)? {
                    return Err(ConfigError::DuplicateKeyConflict {
                        contributor,
                        key: key.to_string(),
                    });
                }
                existing.absorb(fragment);
            }
            None => self.declared.push((contributor, fragment)),
        }

        Ok(())
    }

    /// Returns plugin fragments in first-declaration order, user fragment last.
    pub fn finalize(self) -> Finalized {
        let mut finalized = Finalized::default();

        for (contributor, fragment) in self.declared {
            match contributor {
                Contributor::User => finalized.user = fragment,
                plugin => finalized.plugins.push((plugin, fragment)),
            }
        }

        finalized
    }
}
