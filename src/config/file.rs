//! User configuration file loading.
//!
//! The user's declarations live in `kiln.toml` (or `kiln.json`) at the project
//! root. The top-level `plugins` array is the ordered activation list, every
//! other top-level key becomes part of the user fragment:
//!
//! ```toml
//! plugins = ["toolbox", "foundry"]
//! solidity = "0.8.19"
//! ```

use std::fs;

use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use serde_json::Value;

use crate::config::{ConfigFragment, split_key};
use crate::error::ConfigError;

/// The config file names to search for, in order.
pub const CONFIG_FILE_NAMES: [&str; 2] = ["kiln.toml", "kiln.json"];

/// Key listing the plugins to activate.
const PLUGINS_KEY: &str = "plugins";

/// What the user declared in their configuration file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserConfig {
    /// Plugin names in activation order.
    pub plugins: Vec<String>,
    /// Everything else.
    pub fragment: ConfigFragment,
}

/// Searches for a config file in `root`.
pub fn discover_config(root: &Utf8Path) -> Option<Utf8PathBuf> {
    let found = CONFIG_FILE_NAMES
        .iter()
        .map(|name| root.join(name))
        .find(|path| path.exists());

    match &found {
        Some(path) => tracing::debug!("found config file at {}", path),
        None => tracing::debug!("no config file found in {}", root),
    }

    found
}

/// Loads and parses a config file; the format follows the file extension.
pub fn load_config(path: &Utf8Path) -> Result<UserConfig, ConfigError> {
    let contents =
        fs::read_to_string(path).map_err(|e| ConfigError::Read(path.to_owned(), e))?;
    parse_config(&contents, path)
}

/// Parses config file contents. `path` selects the format and names the
/// file in errors.
pub fn parse_config(contents: &str, path: &Utf8Path) -> Result<UserConfig, ConfigError> {
    let value = match path.extension() {
        Some("json") => serde_json::from_str::<Value>(contents).context("invalid JSON"),
        _ => toml::from_str::<toml::Table>(contents)
            .context("invalid TOML")
            .and_then(|table| serde_json::to_value(table).context("unrepresentable TOML value")),
    }
    .map_err(|e| ConfigError::Parse(path.to_owned(), e))?;

    let Value::Object(mut map) = value else {
        return Err(ConfigError::NotATable(path.to_owned()));
    };

    let plugins = match map.remove(PLUGINS_KEY) {
        None => Vec::new(),
        Some(value) => serde_json::from_value(value).map_err(|source| ConfigError::InvalidValue {
            key: PLUGINS_KEY.to_string(),
            source,
        })?,
    };

    Ok(UserConfig {
        plugins,
        fragment: ConfigFragment::from_map(map),
    })
}

/// Parses a `key=value` override. The value is read as JSON when possible,
/// as a plain string otherwise, so `--set test.timeout=1000` yields a number
/// and `--set solidity=0.8.19` a string.
///
/// Compiler versions are strings even when they look like a number, so
/// `--set solidity=0.8` stays `"0.8"`.
pub fn parse_override(raw: &str) -> Result<ConfigFragment, ConfigError> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| ConfigError::InvalidKey(raw.to_string()))?;

    let key = key.trim();
    let segments = split_key(key)?;
    let value = value.trim();

    let parsed = match serde_json::from_str::<Value>(value) {
        Ok(Value::Number(_)) if is_version_key(&segments) => None,
        Ok(parsed) => Some(parsed),
        Err(_) => None,
    };
    let value = parsed.unwrap_or_else(|| Value::String(value.to_string()));

    Ok(ConfigFragment::new().set(key, value))
}

fn is_version_key(segments: &[&str]) -> bool {
    segments == ["solidity"] || segments.last().is_some_and(|last| matches!(*last, "version" | "evmVersion"))
}
