use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::{lookup, split_key};
use crate::core::Hash32;
use crate::error::ConfigError;

/// The merged configuration of a single invocation.
///
/// Created once by [`resolve`](crate::config::resolve), never modified
/// afterwards, and handed to every task by reference. Cloning only bumps a
/// reference count.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    root: Arc<Value>,
}

impl ResolvedConfig {
    pub(crate) fn new(root: Value) -> Self {
        Self {
            root: Arc::new(root),
        }
    }

    /// The whole merged mapping.
    pub fn as_value(&self) -> &Value {
        &self.root
    }

    /// Looks up a dotted key path, e.g. `networks.hardhat.chainId`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        let path = split_key(key).ok()?;
        lookup(&self.root, &path)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Deserializes the value at `key`, or returns `None` when it's absent.
    pub fn get_as<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: DeserializeOwned,
    {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|source| ConfigError::InvalidValue {
                    key: key.to_string(),
                    source,
                }),
        }
    }

    /// Deserializes the entire configuration into `T`.
    pub fn extract<T>(&self) -> Result<T, ConfigError>
    where
        T: DeserializeOwned,
    {
        serde_json::from_value(Value::clone(&self.root)).map_err(|source| ConfigError::InvalidValue {
            key: "<root>".to_string(),
            source,
        })
    }

    /// Canonical serialization: keys sorted, no insignificant whitespace.
    pub fn to_canonical_json(&self) -> String {
        // Object keys live in a `BTreeMap`, so the output is already sorted.
        self.root.to_string()
    }

    /// BLAKE3 hash of the canonical serialization.
    pub fn fingerprint(&self) -> Hash32 {
        Hash32::hash(self.to_canonical_json())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    fn sample() -> ResolvedConfig {
        ResolvedConfig::new(json!({
            "solidity": "0.8.19",
            "networks": { "hardhat": { "chainId": 31337 } },
            "test": { "timeout": 40000 }
        }))
    }

    #[test]
    fn test_get_paths() {
        let config = sample();
        assert_eq!(config.get_str("solidity"), Some("0.8.19"));
        assert_eq!(config.get("networks.hardhat.chainId"), Some(&json!(31337)));
        assert_eq!(config.get("networks.mainnet"), None);
        assert_eq!(config.get("networks..hardhat"), None);
    }

    #[test]
    fn test_get_as() {
        let config = sample();
        assert_eq!(config.get_as::<u64>("test.timeout").unwrap(), Some(40000));
        assert_eq!(config.get_as::<u64>("toolchain.timeout").unwrap(), None);
        assert!(matches!(
            config.get_as::<u64>("solidity"),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_extract() {
        #[derive(Deserialize)]
        struct Partial {
            solidity: String,
        }

        let partial: Partial = sample().extract().unwrap();
        assert_eq!(partial.solidity, "0.8.19");
    }

    #[test]
    fn test_canonical_json_sorted() {
        let a = ResolvedConfig::new(json!({ "b": 1, "a": { "d": 2, "c": 3 } }));
        assert_eq!(a.to_canonical_json(), r#"{"a":{"c":3,"d":2},"b":1}"#);
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        assert_eq!(sample().fingerprint(), sample().fingerprint());
        let other = ResolvedConfig::new(json!({ "solidity": "0.8.18" }));
        assert_ne!(sample().fingerprint(), other.fingerprint());
    }
}
