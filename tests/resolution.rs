//! Configuration resolution across plugins and the user.
//!
//! These tests verify that:
//! - Later contributors win over earlier ones, the user over everyone
//! - Nested mappings merge key by key while scalars are replaced
//! - The same fragments always resolve to byte-identical canonical JSON
//! - Duplicate plugins are rejected before any fragment is applied

use kiln::config::{ConfigModel, resolve};
use kiln::{ConfigError, ConfigFragment, Contributor, KilnError, PluginDescriptor, Project, RegistryError};
use proptest::prelude::*;
use serde_json::json;

fn compiler_plugin(name: &str, version: &str) -> PluginDescriptor {
    PluginDescriptor::new(name).fragment(
        ConfigFragment::new()
            .set("solidity", version)
            .require("solidity"),
    )
}

#[test]
fn user_version_overrides_toolbox_default() {
    let prepared = Project::new()
        .plugin(compiler_plugin("toolbox", "0.8.18"))
        .unwrap()
        .user(ConfigFragment::new().set("solidity", "0.8.19"))
        .prepare()
        .unwrap();

    assert_eq!(prepared.config.get_str("solidity"), Some("0.8.19"));
}

#[test]
fn later_plugin_wins_without_user_value() {
    let prepared = Project::new()
        .plugin(compiler_plugin("toolbox", "0.8.18"))
        .unwrap()
        .plugin(compiler_plugin("foundry", "0.8.20"))
        .unwrap()
        .prepare()
        .unwrap();

    assert_eq!(prepared.config.get_str("solidity"), Some("0.8.20"));
}

#[test]
fn nested_mappings_merge_across_contributors() {
    let plugins = vec![
        (
            Contributor::plugin("toolbox"),
            ConfigFragment::new()
                .set("paths", json!({ "sources": "contracts", "tests": "test" }))
                .set("networks.hardhat.chainId", 31337),
        ),
        (
            Contributor::plugin("foundry"),
            ConfigFragment::new().set("paths.libs", json!(["lib"])),
        ),
    ];
    let user = ConfigFragment::new()
        .set("paths.sources", "src")
        .set("networks.hardhat.accounts", json!(["0x01"]));

    let config = resolve(&plugins, &user).unwrap();

    assert_eq!(
        config.as_value(),
        &json!({
            "paths": { "sources": "src", "tests": "test", "libs": ["lib"] },
            "networks": { "hardhat": { "chainId": 31337, "accounts": ["0x01"] } },
        })
    );
}

#[test]
fn lists_are_replaced_not_appended() {
    let plugins = vec![(
        Contributor::plugin("foundry"),
        ConfigFragment::new().set("foundry.libs", json!(["lib", "node_modules"])),
    )];
    let user = ConfigFragment::new().set("foundry.libs", json!(["deps"]));

    let config = resolve(&plugins, &user).unwrap();
    assert_eq!(config.get("foundry.libs"), Some(&json!(["deps"])));
}

#[test]
fn duplicate_plugin_rejected_before_resolution() {
    // The second fragment would break resolution if it were ever applied.
    let err = Project::new()
        .plugin(compiler_plugin("toolbox", "0.8.18"))
        .unwrap()
        .plugin(PluginDescriptor::new("toolbox").fragment(ConfigFragment::new().require("never.set")))
        .unwrap_err();

    assert!(matches!(err, RegistryError::DuplicatePluginName(ref name) if name == "toolbox"));
    assert_eq!(KilnError::from(err).exit_code(), 2);
}

#[test]
fn required_key_reports_its_contributor() {
    let plugins = vec![(
        Contributor::plugin("toolbox"),
        ConfigFragment::new().require("solidity"),
    )];

    let err = resolve(&plugins, &ConfigFragment::new()).unwrap_err();
    assert!(matches!(
        err,
        ConfigError::UnresolvedRequiredKey { ref key, ref contributor }
            if key == "solidity" && *contributor == Contributor::plugin("toolbox")
    ));
}

#[test]
fn same_contributor_cannot_set_a_key_twice() {
    let mut model = ConfigModel::new();
    model
        .declare(Contributor::plugin("toolbox"), ConfigFragment::new().set("solidity", "0.8.18"))
        .unwrap();

    let err = model
        .declare(Contributor::plugin("toolbox"), ConfigFragment::new().set("solidity", "0.8.19"))
        .unwrap_err();
    assert!(matches!(err, ConfigError::DuplicateKeyConflict { ref key, .. } if key == "solidity"));

    // A different contributor setting the same key is a matter of precedence.
    model
        .declare(Contributor::User, ConfigFragment::new().set("solidity", "0.8.19"))
        .unwrap();
}

/// Strategy for dotted keys drawn from a small alphabet, so collisions and
/// nested prefixes actually happen.
fn arb_key() -> impl Strategy<Value = String> {
    prop::collection::vec(prop::sample::select(vec!["a", "b", "c", "paths", "solidity"]), 1..4)
        .prop_map(|segments| segments.join("."))
}

fn arb_value() -> impl Strategy<Value = serde_json::Value> {
    prop_oneof![
        any::<bool>().prop_map(serde_json::Value::from),
        any::<i32>().prop_map(serde_json::Value::from),
        "[a-z0-9.]{0,8}".prop_map(serde_json::Value::from),
        prop::collection::vec(any::<u8>(), 0..3).prop_map(serde_json::Value::from),
    ]
}

fn arb_fragment() -> impl Strategy<Value = ConfigFragment> {
    prop::collection::vec((arb_key(), arb_value()), 0..6).prop_map(|entries| {
        entries
            .into_iter()
            .fold(ConfigFragment::new(), |fragment, (key, value)| fragment.set(key, value))
    })
}

fn arb_plugins() -> impl Strategy<Value = Vec<(Contributor, ConfigFragment)>> {
    prop::collection::vec(arb_fragment(), 0..4).prop_map(|fragments| {
        fragments
            .into_iter()
            .enumerate()
            .map(|(i, fragment)| (Contributor::plugin(format!("plugin-{i}")), fragment))
            .collect()
    })
}

proptest! {
    /// Resolving the same inputs twice yields the same canonical bytes.
    #[test]
    fn resolution_is_deterministic(plugins in arb_plugins(), user in arb_fragment()) {
        let first = resolve(&plugins, &user).unwrap();
        let second = resolve(&plugins, &user).unwrap();

        prop_assert_eq!(first.to_canonical_json(), second.to_canonical_json());
        prop_assert_eq!(first.fingerprint(), second.fingerprint());
    }

    /// Whatever the plugins say, a key the user sets last reads back as the
    /// user's value.
    #[test]
    fn user_value_always_wins(
        plugins in arb_plugins(),
        key in arb_key(),
        value in arb_value(),
    ) {
        let user = ConfigFragment::new().set(key.clone(), value.clone());
        let config = resolve(&plugins, &user).unwrap();

        prop_assert_eq!(config.get(&key), Some(&value));
    }

    /// Among plugins alone, the last one to set a key decides its value.
    #[test]
    fn last_plugin_wins(
        mut plugins in arb_plugins(),
        key in arb_key(),
        value in arb_value(),
    ) {
        let last = Contributor::plugin("last");
        plugins.push((last, ConfigFragment::new().set(key.clone(), value.clone())));

        let config = resolve(&plugins, &ConfigFragment::new()).unwrap();
        prop_assert_eq!(config.get(&key), Some(&value));
    }
}
