use serde_json::{Map, Value};

use crate::config::{ConfigFragment, Contributor, ResolvedConfig, split_key};
use crate::error::ConfigError;

/// Merges plugin fragments and the user fragment into a [`ResolvedConfig`].
///
/// Plugin fragments are applied in registration order, each later one
/// overwriting earlier values at the same path. Nested mappings are merged
/// key by key; scalars and lists are replaced whole. The user fragment goes
/// last and always wins.
///
/// Resolution is deterministic: the same fragments in the same order produce
/// a byte-identical canonical form.
pub fn resolve(
    plugin_fragments: &[(Contributor, ConfigFragment)],
    user_fragment: &ConfigFragment,
) -> Result<ResolvedConfig, ConfigError> {
    let mut root = Value::Object(Map::new());

    for (contributor, fragment) in plugin_fragments {
        tracing::debug!("applying {} keys from {}", fragment.len(), contributor);
        fragment.apply_to(&mut root)?;
    }

    tracing::debug!("applying {} keys from {}", user_fragment.len(), Contributor::User);
    user_fragment.apply_to(&mut root)?;

    let user = Contributor::User;
    let required = plugin_fragments
        .iter()
        .flat_map(|(contributor, fragment)| fragment.required().map(move |key| (contributor, key)))
        .chain(user_fragment.required().map(|key| (&user, key)));

    for (contributor, key) in required {
        let present = lookup(&root, &split_key(key)?).is_some_and(|value| !value.is_null());

        if !present {
            return Err(ConfigError::UnresolvedRequiredKey {
                key: key.to_string(),
                contributor: contributor.clone(),
            });
        }
    }

    Ok(ResolvedConfig::new(root))
}

/// Writes `value` at `path` inside `root`, creating intermediate mappings.
///
/// Any non-mapping value standing in the way of the path is replaced by an
/// empty mapping.
pub(crate) fn merge_at(root: &mut Value, path: &[&str], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        deep_merge(root, value);
        return;
    };

    let mut current = root;
    for segment in parents {
        current = as_object(current)
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    match as_object(current).get_mut(*last) {
        Some(existing) => deep_merge(existing, value),
        None => {
            as_object(current).insert(last.to_string(), value);
        }
    }
}

/// Merges `src` into `dst`; mappings recurse, anything else replaces.
pub(crate) fn deep_merge(dst: &mut Value, src: Value) {
    match (dst, src) {
        (Value::Object(dst), Value::Object(src)) => {
            for (key, value) in src {
                match dst.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        dst.insert(key, value);
                    }
                }
            }
        }
        (dst, src) => *dst = src,
    }
}

/// Finds the value at `path`; the empty path is `root` itself.
pub(crate) fn lookup<'a>(root: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter()
        .try_fold(root, |current, segment| current.as_object()?.get(*segment))
}

fn as_object(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }

    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was just replaced with an object"),
    }
}
