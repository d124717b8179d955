//! Prefix trimming and flat-to-nested projection of the published mapping.

use indexmap::IndexMap;
use serde_json::Value;

use crate::error::{Error, Result};

const VALID_SEPARATORS: &[char] = &['.', ',', ';', '-', '_', '/', ':'];

fn validate_separator(separator: &str) -> Result<()> {
    if separator == "__" {
        return Ok(());
    }
    if separator.chars().count() == 1 && VALID_SEPARATORS.contains(&separator.chars().next().unwrap()) {
        return Ok(());
    }
    Err(Error::InvalidArgument(format!(
        "'{separator}' is not a valid key separator"
    )))
}

/// Strip the longest configured prefix that matches `key`, trying prefixes
/// in descending length order so the longest wins.
pub fn trim_prefix<'a>(key: &'a str, prefixes: &[String]) -> &'a str {
    let mut sorted: Vec<&String> = prefixes.iter().collect();
    sorted.sort_by_key(|p| std::cmp::Reverse(p.len()));
    for prefix in sorted {
        if let Some(trimmed) = key.strip_prefix(prefix.as_str()) {
            return trimmed;
        }
    }
    key
}

/// Project a flat key→value mapping into a nested JSON object by splitting
/// each key on `separator`.
pub fn construct_configuration_object(
    entries: &IndexMap<String, Value>,
    separator: &str,
) -> Result<Value> {
    validate_separator(separator)?;

    let mut root = serde_json::Map::new();
    for (key, value) in entries {
        let segments: Vec<&str> = key.split(separator).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(Error::InvalidOperation(format!(
                "key '{key}' has an empty segment when split on '{separator}'"
            )));
        }
        insert_path(&mut root, &segments, value.clone(), key)?;
    }
    Ok(Value::Object(root))
}

fn insert_path(
    node: &mut serde_json::Map<String, Value>,
    segments: &[&str],
    value: Value,
    original_key: &str,
) -> Result<()> {
    let (head, rest) = segments
        .split_first()
        .expect("segments is non-empty by construction");

    if rest.is_empty() {
        if node.contains_key(*head) {
            return Err(Error::InvalidOperation(format!(
                "key '{original_key}' collides with an existing entry at '{head}'"
            )));
        }
        node.insert(head.to_string(), value);
        return Ok(());
    }

    let entry = node
        .entry(head.to_string())
        .or_insert_with(|| Value::Object(serde_json::Map::new()));

    let Value::Object(child) = entry else {
        return Err(Error::InvalidOperation(format!(
            "key '{original_key}' collides with a non-object value at '{head}'"
        )));
    };
    insert_path(child, rest, value, original_key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(pairs: &[(&str, Value)]) -> IndexMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn nests_flat_keys_into_an_object() {
        let map = entries(&[
            ("a.b.c", Value::from(1)),
            ("a.b.d", Value::from(2)),
        ]);
        let result = construct_configuration_object(&map, ".").unwrap();
        assert_eq!(result, serde_json::json!({"a": {"b": {"c": 1, "d": 2}}}));
    }

    #[test]
    fn colliding_scalar_and_object_is_ambiguity() {
        let map = entries(&[
            ("a.b.c", Value::from(1)),
            ("a.b", Value::from(5)),
        ]);
        assert!(construct_configuration_object(&map, ".").is_err());
    }

    #[test]
    fn invalid_separator_is_rejected() {
        let map = entries(&[("a.b", Value::from(1))]);
        assert!(construct_configuration_object(&map, "|").is_err());
    }

    #[test]
    fn double_underscore_is_a_valid_separator() {
        let map = entries(&[("a__b", Value::from(1))]);
        let result = construct_configuration_object(&map, "__").unwrap();
        assert_eq!(result, serde_json::json!({"a": {"b": 1}}));
    }

    #[test]
    fn longest_matching_prefix_wins() {
        let prefixes = vec!["app.".to_string(), "app.settings.".to_string()];
        assert_eq!(trim_prefix("app.settings.message", &prefixes), "message");
    }

    #[test]
    fn non_matching_key_is_untouched() {
        let prefixes = vec!["app.".to_string()];
        assert_eq!(trim_prefix("other.key", &prefixes), "other.key");
    }
}
