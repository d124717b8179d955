//! The published configuration mapping: an ordered key→value map that is
//! replaced wholesale, atomically, at the end of a successful load/refresh.

use std::sync::Arc;

use arc_swap::ArcSwap;
use indexmap::IndexMap;
use serde_json::Value;

/// The reserved key under which the feature-flag collection lives. Preserved
/// across key-value reloads; only a feature-flag reload rewrites it.
pub const FEATURE_MANAGEMENT_KEY: &str = "feature_management";

#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub entries: IndexMap<String, Value>,
}

/// Holds the currently-published mapping behind an `ArcSwap` so reads never
/// block on a refresh in progress.
pub struct ConfigurationMapping {
    published: ArcSwap<Snapshot>,
}

impl Default for ConfigurationMapping {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigurationMapping {
    pub fn new() -> Self {
        Self {
            published: ArcSwap::from_pointee(Snapshot::default()),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.published.load().entries.get(key).cloned()
    }

    pub fn has(&self, key: &str) -> bool {
        self.published.load().entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.published.load().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn for_each(&self, mut f: impl FnMut(&str, &Value)) {
        let snapshot = self.published.load();
        for (k, v) in &snapshot.entries {
            f(k, v);
        }
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.published.load_full()
    }

    /// Replace every key-value entry except the reserved feature-flag key,
    /// then insert the newly-collected entries.
    pub fn publish_key_values(&self, entries: IndexMap<String, Value>) {
        let previous = self.published.load_full();
        let mut next = IndexMap::new();
        if let Some(ff) = previous.entries.get(FEATURE_MANAGEMENT_KEY) {
            next.insert(FEATURE_MANAGEMENT_KEY.to_string(), ff.clone());
        }
        next.extend(entries);
        self.published.store(Arc::new(Snapshot { entries: next }));
    }

    /// Replace only the reserved feature-flag key, leaving every other
    /// key-value entry untouched.
    pub fn publish_feature_flags(&self, flags: Value) {
        let previous = self.published.load_full();
        let mut next = previous.entries.clone();
        next.insert(FEATURE_MANAGEMENT_KEY.to_string(), flags);
        self.published.store(Arc::new(Snapshot { entries: next }));
    }

    /// Update a single key in place (used for secret-only refreshes).
    pub fn update_entry(&self, key: String, value: Value) {
        let previous = self.published.load_full();
        let mut next = previous.entries.clone();
        next.insert(key, value);
        self.published.store(Arc::new(Snapshot { entries: next }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_key_values_preserves_feature_flags() {
        let mapping = ConfigurationMapping::new();
        mapping.publish_feature_flags(serde_json::json!({"feature_flags": []}));

        let mut entries = IndexMap::new();
        entries.insert("a".to_string(), Value::String("1".to_string()));
        mapping.publish_key_values(entries);

        assert_eq!(mapping.get("a"), Some(Value::String("1".to_string())));
        assert!(mapping.has(FEATURE_MANAGEMENT_KEY));
    }

    #[test]
    fn publish_key_values_drops_stale_keys_not_in_the_new_set() {
        let mapping = ConfigurationMapping::new();
        let mut first = IndexMap::new();
        first.insert("a".to_string(), Value::String("1".to_string()));
        mapping.publish_key_values(first);

        let mut second = IndexMap::new();
        second.insert("b".to_string(), Value::String("2".to_string()));
        mapping.publish_key_values(second);

        assert!(!mapping.has("a"));
        assert!(mapping.has("b"));
    }
}
