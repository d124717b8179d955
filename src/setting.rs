//! The data model of the store: settings, keys, and tags.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The null-label sentinel, U+0000, denoting "no label".
///
/// A label filter that is absent defaults to this sentinel, which matches
/// only settings with no label.
pub const NULL_LABEL: char = '\u{0000}';

/// The identity of a setting in the store: `(key, label)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SettingKey {
    pub key: String,
    pub label: Option<String>,
}

impl SettingKey {
    pub fn new(key: impl Into<String>, label: Option<String>) -> Self {
        Self {
            key: key.into(),
            label,
        }
    }

    /// The label as it is sent on the wire: the null-label sentinel when
    /// absent.
    pub fn wire_label(&self) -> String {
        self.label.clone().unwrap_or_else(|| NULL_LABEL.to_string())
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.label {
            Some(label) => write!(f, "{}(label={label})", self.key),
            None => write!(f, "{}", self.key),
        }
    }
}

/// A single setting as returned by the store.
///
/// The ETag is opaque to the provider: it is only ever compared for
/// equality and forwarded on conditional requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Setting {
    pub key: String,
    pub label: Option<String>,
    pub value: Option<String>,
    pub content_type: Option<String>,
    pub etag: String,
    pub tags: std::collections::BTreeMap<String, String>,
}

impl Setting {
    pub fn setting_key(&self) -> SettingKey {
        SettingKey::new(self.key.clone(), self.label.clone())
    }
}

/// One page of a list response, with the page-level ETag used for
/// conditional re-listing.
#[derive(Debug, Clone)]
pub struct Page {
    pub etag: Option<String>,
    pub settings: Vec<Setting>,
}

/// The HTTP-shaped status of a single `get`/`list` response, independent of
/// the concrete transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    /// `200`: changed (or first-seen).
    Changed,
    /// `304`: not modified relative to the supplied ETag.
    NotModified,
    /// The setting does not exist (a 404, or an empty list page).
    NotFound,
}

/// The composition type of a snapshot, as reported by `getSnapshot`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotCompositionType {
    Key,
    KeyLabel,
}

/// An immutable named collection of settings materialized server-side.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub name: String,
    pub composition_type: SnapshotCompositionType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_label_defaults_to_null_sentinel() {
        let key = SettingKey::new("app.name", None);
        assert_eq!(key.wire_label(), NULL_LABEL.to_string());
    }

    #[test]
    fn wire_label_passes_through_explicit_label() {
        let key = SettingKey::new("app.name", Some("prod".to_string()));
        assert_eq!(key.wire_label(), "prod");
    }

    #[test]
    fn display_includes_label_only_when_present() {
        assert_eq!(SettingKey::new("k", None).to_string(), "k");
        assert_eq!(
            SettingKey::new("k", Some("l".into())).to_string(),
            "k(label=l)"
        );
    }
}
