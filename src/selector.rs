//! Selectors and their normalization.

use std::collections::BTreeSet;

use crate::error::{Error, Result};
use crate::setting::NULL_LABEL;

/// The internal key prefix every feature-flag selector is silently extended
/// with. Users never see this prefix; it is added during normalization and
/// never surfaced back.
pub const FEATURE_FLAG_KEY_PREFIX: &str = ".appconfig.featureflag/";

/// A tag filter of the form `name=value`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TagFilter {
    pub name: String,
    pub value: String,
}

impl TagFilter {
    /// Parse `name=value`, rejecting an empty name.
    pub fn parse(raw: &str) -> Result<Self> {
        let Some((name, value)) = raw.split_once('=') else {
            return Err(Error::InvalidArgument(format!(
                "tag filter '{raw}' must be of the form 'name=value'"
            )));
        };
        if name.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "tag filter '{raw}' has an empty name"
            )));
        }
        Ok(Self {
            name: name.to_string(),
            value: value.to_string(),
        })
    }
}

/// Either a query selector or a snapshot selector; exactly one form per
/// selector.
#[derive(Debug, Clone)]
pub enum Selector {
    Query {
        key_filter: String,
        label_filter: Option<String>,
        tag_filters: Vec<TagFilter>,
    },
    Snapshot {
        snapshot_name: String,
    },
}

impl Selector {
    pub fn query(key_filter: impl Into<String>) -> Self {
        Self::Query {
            key_filter: key_filter.into(),
            label_filter: None,
            tag_filters: Vec::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        if let Self::Query { label_filter, .. } = &mut self {
            *label_filter = Some(label.into());
        }
        self
    }

    pub fn with_tag_filters(mut self, tags: Vec<TagFilter>) -> Self {
        if let Self::Query { tag_filters, .. } = &mut self {
            *tag_filters = tags;
        }
        self
    }

    pub fn snapshot(name: impl Into<String>) -> Self {
        Self::Snapshot {
            snapshot_name: name.into(),
        }
    }

    /// The effective label filter, defaulting to the null-label sentinel.
    pub fn effective_label(&self) -> Option<&str> {
        match self {
            Self::Query { label_filter, .. } => label_filter.as_deref(),
            Self::Snapshot { .. } => None,
        }
    }

    /// The dedup/equality key used by the normalizer: `(key, label,
    /// snapshot, sorted tags)`.
    fn dedup_key(&self) -> (Option<&str>, Option<&str>, Option<&str>, BTreeSet<&TagFilter>) {
        match self {
            Self::Query {
                key_filter,
                label_filter,
                tag_filters,
            } => (
                Some(key_filter.as_str()),
                label_filter.as_deref(),
                None,
                tag_filters.iter().collect(),
            ),
            Self::Snapshot { snapshot_name } => {
                (None, None, Some(snapshot_name.as_str()), BTreeSet::new())
            }
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            Self::Query {
                key_filter,
                label_filter,
                tag_filters,
            } => {
                if key_filter.is_empty() {
                    return Err(Error::InvalidArgument(
                        "query selector key filter must not be empty".to_string(),
                    ));
                }
                if let Some(label) = label_filter {
                    if label.contains('*') || label.contains(',') {
                        return Err(Error::InvalidArgument(format!(
                            "label filter '{label}' must not contain '*' or ','"
                        )));
                    }
                }
                for tag in tag_filters {
                    if tag.name.is_empty() {
                        return Err(Error::InvalidArgument(
                            "tag filter name must not be empty".to_string(),
                        ));
                    }
                }
                Ok(())
            }
            Self::Snapshot { .. } => Ok(()),
        }
    }

    /// Apply the null-label default in place.
    fn apply_label_default(&mut self) {
        if let Self::Query { label_filter, .. } = self {
            if label_filter.is_none() {
                *label_filter = Some(NULL_LABEL.to_string());
            }
        }
    }

    fn prepend_feature_flag_prefix(&mut self) {
        if let Self::Query { key_filter, .. } = self {
            if !key_filter.starts_with(FEATURE_FLAG_KEY_PREFIX) {
                *key_filter = format!("{FEATURE_FLAG_KEY_PREFIX}{key_filter}");
            }
        }
    }
}

/// The wire-shaped form of a selector as a caller would supply it: fields
/// for both the query form and the snapshot form are present so that a
/// deserialized option set can be validated at a single boundary: the two
/// forms are mutually exclusive.
#[derive(Debug, Clone, Default, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSelector {
    pub key_filter: Option<String>,
    pub label_filter: Option<String>,
    pub tag_filters: Option<Vec<String>>,
    pub snapshot_name: Option<String>,
}

impl TryFrom<RawSelector> for Selector {
    type Error = Error;

    fn try_from(raw: RawSelector) -> Result<Selector> {
        let has_query_fields =
            raw.key_filter.is_some() || raw.label_filter.is_some() || raw.tag_filters.is_some();

        match (raw.snapshot_name, has_query_fields) {
            (Some(_), true) => Err(Error::InvalidArgument(
                "a selector may not mix a snapshot name with key/label/tag filters".to_string(),
            )),
            (Some(snapshot_name), false) => Ok(Selector::Snapshot { snapshot_name }),
            (None, _) => {
                let key_filter = raw.key_filter.ok_or_else(|| {
                    Error::InvalidArgument(
                        "a query selector requires a key filter".to_string(),
                    )
                })?;
                let tag_filters = raw
                    .tag_filters
                    .unwrap_or_default()
                    .iter()
                    .map(|s| TagFilter::parse(s))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Selector::Query {
                    key_filter,
                    label_filter: raw.label_filter,
                    tag_filters,
                })
            }
        }
    }
}

/// Validate, default, and deduplicate a user-supplied selector list.
///
/// - Absent/empty input becomes a single default `(keyFilter="*",
///   labelFilter=null-sentinel)`.
/// - Selectors are deduplicated by `(keyFilter, labelFilter, snapshotName,
///   sorted tagFilters)`; on a duplicate, the later selector wins and the
///   earlier one is dropped, but the later one keeps its position.
/// - When `is_feature_flag` is set, every query selector's key filter is
///   silently prefixed with [`FEATURE_FLAG_KEY_PREFIX`].
pub fn normalize(selectors: Option<Vec<Selector>>, is_feature_flag: bool) -> Result<Vec<Selector>> {
    let mut selectors = match selectors {
        None => vec![Selector::query("*")],
        Some(list) if list.is_empty() => vec![Selector::query("*")],
        Some(list) => list,
    };

    for selector in &mut selectors {
        selector.validate()?;
        selector.apply_label_default();
        if is_feature_flag {
            selector.prepend_feature_flag_prefix();
        }
    }

    // Stable last-write-wins dedup: keep, for each dedup key, only the last
    // occurrence, but preserve the relative order of the *kept* selectors
    // (i.e. order by last occurrence index).
    let mut last_index_for_key = std::collections::HashMap::new();
    for (idx, selector) in selectors.iter().enumerate() {
        let key = dedup_key_owned(selector);
        last_index_for_key.insert(key, idx);
    }
    let mut keep_indices: Vec<usize> = last_index_for_key.values().copied().collect();
    keep_indices.sort_unstable();

    let deduped = keep_indices
        .into_iter()
        .map(|idx| selectors[idx].clone())
        .collect();

    Ok(deduped)
}

/// An owned, hashable form of [`Selector::dedup_key`] since the borrowed
/// form can't live in a `HashMap` key across the loop above.
fn dedup_key_owned(selector: &Selector) -> (Option<String>, Option<String>, Option<String>, BTreeSet<TagFilter>) {
    let (k, l, s, t) = selector.dedup_key();
    (
        k.map(str::to_string),
        l.map(str::to_string),
        s.map(str::to_string),
        t.into_iter().cloned().collect(),
    )
}

impl Clone for Selector {
    fn clone(&self) -> Self {
        match self {
            Self::Query {
                key_filter,
                label_filter,
                tag_filters,
            } => Self::Query {
                key_filter: key_filter.clone(),
                label_filter: label_filter.clone(),
                tag_filters: tag_filters.clone(),
            },
            Self::Snapshot { snapshot_name } => Self::Snapshot {
                snapshot_name: snapshot_name.clone(),
            },
        }
    }
}
