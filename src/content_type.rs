//! Media-type parsing and classification.

/// The content type used for feature-flag settings.
pub const FEATURE_FLAG_CONTENT_TYPE: &str =
    "application/vnd.microsoft.appconfig.ff+json;charset=utf-8";

/// The content type used for secret-reference settings.
pub const SECRET_REFERENCE_CONTENT_TYPE: &str =
    "application/vnd.microsoft.appconfig.keyvaultref+json;charset=utf-8";

/// The content type used for snapshot-reference settings.
pub const SNAPSHOT_REFERENCE_CONTENT_TYPE: &str =
    "application/vnd.microsoft.appconfig.snapshotref+json;charset=utf-8";

/// A parsed `media-type; param=value; ...` string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    media_type: String,
    params: Vec<(String, String)>,
}

impl ContentType {
    /// Parse a raw content-type header value. Tokens are lowercased before
    /// comparison; parameter values retain their original case.
    pub fn parse(raw: &str) -> Self {
        let mut parts = raw.split(';');
        let media_type = parts
            .next()
            .map(|s| s.trim().to_ascii_lowercase())
            .unwrap_or_default();

        let params = parts
            .filter_map(|part| {
                let part = part.trim();
                if part.is_empty() {
                    return None;
                }
                let (name, value) = part.split_once('=')?;
                Some((name.trim().to_ascii_lowercase(), value.trim().to_string()))
            })
            .collect();

        Self { media_type, params }
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// The `profile=...` parameter, surfaced only for tracing/AI-content
    /// classification; it does not affect adapter dispatch.
    pub fn profile(&self) -> Option<&str> {
        self.param("profile")
    }

    pub fn is_json(&self) -> bool {
        self.media_type == "application/json" || self.is_structured_json_suffix()
    }

    fn is_structured_json_suffix(&self) -> bool {
        self.media_type
            .strip_prefix("application/")
            .is_some_and(|rest| rest.ends_with("+json"))
    }

    pub fn is_feature_flag(&self) -> bool {
        self.matches_base(FEATURE_FLAG_CONTENT_TYPE)
    }

    pub fn is_secret_reference(&self) -> bool {
        self.matches_base(SECRET_REFERENCE_CONTENT_TYPE)
    }

    pub fn is_snapshot_reference(&self) -> bool {
        self.matches_base(SNAPSHOT_REFERENCE_CONTENT_TYPE)
    }

    fn matches_base(&self, expected: &str) -> bool {
        let expected_base = ContentType::parse(expected);
        self.media_type == expected_base.media_type
    }
}

/// Classify an optional raw content-type header.
pub fn classify(raw: Option<&str>) -> Option<ContentType> {
    raw.map(ContentType::parse)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_json_is_classified() {
        let ct = ContentType::parse("application/json");
        assert!(ct.is_json());
        assert!(!ct.is_feature_flag());
    }

    #[test]
    fn structured_json_suffix_is_classified_as_json() {
        let ct = ContentType::parse("application/merge-patch+json; charset=utf-8");
        assert!(ct.is_json());
    }

    #[test]
    fn feature_flag_content_type_is_recognized_regardless_of_params() {
        let ct = ContentType::parse(FEATURE_FLAG_CONTENT_TYPE);
        assert!(ct.is_feature_flag());
        assert!(!ct.is_secret_reference());
    }

    #[test]
    fn tokens_are_lowercased() {
        let ct = ContentType::parse("APPLICATION/JSON; CHARSET=UTF-8");
        assert!(ct.is_json());
        assert_eq!(ct.param("charset"), Some("UTF-8"));
    }

    #[test]
    fn profile_param_is_surfaced() {
        let ct = ContentType::parse("application/json; profile=ai-prompt");
        assert_eq!(ct.profile(), Some("ai-prompt"));
    }
}
