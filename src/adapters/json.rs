use crate::content_type::ContentType;
use crate::error::Result;
use crate::setting::Setting;

use super::ValueAdapter;

/// Parses JSON-typed setting values into structured configuration values.
///
/// Accepts only settings whose content type is JSON and is not also a
/// feature-flag or secret-reference content type (those are handled by
/// their own adapters earlier in the chain).
#[derive(Debug, Default)]
pub struct JsonAdapter;

impl JsonAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl ValueAdapter for JsonAdapter {
    fn can_process(&self, setting: &Setting) -> bool {
        let Some(raw) = &setting.content_type else {
            return false;
        };
        let ct = ContentType::parse(raw);
        ct.is_json() && !ct.is_feature_flag() && !ct.is_secret_reference()
    }

    async fn process_key_value(&self, setting: &Setting) -> Result<(String, serde_json::Value)> {
        let raw = setting.value.as_deref().unwrap_or_default();
        let value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(_) => match serde_json::from_str(&strip_jsonc_comments(raw)) {
                Ok(v) => v,
                Err(_) => serde_json::Value::String(raw.to_string()),
            },
        };
        Ok((setting.key.clone(), value))
    }
}

/// Strip `//` line comments and `/* */` block comments outside of string
/// literals, leaving the result as close to valid JSON as the input allows.
fn strip_jsonc_comments(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            if c == '\\' {
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '/' if chars.peek() == Some(&'/') => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
            }
            _ => out.push(c),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn setting(content_type: &str, value: &str) -> Setting {
        Setting {
            key: "k".to_string(),
            label: None,
            value: Some(value.to_string()),
            content_type: Some(content_type.to_string()),
            etag: "etag".to_string(),
            tags: BTreeMap::new(),
        }
    }

    #[test]
    fn can_process_accepts_plain_json_only() {
        let adapter = JsonAdapter::new();
        assert!(adapter.can_process(&setting("application/json", "1")));
        assert!(!adapter.can_process(&setting(
            crate::content_type::FEATURE_FLAG_CONTENT_TYPE,
            "{}"
        )));
        assert!(!adapter.can_process(&setting(
            crate::content_type::SECRET_REFERENCE_CONTENT_TYPE,
            "{}"
        )));
    }

    #[tokio::test]
    async fn valid_json_is_parsed() {
        let adapter = JsonAdapter::new();
        let (_, value) = adapter
            .process_key_value(&setting("application/json", r#"{"a":1}"#))
            .await
            .unwrap();
        assert_eq!(value, serde_json::json!({"a": 1}));
    }

    #[tokio::test]
    async fn jsonc_comments_are_stripped_on_retry() {
        let adapter = JsonAdapter::new();
        let raw = "{\n  // a comment\n  \"a\": 1\n}";
        let (_, value) = adapter
            .process_key_value(&setting("application/json", raw))
            .await
            .unwrap();
        assert_eq!(value, serde_json::json!({"a": 1}));
    }

    #[tokio::test]
    async fn unparsable_json_falls_back_to_raw_string() {
        let adapter = JsonAdapter::new();
        let (_, value) = adapter
            .process_key_value(&setting("application/json", "not json at all {"))
            .await
            .unwrap();
        assert_eq!(value, serde_json::Value::String("not json at all {".to_string()));
    }
}
