use std::sync::Arc;

use serde::Deserialize;

use crate::content_type::ContentType;
use crate::error::{Error, Result};
use crate::secrets::{SecretIdentifier, SecretProvider};
use crate::setting::Setting;

use super::ValueAdapter;

#[derive(Deserialize)]
struct SecretReferenceValue {
    uri: String,
}

/// Resolves secret-reference settings to their underlying secret value via
/// the shared `SecretProvider`.
pub struct SecretReferenceAdapter {
    provider: Arc<SecretProvider>,
}

impl SecretReferenceAdapter {
    pub fn new(provider: Arc<SecretProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait::async_trait]
impl ValueAdapter for SecretReferenceAdapter {
    fn can_process(&self, setting: &Setting) -> bool {
        setting
            .content_type
            .as_deref()
            .map(ContentType::parse)
            .is_some_and(|ct| ct.is_secret_reference())
    }

    async fn process_key_value(&self, setting: &Setting) -> Result<(String, serde_json::Value)> {
        let raw = setting.value.as_deref().unwrap_or_default();
        let parsed: SecretReferenceValue = serde_json::from_str(raw).map_err(|e| {
            Error::SecretReferenceError {
                source_id: setting.key.clone(),
                cause: Box::new(e),
            }
        })?;

        let identifier = SecretIdentifier::parse_uri(&parsed.uri)?;
        let value = self
            .provider
            .get_secret(&identifier)
            .await
            .map_err(|e| Error::SecretReferenceError {
                source_id: parsed.uri.clone(),
                cause: Box::new(e),
            })?;

        Ok((setting.key.clone(), serde_json::Value::String(value)))
    }

    fn on_change_detected(&self) {
        self.provider.clear_cache();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::SecretClient;
    use std::collections::BTreeMap;

    fn setting(value: &str) -> Setting {
        Setting {
            key: "db.password".to_string(),
            label: None,
            value: Some(value.to_string()),
            content_type: Some(crate::content_type::SECRET_REFERENCE_CONTENT_TYPE.to_string()),
            etag: "etag".to_string(),
            tags: BTreeMap::new(),
        }
    }

    struct StaticClient(String);

    #[async_trait::async_trait]
    impl SecretClient for StaticClient {
        async fn get_secret(&self, _identifier: &SecretIdentifier) -> Result<String> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn resolves_through_provider() {
        let mut provider = SecretProvider::new(None);
        provider.register_client(
            "myvault.vault.azure.net",
            Arc::new(StaticClient("s3cr3t".to_string())),
        );
        let adapter = SecretReferenceAdapter::new(Arc::new(provider));

        let raw = r#"{"uri":"https://myvault.vault.azure.net/secrets/dbpass"}"#;
        let (key, value) = adapter.process_key_value(&setting(raw)).await.unwrap();
        assert_eq!(key, "db.password");
        assert_eq!(value, serde_json::Value::String("s3cr3t".to_string()));
    }

    #[tokio::test]
    async fn malformed_value_surfaces_secret_reference_error() {
        let provider = SecretProvider::new(None);
        let adapter = SecretReferenceAdapter::new(Arc::new(provider));
        let result = adapter.process_key_value(&setting("not json")).await;
        assert!(matches!(result, Err(Error::SecretReferenceError { .. })));
    }
}
