//! A `reqwest`-backed default implementation of [`crate::secrets::SecretClient`]
//! for a single vault host.

use crate::error::{Error, Result, TransportError, TransportErrorKind};
use crate::secrets::{SecretClient, SecretIdentifier};

/// Talks to a single vault host over HTTPS using a bearer token supplied by
/// an injected credential provider.
pub struct HttpSecretClient {
    http: reqwest::Client,
    bearer_token_provider: Box<dyn Fn() -> String + Send + Sync>,
}

impl HttpSecretClient {
    pub fn new(http: reqwest::Client, bearer_token_provider: Box<dyn Fn() -> String + Send + Sync>) -> Self {
        Self {
            http,
            bearer_token_provider,
        }
    }
}

#[async_trait::async_trait]
impl SecretClient for HttpSecretClient {
    async fn get_secret(&self, identifier: &SecretIdentifier) -> Result<String> {
        #[derive(serde::Deserialize)]
        struct SecretResponse {
            value: String,
        }

        let mut url = format!(
            "https://{}/secrets/{}",
            identifier.vault_host, identifier.secret_name
        );
        if let Some(version) = &identifier.version {
            url.push('/');
            url.push_str(version);
        }

        let token = (self.bearer_token_provider)();
        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| {
                Error::Transport(TransportError::new(
                    TransportErrorKind::Other,
                    std::io::Error::other(e.to_string()),
                ))
            })?;

        if !response.status().is_success() {
            return Err(Error::Transport(TransportError::new(
                TransportErrorKind::from_status(response.status().as_u16()),
                std::io::Error::other(format!("unexpected status {}", response.status())),
            )));
        }

        let body: SecretResponse = response.json().await.map_err(|e| {
            Error::Transport(TransportError::new(
                TransportErrorKind::Other,
                std::io::Error::other(e.to_string()),
            ))
        })?;
        Ok(body.value)
    }
}
