//! Secret resolution: a per-vault-host client registry backed by a bounded,
//! cooldown-gated cache.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use foldhash::HashMap;
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::timer::RefreshTimer;

/// An opaque reference to a secret, as parsed from a secret-reference
/// setting's `{"uri": ...}` value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SecretIdentifier {
    pub vault_host: String,
    pub secret_name: String,
    pub version: Option<String>,
}

impl SecretIdentifier {
    /// Parse a secret identifier from its vault URI, e.g.
    /// `https://myvault.vault.azure.net/secrets/mysecret/abc123`.
    pub fn parse_uri(uri: &str) -> Result<Self> {
        let url = url::Url::parse(uri)
            .map_err(|e| Error::InvalidArgument(format!("invalid secret uri '{uri}': {e}")))?;
        let vault_host = url
            .host_str()
            .ok_or_else(|| Error::InvalidArgument(format!("secret uri '{uri}' has no host")))?
            .to_string();

        let mut segments = url
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect::<Vec<_>>())
            .unwrap_or_default();

        // Expect .../secrets/<name>[/<version>]
        if segments.first().copied() != Some("secrets") {
            return Err(Error::InvalidArgument(format!(
                "secret uri '{uri}' is missing the 'secrets' path segment"
            )));
        }
        segments.remove(0);

        let secret_name = segments
            .first()
            .ok_or_else(|| {
                Error::InvalidArgument(format!("secret uri '{uri}' is missing a secret name"))
            })?
            .to_string();
        let version = segments.get(1).map(|s| s.to_string());

        Ok(Self {
            vault_host,
            secret_name,
            version,
        })
    }

    fn cache_key(&self) -> String {
        match &self.version {
            Some(v) => format!("{}/{}/{}", self.vault_host, self.secret_name, v),
            None => format!("{}/{}", self.vault_host, self.secret_name),
        }
    }
}

/// A handle capable of fetching a single secret's current value.
///
/// Implemented by the default vault-backed client and by test doubles.
#[async_trait::async_trait]
pub trait SecretClient: Send + Sync {
    async fn get_secret(&self, identifier: &SecretIdentifier) -> Result<String>;
}

/// A user-supplied fallback resolver, consulted when no registered or
/// lazily-constructed client applies.
pub type SecretResolverFn =
    Box<dyn Fn(&SecretIdentifier) -> Result<String> + Send + Sync>;

const MIN_CLEAR_INTERVAL: Duration = Duration::from_secs(60);

/// Resolves secret references, caching results and rate-limiting cache
/// clears to at most once per 60 seconds regardless of how often upstream
/// asks for one.
pub struct SecretProvider {
    clients: BTreeMap<String, std::sync::Arc<dyn SecretClient>>,
    lazy_client_factory: Option<Box<dyn Fn(&str) -> std::sync::Arc<dyn SecretClient> + Send + Sync>>,
    resolver: Option<SecretResolverFn>,
    cache: Mutex<HashMap<String, String>>,
    /// Per-cache-key locks so that concurrent lookups for the *same* secret
    /// (e.g. two settings referencing one URI, resolved in parallel) coalesce
    /// into a single backend fetch instead of racing each other.
    resolve_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    external_timer: Option<RefreshTimer>,
    min_clear_timer: RefreshTimer,
}

impl SecretProvider {
    pub fn new(refresh_interval: Option<Duration>) -> Self {
        Self {
            clients: BTreeMap::new(),
            lazy_client_factory: None,
            resolver: None,
            cache: Mutex::new(HashMap::default()),
            resolve_locks: Mutex::new(HashMap::default()),
            external_timer: refresh_interval.map(RefreshTimer::new),
            min_clear_timer: RefreshTimer::new(MIN_CLEAR_INTERVAL),
        }
    }

    pub fn register_client(&mut self, vault_host: impl Into<String>, client: std::sync::Arc<dyn SecretClient>) {
        self.clients.insert(vault_host.into(), client);
    }

    pub fn set_lazy_client_factory(
        &mut self,
        factory: Box<dyn Fn(&str) -> std::sync::Arc<dyn SecretClient> + Send + Sync>,
    ) {
        self.lazy_client_factory = Some(factory);
    }

    pub fn set_resolver(&mut self, resolver: SecretResolverFn) {
        self.resolver = Some(resolver);
    }

    pub async fn get_secret(&self, identifier: &SecretIdentifier) -> Result<String> {
        let key = identifier.cache_key();

        let cache_is_fresh = match &self.external_timer {
            Some(timer) => !timer.can_refresh(),
            None => true,
        };

        if cache_is_fresh {
            if let Some(value) = self.cache.lock().unwrap().get(&key).cloned() {
                return Ok(value);
            }
        }

        // Coalesce concurrent misses for the same key onto a single fetch.
        let lock = self
            .resolve_locks
            .lock()
            .unwrap()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        if cache_is_fresh {
            if let Some(value) = self.cache.lock().unwrap().get(&key).cloned() {
                return Ok(value);
            }
        }

        let value = self.resolve_uncached(identifier).await?;
        self.cache.lock().unwrap().insert(key, value.clone());
        if let Some(timer) = &self.external_timer {
            timer.reset();
        }
        Ok(value)
    }

    async fn resolve_uncached(&self, identifier: &SecretIdentifier) -> Result<String> {
        if let Some(client) = self.clients.get(&identifier.vault_host) {
            return client.get_secret(identifier).await;
        }
        if let Some(factory) = &self.lazy_client_factory {
            let client = factory(&identifier.vault_host);
            return client.get_secret(identifier).await;
        }
        if let Some(resolver) = &self.resolver {
            return resolver(identifier);
        }
        Err(Error::SecretUnresolvable(identifier.cache_key()))
    }

    /// Clear the cache, but no more often than once per 60 seconds.
    pub fn clear_cache(&self) {
        if !self.min_clear_timer.can_refresh() {
            debug!("secret cache clear suppressed by cooldown");
            return;
        }
        self.cache.lock().unwrap().clear();
        self.min_clear_timer.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_uri_extracts_host_name_and_version() {
        let id =
            SecretIdentifier::parse_uri("https://myvault.vault.azure.net/secrets/mysecret/abc123")
                .unwrap();
        assert_eq!(id.vault_host, "myvault.vault.azure.net");
        assert_eq!(id.secret_name, "mysecret");
        assert_eq!(id.version.as_deref(), Some("abc123"));
    }

    #[test]
    fn parse_uri_allows_missing_version() {
        let id = SecretIdentifier::parse_uri("https://myvault.vault.azure.net/secrets/mysecret")
            .unwrap();
        assert_eq!(id.version, None);
    }

    #[test]
    fn parse_uri_rejects_missing_secrets_segment() {
        let err = SecretIdentifier::parse_uri("https://myvault.vault.azure.net/mysecret");
        assert!(err.is_err());
    }

    struct StaticClient(String);

    #[async_trait::async_trait]
    impl SecretClient for StaticClient {
        async fn get_secret(&self, _identifier: &SecretIdentifier) -> Result<String> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn get_secret_uses_registered_client_and_caches() {
        let mut provider = SecretProvider::new(None);
        provider.register_client(
            "myvault.vault.azure.net",
            std::sync::Arc::new(StaticClient("s3cr3t".to_string())),
        );
        let id =
            SecretIdentifier::parse_uri("https://myvault.vault.azure.net/secrets/mysecret").unwrap();
        assert_eq!(provider.get_secret(&id).await.unwrap(), "s3cr3t");
    }

    struct CountingClient {
        calls: Arc<std::sync::atomic::AtomicUsize>,
        value: String,
    }

    #[async_trait::async_trait]
    impl SecretClient for CountingClient {
        async fn get_secret(&self, _identifier: &SecretIdentifier) -> Result<String> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok(self.value.clone())
        }
    }

    #[tokio::test]
    async fn concurrent_lookups_for_the_same_secret_coalesce_into_one_fetch() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut provider = SecretProvider::new(None);
        provider.register_client(
            "myvault.vault.azure.net",
            std::sync::Arc::new(CountingClient {
                calls: calls.clone(),
                value: "s3cr3t".to_string(),
            }),
        );
        let provider = Arc::new(provider);
        let id =
            SecretIdentifier::parse_uri("https://myvault.vault.azure.net/secrets/mysecret").unwrap();

        let (a, b) = {
            let (p1, id1) = (provider.clone(), id.clone());
            let (p2, id2) = (provider.clone(), id.clone());
            tokio::join!(
                async move { p1.get_secret(&id1).await },
                async move { p2.get_secret(&id2).await },
            )
        };
        assert_eq!(a.unwrap(), "s3cr3t");
        assert_eq!(b.unwrap(), "s3cr3t");
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn get_secret_without_any_client_fails_unresolvable() {
        let provider = SecretProvider::new(None);
        let id =
            SecretIdentifier::parse_uri("https://myvault.vault.azure.net/secrets/mysecret").unwrap();
        assert!(matches!(
            provider.get_secret(&id).await,
            Err(Error::SecretUnresolvable(_))
        ));
    }

    #[test]
    fn clear_cache_is_rate_limited() {
        let provider = SecretProvider::new(None);
        provider.cache.lock().unwrap().insert("k".to_string(), "v".to_string());
        provider.clear_cache();
        assert!(provider.cache.lock().unwrap().is_empty());

        provider.cache.lock().unwrap().insert("k".to_string(), "v".to_string());
        provider.clear_cache();
        // second clear within 60s is suppressed
        assert!(!provider.cache.lock().unwrap().is_empty());
    }
}
