//! The public entry point: load a provider against a store, then read,
//! iterate, and refresh it.

use std::sync::Arc;

use serde_json::Value;

use crate::adapters::{AdapterChain, JsonAdapter, SecretReferenceAdapter};
use crate::client::ClientManager;
use crate::engine::{Disposable, EngineConfig, LoadRefreshEngine};
use crate::error::Result;
use crate::failover::FailoverExecutor;
use crate::mapping::ConfigurationMapping;
use crate::options::ProviderOptions;
use crate::secrets::SecretProvider;
use crate::selector::{self, Selector};
use crate::setting::SettingKey;
use crate::store::StoreClient;

/// A loaded, live configuration provider.
///
/// Cheap to clone: internally an `Arc` around the shared engine and
/// published mapping.
#[derive(Clone)]
pub struct Provider {
    engine: Arc<LoadRefreshEngine>,
    mapping: Arc<ConfigurationMapping>,
}

impl Provider {
    /// Load configuration from `endpoint` using `store_client` as the
    /// transport, honoring `options`. Performs the initial load before
    /// returning.
    pub async fn load(
        endpoint: impl Into<String>,
        store_client: Arc<dyn StoreClient>,
        options: ProviderOptions,
    ) -> Result<Self> {
        let endpoint = endpoint.into();
        let mapping = Arc::new(ConfigurationMapping::new());

        let mut manager = ClientManager::new(endpoint.clone(), store_client.clone());
        if options.replica_discovery_enabled {
            manager = manager.with_replica_discovery(Box::new(move |_endpoint| {
                let store_client = store_client.clone();
                Box::pin(async move { store_client.discover_replicas().await })
            }));
        }
        let failover = FailoverExecutor::new(Arc::new(manager), options.load_balancing_enabled);

        let kv_selectors = selector::normalize(
            if options.selectors.is_empty() {
                None
            } else {
                Some(options.selectors.clone())
            },
            false,
        )?;
        let ff_selectors = if options.feature_flag_options.enabled {
            selector::normalize(
                if options.feature_flag_options.selectors.is_empty() {
                    Some(vec![Selector::query("*")])
                } else {
                    Some(options.feature_flag_options.selectors.clone())
                },
                true,
            )?
        } else {
            Vec::new()
        };

        let watched_settings: Vec<SettingKey> = options
            .refresh_options
            .watched_settings
            .iter()
            .map(|(key, label)| SettingKey::new(key.clone(), label.clone()))
            .collect();

        let mut secret_provider = SecretProvider::new(options.key_vault_options.secret_refresh_interval);
        for (vault_host, client) in &options.key_vault_options.secret_clients {
            secret_provider.register_client(vault_host.clone(), client.clone());
        }
        if let Some(credential) = options.key_vault_options.credential.clone() {
            secret_provider.set_lazy_client_factory(Box::new(move |_vault_host| {
                let credential = credential.clone();
                let client = crate::secret_client::HttpSecretClient::new(
                    reqwest::Client::new(),
                    Box::new(move || credential()),
                );
                Arc::new(client) as Arc<dyn crate::secrets::SecretClient>
            }));
        }
        if let Some(resolver) = options.key_vault_options.secret_resolver {
            secret_provider.set_resolver(resolver);
        }
        let secret_provider = Arc::new(secret_provider);

        let adapters = AdapterChain::new(vec![
            Arc::new(SecretReferenceAdapter::new(secret_provider.clone())),
            Arc::new(JsonAdapter::new()),
        ]);

        let engine = Arc::new(LoadRefreshEngine::new(EngineConfig {
            failover,
            adapters,
            mapping: mapping.clone(),
            kv_selectors,
            ff_selectors,
            trim_prefixes: options.trim_key_prefixes,
            watched_settings,
            kv_refresh_enabled: options.refresh_options.enabled,
            kv_refresh_interval: options
                .refresh_options
                .enabled
                .then_some(options.refresh_options.refresh_interval),
            ff_refresh_enabled: options.feature_flag_options.refresh.enabled,
            ff_refresh_interval: options
                .feature_flag_options
                .refresh
                .enabled
                .then_some(options.feature_flag_options.refresh.refresh_interval),
            secret_refresh_interval: options.key_vault_options.secret_refresh_interval,
            feature_flags_enabled: options.feature_flag_options.enabled,
            parallel_secret_resolution: options.key_vault_options.parallel_secret_resolution_enabled,
            startup_timeout: options.startup_options.timeout,
            store_origin: endpoint,
        }));

        engine.initial_load().await?;

        Ok(Self { engine, mapping })
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.mapping.get(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.mapping.has(key)
    }

    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }

    pub fn for_each(&self, f: impl FnMut(&str, &Value)) {
        self.mapping.for_each(f)
    }

    /// Run a refresh cycle now. A concurrent call while one is already in
    /// flight is a no-op.
    pub async fn refresh(&self) {
        self.engine.refresh().await
    }

    /// Register a listener invoked after any refresh that actually changed
    /// something. Returns a disposable that removes the listener when
    /// dropped or explicitly disposed.
    pub fn on_refresh(&self, listener: impl Fn() + Send + Sync + 'static) -> Result<Disposable> {
        self.engine.on_refresh(listener)
    }

    /// Project the flat mapping into a nested object by splitting keys on
    /// `separator`.
    pub fn construct_configuration_object(&self, separator: &str) -> Result<Value> {
        let snapshot = self.mapping.snapshot();
        crate::projection::construct_configuration_object(&snapshot.entries, separator)
    }
}
