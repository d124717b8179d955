//! Typed configuration for [`crate::provider::Provider::load`].

use std::sync::Arc;
use std::time::Duration;

use crate::secrets::{SecretClient, SecretResolverFn};
use crate::selector::Selector;

/// Refresh behavior for the key-value domain.
#[derive(Default)]
pub struct RefreshOptions {
    pub enabled: bool,
    pub refresh_interval: Duration,
    pub watched_settings: Vec<(String, Option<String>)>,
}

impl RefreshOptions {
    pub fn new(refresh_interval: Duration) -> Self {
        assert!(
            refresh_interval >= Duration::from_secs(1),
            "refresh interval must be at least 1000ms"
        );
        Self {
            enabled: true,
            refresh_interval,
            watched_settings: Vec::new(),
        }
    }

    pub fn watching(mut self, key: impl Into<String>, label: Option<String>) -> Self {
        self.watched_settings.push((key.into(), label));
        self
    }
}

/// Refresh behavior for the feature-flag domain.
#[derive(Default)]
pub struct FeatureFlagRefreshOptions {
    pub enabled: bool,
    pub refresh_interval: Duration,
}

/// Feature-flag loading configuration.
#[derive(Default)]
pub struct FeatureFlagOptions {
    pub enabled: bool,
    pub selectors: Vec<Selector>,
    pub refresh: FeatureFlagRefreshOptions,
}

/// Secret resolution configuration.
#[derive(Default)]
pub struct KeyVaultOptions {
    pub secret_clients: Vec<(String, Arc<dyn SecretClient>)>,
    /// A bearer-token provider used to lazily construct an HTTP secret
    /// client for any vault host with no preregistered client. Credential
    /// acquisition itself (how the token is obtained/refreshed) is the
    /// caller's concern; this crate only consumes the resulting token.
    pub credential: Option<Arc<dyn Fn() -> String + Send + Sync>>,
    pub secret_resolver: Option<SecretResolverFn>,
    pub secret_refresh_interval: Option<Duration>,
    pub parallel_secret_resolution_enabled: bool,
}

impl KeyVaultOptions {
    pub fn with_secret_refresh_interval(mut self, interval: Duration) -> Self {
        assert!(
            interval >= Duration::from_secs(60),
            "secret refresh interval must be at least 60000ms"
        );
        self.secret_refresh_interval = Some(interval);
        self
    }
}

/// Startup-load timeout configuration.
pub struct StartupOptions {
    pub timeout: Duration,
}

impl Default for StartupOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(100),
        }
    }
}

/// Full set of options accepted by `Provider::load`.
#[derive(Default)]
pub struct ProviderOptions {
    pub selectors: Vec<Selector>,
    pub trim_key_prefixes: Vec<String>,
    pub refresh_options: RefreshOptions,
    pub feature_flag_options: FeatureFlagOptions,
    pub key_vault_options: KeyVaultOptions,
    pub startup_options: StartupOptions,
    pub load_balancing_enabled: bool,
    pub replica_discovery_enabled: bool,
}
