//! The load/refresh engine: initial load with retry-until-timeout, ETag-based
//! change detection, and coordinated refresh of key-values, feature flags,
//! and secrets.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::time::Instant;
use indexmap::IndexMap;
use serde::Deserialize;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, warn};

use crate::adapters::AdapterChain;
use crate::backoff::startup_backoff;
use crate::content_type::ContentType;
use crate::error::{Error, Result};
use crate::failover::FailoverExecutor;
use crate::mapping::ConfigurationMapping;
use crate::selector::Selector;
use crate::setting::{ResponseStatus, Setting, SettingKey, SnapshotCompositionType};
use crate::store::StoreClient;
use crate::timer::RefreshTimer;
use crate::watcher::WatcherState;

const MIN_FAILURE_DELAY: Duration = Duration::from_secs(5);

/// The wire shape of a snapshot-reference setting's value.
#[derive(Deserialize)]
struct SnapshotReferenceValue {
    name: String,
}

type Listener = Box<dyn Fn() + Send + Sync>;

/// A handle returned by [`LoadRefreshEngine::on_refresh`] that removes its
/// listener when dropped or explicitly disposed.
pub struct Disposable {
    id: u64,
    listeners: Arc<std::sync::Mutex<Vec<(u64, Listener)>>>,
}

impl Disposable {
    pub fn dispose(self) {
        self.listeners.lock().unwrap().retain(|(id, _)| *id != self.id);
    }
}

/// Coordinates the initial load and ongoing refresh of key-values, feature
/// flags, and secrets against a failover-aware store client.
pub struct LoadRefreshEngine {
    failover: FailoverExecutor<Arc<dyn StoreClient>>,
    adapters: AdapterChain,
    watcher: WatcherState,
    mapping: Arc<ConfigurationMapping>,

    kv_selectors: Vec<Selector>,
    ff_selectors: Vec<Selector>,
    trim_prefixes: Vec<String>,
    watched_settings: Vec<SettingKey>,

    kv_refresh_enabled: bool,
    kv_timer: Option<RefreshTimer>,
    ff_refresh_enabled: bool,
    ff_timer: Option<RefreshTimer>,
    secret_timer: Option<RefreshTimer>,
    feature_flags_enabled: bool,
    parallel_secret_resolution: bool,

    startup_timeout: Duration,
    store_origin: String,

    refresh_in_progress: AtomicBool,
    refresh_serialize: AsyncMutex<()>,
    listeners: Arc<std::sync::Mutex<Vec<(u64, Listener)>>>,
    next_listener_id: AtomicU64,

    /// Cached secret-reference settings observed during the last key-value
    /// load, used to re-resolve on a secret-only refresh cycle.
    secret_settings: std::sync::Mutex<Vec<Setting>>,
}

#[allow(clippy::too_many_arguments)]
pub struct EngineConfig {
    pub failover: FailoverExecutor<Arc<dyn StoreClient>>,
    pub adapters: AdapterChain,
    pub mapping: Arc<ConfigurationMapping>,
    pub kv_selectors: Vec<Selector>,
    pub ff_selectors: Vec<Selector>,
    pub trim_prefixes: Vec<String>,
    pub watched_settings: Vec<SettingKey>,
    pub kv_refresh_enabled: bool,
    pub kv_refresh_interval: Option<Duration>,
    pub ff_refresh_enabled: bool,
    pub ff_refresh_interval: Option<Duration>,
    pub secret_refresh_interval: Option<Duration>,
    pub feature_flags_enabled: bool,
    pub parallel_secret_resolution: bool,
    pub startup_timeout: Duration,
    pub store_origin: String,
}

impl LoadRefreshEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            failover: config.failover,
            adapters: config.adapters,
            watcher: WatcherState::new(),
            mapping: config.mapping,
            kv_selectors: config.kv_selectors,
            ff_selectors: config.ff_selectors,
            trim_prefixes: config.trim_prefixes,
            watched_settings: config.watched_settings,
            kv_refresh_enabled: config.kv_refresh_enabled,
            kv_timer: config.kv_refresh_interval.map(RefreshTimer::new),
            ff_refresh_enabled: config.ff_refresh_enabled,
            ff_timer: config.ff_refresh_interval.map(RefreshTimer::new),
            secret_timer: config.secret_refresh_interval.map(RefreshTimer::new),
            feature_flags_enabled: config.feature_flags_enabled,
            parallel_secret_resolution: config.parallel_secret_resolution,
            startup_timeout: config.startup_timeout,
            store_origin: config.store_origin,
            refresh_in_progress: AtomicBool::new(false),
            refresh_serialize: AsyncMutex::new(()),
            listeners: Arc::new(std::sync::Mutex::new(Vec::new())),
            next_listener_id: AtomicU64::new(0),
            secret_settings: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Register a refresh listener. Fails with `InvalidOperation` if no
    /// refresh domain is enabled.
    pub fn on_refresh(&self, listener: impl Fn() + Send + Sync + 'static) -> Result<Disposable> {
        if !self.kv_refresh_enabled && !self.ff_refresh_enabled && self.secret_timer.is_none() {
            return Err(Error::InvalidOperation(
                "cannot register a refresh listener when no refresh domain is enabled".to_string(),
            ));
        }
        let id = self.next_listener_id.fetch_add(1, Ordering::SeqCst);
        self.listeners.lock().unwrap().push((id, Box::new(listener)));
        Ok(Disposable {
            id,
            listeners: self.listeners.clone(),
        })
    }

    fn fire_listeners(&self) {
        let listeners = self.listeners.lock().unwrap();
        for (_id, listener) in listeners.iter() {
            listener();
        }
    }

    /// Perform the initial load, retrying with backoff until either it
    /// succeeds or the startup timeout elapses.
    pub async fn initial_load(&self) -> Result<()> {
        let start = Instant::now();
        let result = tokio::time::timeout(self.startup_timeout, self.retry_initial_load(start)).await;

        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => self.rate_limit_failure(start, e).await,
            Err(_elapsed) => self.rate_limit_failure(start, Error::LoadTimeout).await,
        }
    }

    async fn rate_limit_failure(&self, start: Instant, err: Error) -> Result<()> {
        let elapsed = start.elapsed();
        if elapsed < MIN_FAILURE_DELAY {
            tokio::time::sleep(MIN_FAILURE_DELAY - elapsed).await;
        }
        Err(err)
    }

    async fn retry_initial_load(&self, start: Instant) -> Result<()> {
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            match self.try_initial_load().await {
                Ok(()) => return Ok(()),
                Err(Error::InvalidArgument(msg)) => {
                    return Err(Error::LoadFailed(Box::new(Error::InvalidArgument(msg))));
                }
                Err(Error::Transport(t)) if !t.is_failoverable() => {
                    return Err(Error::LoadFailed(Box::new(Error::Transport(t))));
                }
                Err(e) => {
                    warn!(attempt = attempts, error = %e, "initial load attempt failed, retrying");
                    let delay = startup_backoff(start.elapsed(), attempts);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn try_initial_load(&self) -> Result<()> {
        if self.kv_refresh_enabled && !self.watched_settings.is_empty() {
            for key in &self.watched_settings {
                let (_, setting) = self
                    .failover
                    .execute(|client| {
                        let k = key.key.clone();
                        let label = key.label.clone();
                        async move { client.get(&k, label.as_deref(), None).await }
                    })
                    .await?;
                let etag = setting.map(|s| s.etag);
                self.watcher.set_sentinel_etag(key.clone(), etag);
            }
        }

        self.load_key_values().await?;

        if self.feature_flags_enabled {
            self.load_feature_flags().await?;
        }

        Ok(())
    }

    async fn load_key_values(&self) -> Result<()> {
        let mut entries: IndexMap<String, serde_json::Value> = IndexMap::new();
        let mut secret_settings = Vec::new();

        for selector in &self.kv_selectors {
            let settings = self.load_selector(selector).await?;
            let settings = self.expand_snapshot_references(settings).await?;
            for setting in settings {
                if is_feature_flag_setting(&setting) {
                    continue;
                }
                let trimmed_key = crate::projection::trim_prefix(&setting.key, &self.trim_prefixes);
                let mut trimmed = setting.clone();
                trimmed.key = trimmed_key.to_string();
                if is_secret_reference_setting(&trimmed) {
                    secret_settings.push(trimmed.clone());
                }
                let (key, value) = self.adapters.process(&trimmed).await?;
                entries.insert(key, value);
            }
        }

        self.mapping.publish_key_values(entries);
        *self.secret_settings.lock().unwrap() = secret_settings;
        Ok(())
    }

    /// Expand any snapshot-reference setting into the named snapshot's own
    /// settings, discarding feature-flag settings within the expansion
    /// (consistent with key-value-mode filtering). Ordinary settings pass
    /// through untouched. Expansion is a single level: a setting produced by
    /// an expansion that is itself a snapshot reference is left as-is rather
    /// than expanded again.
    async fn expand_snapshot_references(&self, settings: Vec<Setting>) -> Result<Vec<Setting>> {
        let mut expanded = Vec::with_capacity(settings.len());
        for setting in settings {
            if !is_snapshot_reference_setting(&setting) {
                expanded.push(setting);
                continue;
            }

            let raw = setting.value.as_deref().unwrap_or_default();
            let reference: SnapshotReferenceValue = serde_json::from_str(raw).map_err(|e| {
                Error::InvalidOperation(format!(
                    "snapshot reference '{}' has an invalid value: {e}",
                    setting.key
                ))
            })?;

            let (composition, _etag) = self
                .failover
                .execute(|client| {
                    let name = reference.name.clone();
                    async move { client.get_snapshot(&name).await }
                })
                .await?;
            if composition != SnapshotCompositionType::Key {
                return Err(Error::InvalidOperation(format!(
                    "snapshot '{}' has an unsupported composition type",
                    reference.name
                )));
            }

            let items = self
                .failover
                .execute(|client| {
                    let name = reference.name.clone();
                    async move { client.list_for_snapshot(&name).await }
                })
                .await?;
            expanded.extend(items.into_iter().filter(|s| !is_feature_flag_setting(s)));
        }
        Ok(expanded)
    }

    async fn load_selector(&self, selector: &Selector) -> Result<Vec<Setting>> {
        match selector {
            Selector::Query {
                key_filter,
                label_filter,
                tag_filters,
            } => {
                let tags: Vec<String> = tag_filters
                    .iter()
                    .map(|t| format!("{}={}", t.name, t.value))
                    .collect();
                let mut settings = Vec::new();
                let mut page_etag: Option<String> = None;
                loop {
                    let (status, page) = self
                        .failover
                        .execute(|client| {
                            let key_filter = key_filter.clone();
                            let label_filter = label_filter.clone();
                            let tags = tags.clone();
                            let page_etag = page_etag.clone();
                            async move {
                                client
                                    .list(
                                        &key_filter,
                                        label_filter.as_deref(),
                                        &tags,
                                        page_etag.as_deref(),
                                    )
                                    .await
                            }
                        })
                        .await?;
                    if status == ResponseStatus::NotModified {
                        break;
                    }
                    self.watcher.set_page_etag(key_filter.clone(), page.etag.clone());
                    settings.extend(page.settings);
                    // Pagination is modeled as a single page per selector;
                    // a multi-page store client would loop here using a
                    // continuation token carried on `Page`.
                    break;
                }
                Ok(settings)
            }
            Selector::Snapshot { snapshot_name } => {
                let (composition, _etag) = self
                    .failover
                    .execute(|client| {
                        let name = snapshot_name.clone();
                        async move { client.get_snapshot(&name).await }
                    })
                    .await?;
                if composition != SnapshotCompositionType::Key {
                    return Err(Error::InvalidOperation(format!(
                        "snapshot '{snapshot_name}' has an unsupported composition type"
                    )));
                }
                self.failover
                    .execute(|client| {
                        let name = snapshot_name.clone();
                        async move { client.list_for_snapshot(&name).await }
                    })
                    .await
            }
        }
    }

    async fn load_feature_flags(&self) -> Result<()> {
        let mut flags = Vec::new();
        for selector in &self.ff_selectors {
            let settings = self.load_selector(selector).await?;
            for setting in settings {
                if !is_feature_flag_setting(&setting) {
                    continue;
                }
                let flag = crate::feature_flags::parse_feature_flag(&setting, &self.store_origin)?;
                flags.push(flag);
            }
        }
        self.mapping
            .publish_feature_flags(serde_json::json!({ "feature_flags": flags }));
        Ok(())
    }

    /// Run a refresh cycle. Idempotent: a concurrent call while one is
    /// already running returns immediately without issuing a second cycle.
    pub async fn refresh(&self) {
        if self
            .refresh_in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("refresh already in progress, skipping");
            return;
        }
        let _serialize = self.refresh_serialize.lock().await;

        // Secret refresh behavior depends on whether key-values changed this
        // cycle (a kv change already re-resolves secrets), so key-value
        // refresh runs first; feature-flag refresh and secret refresh are
        // then run concurrently since neither depends on the other.
        let kv_changed = self.refresh_key_values().await;
        let kv_changed_bool = matches!(kv_changed, Ok(true));
        let (ff_changed, secret_changed) = tokio::join!(
            self.refresh_feature_flags(),
            self.refresh_secrets(kv_changed_bool),
        );

        for (label, result) in [
            ("key-value", &kv_changed),
            ("feature-flag", &ff_changed),
            ("secret", &secret_changed),
        ] {
            if let Err(e) = result {
                error!(domain = label, error = %e, "sub-refresh failed");
            }
        }

        let changed = matches!(kv_changed, Ok(true))
            || matches!(ff_changed, Ok(true))
            || matches!(secret_changed, Ok(true));

        self.refresh_in_progress.store(false, Ordering::SeqCst);

        if changed {
            self.fire_listeners();
        }
    }

    async fn refresh_key_values(&self) -> Result<bool> {
        if !self.kv_refresh_enabled {
            return Ok(false);
        }
        let Some(timer) = &self.kv_timer else {
            return Ok(false);
        };
        if !timer.can_refresh() {
            return Ok(false);
        }

        let changed = if self.watched_settings.is_empty() {
            self.detect_watch_all_change().await?
        } else {
            self.detect_sentinel_change().await?
        };

        if changed {
            self.adapters.notify_change_detected();
            self.load_key_values().await?;
        }
        timer.reset();
        Ok(changed)
    }

    async fn detect_watch_all_change(&self) -> Result<bool> {
        for selector in &self.kv_selectors {
            if let Selector::Query { key_filter, label_filter, tag_filters } = selector {
                let tags: Vec<String> = tag_filters
                    .iter()
                    .map(|t| format!("{}={}", t.name, t.value))
                    .collect();
                let known_etag = self.watcher.page_etag(key_filter);
                let (status, page) = self
                    .failover
                    .execute(|client| {
                        let key_filter = key_filter.clone();
                        let label_filter = label_filter.clone();
                        let tags = tags.clone();
                        let known_etag = known_etag.clone();
                        async move {
                            client
                                .list(&key_filter, label_filter.as_deref(), &tags, known_etag.as_deref())
                                .await
                        }
                    })
                    .await?;
                if status == ResponseStatus::Changed {
                    self.watcher.set_page_etag(key_filter.clone(), page.etag);
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    async fn detect_sentinel_change(&self) -> Result<bool> {
        for key in &self.watched_settings {
            let known_etag = self.watcher.sentinel_etag(key);
            let label = key.label.clone();
            let (status, setting) = self
                .failover
                .execute(|client| {
                    let k = key.key.clone();
                    let label = label.clone();
                    let known_etag = known_etag.clone();
                    async move { client.get(&k, label.as_deref(), known_etag.as_deref()).await }
                })
                .await?;

            match status {
                ResponseStatus::NotModified => continue,
                ResponseStatus::Changed => {
                    let new_etag = setting.map(|s| s.etag);
                    self.watcher.set_sentinel_etag(key.clone(), new_etag);
                    return Ok(true);
                }
                ResponseStatus::NotFound => {
                    if known_etag.is_some() {
                        self.watcher.set_sentinel_etag(key.clone(), None);
                        return Ok(true);
                    }
                }
            }
        }
        Ok(false)
    }

    async fn refresh_feature_flags(&self) -> Result<bool> {
        if !self.ff_refresh_enabled || !self.feature_flags_enabled {
            return Ok(false);
        }
        let Some(timer) = &self.ff_timer else {
            return Ok(false);
        };
        if !timer.can_refresh() {
            return Ok(false);
        }

        let mut changed = false;
        for selector in &self.ff_selectors {
            if let Selector::Query { key_filter, label_filter, tag_filters } = selector {
                let tags: Vec<String> = tag_filters
                    .iter()
                    .map(|t| format!("{}={}", t.name, t.value))
                    .collect();
                let known_etag = self.watcher.page_etag(key_filter);
                let (status, page) = self
                    .failover
                    .execute(|client| {
                        let key_filter = key_filter.clone();
                        let label_filter = label_filter.clone();
                        let tags = tags.clone();
                        let known_etag = known_etag.clone();
                        async move {
                            client
                                .list(&key_filter, label_filter.as_deref(), &tags, known_etag.as_deref())
                                .await
                        }
                    })
                    .await?;
                if status == ResponseStatus::Changed {
                    self.watcher.set_page_etag(key_filter.clone(), page.etag);
                    changed = true;
                }
            }
        }

        if changed {
            self.load_feature_flags().await?;
        }
        timer.reset();
        Ok(changed)
    }

    async fn refresh_secrets(&self, kv_changed: bool) -> Result<bool> {
        // If key-values changed this cycle, secrets were already re-resolved
        // as part of the key-value load.
        if kv_changed {
            return Ok(false);
        }
        let Some(timer) = &self.secret_timer else {
            return Ok(false);
        };
        if !timer.can_refresh() {
            return Ok(false);
        }

        let settings = self.secret_settings.lock().unwrap().clone();
        if settings.is_empty() {
            timer.reset();
            return Ok(false);
        }

        if self.parallel_secret_resolution {
            let futures = settings.iter().map(|s| self.adapters.process(s));
            let results = join_all(futures).await;
            for result in results {
                let (key, value) = result?;
                self.mapping.update_entry(key, value);
            }
        } else {
            for setting in &settings {
                let (key, value) = self.adapters.process(setting).await?;
                self.mapping.update_entry(key, value);
            }
        }

        timer.reset();
        Ok(true)
    }
}

fn is_feature_flag_setting(setting: &Setting) -> bool {
    setting
        .content_type
        .as_deref()
        .map(ContentType::parse)
        .is_some_and(|ct| ct.is_feature_flag())
}

fn is_secret_reference_setting(setting: &Setting) -> bool {
    setting
        .content_type
        .as_deref()
        .map(ContentType::parse)
        .is_some_and(|ct| ct.is_secret_reference())
}

fn is_snapshot_reference_setting(setting: &Setting) -> bool {
    setting
        .content_type
        .as_deref()
        .map(ContentType::parse)
        .is_some_and(|ct| ct.is_snapshot_reference())
}

