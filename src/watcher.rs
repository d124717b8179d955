//! ETag bookkeeping used for change detection: a per-sentinel last-known
//! ETag, and a per-page last-known page-ETag.

use std::sync::Mutex;

use foldhash::HashMap;

use crate::setting::SettingKey;

/// Owns the watcher state consulted by change detection. Mutated only under
/// a short critical section; the published mapping itself lives elsewhere.
#[derive(Default)]
pub struct WatcherState {
    sentinel_etags: Mutex<HashMap<SettingKey, Option<String>>>,
    page_etags: Mutex<HashMap<String, Option<String>>>,
}

impl WatcherState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sentinel_etag(&self, key: &SettingKey) -> Option<String> {
        self.sentinel_etags.lock().unwrap().get(key).cloned().flatten()
    }

    /// Set the sentinel's ETag, returning true iff this is an observed
    /// change from the previous state (including a first-seen transition).
    pub fn set_sentinel_etag(&self, key: SettingKey, new_etag: Option<String>) -> bool {
        let mut map = self.sentinel_etags.lock().unwrap();
        let changed = match map.get(&key) {
            Some(existing) => existing != &new_etag,
            None => true,
        };
        map.insert(key, new_etag);
        changed
    }

    pub fn page_etag(&self, selector_key: &str) -> Option<String> {
        self.page_etags
            .lock()
            .unwrap()
            .get(selector_key)
            .cloned()
            .flatten()
    }

    pub fn set_page_etag(&self, selector_key: String, new_etag: Option<String>) {
        self.page_etags.lock().unwrap().insert(selector_key, new_etag);
    }
}
