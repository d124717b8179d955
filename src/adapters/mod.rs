//! The value-adapter chain: turns a raw setting into a `(key, value)` pair.

mod json;
mod secret_reference;

pub use json::JsonAdapter;
pub use secret_reference::SecretReferenceAdapter;

use std::sync::Arc;

use crate::error::Result;
use crate::setting::Setting;

/// A single value transform in the chain. Adapters are consulted in order;
/// the first whose `can_process` returns true handles the setting.
#[async_trait::async_trait]
pub trait ValueAdapter: Send + Sync {
    fn can_process(&self, setting: &Setting) -> bool;

    async fn process_key_value(&self, setting: &Setting) -> Result<(String, serde_json::Value)>;

    /// Invoked once a refresh decides a reload is needed, before settings
    /// are re-processed. Most adapters have nothing to do here; the
    /// secret-reference adapter uses it to clear its cache.
    fn on_change_detected(&self) {}
}

/// The ordered adapter chain: secret-reference first, then JSON. A setting
/// matched by neither passes through unchanged as a string value.
pub struct AdapterChain {
    adapters: Vec<Arc<dyn ValueAdapter>>,
}

impl AdapterChain {
    pub fn new(adapters: Vec<Arc<dyn ValueAdapter>>) -> Self {
        Self { adapters }
    }

    pub async fn process(&self, setting: &Setting) -> Result<(String, serde_json::Value)> {
        for adapter in &self.adapters {
            if adapter.can_process(setting) {
                return adapter.process_key_value(setting).await;
            }
        }
        Ok((
            setting.key.clone(),
            serde_json::Value::String(setting.value.clone().unwrap_or_default()),
        ))
    }

    pub fn notify_change_detected(&self) {
        for adapter in &self.adapters {
            adapter.on_change_detected();
        }
    }
}
