//! Runs an operation against the first available client, rotating through
//! the client set on failoverable errors.

use std::sync::Mutex;

use tracing::{debug, warn};

use crate::client::ClientManager;
use crate::error::{Error, Result};

/// Executes operations against a `ClientManager`'s client set, handling
/// load-balancing rotation and failover.
pub struct FailoverExecutor<C: Clone> {
    manager: std::sync::Arc<ClientManager<C>>,
    load_balancing_enabled: bool,
    last_successful_endpoint: Mutex<Option<String>>,
}

impl<C: Clone> FailoverExecutor<C> {
    pub fn new(manager: std::sync::Arc<ClientManager<C>>, load_balancing_enabled: bool) -> Self {
        Self {
            manager,
            load_balancing_enabled,
            last_successful_endpoint: Mutex::new(None),
        }
    }

    /// Run `op` against clients in order until one succeeds, rotating past
    /// failoverable errors. Fails with `AllFallbackFailed` if every client
    /// fails, and triggers replica re-discovery in that case.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn(C) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut clients = self.manager.get_clients();

        if self.load_balancing_enabled && clients.len() > 1 {
            if let Some(last) = self.last_successful_endpoint.lock().unwrap().clone() {
                if let Some(pos) = clients.iter().position(|c| c.endpoint == last) {
                    clients.rotate_left((pos + 1) % clients.len());
                }
            }
        }

        for record in &clients {
            match op(record.client.clone()).await {
                Ok(value) => {
                    self.manager.update_backoff_status(&record.endpoint, true);
                    *self.last_successful_endpoint.lock().unwrap() = Some(record.endpoint.clone());
                    return Ok(value);
                }
                Err(Error::Transport(transport)) if transport.is_failoverable() => {
                    self.manager.update_backoff_status(&record.endpoint, false);
                    debug!(endpoint = %record.endpoint, "failover: rotating to next client");
                    continue;
                }
                Err(other) => return Err(other),
            }
        }

        warn!("all clients exhausted; triggering replica refresh");
        self.manager.refresh_clients().await;
        Err(Error::AllFallbackFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{TransportError, TransportErrorKind};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn succeeds_on_primary() {
        let manager = Arc::new(ClientManager::new("https://primary", 1u32));
        let executor = FailoverExecutor::new(manager, false);
        let result = executor.execute(|_c| async { Ok::<_, Error>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn single_client_failing_over_exhausts_to_all_fallback_failed() {
        let manager = Arc::new(ClientManager::new("https://primary", 0u32));
        let executor = FailoverExecutor::new(manager, false);
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts2 = attempts.clone();
        let result = executor
            .execute(move |_c| {
                attempts2.fetch_add(1, Ordering::SeqCst);
                async {
                    Err::<i32, _>(Error::Transport(TransportError::new(
                        TransportErrorKind::ConnectionReset,
                        std::io::Error::other("reset"),
                    )))
                }
            })
            .await;
        assert!(matches!(result, Err(Error::AllFallbackFailed)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_failoverable_error_propagates_immediately() {
        let manager = Arc::new(ClientManager::new("https://primary", 1u32));
        let executor = FailoverExecutor::new(manager, false);
        let result = executor
            .execute(|_c| async { Err::<i32, _>(Error::InvalidArgument("bad".into())) })
            .await;
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }
}
