//! The set of candidate endpoints (primary plus discovered replicas), their
//! per-client backoff state, and the ordering used for load balancing.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use tracing::debug;

use crate::backoff::exponential_backoff;

/// One candidate endpoint and its failure-driven backoff state.
#[derive(Debug, Clone)]
pub struct ClientRecord<C> {
    pub endpoint: String,
    pub client: C,
    backoff_end_time: Instant,
    failed_attempts: u32,
}

impl<C> ClientRecord<C> {
    pub fn new(endpoint: impl Into<String>, client: C) -> Self {
        Self {
            endpoint: endpoint.into(),
            client,
            backoff_end_time: Instant::now(),
            failed_attempts: 0,
        }
    }

    fn is_available(&self, now: Instant) -> bool {
        self.backoff_end_time <= now
    }

    fn record_result(&mut self, success: bool) {
        let now = Instant::now();
        if success {
            self.failed_attempts = 0;
            self.backoff_end_time = now;
        } else {
            self.failed_attempts += 1;
            self.backoff_end_time = now + exponential_backoff(self.failed_attempts);
        }
    }
}

/// A function that, given an endpoint, discovers additional replica
/// endpoints (e.g. via DNS). Transport-level; modeled here as an opaque
/// injected async callback.
pub type DiscoverFn<C> = Box<
    dyn Fn(&str) -> std::pin::Pin<Box<dyn std::future::Future<Output = Vec<(String, C)>> + Send>>
        + Send
        + Sync,
>;

/// Holds the primary client plus any discovered replicas, with per-client
/// backoff bookkeeping.
pub struct ClientManager<C: Clone> {
    records: Mutex<Vec<ClientRecord<C>>>,
    discover: Option<DiscoverFn<C>>,
    replica_discovery_enabled: bool,
}

impl<C: Clone> ClientManager<C> {
    pub fn new(primary_endpoint: impl Into<String>, primary_client: C) -> Self {
        Self {
            records: Mutex::new(vec![ClientRecord::new(primary_endpoint, primary_client)]),
            discover: None,
            replica_discovery_enabled: false,
        }
    }

    pub fn with_replica_discovery(mut self, discover: DiscoverFn<C>) -> Self {
        self.discover = Some(discover);
        self.replica_discovery_enabled = true;
        self
    }

    /// The ordered sequence of currently-available clients: primary first,
    /// replicas shuffled, filtered to those whose backoff has elapsed.
    pub fn get_clients(&self) -> Vec<ClientRecord<C>> {
        let now = Instant::now();
        let records = self.records.lock().unwrap();

        let mut primary = Vec::new();
        let mut replicas = Vec::new();
        for (i, record) in records.iter().enumerate() {
            if !record.is_available(now) {
                continue;
            }
            if i == 0 {
                primary.push(record.clone());
            } else {
                replicas.push(record.clone());
            }
        }
        replicas.shuffle(&mut rand::thread_rng());
        primary.extend(replicas);
        primary
    }

    /// Update the named endpoint's backoff state after a call attempt.
    pub fn update_backoff_status(&self, endpoint: &str, success: bool) {
        let mut records = self.records.lock().unwrap();
        if let Some(record) = records.iter_mut().find(|r| r.endpoint == endpoint) {
            record.record_result(success);
        }
    }

    /// Re-run replica discovery against the primary endpoint, merging in
    /// any newly-discovered replicas and dropping ones no longer reported.
    pub async fn refresh_clients(&self) {
        let Some(discover) = &self.discover else {
            return;
        };
        if !self.replica_discovery_enabled {
            return;
        }

        let primary_endpoint = {
            let records = self.records.lock().unwrap();
            records[0].endpoint.clone()
        };

        let discovered = discover(&primary_endpoint).await;
        debug!(count = discovered.len(), "replica discovery completed");

        let mut records = self.records.lock().unwrap();
        let primary = records.remove(0);
        records.clear();
        records.push(primary);
        for (endpoint, client) in discovered {
            records.push(ClientRecord::new(endpoint, client));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_manager_returns_only_primary() {
        let manager = ClientManager::new("https://primary", 1u32);
        let clients = manager.get_clients();
        assert_eq!(clients.len(), 1);
        assert_eq!(clients[0].endpoint, "https://primary");
    }

    #[test]
    fn failed_client_is_excluded_until_backoff_elapses() {
        let manager = ClientManager::new("https://primary", 1u32);
        manager.update_backoff_status("https://primary", false);
        assert!(manager.get_clients().is_empty());
    }

    #[test]
    fn success_resets_attempts_and_clears_backoff() {
        let manager = ClientManager::new("https://primary", 1u32);
        manager.update_backoff_status("https://primary", false);
        manager.update_backoff_status("https://primary", true);
        assert_eq!(manager.get_clients().len(), 1);
    }
}
