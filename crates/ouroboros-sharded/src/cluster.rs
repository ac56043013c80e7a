//! Cluster topology: the set of known routers

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::config::ClientConfig;
use crate::server::{normalize_address, Server, ServerSnapshot, DEFAULT_LATENCY_SMOOTHING};

#[derive(Debug, Default)]
struct ClusterInner {
    /// Discovery order
    order: Vec<Arc<Server>>,
    by_address: HashMap<String, Arc<Server>>,
}

/// Known servers keyed by normalised address
///
/// Reads take a shared lock and return owned snapshots of the membership,
/// so callers iterate without holding it. Per-server health lives behind
/// each [`Server`]'s own lock, so probes never block membership reads.
#[derive(Debug)]
pub struct Cluster {
    inner: RwLock<ClusterInner>,
    smoothing: f64,
}

impl Default for Cluster {
    fn default() -> Self {
        Self::new()
    }
}

impl Cluster {
    pub fn new() -> Self {
        Self::with_smoothing(DEFAULT_LATENCY_SMOOTHING)
    }

    pub fn with_smoothing(smoothing: f64) -> Self {
        Self {
            inner: RwLock::new(ClusterInner::default()),
            smoothing,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::with_smoothing(config.latency_smoothing)
    }

    /// Track `address`, returning the existing server if it is already known
    pub fn add(&self, address: &str) -> Arc<Server> {
        let address = normalize_address(address);
        if let Some(server) = self.inner.read().by_address.get(&address) {
            return Arc::clone(server);
        }

        let mut inner = self.inner.write();
        // Another writer may have added it between the two locks
        if let Some(server) = inner.by_address.get(&address) {
            return Arc::clone(server);
        }
        let server = Arc::new(Server::with_smoothing(&address, self.smoothing));
        inner.order.push(Arc::clone(&server));
        inner.by_address.insert(address.clone(), Arc::clone(&server));
        drop(inner);

        info!(address = %address, "Server added to cluster");
        server
    }

    /// Stop tracking `address`
    pub fn remove(&self, address: &str) -> Option<Arc<Server>> {
        let address = normalize_address(address);
        let mut inner = self.inner.write();
        let removed = inner.by_address.remove(&address)?;
        inner.order.retain(|server| !Arc::ptr_eq(server, &removed));
        drop(inner);

        info!(address = %address, "Server removed from cluster");
        Some(removed)
    }

    pub fn get(&self, address: &str) -> Option<Arc<Server>> {
        self.inner
            .read()
            .by_address
            .get(&normalize_address(address))
            .cloned()
    }

    pub fn contains(&self, address: &str) -> bool {
        self.get(address).is_some()
    }

    /// Every tracked server in discovery order
    pub fn servers(&self) -> Vec<Arc<Server>> {
        self.inner.read().order.clone()
    }

    /// Servers that can take writes, in discovery order
    ///
    /// Every router accepts writes, so this is every reachable server.
    pub fn writable_servers(&self) -> Vec<Arc<Server>> {
        self.inner
            .read()
            .order
            .iter()
            .filter(|server| server.is_reachable())
            .cloned()
            .collect()
    }

    pub fn addresses(&self) -> Vec<String> {
        self.inner
            .read()
            .order
            .iter()
            .map(|server| server.address().to_string())
            .collect()
    }

    pub fn snapshots(&self) -> Vec<ServerSnapshot> {
        self.servers().iter().map(|server| server.snapshot()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
