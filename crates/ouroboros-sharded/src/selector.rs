//! Server selection

use std::sync::Arc;

use crate::cluster::Cluster;
use crate::server::Server;

/// Ranks candidate servers for a new connection
pub trait ServerSelector: Send + Sync {
    /// Candidates, best first
    fn pick_servers(&self) -> Vec<Arc<Server>>;

    fn pick_server(&self) -> Option<Arc<Server>> {
        self.pick_servers().into_iter().next()
    }
}

/// Prefers the writable server with the lowest average latency
///
/// Ties keep discovery order, so identical samples always rank the same way.
pub struct LatencyServerSelector {
    cluster: Arc<Cluster>,
}

impl LatencyServerSelector {
    pub fn new(cluster: Arc<Cluster>) -> Self {
        Self { cluster }
    }
}

impl ServerSelector for LatencyServerSelector {
    fn pick_servers(&self) -> Vec<Arc<Server>> {
        // Read each latency once so concurrent probes cannot reorder mid-sort
        let mut ranked: Vec<(f64, Arc<Server>)> = self
            .cluster
            .writable_servers()
            .into_iter()
            .map(|server| (server.average_latency_ms().unwrap_or(f64::MAX), server))
            .collect();
        ranked.sort_by(|a, b| a.0.total_cmp(&b.0));
        ranked.into_iter().map(|(_, server)| server).collect()
    }
}
