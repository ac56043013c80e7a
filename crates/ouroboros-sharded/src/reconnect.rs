//! Re-establishing broken connections

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::cluster::Cluster;
use crate::config::ClientConfig;
use crate::connection::{Connection, ProxiedConnectionFactory};
use crate::selector::ServerSelector;
use crate::server::normalize_address;

/// Finds a replacement for a connection that failed
///
/// A factory hands out an unconfigured strategy; the owner of the cluster
/// wires in its topology, selector and physical factory before use.
#[async_trait]
pub trait ReconnectStrategy: Send + Sync {
    fn set_cluster(&mut self, cluster: Arc<Cluster>);

    fn set_selector(&mut self, selector: Arc<dyn ServerSelector>);

    fn set_connection_factory(&mut self, factory: Arc<dyn ProxiedConnectionFactory>);

    /// A new connection to some server other than the broken one, if any answers
    async fn reconnect(&self, broken: &dyn Connection) -> Option<Box<dyn Connection>>;
}

/// Walks the selector's ranking, best latency first
pub struct LatencyReconnectStrategy {
    config: ClientConfig,
    cluster: Option<Arc<Cluster>>,
    selector: Option<Arc<dyn ServerSelector>>,
    factory: Option<Arc<dyn ProxiedConnectionFactory>>,
}

impl LatencyReconnectStrategy {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            cluster: None,
            selector: None,
            factory: None,
        }
    }

    pub fn cluster(&self) -> Option<&Arc<Cluster>> {
        self.cluster.as_ref()
    }
}

#[async_trait]
impl ReconnectStrategy for LatencyReconnectStrategy {
    fn set_cluster(&mut self, cluster: Arc<Cluster>) {
        self.cluster = Some(cluster);
    }

    fn set_selector(&mut self, selector: Arc<dyn ServerSelector>) {
        self.selector = Some(selector);
    }

    fn set_connection_factory(&mut self, factory: Arc<dyn ProxiedConnectionFactory>) {
        self.factory = Some(factory);
    }

    async fn reconnect(&self, broken: &dyn Connection) -> Option<Box<dyn Connection>> {
        let (Some(selector), Some(factory)) = (&self.selector, &self.factory) else {
            warn!("Reconnect strategy used before being configured");
            return None;
        };
        let broken_address = normalize_address(broken.server_address());

        for server in selector.pick_servers() {
            if server.address() == broken_address {
                continue;
            }
            match factory.connect(&server, &self.config).await {
                Ok(conn) => {
                    info!(
                        from = %broken_address,
                        to = %server.address(),
                        "Reconnected to another server"
                    );
                    return Some(conn);
                }
                Err(e) => {
                    debug!(address = %server.address(), error = %e, "Reconnect attempt failed");
                }
            }
        }
        warn!(address = %broken_address, "No server available to reconnect to");
        None
    }
}
