//! Sharded connection factory
//!
//! Seeds a [`Cluster`] from the configured routers, discovers the rest from
//! the `config.mongos` collection, keeps latencies current with a
//! [`ClusterPinger`] and hands out connections to the fastest reachable
//! router.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use ouroboros_bson::Document;
use tracing::{debug, info, warn};

use crate::cluster::Cluster;
use crate::config::ClientConfig;
use crate::connection::{ClusterType, Connection, ConnectionFactory, ProxiedConnectionFactory};
use crate::error::{ConnectionError, Result};
use crate::message::{Query, Reply};
use crate::pinger::ClusterPinger;
use crate::reconnect::ReconnectStrategy;
use crate::reply::check_reply;
use crate::selector::{LatencyServerSelector, ServerSelector};

const DISCOVERY_DATABASE: &str = "config";
const DISCOVERY_COLLECTION: &str = "mongos";

/// Connection handed out by [`ShardedConnectionFactory`]
pub struct ShardedConnection {
    inner: Box<dyn Connection>,
}

impl ShardedConnection {
    fn new(inner: Box<dyn Connection>) -> Self {
        Self { inner }
    }

    /// The physical connection underneath
    pub fn into_inner(self) -> Box<dyn Connection> {
        self.inner
    }
}

#[async_trait]
impl Connection for ShardedConnection {
    fn server_address(&self) -> &str {
        self.inner.server_address()
    }

    async fn send(&self, query: &Query) -> Result<Reply> {
        self.inner.send(query).await
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}

/// Connection factory for a sharded cluster of `mongos` routers
pub struct ShardedConnectionFactory {
    config: ClientConfig,
    factory: Arc<dyn ProxiedConnectionFactory>,
    cluster: Arc<Cluster>,
    selector: Arc<LatencyServerSelector>,
    pinger: ClusterPinger,
    closed: AtomicBool,
}

impl ShardedConnectionFactory {
    /// Seed the cluster, run discovery and the first ping sweep, then start
    /// background pinging
    ///
    /// The factory is ready for [`connect`](ConnectionFactory::connect) once
    /// this returns.
    pub async fn new(factory: Arc<dyn ProxiedConnectionFactory>, config: ClientConfig) -> Self {
        let config = config.sanitized();
        let cluster = Arc::new(Cluster::from_config(&config));
        for address in &config.servers {
            cluster.add(address);
        }
        let selector = Arc::new(LatencyServerSelector::new(Arc::clone(&cluster)));
        let pinger = ClusterPinger::new(Arc::clone(&cluster), Arc::clone(&factory), config.clone());

        let sharded = Self {
            config,
            factory,
            cluster,
            selector,
            pinger,
            closed: AtomicBool::new(false),
        };
        sharded.bootstrap().await;
        sharded.pinger.start();
        sharded
    }

    /// Discover routers from every seed, then ping the whole cluster once
    ///
    /// A seed that cannot be reached, answers with an error, or does not
    /// answer within the discovery timeout is logged and skipped.
    pub async fn bootstrap(&self) {
        let seeds = self.cluster.addresses();
        info!(
            seeds = seeds.len(),
            auto_discover = self.config.auto_discover_servers,
            app_name = self.config.app_name.as_deref().unwrap_or("-"),
            "Bootstrapping sharded cluster"
        );

        if self.config.auto_discover_servers {
            let deadline = self.config.discovery_timeout();
            for seed in &seeds {
                match tokio::time::timeout(deadline, self.discover(seed)).await {
                    Ok(Ok(found)) => {
                        debug!(seed = %seed, found, "Discovery complete");
                    }
                    Ok(Err(e)) => {
                        warn!(seed = %seed, error = %e, "Discovery failed");
                    }
                    Err(_) => {
                        warn!(
                            seed = %seed,
                            timeout_ms = deadline.as_millis() as u64,
                            "Discovery timed out"
                        );
                    }
                }
            }
        }

        self.pinger.initial_sweep().await;
        info!(servers = self.cluster.len(), "Sharded cluster bootstrap complete");
    }

    /// Register every router id listed by `seed`; returns how many it listed
    async fn discover(&self, seed: &str) -> Result<usize> {
        let server = self.cluster.add(seed);
        let conn = self.factory.connect(&server, &self.config).await?;
        let query = Query::new(DISCOVERY_DATABASE, DISCOVERY_COLLECTION, Document::new());
        let result = conn.send(&query).await;
        if let Err(e) = conn.close().await {
            debug!(seed = %seed, error = %e, "Error closing discovery connection");
        }
        let reply = result?;
        check_reply(&reply)?;

        let mut found = 0;
        for doc in &reply.documents {
            match doc.get_str("_id") {
                Some(id) => {
                    self.cluster.add(id);
                    found += 1;
                }
                None => debug!(seed = %seed, "Skipping router entry without a string _id"),
            }
        }
        Ok(found)
    }

    pub fn cluster(&self) -> &Arc<Cluster> {
        &self.cluster
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl ConnectionFactory for ShardedConnectionFactory {
    async fn connect(&self) -> Result<Box<dyn Connection>> {
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }

        let mut last_error = None;
        for server in self.selector.pick_servers() {
            match self.factory.connect(&server, &self.config).await {
                Ok(conn) => return Ok(Box::new(ShardedConnection::new(conn))),
                Err(e) => {
                    debug!(address = %server.address(), error = %e, "Connect attempt failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or(ConnectionError::NoServerAvailable))
    }

    fn cluster_type(&self) -> ClusterType {
        ClusterType::Sharded
    }

    fn reconnect_strategy(&self) -> Box<dyn ReconnectStrategy> {
        let mut strategy = self.factory.reconnect_strategy();
        strategy.set_cluster(Arc::clone(&self.cluster));
        strategy.set_selector(Arc::clone(&self.selector) as Arc<dyn ServerSelector>);
        strategy.set_connection_factory(Arc::clone(&self.factory));
        strategy
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.pinger.stop().await;
        if let Err(e) = self.factory.close().await {
            warn!(error = %e, "Error closing proxied connection factory");
        }
        info!("Sharded connection factory closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockFactory, MockServer};
    use std::time::{Duration, Instant};
    use tokio_test::assert_ok;

    fn config(seeds: &[&str]) -> ClientConfig {
        ClientConfig::new(seeds.iter().copied())
            .with_ping_interval(Duration::ZERO)
            .with_ping_timeout(Duration::from_millis(500))
    }

    #[tokio::test]
    async fn test_bootstrap_survives_unreachable_seed() {
        let mock = Arc::new(
            MockFactory::new()
                .with_server("seed-1:27017", MockServer::default().discovers(&["m1:27017"]))
                .with_server("seed-2:27017", MockServer::unreachable())
                .with_server("seed-3:27017", MockServer::default().discovers(&["m3"]))
                .with_server("m1:27017", MockServer::default())
                .with_server("m3:27017", MockServer::default()),
        );
        let factory =
            ShardedConnectionFactory::new(mock, config(&["seed-1", "seed-2", "seed-3"])).await;

        let cluster = factory.cluster();
        assert!(cluster.contains("m1"));
        assert!(cluster.contains("m3"));
        assert_eq!(cluster.len(), 5);
        assert!(cluster.get("m1").unwrap().is_reachable());
        assert!(!cluster.get("seed-2").unwrap().is_reachable());
    }

    #[tokio::test]
    async fn test_bootstrap_survives_failing_discovery() {
        let mock = Arc::new(
            MockFactory::new()
                .with_server("seed-1:27017", MockServer::default().discovers(&["m1"]))
                .with_server("seed-2:27017", MockServer::default().discovery_fails())
                .with_server("seed-3:27017", MockServer::default().discovers(&["m3"])),
        );
        let factory =
            ShardedConnectionFactory::new(mock, config(&["seed-1", "seed-2", "seed-3"])).await;

        assert!(factory.cluster().contains("m1"));
        assert!(factory.cluster().contains("m3"));
        // A seed whose discovery failed still answers pings
        assert!(factory.cluster().get("seed-2").unwrap().is_reachable());
    }

    #[tokio::test]
    async fn test_discovery_timeout_is_bounded() {
        let mock = Arc::new(MockFactory::new().with_server(
            "slow:27017",
            MockServer::default()
                .discovers(&["never"])
                .discovery_delay(Duration::from_secs(30)),
        ));
        let config = config(&["slow"]).with_discovery_timeout(Duration::from_millis(50));

        let started = Instant::now();
        let factory = ShardedConnectionFactory::new(mock, config).await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!factory.cluster().contains("never"));
        assert!(factory.cluster().get("slow").unwrap().is_reachable());
    }

    #[tokio::test]
    async fn test_invalid_settings_fall_back_to_defaults() {
        let mock = Arc::new(MockFactory::new().with_server("a:27017", MockServer::default()));
        let factory = ShardedConnectionFactory::new(
            mock,
            config(&["a"])
                .with_ping_timeout(Duration::ZERO)
                .with_latency_smoothing(7.0),
        )
        .await;

        assert!(factory.config().validate().is_ok());
        assert!(factory.cluster().get("a").unwrap().is_reachable());
        assert_ok!(factory.connect().await);
    }

    #[tokio::test]
    async fn test_no_discovery_when_disabled() {
        let mock = Arc::new(
            MockFactory::new().with_server("seed:27017", MockServer::default().discovers(&["m1"])),
        );
        let factory = ShardedConnectionFactory::new(
            mock.clone(),
            config(&["seed"]).auto_discover_servers(false),
        )
        .await;

        assert_eq!(factory.cluster().addresses(), vec!["seed:27017"]);
        // Only the ping sweep connected
        assert_eq!(mock.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_connect_falls_back_to_next_server() {
        let mock = Arc::new(
            MockFactory::new()
                .with_server("a:27017", MockServer::default())
                .with_server("b:27017", MockServer::default()),
        );
        let factory = ShardedConnectionFactory::new(
            mock.clone(),
            config(&["a", "b"])
                .auto_discover_servers(false)
                .with_latency_smoothing(1.0),
        )
        .await;
        let cluster = factory.cluster();
        cluster.get("a").unwrap().record_success(Duration::from_millis(1), None);
        cluster.get("b").unwrap().record_success(Duration::from_millis(9), None);

        mock.set_server("a:27017", MockServer::unreachable());
        mock.clear_log();

        let conn = assert_ok!(factory.connect().await);
        assert_eq!(conn.server_address(), "b:27017");
        assert_eq!(mock.connect_log(), vec!["a:27017", "b:27017"]);
    }

    #[tokio::test]
    async fn test_connect_reports_last_error() {
        let mock = Arc::new(
            MockFactory::new()
                .with_server("a:27017", MockServer::default())
                .with_server("b:27017", MockServer::default()),
        );
        let factory = ShardedConnectionFactory::new(
            mock.clone(),
            config(&["a", "b"]).auto_discover_servers(false),
        )
        .await;

        mock.set_server("a:27017", MockServer::unreachable());
        mock.set_server("b:27017", MockServer::unreachable());
        mock.clear_log();

        let err = match factory.connect().await {
            Ok(_) => panic!("expected every connect attempt to fail"),
            Err(e) => e,
        };
        let log = mock.connect_log();
        assert_eq!(log.len(), 2);
        assert!(matches!(err, ConnectionError::Io(_)));
        assert!(err.to_string().contains(log[1].as_str()));
    }

    #[tokio::test]
    async fn test_no_server_available() {
        let mock = Arc::new(MockFactory::new().with_server("down:27017", MockServer::unreachable()));
        let factory = ShardedConnectionFactory::new(mock, config(&["down"])).await;

        let err = factory.connect().await.err().unwrap();
        assert!(matches!(err, ConnectionError::NoServerAvailable));

        let empty = ShardedConnectionFactory::new(Arc::new(MockFactory::new()), config(&[])).await;
        assert!(matches!(
            empty.connect().await.err().unwrap(),
            ConnectionError::NoServerAvailable
        ));
    }

    #[tokio::test]
    async fn test_close_is_best_effort() {
        let mock = Arc::new(
            MockFactory::new()
                .with_server("a:27017", MockServer::default())
                .close_fails(),
        );
        let factory = ShardedConnectionFactory::new(
            mock.clone(),
            config(&["a"]).with_ping_interval(Duration::from_millis(20)),
        )
        .await;
        assert_ok!(factory.connect().await);

        factory.close().await;
        assert!(factory.is_closed());
        assert!(mock.is_closed());
        assert!(matches!(
            factory.connect().await.err().unwrap(),
            ConnectionError::Closed
        ));

        // Pinger is stopped: no more probes after close
        let after_close = mock.connect_count();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(mock.connect_count(), after_close);

        factory.close().await;
    }

    #[tokio::test]
    async fn test_reconnect_strategy_is_wired() {
        let mock = Arc::new(
            MockFactory::new()
                .with_server("a:27017", MockServer::default())
                .with_server("b:27017", MockServer::default()),
        );
        let factory = ShardedConnectionFactory::new(
            mock.clone(),
            config(&["a", "b"]).auto_discover_servers(false),
        )
        .await;
        assert_eq!(factory.cluster_type(), ClusterType::Sharded);

        let conn = assert_ok!(factory.connect().await);
        let strategy = factory.reconnect_strategy();
        let replacement = strategy.reconnect(conn.as_ref()).await.unwrap();
        assert_ne!(replacement.server_address(), conn.server_address());
    }
}
