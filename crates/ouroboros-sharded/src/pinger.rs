//! Cluster pinger
//!
//! Probes every tracked server with `{ ismaster : 1 }`, folding round-trip
//! time into the server's latency average and flipping its liveness.
//! Probe failures are logged, never returned.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::cluster::Cluster;
use crate::config::ClientConfig;
use crate::connection::ProxiedConnectionFactory;
use crate::error::{ConnectionError, Result};
use crate::message::{Query, Reply};
use crate::reply::check_reply;
use crate::server::Server;

/// `key:value` strings from the reply's `tags` sub-document
fn reply_tags(reply: &Reply) -> Option<BTreeSet<String>> {
    let tags = reply.documents.first()?.get_document("tags")?;
    Some(
        tags.iter()
            .map(|element| match element.value().as_str() {
                Some(value) => format!("{}:{}", element.name(), value),
                None => format!("{}:{}", element.name(), element.value()),
            })
            .collect(),
    )
}

async fn round_trip(
    server: &Server,
    factory: &dyn ProxiedConnectionFactory,
    config: &ClientConfig,
) -> Result<Reply> {
    let conn = factory.connect(server, config).await?;
    let result = conn.send(&Query::handshake(config.app_name.as_deref())).await;
    if let Err(e) = conn.close().await {
        debug!(address = %server.address(), error = %e, "Error closing ping connection");
    }
    let reply = result?;
    check_reply(&reply)?;
    Ok(reply)
}

/// Probe one server and record the outcome
///
/// Returns whether the server answered. A server already being probed is
/// skipped and reported as not answering.
pub async fn probe(server: &Server, factory: &dyn ProxiedConnectionFactory, config: &ClientConfig) -> bool {
    let Some(_guard) = server.try_begin_probe() else {
        trace!(address = %server.address(), "Probe already in flight, skipping");
        return false;
    };

    let timeout = config.ping_timeout();
    let started = Instant::now();
    let outcome = tokio::time::timeout(timeout, round_trip(server, factory, config))
        .await
        .unwrap_or(Err(ConnectionError::Timeout(timeout)));

    match outcome {
        Ok(reply) => {
            server.record_success(started.elapsed(), reply_tags(&reply));
            true
        }
        Err(e) => {
            warn!(address = %server.address(), error = %e, "Ping failed");
            server.record_failure();
            false
        }
    }
}

/// Probe every server concurrently; returns how many answered
pub async fn sweep(cluster: &Cluster, factory: &dyn ProxiedConnectionFactory, config: &ClientConfig) -> usize {
    let servers = cluster.servers();
    let results = join_all(servers.iter().map(|server| probe(server, factory, config))).await;
    results.into_iter().filter(|ok| *ok).count()
}

/// Keeps the cluster's latency and liveness current
pub struct ClusterPinger {
    cluster: Arc<Cluster>,
    factory: Arc<dyn ProxiedConnectionFactory>,
    config: ClientConfig,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ClusterPinger {
    pub fn new(
        cluster: Arc<Cluster>,
        factory: Arc<dyn ProxiedConnectionFactory>,
        config: ClientConfig,
    ) -> Self {
        Self {
            cluster,
            factory,
            config,
            shutdown: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Probe every server once, waiting for all results
    pub async fn initial_sweep(&self) -> usize {
        let reachable = sweep(&self.cluster, self.factory.as_ref(), &self.config).await;
        info!(
            servers = self.cluster.len(),
            reachable,
            "Initial ping sweep complete"
        );
        reachable
    }

    /// Start periodic sweeps; does nothing when the interval is disabled,
    /// the pinger was stopped, or it is already running
    pub fn start(&self) {
        let Some(period) = self.config.ping_interval() else {
            debug!("Background pinging disabled");
            return;
        };
        if self.shutdown.is_cancelled() {
            return;
        }
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }

        let cluster = Arc::clone(&self.cluster);
        let factory = Arc::clone(&self.factory);
        let config = self.config.clone();
        let shutdown = self.shutdown.clone();

        *task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; the initial sweep already ran
            interval.tick().await;
            info!(interval_ms = period.as_millis() as u64, "Cluster pinger started");
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("Cluster pinger stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        let reachable = sweep(&cluster, factory.as_ref(), &config).await;
                        trace!(reachable, "Ping sweep complete");
                    }
                }
            }
        }));
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Stop the background task and wait for it to exit
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Cluster pinger task ended abnormally");
            }
        }
    }
}

impl Drop for ClusterPinger {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
