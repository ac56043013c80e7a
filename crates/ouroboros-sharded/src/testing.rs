//! In-memory connection factory for unit tests

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use ouroboros_bson::{Document, DocumentBuilder};
use parking_lot::Mutex;

use crate::config::ClientConfig;
use crate::connection::{Connection, ProxiedConnectionFactory};
use crate::error::{ConnectionError, Result};
use crate::message::{Query, Reply};
use crate::reconnect::{LatencyReconnectStrategy, ReconnectStrategy};
use crate::server::Server;

/// Scripted behaviour of one fake router
#[derive(Debug, Clone, Default)]
pub(crate) struct MockServer {
    unreachable: bool,
    discovered: Vec<String>,
    discovery_fails: bool,
    discovery_delay: Duration,
    ping_fails: bool,
    ping_delay: Duration,
    tags: Vec<(String, String)>,
}

impl MockServer {
    pub(crate) fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Default::default()
        }
    }

    /// Router ids returned from `config.mongos`
    pub(crate) fn discovers(mut self, ids: &[&str]) -> Self {
        self.discovered = ids.iter().map(|id| id.to_string()).collect();
        self
    }

    pub(crate) fn discovery_fails(mut self) -> Self {
        self.discovery_fails = true;
        self
    }

    pub(crate) fn discovery_delay(mut self, delay: Duration) -> Self {
        self.discovery_delay = delay;
        self
    }

    /// Answer pings with `ok: 0`
    pub(crate) fn ping_fails(mut self) -> Self {
        self.ping_fails = true;
        self
    }

    pub(crate) fn ping_delay(mut self, delay: Duration) -> Self {
        self.ping_delay = delay;
        self
    }

    pub(crate) fn tags(mut self, tags: &[(&str, &str)]) -> Self {
        self.tags = tags
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self
    }
}

pub(crate) struct MockConnection {
    address: String,
    behaviour: MockServer,
    open: AtomicBool,
    commands: Arc<Mutex<Vec<Document>>>,
}

#[async_trait]
impl Connection for MockConnection {
    fn server_address(&self) -> &str {
        &self.address
    }

    async fn send(&self, query: &Query) -> Result<Reply> {
        if !self.is_open() {
            return Err(ConnectionError::Closed);
        }
        match query.collection.as_str() {
            "mongos" => {
                tokio::time::sleep(self.behaviour.discovery_delay).await;
                if self.behaviour.discovery_fails {
                    return Err(ConnectionError::Protocol("discovery refused".to_string()));
                }
                let docs = self
                    .behaviour
                    .discovered
                    .iter()
                    .map(|id| {
                        let mut builder = DocumentBuilder::new();
                        builder.add("_id", id.as_str()).add("up", 330);
                        builder.build()
                    })
                    .collect();
                Ok(Reply::new(0, docs))
            }
            "$cmd" => {
                self.commands.lock().push(query.query.clone());
                tokio::time::sleep(self.behaviour.ping_delay).await;
                let mut builder = DocumentBuilder::new();
                if self.behaviour.ping_fails {
                    builder.add("ok", 0.0).add("errmsg", "not master");
                } else {
                    builder.add("ismaster", true).add("msg", "isdbgrid");
                    if !self.behaviour.tags.is_empty() {
                        let mut tags = builder.push("tags");
                        for (k, v) in &self.behaviour.tags {
                            tags = tags.add(k.as_str(), v.as_str());
                        }
                    }
                    builder.add("ok", 1.0);
                }
                Ok(Reply::new(0, vec![builder.build()]))
            }
            _ => Ok(Reply::new(0, vec![Document::new()])),
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    async fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::Release);
        Ok(())
    }
}

/// Factory whose servers follow [`MockServer`] scripts
#[derive(Default)]
pub(crate) struct MockFactory {
    servers: Mutex<HashMap<String, MockServer>>,
    connects: Mutex<Vec<String>>,
    commands: Arc<Mutex<Vec<Document>>>,
    closed: AtomicBool,
    close_fails: bool,
}

impl MockFactory {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_server(self, address: &str, behaviour: MockServer) -> Self {
        self.set_server(address, behaviour);
        self
    }

    pub(crate) fn close_fails(mut self) -> Self {
        self.close_fails = true;
        self
    }

    /// Replace a server's script while the factory is in use
    pub(crate) fn set_server(&self, address: &str, behaviour: MockServer) {
        self.servers.lock().insert(address.to_string(), behaviour);
    }

    /// Addresses passed to `connect`, in call order
    pub(crate) fn connect_log(&self) -> Vec<String> {
        self.connects.lock().clone()
    }

    /// Command documents received by any connection, in arrival order
    pub(crate) fn commands(&self) -> Vec<Document> {
        self.commands.lock().clone()
    }

    pub(crate) fn connect_count(&self) -> usize {
        self.connects.lock().len()
    }

    pub(crate) fn clear_log(&self) {
        self.connects.lock().clear();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl ProxiedConnectionFactory for MockFactory {
    async fn connect(&self, server: &Server, _config: &ClientConfig) -> Result<Box<dyn Connection>> {
        let address = server.address().to_string();
        self.connects.lock().push(address.clone());

        let behaviour = self.servers.lock().get(&address).cloned();
        match behaviour {
            Some(behaviour) if !behaviour.unreachable => Ok(Box::new(MockConnection {
                address,
                behaviour,
                open: AtomicBool::new(true),
                commands: Arc::clone(&self.commands),
            })),
            _ => Err(ConnectionError::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("connection refused: {}", address),
            ))),
        }
    }

    fn reconnect_strategy(&self) -> Box<dyn ReconnectStrategy> {
        Box::new(LatencyReconnectStrategy::new(ClientConfig::default()))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        if self.close_fails {
            return Err(ConnectionError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "close failed",
            )));
        }
        Ok(())
    }
}
