//! Connection capabilities and the TCP transport

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use ouroboros_bson::StringEncoderCache;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::{ConnectionError, Result};
use crate::message::{read_frame, Query, Reply};
use crate::reconnect::{LatencyReconnectStrategy, ReconnectStrategy};
use crate::server::Server;

/// Deployment shape a factory connects to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterType {
    Standalone,
    ReplicaSet,
    Sharded,
}

/// One logical connection to a server
#[async_trait]
pub trait Connection: Send + Sync {
    /// Normalised address of the server on the other end
    fn server_address(&self) -> &str;

    /// Send a query and wait for its reply
    async fn send(&self, query: &Query) -> Result<Reply>;

    fn is_open(&self) -> bool;

    async fn close(&self) -> Result<()>;
}

/// Opens physical connections to individual servers
#[async_trait]
pub trait ProxiedConnectionFactory: Send + Sync {
    async fn connect(&self, server: &Server, config: &ClientConfig) -> Result<Box<dyn Connection>>;

    /// A fresh, unconfigured strategy for re-establishing broken connections
    fn reconnect_strategy(&self) -> Box<dyn ReconnectStrategy>;

    async fn close(&self) -> Result<()>;
}

/// Top-level factory handed to clients
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Connection>>;

    fn cluster_type(&self) -> ClusterType;

    fn reconnect_strategy(&self) -> Box<dyn ReconnectStrategy>;

    /// Release background work and connections; never fails
    async fn close(&self);
}

/// A connection over a TCP stream
///
/// Requests are serialized on the stream: one query is written and its
/// reply read before the next query may start.
pub struct TcpConnection {
    address: String,
    stream: Mutex<TcpStream>,
    next_request_id: AtomicI32,
    open: AtomicBool,
    cache: Arc<StringEncoderCache>,
    max_message_size: usize,
}

impl TcpConnection {
    /// Connect to `address` within the configured connect timeout
    pub async fn connect(
        address: &str,
        config: &ClientConfig,
        cache: Arc<StringEncoderCache>,
    ) -> Result<Self> {
        let timeout = config.connect_timeout();
        let stream = tokio::time::timeout(timeout, TcpStream::connect(address))
            .await
            .map_err(|_| ConnectionError::Timeout(timeout))??;
        stream.set_nodelay(true)?;
        debug!(address = %address, "Connected");

        Ok(Self {
            address: address.to_string(),
            stream: Mutex::new(stream),
            next_request_id: AtomicI32::new(1),
            open: AtomicBool::new(true),
            cache,
            max_message_size: config.max_message_size,
        })
    }

    fn allocate_request_id(&self) -> i32 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }
}

#[async_trait]
impl Connection for TcpConnection {
    fn server_address(&self) -> &str {
        &self.address
    }

    async fn send(&self, query: &Query) -> Result<Reply> {
        if !self.is_open() {
            return Err(ConnectionError::Closed);
        }
        let request_id = self.allocate_request_id();
        let message = query.encode(request_id, Arc::clone(&self.cache), self.max_message_size)?;

        let mut stream = self.stream.lock().await;
        let exchange = async {
            stream.write_all(&message).await?;
            read_frame(&mut *stream, self.max_message_size).await
        };
        let (header, body) = match exchange.await {
            Ok(frame) => frame,
            Err(e) => {
                // The stream position is unknown after a partial exchange
                self.open.store(false, Ordering::Release);
                return Err(e);
            }
        };

        let reply = Reply::decode(&header, &body)?;
        if reply.response_to != request_id {
            self.open.store(false, Ordering::Release);
            return Err(ConnectionError::Protocol(format!(
                "Reply to request {} received while waiting for {}",
                reply.response_to, request_id
            )));
        }
        Ok(reply)
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    async fn close(&self) -> Result<()> {
        if !self.open.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        debug!(address = %self.address, "Closing connection");
        self.stream.lock().await.shutdown().await?;
        Ok(())
    }
}

/// Opens [`TcpConnection`]s, sharing one encoder string cache
pub struct TcpConnectionFactory {
    config: ClientConfig,
    cache: Arc<StringEncoderCache>,
}

impl TcpConnectionFactory {
    pub fn new(config: ClientConfig) -> Self {
        let cache = config.string_cache();
        Self { config, cache }
    }

    pub fn cache(&self) -> &Arc<StringEncoderCache> {
        &self.cache
    }
}

#[async_trait]
impl ProxiedConnectionFactory for TcpConnectionFactory {
    async fn connect(&self, server: &Server, config: &ClientConfig) -> Result<Box<dyn Connection>> {
        let conn = TcpConnection::connect(server.address(), config, Arc::clone(&self.cache)).await?;
        Ok(Box::new(conn))
    }

    fn reconnect_strategy(&self) -> Box<dyn ReconnectStrategy> {
        Box::new(LatencyReconnectStrategy::new(self.config.clone()))
    }

    async fn close(&self) -> Result<()> {
        debug!(
            cached_strings = self.cache.len(),
            cache_hits = self.cache.hits(),
            "TCP connection factory closed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageHeader, HEADER_LENGTH};
    use ouroboros_bson::{Document, Element};
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    /// Serve one connection: answer each query with `{ n : <request id> }`,
    /// optionally replying to the wrong request
    async fn spawn_echo_server(wrong_response_to: bool) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let cache = Arc::new(StringEncoderCache::default());
            loop {
                let mut raw = [0u8; HEADER_LENGTH];
                if socket.read_exact(&mut raw).await.is_err() {
                    return;
                }
                let header = MessageHeader::parse(&raw).unwrap();
                let mut body = vec![0u8; header.body_length()];
                socket.read_exact(&mut body).await.unwrap();
                let query = Query::decode(&body).unwrap();
                assert_eq!(query.database, "admin");

                let response_to = if wrong_response_to {
                    header.request_id + 100
                } else {
                    header.request_id
                };
                let doc = Document::from_elements(vec![Element::new("n", header.request_id)]);
                let bytes = Reply::new(response_to, vec![doc])
                    .encode(1, Arc::clone(&cache), usize::MAX)
                    .unwrap();
                socket.write_all(&bytes).await.unwrap();
            }
        });
        address
    }

    #[tokio::test]
    async fn test_request_ids_increase() {
        let address = spawn_echo_server(false).await;
        let factory = TcpConnectionFactory::new(ClientConfig::default());
        let conn = factory
            .connect(&Server::new(&address), &ClientConfig::default())
            .await
            .unwrap();

        let first = conn.send(&Query::is_master()).await.unwrap();
        let second = conn.send(&Query::is_master()).await.unwrap();
        assert_eq!(first.documents[0].get("n").and_then(|v| v.as_i32()), Some(1));
        assert_eq!(second.documents[0].get("n").and_then(|v| v.as_i32()), Some(2));

        conn.close().await.unwrap();
        assert!(!conn.is_open());
        assert!(matches!(
            conn.send(&Query::is_master()).await,
            Err(ConnectionError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_mismatched_reply_closes_connection() {
        let address = spawn_echo_server(true).await;
        let conn = TcpConnection::connect(
            &address,
            &ClientConfig::default(),
            Arc::new(StringEncoderCache::default()),
        )
        .await
        .unwrap();

        let err = conn.send(&Query::is_master()).await.unwrap_err();
        assert!(matches!(err, ConnectionError::Protocol(_)));
        assert!(!conn.is_open());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then drop to obtain a port nothing listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let factory = TcpConnectionFactory::new(ClientConfig::default());
        let result = factory
            .connect(&Server::new(&address), &ClientConfig::default())
            .await;
        assert!(matches!(result, Err(ConnectionError::Io(_))));
    }
}
