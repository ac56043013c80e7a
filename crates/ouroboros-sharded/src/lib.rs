//! Sharded cluster connections
//!
//! A [`ShardedConnectionFactory`] tracks a set of `mongos` routers: it seeds
//! them from [`ClientConfig::servers`], discovers the rest from the
//! `config.mongos` collection and keeps a latency average for each one with
//! a background [`ClusterPinger`]. [`ConnectionFactory::connect`] then opens a
//! connection to the fastest reachable router.
//!
//! Transport is pluggable through [`ProxiedConnectionFactory`];
//! [`TcpConnectionFactory`] speaks OP_QUERY/OP_REPLY over tokio TCP streams.
//!
//! ```no_run
//! use std::sync::Arc;
//! use ouroboros_sharded::{ClientConfig, ConnectionFactory, ShardedConnectionFactory, TcpConnectionFactory};
//!
//! # async fn run() -> ouroboros_sharded::Result<()> {
//! let config = ClientConfig::new(["mongos-1:27017", "mongos-2:27017"]);
//! let tcp = Arc::new(TcpConnectionFactory::new(config.clone()));
//! let factory = ShardedConnectionFactory::new(tcp, config).await;
//! let conn = factory.connect().await?;
//! println!("connected to {}", conn.server_address());
//! factory.close().await;
//! # Ok(())
//! # }
//! ```

pub mod cluster;
pub mod config;
pub mod connection;
pub mod error;
pub mod factory;
pub mod message;
pub mod pinger;
pub mod reconnect;
pub mod reply;
pub mod selector;
pub mod server;

#[cfg(test)]
mod testing;

pub use cluster::Cluster;
pub use config::{ClientConfig, DEFAULT_MAX_MESSAGE_SIZE};
pub use connection::{
    ClusterType, Connection, ConnectionFactory, ProxiedConnectionFactory, TcpConnection,
    TcpConnectionFactory,
};
pub use error::{ConnectionError, ReplyError, Result};
pub use factory::{ShardedConnection, ShardedConnectionFactory};
pub use message::{MessageHeader, OpCode, Query, ReadPreference, Reply};
pub use pinger::ClusterPinger;
pub use reconnect::{LatencyReconnectStrategy, ReconnectStrategy};
pub use reply::{as_error, check_reply};
pub use selector::{LatencyServerSelector, ServerSelector};
pub use server::{normalize_address, Server, ServerSnapshot, ServerStatus, DEFAULT_PORT};
