//! End-to-end tests over real TCP sockets
//!
//! The fake routers below speak just enough OP_QUERY/OP_REPLY to answer
//! `ismaster` and `config.mongos`. The last test needs a live `mongos`:
//!
//! ```bash
//! MONGOS_ADDR=localhost:27017 cargo test -p ouroboros-sharded -- --ignored
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ouroboros_bson::{DocumentBuilder, StringEncoderCache};
use ouroboros_sharded::message::read_frame;
use ouroboros_sharded::{
    ClientConfig, Connection, ConnectionFactory, Query, Reply, ServerStatus,
    ShardedConnectionFactory, TcpConnectionFactory,
};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

struct FakeRouter {
    address: String,
    queries: Arc<AtomicUsize>,
}

/// Start a router that lists `peers` (plus itself) in `config.mongos`
async fn spawn_router(peers: Vec<String>) -> FakeRouter {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let queries = Arc::new(AtomicUsize::new(0));

    let own = address.clone();
    let counter = Arc::clone(&queries);
    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                return;
            };
            let mut routers = vec![own.clone()];
            routers.extend(peers.iter().cloned());
            tokio::spawn(serve(socket, routers, Arc::clone(&counter)));
        }
    });

    FakeRouter { address, queries }
}

async fn serve(mut socket: TcpStream, routers: Vec<String>, queries: Arc<AtomicUsize>) {
    let cache = Arc::new(StringEncoderCache::default());
    while let Ok((header, body)) = read_frame(&mut socket, 1 << 20).await {
        queries.fetch_add(1, Ordering::SeqCst);
        let query = Query::decode(&body).unwrap();

        let documents = match query.namespace().as_str() {
            "config.mongos" => routers
                .iter()
                .map(|id| {
                    let mut builder = DocumentBuilder::new();
                    builder.add("_id", id.as_str()).add("ping", 0i64);
                    builder.build()
                })
                .collect(),
            "admin.$cmd" => {
                let mut builder = DocumentBuilder::new();
                builder
                    .add("ismaster", true)
                    .add("msg", "isdbgrid")
                    .add("ok", 1.0);
                vec![builder.build()]
            }
            other => {
                let mut builder = DocumentBuilder::new();
                builder.add("ok", 0.0).add("errmsg", format!("no such namespace {}", other));
                vec![builder.build()]
            }
        };

        let bytes = Reply::new(header.request_id, documents)
            .encode(header.request_id, Arc::clone(&cache), 1 << 20)
            .unwrap();
        if socket.write_all(&bytes).await.is_err() {
            return;
        }
    }
}

/// An address nothing listens on
async fn dead_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);
    address
}

fn config(seeds: &[&str]) -> ClientConfig {
    ClientConfig::new(seeds.iter().copied())
        .with_connect_timeout(Duration::from_secs(1))
        .with_ping_timeout(Duration::from_secs(1))
        .with_discovery_timeout(Duration::from_secs(2))
        .with_ping_interval(Duration::ZERO)
}

#[tokio::test]
async fn test_discovers_routers_over_tcp() {
    let second = spawn_router(vec![]).await;
    let dead = dead_address().await;
    let first = spawn_router(vec![second.address.clone(), dead.clone()]).await;

    let config = config(&[first.address.as_str()]);
    let tcp = Arc::new(TcpConnectionFactory::new(config.clone()));
    let factory = ShardedConnectionFactory::new(tcp, config).await;

    let cluster = factory.cluster();
    assert_eq!(cluster.len(), 3);
    assert_eq!(cluster.get(&first.address).unwrap().status(), ServerStatus::Reachable);
    assert_eq!(cluster.get(&second.address).unwrap().status(), ServerStatus::Reachable);
    assert_eq!(cluster.get(&dead).unwrap().status(), ServerStatus::Unreachable);
    assert!(second.queries.load(Ordering::SeqCst) >= 1);

    let conn = factory.connect().await.unwrap();
    assert!(conn.server_address() == first.address || conn.server_address() == second.address);

    let reply = conn.send(&Query::is_master()).await.unwrap();
    assert_eq!(reply.documents[0].get_str("msg"), Some("isdbgrid"));
    conn.close().await.unwrap();
    assert!(!conn.is_open());

    factory.close().await;
}

#[tokio::test]
async fn test_seed_failure_does_not_abort_bootstrap() {
    let dead = dead_address().await;
    let router = spawn_router(vec![]).await;

    let config = config(&[dead.as_str(), router.address.as_str()]);
    let tcp = Arc::new(TcpConnectionFactory::new(config.clone()));
    let factory = ShardedConnectionFactory::new(tcp, config).await;

    let conn = factory.connect().await.unwrap();
    assert_eq!(conn.server_address(), router.address);
    factory.close().await;
}

#[tokio::test]
async fn test_reconnect_moves_to_another_router() {
    let second = spawn_router(vec![]).await;
    let first = spawn_router(vec![second.address.clone()]).await;

    let config = config(&[first.address.as_str()]);
    let tcp = Arc::new(TcpConnectionFactory::new(config.clone()));
    let factory = ShardedConnectionFactory::new(tcp, config).await;

    let conn = factory.connect().await.unwrap();
    let strategy = factory.reconnect_strategy();
    let replacement = strategy.reconnect(conn.as_ref()).await.unwrap();
    assert_ne!(replacement.server_address(), conn.server_address());
    factory.close().await;
}

#[tokio::test]
#[ignore] // Requires a running mongos
async fn test_live_mongos() {
    let address = std::env::var("MONGOS_ADDR").unwrap_or_else(|_| "localhost:27017".to_string());
    let config = ClientConfig::new([address]);
    let tcp = Arc::new(TcpConnectionFactory::new(config.clone()));
    let factory = ShardedConnectionFactory::new(tcp, config).await;

    assert!(!factory.cluster().is_empty());
    let conn = factory.connect().await.unwrap();
    let reply = conn.send(&Query::is_master()).await.unwrap();
    assert!(ouroboros_sharded::check_reply(&reply).is_ok());
    factory.close().await;
}
