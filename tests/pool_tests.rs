//! Connection Pool Tests
//!
//! Round-robin leasing, replacement of closed connections and the
//! transport-level send path, with each slot backed by a fake server.

mod common;

use std::sync::Arc;

use common::{database_config, FakeServer, SESSION_ID};
use orientdb_driver::pool::Connector;
use orientdb_driver::protocol::{Request, Response, SessionHeader};
use orientdb_driver::{ClientConfig, Connection, ConnectionEvent, ConnectionPool, Transport};
use tokio::io::{AsyncReadExt, DuplexStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

/// A pool whose connector dials in-memory servers. Every server accepts the
/// session and answers `DbSize` requests with its own index.
fn fake_pool(config: ClientConfig) -> (ConnectionPool, JoinHandle<()>) {
    let (dialed_tx, mut dialed_rx) = mpsc::unbounded_channel::<DuplexStream>();
    let connector: Connector = Arc::new(move |config: &ClientConfig, events: broadcast::Sender<ConnectionEvent>| {
        let (client, server) = tokio::io::duplex(16 * 1024);
        let _ = dialed_tx.send(server);
        Connection::with_stream(client, config, Some(events))
    });

    let server_config = config.clone();
    let servers = tokio::spawn(async move {
        let mut index = 0i64;
        while let Some(stream) = dialed_rx.recv().await {
            index += 1;
            let mut server = FakeServer {
                stream,
                config: server_config.clone(),
                header: SessionHeader {
                    session_id: SESSION_ID,
                    token: None,
                    use_token: false,
                },
            };
            tokio::spawn(async move {
                server.accept().await;
                let frame = Request::DbSize.encode(&server.header);
                let mut buf = vec![0u8; frame.len()];
                while server.stream.read_exact(&mut buf).await.is_ok() {
                    assert_eq!(buf, frame);
                    let mut w = server.ok();
                    w.long(index);
                    server.write(&w.finish()).await;
                }
            });
        }
    });

    let pool = ConnectionPool::with_connector(config, connector).unwrap();
    (pool, servers)
}

#[tokio::test]
async fn test_round_robin_leases() {
    let (pool, _servers) = fake_pool(database_config().pool_size(2));
    assert_eq!(pool.size(), 2);

    let a = pool.acquire().await.unwrap();
    let b = pool.acquire().await.unwrap();
    assert_ne!(a.id(), b.id());
    assert_eq!(pool.leased(), 2);

    pool.release(a);
    drop(b);
    assert_eq!(pool.leased(), 0);

    let again = pool.acquire().await.unwrap();
    assert!(again.is_ready());
}

#[tokio::test]
async fn test_closed_connection_is_replaced() {
    let (pool, _servers) = fake_pool(database_config().pool_size(1));

    let first_id = {
        let conn = pool.acquire().await.unwrap();
        let id = conn.id();
        conn.close().await;
        id
    };

    let replacement = pool.acquire().await.unwrap();
    assert_ne!(replacement.id(), first_id);
    assert!(replacement.is_ready());
}

#[tokio::test]
async fn test_pool_as_transport() {
    let (pool, _servers) = fake_pool(database_config().pool_size(2));
    let transport: Arc<dyn Transport> = Arc::new(pool);
    let mut events = transport.events();

    let first = transport.send(Request::DbSize).await.unwrap();
    let second = transport.send(Request::DbSize).await.unwrap();
    let mut answers = vec![first, second];
    answers.sort_by_key(|r| match r {
        Response::Long(n) => *n,
        _ => 0,
    });
    assert_eq!(answers, vec![Response::Long(1), Response::Long(2)]);
    assert!(events.try_recv().is_ok(), "ready events reach pool subscribers");

    transport.close().await;
    assert!(transport.send(Request::DbSize).await.is_err());
}
