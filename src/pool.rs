//! Fixed-size connection pool.
//!
//! Slots are filled lazily. `acquire` walks the slots round-robin, replaces a
//! connection that has closed with a fresh one and waits for it to be ready.

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

use crate::config::ClientConfig;
use crate::connection::{Connection, ConnectionEvent};
use crate::error::{DriverError, DriverResult};
use crate::protocol::{Request, Response};
use crate::transport::Transport;

const EVENT_CAPACITY: usize = 256;

/// Builds a connection for a slot. Events go to the shared pool channel.
pub type Connector =
    Arc<dyn Fn(&ClientConfig, broadcast::Sender<ConnectionEvent>) -> Connection + Send + Sync>;

struct Slot {
    connection: Mutex<Option<Connection>>,
    leases: AtomicUsize,
}

pub struct ConnectionPool {
    config: ClientConfig,
    slots: Vec<Slot>,
    next_index: AtomicUsize,
    events: broadcast::Sender<ConnectionEvent>,
    connector: Connector,
    closed: AtomicBool,
}

impl ConnectionPool {
    pub fn new(config: ClientConfig) -> DriverResult<Self> {
        Self::with_connector(
            config,
            Arc::new(|config: &ClientConfig, events: broadcast::Sender<ConnectionEvent>| {
                Connection::spawn(config, Some(events))
            }),
        )
    }

    pub fn with_connector(config: ClientConfig, connector: Connector) -> DriverResult<Self> {
        config.validate()?;
        let slots = (0..config.pool_size)
            .map(|_| Slot {
                connection: Mutex::new(None),
                leases: AtomicUsize::new(0),
            })
            .collect();
        Ok(Self {
            config,
            slots,
            next_index: AtomicUsize::new(0),
            events: broadcast::channel(EVENT_CAPACITY).0,
            connector,
            closed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn size(&self) -> usize {
        self.slots.len()
    }

    /// Connections currently handed out.
    pub fn leased(&self) -> usize {
        self.slots.iter().map(|s| s.leases.load(Ordering::Acquire)).sum()
    }

    /// Get a ready connection. The lease ends when the guard is dropped or
    /// passed to [`release`](Self::release).
    pub async fn acquire(&self) -> DriverResult<PooledConnection<'_>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DriverError::closed());
        }
        let index = self.next_index.fetch_add(1, Ordering::Relaxed) % self.slots.len();
        let slot = &self.slots[index];

        let connection = {
            let mut current = slot.connection.lock();
            match current.as_ref() {
                Some(conn) if !conn.is_closed() => conn.clone(),
                _ => {
                    debug!("ConnectionPool: opening slot {}", index);
                    let conn = (self.connector)(&self.config, self.events.clone());
                    *current = Some(conn.clone());
                    conn
                }
            }
        };

        connection.ready().await?;
        slot.leases.fetch_add(1, Ordering::AcqRel);
        Ok(PooledConnection {
            connection,
            slot,
        })
    }

    pub fn release(&self, connection: PooledConnection<'_>) {
        drop(connection);
    }

    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let connections: Vec<Connection> = self
            .slots
            .iter()
            .filter_map(|slot| slot.connection.lock().take())
            .collect();
        join_all(connections.iter().map(Connection::close)).await;
    }

    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }
}

/// A leased connection.
pub struct PooledConnection<'a> {
    connection: Connection,
    slot: &'a Slot,
}

impl std::fmt::Debug for PooledConnection<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PooledConnection").field(&self.connection).finish()
    }
}

impl Deref for PooledConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.connection
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        self.slot.leases.fetch_sub(1, Ordering::AcqRel);
    }
}

#[async_trait]
impl Transport for ConnectionPool {
    async fn send(&self, request: Request) -> DriverResult<Response> {
        let conn = self.acquire().await?;
        conn.send(request).await
    }

    async fn close(&self) {
        ConnectionPool::close(self).await
    }

    fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        ConnectionPool::events(self)
    }
}
