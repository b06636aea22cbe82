use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::connection::{Connection, ConnectionEvent};
use crate::error::DriverResult;
use crate::protocol::{Request, Response};

/// Anything that can carry requests to a server: one connection or a pool.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: Request) -> DriverResult<Response>;

    async fn close(&self);

    fn events(&self) -> broadcast::Receiver<ConnectionEvent>;
}

#[async_trait]
impl Transport for Connection {
    async fn send(&self, request: Request) -> DriverResult<Response> {
        Connection::send(self, request).await
    }

    async fn close(&self) {
        Connection::close(self).await
    }

    fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        Connection::events(self)
    }
}
