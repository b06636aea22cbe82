//! A single pipelined connection.
//!
//! Each connection is served by one background task that owns the socket.
//! Callers hand it requests over a channel; the task writes each request in
//! one piece, appends its [`Operation`] to the pending queue and feeds
//! incoming bytes to the head of that queue. Responses carry no request id,
//! so queue order is the only thing tying a response to its caller.
//!
//! ```text
//! DISCONNECTED -> CONNECTING -> NEGOTIATING -> READY
//!                 (dialing)     (version, then Connect / DbOpen)
//! ```
//!
//! Requests submitted before READY are held back and written, in order, once
//! the session is open.

use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use orientdb_record::Document;
use parking_lot::RwLock;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::{ConnectionErrorKind, DriverError, DriverResult};
use crate::protocol::{
    ClusterInfo, Operation, PushMessage, ReadStatus, Request, Response, SessionHeader,
    SessionInfo, MAX_MESSAGE_SIZE, PROTOCOL_VERSION,
};

const READ_CHUNK: usize = 16 * 1024;
const EVENT_CAPACITY: usize = 64;

static NEXT_CONNECTION_ID: AtomicUsize = AtomicUsize::new(1);

/// Byte streams a connection can run over.
pub trait DriverStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send + 'static> DriverStream for T {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Negotiating,
    Ready,
}

/// What the session handshake reported.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionMetadata {
    pub session: SessionInfo,
    /// Clusters of the opened database; empty for server sessions.
    pub clusters: Vec<ClusterInfo>,
    pub server: Option<Document>,
    pub release: Option<String>,
}

impl SessionMetadata {
    fn from_response(response: Response) -> DriverResult<Self> {
        match response {
            Response::Session(session) => Ok(Self {
                session,
                clusters: Vec::new(),
                server: None,
                release: None,
            }),
            Response::Open(open) => Ok(Self {
                session: open.session,
                clusters: open.clusters,
                server: open.server,
                release: open.release,
            }),
            other => Err(DriverError::Protocol(format!(
                "unexpected {} response to session handshake",
                other.kind()
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    Ready {
        connection: usize,
        metadata: SessionMetadata,
    },
    /// Out-of-band configuration pushed by the server.
    ConfigUpdate {
        connection: usize,
        message: PushMessage,
    },
    Closed {
        connection: usize,
        error: DriverError,
    },
}

enum Envelope {
    Request {
        request: Request,
        reply: oneshot::Sender<DriverResult<Response>>,
    },
    Close,
}

struct Shared {
    metadata: RwLock<Option<SessionMetadata>>,
    closed: RwLock<Option<DriverError>>,
}

/// Handle to a connection task. Clones share the same socket.
#[derive(Clone)]
pub struct Connection {
    id: usize,
    tx: mpsc::UnboundedSender<Envelope>,
    state: watch::Receiver<ConnectionState>,
    events: broadcast::Sender<ConnectionEvent>,
    shared: Arc<Shared>,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

impl Connection {
    /// Dial the configured server and wait until the session is open.
    pub async fn connect(config: &ClientConfig) -> DriverResult<Self> {
        let conn = Self::spawn(config, None);
        conn.ready().await?;
        Ok(conn)
    }

    /// Start dialing in the background. Requests may be sent right away.
    pub fn spawn(config: &ClientConfig, events: Option<broadcast::Sender<ConnectionEvent>>) -> Self {
        let address = config.address();
        Self::start(config, events, async move {
            let stream = TcpStream::connect(&address).await?;
            stream.set_nodelay(true)?;
            Ok(stream)
        })
    }

    /// Run over an already established stream.
    pub fn with_stream<S: DriverStream>(
        stream: S,
        config: &ClientConfig,
        events: Option<broadcast::Sender<ConnectionEvent>>,
    ) -> Self {
        Self::start(config, events, async move { Ok(stream) })
    }

    fn start<S, F>(
        config: &ClientConfig,
        events: Option<broadcast::Sender<ConnectionEvent>>,
        dial: F,
    ) -> Self
    where
        S: DriverStream,
        F: Future<Output = io::Result<S>> + Send + 'static,
    {
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let events = events.unwrap_or_else(|| broadcast::channel(EVENT_CAPACITY).0);
        let shared = Arc::new(Shared {
            metadata: RwLock::new(None),
            closed: RwLock::new(None),
        });

        let handshake = match &config.database {
            Some(database) => Request::DbOpen {
                database: database.clone(),
                credentials: config.credentials_for_handshake(),
            },
            None => Request::Connect(config.credentials_for_handshake()),
        };

        let worker = Worker {
            id,
            rx,
            state: state_tx,
            events: events.clone(),
            shared: shared.clone(),
            handshake: Some(handshake),
            header: SessionHeader::anonymous(config.use_token),
            held: Vec::new(),
            queue: VecDeque::new(),
            idle: Operation::idle(),
            buffer: Vec::new(),
            closing: false,
        };
        tokio::spawn(worker.run(dial));

        Self {
            id,
            tx,
            state: state_rx,
            events,
            shared,
            timeout: config.request_timeout_duration(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Disconnected
    }

    pub fn metadata(&self) -> Option<SessionMetadata> {
        self.shared.metadata.read().clone()
    }

    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    fn closed_error(&self) -> DriverError {
        self.shared.closed.read().clone().unwrap_or_else(DriverError::closed)
    }

    /// Wait for the session handshake.
    pub async fn ready(&self) -> DriverResult<SessionMetadata> {
        let mut state = self.state.clone();
        loop {
            match *state.borrow_and_update() {
                ConnectionState::Ready => {
                    if let Some(metadata) = self.metadata() {
                        return Ok(metadata);
                    }
                }
                ConnectionState::Disconnected => return Err(self.closed_error()),
                _ => {}
            }
            if state.changed().await.is_err() {
                return Err(self.closed_error());
            }
        }
    }

    /// Send a request and wait for its response. The connection's session id
    /// and token are filled in.
    pub async fn send(&self, request: Request) -> DriverResult<Response> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(Envelope::Request { request, reply })
            .map_err(|_| self.closed_error())?;

        let wait = async { response.await.unwrap_or_else(|_| Err(self.closed_error())) };
        match self.timeout {
            // The queue slot stays; the late response is read and dropped.
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .unwrap_or(Err(DriverError::Timeout(limit))),
            None => wait.await,
        }
    }

    /// Close the socket, failing anything still pending.
    pub async fn close(&self) {
        if self.tx.send(Envelope::Close).is_ok() {
            let mut state = self.state.clone();
            while *state.borrow_and_update() != ConnectionState::Disconnected {
                if state.changed().await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Who is waiting on a queued operation.
enum Waiter {
    Caller(oneshot::Sender<DriverResult<Response>>),
    Handshake,
}

enum Event {
    Envelope(Option<Envelope>),
    Read(io::Result<usize>),
}

struct Pending {
    operation: Operation,
    waiter: Waiter,
}

struct Worker {
    id: usize,
    rx: mpsc::UnboundedReceiver<Envelope>,
    state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<ConnectionEvent>,
    shared: Arc<Shared>,
    handshake: Option<Request>,
    header: SessionHeader,
    /// Requests submitted before the session was ready.
    held: Vec<(Request, oneshot::Sender<DriverResult<Response>>)>,
    queue: VecDeque<Pending>,
    idle: Operation,
    buffer: Vec<u8>,
    /// Set once a `DbClose` went out; the server hangs up in response.
    closing: bool,
}

impl Worker {
    async fn run<S, F>(mut self, dial: F)
    where
        S: DriverStream,
        F: Future<Output = io::Result<S>>,
    {
        let dialed = tokio::select! {
            dialed = dial => Some(dialed),
            _ = self.wait_close_while_dialing() => None,
        };
        let stream = match dialed {
            Some(Ok(stream)) => stream,
            Some(Err(e)) => {
                self.fail(DriverError::connection(ConnectionErrorKind::Network, e.to_string()));
                return;
            }
            None => {
                self.fail(DriverError::closed());
                return;
            }
        };

        debug!("Connection #{}: negotiating", self.id);
        self.state.send_replace(ConnectionState::Negotiating);

        let (mut reader, mut writer) = tokio::io::split(stream);
        let mut chunk = vec![0u8; READ_CHUNK];

        let error = loop {
            let event = tokio::select! {
                envelope = self.rx.recv() => Event::Envelope(envelope),
                read = reader.read(&mut chunk) => Event::Read(read),
            };
            match event {
                Event::Envelope(Some(Envelope::Request { request, reply })) => {
                    if let Err(e) = self.submit(request, reply, &mut writer).await {
                        break e;
                    }
                }
                Event::Envelope(Some(Envelope::Close)) | Event::Envelope(None) => {
                    let _ = writer.shutdown().await;
                    break DriverError::closed();
                }
                Event::Read(Ok(0)) => {
                    let kind = if self.closing {
                        ConnectionErrorKind::Closed
                    } else {
                        ConnectionErrorKind::RemoteClosed
                    };
                    break DriverError::connection(kind, "connection closed by server");
                }
                Event::Read(Ok(n)) => {
                    self.buffer.extend_from_slice(&chunk[..n]);
                    if let Err(e) = self.drain(&mut writer).await {
                        break e;
                    }
                }
                Event::Read(Err(e)) => {
                    break DriverError::connection(ConnectionErrorKind::Network, e.to_string())
                }
            }
        };
        self.fail(error);
    }

    /// Hold requests that arrive while dialing; return when asked to close.
    async fn wait_close_while_dialing(&mut self) {
        loop {
            match self.rx.recv().await {
                Some(Envelope::Request { request, reply }) => self.held.push((request, reply)),
                Some(Envelope::Close) | None => return,
            }
        }
    }

    fn ready(&self) -> bool {
        *self.state.borrow() == ConnectionState::Ready
    }

    async fn submit<W: AsyncWrite + Unpin>(
        &mut self,
        request: Request,
        reply: oneshot::Sender<DriverResult<Response>>,
        writer: &mut W,
    ) -> DriverResult<()> {
        if !self.ready() {
            self.held.push((request, reply));
            return Ok(());
        }
        write_frame(writer, &request.encode(&self.header)).await?;
        debug!("Connection #{}: sent {}", self.id, request.name());

        if request.expects_response() {
            self.queue.push_back(Pending {
                operation: Operation::new(&request, self.header.use_token),
                waiter: Waiter::Caller(reply),
            });
        } else {
            self.closing = matches!(request, Request::DbClose) || self.closing;
            let _ = reply.send(Ok(Response::Unit));
        }
        Ok(())
    }

    async fn drain<W: AsyncWrite + Unpin>(&mut self, writer: &mut W) -> DriverResult<()> {
        if let Some(handshake) = self.handshake.take() {
            if self.buffer.len() < 2 {
                self.handshake = Some(handshake);
                return Ok(());
            }
            let version = i16::from_be_bytes([self.buffer[0], self.buffer[1]]);
            self.buffer.drain(..2);
            if version < PROTOCOL_VERSION {
                return Err(DriverError::UnsupportedProtocol(version));
            }
            debug!("Connection #{}: server protocol {}", self.id, version);

            write_frame(writer, &handshake.encode(&self.header)).await?;
            self.queue.push_front(Pending {
                operation: Operation::new(&handshake, self.header.use_token),
                waiter: Waiter::Handshake,
            });
        }

        while !self.buffer.is_empty() {
            let Some(head) = self.queue.front_mut() else {
                let (status, used) = self.idle.consume(&self.buffer)?;
                self.buffer.drain(..used);
                match status {
                    ReadStatus::PushData(message) => self.publish_push(message),
                    _ => break,
                }
                continue;
            };

            let (status, used) = head.operation.consume(&self.buffer)?;
            self.buffer.drain(..used);
            let outcome = match status {
                ReadStatus::Continue => break,
                ReadStatus::PushData(message) => {
                    self.publish_push(message);
                    continue;
                }
                ReadStatus::Complete(response) => Ok(response),
                ReadStatus::Error(e) => Err(DriverError::Request(e)),
                ReadStatus::Failed(e) => Err(e),
            };

            let Some(done) = self.queue.pop_front() else {
                break;
            };
            match done.waiter {
                Waiter::Caller(reply) => {
                    if reply.send(outcome).is_err() {
                        debug!(
                            "Connection #{}: dropped {} response, caller gone",
                            self.id,
                            done.operation.name()
                        );
                    }
                }
                Waiter::Handshake => self.session_opened(outcome?, writer).await?,
            }
        }
        if self.buffer.len() > MAX_MESSAGE_SIZE {
            return Err(DriverError::Protocol(format!(
                "unread response exceeds {} bytes",
                MAX_MESSAGE_SIZE
            )));
        }
        Ok(())
    }

    async fn session_opened<W: AsyncWrite + Unpin>(
        &mut self,
        response: Response,
        writer: &mut W,
    ) -> DriverResult<()> {
        let metadata = SessionMetadata::from_response(response)?;
        self.header.session_id = metadata.session.session_id;
        self.header.token = metadata.session.token.clone();
        *self.shared.metadata.write() = Some(metadata.clone());
        self.state.send_replace(ConnectionState::Ready);
        info!(
            "Connection #{}: session {} open",
            self.id, metadata.session.session_id
        );
        let _ = self.events.send(ConnectionEvent::Ready {
            connection: self.id,
            metadata,
        });

        for (request, reply) in std::mem::take(&mut self.held) {
            self.submit(request, reply, writer).await?;
        }
        Ok(())
    }

    fn publish_push(&self, message: PushMessage) {
        debug!(
            "Connection #{}: push data, command {}",
            self.id, message.command
        );
        let _ = self.events.send(ConnectionEvent::ConfigUpdate {
            connection: self.id,
            message,
        });
    }

    /// Tear down: every waiting caller sees the same error.
    fn fail(&mut self, error: DriverError) {
        match &error {
            DriverError::Connection {
                kind: ConnectionErrorKind::Closed,
                ..
            } => debug!("Connection #{}: closed", self.id),
            other => warn!("Connection #{}: {}", self.id, other),
        }
        *self.shared.closed.write() = Some(error.clone());

        for pending in self.queue.drain(..) {
            if let Waiter::Caller(reply) = pending.waiter {
                let _ = reply.send(Err(error.clone()));
            }
        }
        for (_, reply) in self.held.drain(..) {
            let _ = reply.send(Err(error.clone()));
        }
        self.rx.close();
        while let Ok(envelope) = self.rx.try_recv() {
            if let Envelope::Request { reply, .. } = envelope {
                let _ = reply.send(Err(error.clone()));
            }
        }

        self.state.send_replace(ConnectionState::Disconnected);
        let _ = self.events.send(ConnectionEvent::Closed {
            connection: self.id,
            error,
        });
    }
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &[u8]) -> DriverResult<()> {
    writer
        .write_all(frame)
        .await
        .map_err(|e| DriverError::connection(ConnectionErrorKind::Network, format!("write failed: {}", e)))?;
    writer
        .flush()
        .await
        .map_err(|e| DriverError::connection(ConnectionErrorKind::Network, format!("flush failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dial_failure_rejects_held_requests() {
        let config = ClientConfig::new("127.0.0.1", 1);
        let conn = Connection::spawn(&config, None);
        let err = conn.send(Request::DbSize).await.unwrap_err();
        assert!(err.is_connection_fatal());
        assert!(conn.ready().await.is_err());
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn test_close_before_ready() {
        let (client, _server) = tokio::io::duplex(64);
        let conn = Connection::with_stream(client, &ClientConfig::default(), None);
        conn.close().await;
        assert!(conn.is_closed());
        let err = conn.send(Request::DbSize).await.unwrap_err();
        assert!(matches!(
            err,
            DriverError::Connection { kind: ConnectionErrorKind::Closed, .. }
        ));
    }
}
