//! Common test utilities for driver tests
//!
//! Provides an in-memory fake server on top of `tokio::io::duplex`:
//! - Sending the protocol version and accepting the session handshake
//! - Reading exact request frames
//! - Building response frames with the protocol writer

#![allow(dead_code)]

use orientdb_driver::protocol::{Request, SessionHeader, Writer};
use orientdb_driver::{ClientConfig, Connection, ConnectionEvent};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::broadcast;

pub const SESSION_ID: i32 = 77;
pub const TOKEN: &[u8] = b"token-1";

pub struct FakeServer {
    pub stream: DuplexStream,
    pub config: ClientConfig,
    pub header: SessionHeader,
}

impl FakeServer {
    /// Start a connection against a fresh fake server. The connection is
    /// left in NEGOTIATING until [`accept`](Self::accept) runs.
    pub fn start(config: ClientConfig) -> (Connection, FakeServer, broadcast::Receiver<ConnectionEvent>) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let events = broadcast::channel(64).0;
        let receiver = events.subscribe();
        let conn = Connection::with_stream(client, &config, Some(events));
        let header = SessionHeader {
            session_id: SESSION_ID,
            token: config.use_token.then(|| TOKEN.to_vec()),
            use_token: config.use_token,
        };
        (
            conn,
            FakeServer {
                stream: server,
                config,
                header,
            },
            receiver,
        )
    }

    pub async fn send_version(&mut self, version: i16) {
        self.write(&version.to_be_bytes()).await;
    }

    /// Send the version, check the handshake request and answer it.
    pub async fn accept(&mut self) {
        self.accept_with_server_document(None).await;
    }

    /// [`accept`](Self::accept), sending `document` as the server
    /// configuration of a database session.
    pub async fn accept_with_server_document(&mut self, document: Option<&str>) {
        self.send_version(28).await;
        let handshake = self.handshake_request();
        self.expect(&handshake).await;

        let mut w = Writer::new();
        w.byte(0).int(-1);
        w.int(SESSION_ID).bytes(self.header.token.as_deref());
        if self.config.database.is_some() {
            w.short(2)
                .string("internal")
                .short(0)
                .string("person")
                .short(9)
                .bytes(document.map(str::as_bytes))
                .string("3.0.0");
        }
        self.write(&w.finish()).await;
    }

    pub fn handshake_request(&self) -> Request {
        let credentials = self.config.credentials_for_handshake();
        match &self.config.database {
            Some(database) => Request::DbOpen {
                database: database.clone(),
                credentials,
            },
            None => Request::Connect(credentials),
        }
    }

    /// Read exactly the frame `request` encodes to under the open session.
    pub async fn expect(&mut self, request: &Request) {
        let expected = request.encode(&self.header);
        let actual = self.read_exact(expected.len()).await;
        assert_eq!(actual, expected, "unexpected {} frame", request.name());
    }

    pub async fn read_exact(&mut self, n: usize) -> Vec<u8> {
        let mut buf = vec![0u8; n];
        self.stream.read_exact(&mut buf).await.expect("read from client");
        buf
    }

    pub async fn write(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.expect("write to client");
        self.stream.flush().await.expect("flush to client");
    }

    /// Write one byte at a time.
    pub async fn trickle(&mut self, bytes: &[u8]) {
        for b in bytes {
            self.write(std::slice::from_ref(b)).await;
            tokio::task::yield_now().await;
        }
    }

    /// Start of a successful response: status, session id and token.
    pub fn ok(&self) -> Writer {
        let mut w = Writer::new();
        w.byte(0).int(SESSION_ID);
        if self.header.use_token {
            w.bytes(Some(&[][..]));
        }
        w
    }

    /// A complete error response with a two entry chain.
    pub fn error(&self, class: &str, message: &str) -> Vec<u8> {
        let mut w = Writer::new();
        w.byte(1).int(SESSION_ID);
        if self.header.use_token {
            w.bytes(Some(&[][..]));
        }
        w.byte(1)
            .string("com.orientechnologies.common.exception.OException")
            .string("root cause")
            .boolean(true)
            .string(class)
            .string(message)
            .boolean(false)
            .bytes(None);
        w.finish()
    }
}

pub fn database_config() -> ClientConfig {
    ClientConfig::default()
        .credentials("admin", "admin")
        .database("demo")
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
