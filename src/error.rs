use std::fmt;
use std::time::Duration;

use orientdb_record::RecordError;
use thiserror::Error;

/// Why a connection stopped. The discriminants match the close codes
/// reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionErrorKind {
    /// The server closed the socket.
    RemoteClosed = 1,
    /// Socket-level failure: refused, reset, DNS.
    Network = 2,
    /// Closed locally, by `close()` or a `DbClose` request.
    Closed = 3,
}

impl ConnectionErrorKind {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for ConnectionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionErrorKind::RemoteClosed => write!(f, "remote closed"),
            ConnectionErrorKind::Network => write!(f, "network error"),
            ConnectionErrorKind::Closed => write!(f, "closed"),
        }
    }
}

/// A decoded server error chain.
///
/// `class` and `message` describe the entry last read off the wire; `prev`
/// walks back towards the first one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    pub class: String,
    pub message: String,
    pub prev: Option<Box<ServerError>>,
    pub trace: Option<Vec<u8>>,
}

impl ServerError {
    pub fn new(class: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            message: message.into(),
            prev: None,
            trace: None,
        }
    }

    /// Iterate the chain starting at this entry.
    pub fn chain(&self) -> impl Iterator<Item = &ServerError> {
        std::iter::successors(Some(self), |e| e.prev.as_deref())
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.class.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.class, self.message)
        }
    }
}

impl std::error::Error for ServerError {}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DriverError {
    #[error("Connection error ({kind}): {message}")]
    Connection {
        kind: ConnectionErrorKind,
        message: String,
    },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Unsupported protocol version {0}")]
    UnsupportedProtocol(i16),

    #[error("Server error: {0}")]
    Request(ServerError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] RecordError),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Client error: {0}")]
    Client(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl DriverError {
    pub fn connection(kind: ConnectionErrorKind, message: impl Into<String>) -> Self {
        DriverError::Connection {
            kind,
            message: message.into(),
        }
    }

    pub fn closed() -> Self {
        Self::connection(ConnectionErrorKind::Closed, "connection closed")
    }

    /// True when the error took the whole connection down with it.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            DriverError::Connection { .. }
                | DriverError::Protocol(_)
                | DriverError::UnsupportedProtocol(_)
        )
    }

    /// True when the same request may be resent on the same connection.
    pub fn is_retryable_on_same_connection(&self) -> bool {
        matches!(self, DriverError::Request(_) | DriverError::Timeout(_))
    }

    pub fn server_error(&self) -> Option<&ServerError> {
        match self {
            DriverError::Request(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ServerError> for DriverError {
    fn from(e: ServerError) -> Self {
        DriverError::Request(e)
    }
}

impl From<std::io::Error> for DriverError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind;
        let kind = match e.kind() {
            ErrorKind::UnexpectedEof | ErrorKind::ConnectionAborted => {
                ConnectionErrorKind::RemoteClosed
            }
            _ => ConnectionErrorKind::Network,
        };
        DriverError::connection(kind, e.to_string())
    }
}

pub type DriverResult<T> = Result<T, DriverError>;
