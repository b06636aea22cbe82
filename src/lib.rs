//! Client driver for the OrientDB binary protocol.
//!
//! A [`Connection`] pipelines requests over one socket; a [`ConnectionPool`]
//! spreads them over several; [`BinaryClient`] wraps either behind typed
//! server and database calls. Records and their CSV form live in the
//! `orientdb_record` crate, re-exported here as [`record`].

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod pool;
pub mod protocol;
pub mod transport;

pub use orientdb_record as record;

pub use client::BinaryClient;
pub use config::ClientConfig;
pub use connection::{Connection, ConnectionEvent, ConnectionState, SessionMetadata};
pub use error::{ConnectionErrorKind, DriverError, DriverResult, ServerError};
pub use pool::{ConnectionPool, PooledConnection};
pub use protocol::{CommandRequest, CommandResult, Record, Request, Response, Transaction};
pub use transport::Transport;
pub use orientdb_record::{Document, Rid, RidBag, Value};
