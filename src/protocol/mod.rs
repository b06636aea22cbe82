//! Binary protocol, version 28.
//!
//! Requests are written whole; responses are read incrementally by an
//! [`Operation`] as bytes arrive. The connection owns the socket and never
//! looks inside a frame itself.

pub mod codec;
pub mod operation;
pub mod request;
pub mod response;

pub use codec::{CodecError, Reader, Writer, MAX_MESSAGE_SIZE};
pub use operation::{Operation, ReadStatus};
pub use request::{
    serialize_params, CommandMode, CommandRequest, Credentials, RecordContent, Request,
    SessionHeader, Transaction, TxEntry,
};
pub use response::{
    ClusterDescriptor, ClusterInfo, CommandItem, CommandResult, CommitResult, ConfigEntry,
    ConfigList, OpenInfo, PushMessage, RawRecord, Record, Response, SessionInfo, TreeChange,
};

/// Oldest protocol version this driver speaks; the one it announces.
pub const PROTOCOL_VERSION: i16 = 28;

pub const SERIALIZATION_NAME: &str = orientdb_record::csv::SERIALIZATION_NAME;

pub const DATABASE_TYPE: &str = "graph";

pub const DEFAULT_STORAGE: &str = "plocal";

pub const DRIVER_NAME: &str = "orientdb-driver-rs";

pub const DRIVER_VERSION: &str = env!("CARGO_PKG_VERSION");
