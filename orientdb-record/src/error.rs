//! Error types for orientdb-record.
//!
//! Serialization errors are local: they belong to the caller that asked for
//! the (de)serialization and never touch connection state.

use thiserror::Error;

/// Record model error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordError {
    #[error("Invalid record id: {0}")]
    InvalidRid(String),

    #[error("Malformed record: {0}")]
    Malformed(String),

    #[error("Invalid RID bag: {0}")]
    InvalidBag(String),

    #[error("Invalid date: {0}")]
    InvalidDate(String),

    #[error("Invalid JSON record: {0}")]
    InvalidJson(String),
}

/// Result type for record operations
pub type RecordResult<T> = Result<T, RecordError>;

impl serde::Serialize for RecordError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}
