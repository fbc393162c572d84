//! Error types for Opstray.
//!
//! All errors in Opstray are represented by the `OpstrayError` enum,
//! which provides specific variants for different error categories.

use std::{io::ErrorKind, string::FromUtf8Error};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for all Opstray operations.
///
/// Each variant represents a specific category of error that can occur
/// during tree expansion, job supervision, or renewal scheduling. All
/// variants are recoverable and local; none terminates the engine.
#[derive(Deserialize, Serialize, Error, Debug, Clone, PartialEq)]
pub enum OpstrayError {
    /// Engine-level errors (startup, shutdown, worker pool exhaustion).
    #[error("{0}")]
    Engine(String),

    /// Configuration parsing or validation errors. A rejected
    /// reconfiguration leaves the prior valid configuration in effect.
    #[error("{0}")]
    Config(String),

    /// Data conversion errors (JSON documents, listings).
    #[error("{0}")]
    Convert(String),

    /// Network or backend failure while fetching a node's children.
    /// Surfaced to the node as the Failed children state.
    #[error("backend: {backend}, message: {message}")]
    Fetch {
        backend: String,
        message: String,
    },

    /// Malformed or missing schema document. The affected node stays a
    /// leaf with an error marker instead of expanding.
    #[error("{0}")]
    Schema(String),

    /// Tree bookkeeping errors (unknown node, superseded expansion).
    #[error("{0}")]
    Tree(String),

    /// A job target is already occupied by a running job.
    #[error("{0}")]
    Conflict(String),

    /// A cancelled job failed to terminate within the grace period.
    #[error("{0}")]
    Timeout(String),

    /// Job lifecycle errors.
    #[error("{0}")]
    Job(String),

    /// Renewal scheduling errors.
    #[error("{0}")]
    Renewal(String),

    /// I/O operation errors.
    #[error("{0}")]
    IoError(String),

    /// Message queue errors.
    #[error("{0}")]
    Queue(String),
}

impl From<OpstrayError> for String {
    fn from(val: OpstrayError) -> Self {
        val.to_string()
    }
}

impl From<std::io::Error> for OpstrayError {
    fn from(error: std::io::Error) -> Self {
        OpstrayError::IoError(error.to_string())
    }
}

impl From<OpstrayError> for std::io::Error {
    fn from(val: OpstrayError) -> Self {
        #[allow(clippy::io_other_error)]
        std::io::Error::new(ErrorKind::Other, val.to_string())
    }
}

impl From<FromUtf8Error> for OpstrayError {
    fn from(_: FromUtf8Error) -> Self {
        OpstrayError::Convert("Error with utf-8 string convert".to_string())
    }
}

impl From<serde_json::Error> for OpstrayError {
    fn from(error: serde_json::Error) -> Self {
        OpstrayError::Convert(error.to_string())
    }
}

impl From<jsonschema::ValidationError<'_>> for OpstrayError {
    fn from(error: jsonschema::ValidationError<'_>) -> Self {
        OpstrayError::Schema(error.to_string())
    }
}
