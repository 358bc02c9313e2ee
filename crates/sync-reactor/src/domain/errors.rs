//! # Domain Errors
//!
//! Error types for the Reactor and its ports.

use super::value_objects::{EventId, MutationStatus, QueryHash};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error body as carried on the wire and delivered to query listeners.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Human readable message.
    pub message: String,
    /// Structured details from the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<serde_json::Value>,
    /// Server error classification, e.g. `record-not-found`.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    /// HTTP-like status code, when the server sends one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ErrorPayload {
    /// Payload with only a message.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }
}

/// Errors surfaced by the Reactor's public API.
#[derive(Debug, Clone, Error)]
pub enum ReactorError {
    /// The Reactor was shut down; no further commands are accepted.
    #[error("Reactor has shut down")]
    Shutdown,

    /// The request was dropped before it produced a result, e.g. by `clear()`.
    #[error("Request cancelled before completion")]
    Cancelled,

    /// The server rejected a query.
    #[error("Query failed: {}", .0.message)]
    Query(ErrorPayload),

    /// No reply to a one-shot query within the deadline.
    #[error("Query {hash} timed out")]
    QueryTimeout {
        /// Hash of the query that timed out
        hash: QueryHash,
    },

    /// The handshake failed; every read reports this until reconnect.
    #[error("Connection errored: {}", .0.message)]
    Connection(ErrorPayload),

    /// Persisted state could not be read or written.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Terminal failure of a mutation.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Mutation {event_id} failed with {status}: {}", .payload.message)]
pub struct MutationError {
    /// Mutation the failure belongs to
    pub event_id: EventId,
    /// `Error` or `Timeout`
    pub status: MutationStatus,
    /// Failure details
    pub payload: ErrorPayload,
}

/// Persisted key-value store failures.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// The backend rejected the operation.
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// A stored value could not be decoded.
    #[error("Corrupt value under {key}: {reason}")]
    Corrupt {
        /// Storage key
        key: String,
        /// Decoder message
        reason: String,
    },
}

/// Duplex channel failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The channel is not open.
    #[error("Channel is closed")]
    Closed,

    /// The message could not be sent.
    #[error("Send failed: {0}")]
    Send(String),
}

/// Mutation compiler failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    /// A chunk does not describe a valid operation.
    #[error("Malformed transaction chunk: {0}")]
    Malformed(String),

    /// A link names an attribute that cannot be created implicitly.
    #[error("Unknown link {etype}.{label}")]
    UnknownLink {
        /// Entity type
        etype: String,
        /// Link label
        label: String,
    },
}

impl From<CompileError> for ErrorPayload {
    fn from(err: CompileError) -> Self {
        ErrorPayload {
            message: err.to_string(),
            error_type: Some("compile".to_string()),
            ..ErrorPayload::default()
        }
    }
}

/// Query evaluator failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    /// The query shape is not supported.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}

impl From<EvalError> for ErrorPayload {
    fn from(err: EvalError) -> Self {
        ErrorPayload::message(err.to_string())
    }
}
