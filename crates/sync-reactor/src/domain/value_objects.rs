//! # Value Objects
//!
//! Identifiers and small enums shared by every part of the engine.

use super::errors::ErrorPayload;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;

/// Server-assigned transaction id.
pub type TxId = u64;

/// A query shape. Opaque to the engine apart from hashing.
pub type Query = serde_json::Value;

/// Event id carried by every client message and echoed in replies.
///
/// UUID v7, so ids created later sort later. Used as the tie-breaker when
/// two pending mutations share an `order`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Generate a new event id (UUID v7)
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Parse from string
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }

    /// Get the underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EventId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Stable fingerprint of a query shape, used as the subscription cache key.
///
/// SHA-256 over the canonical JSON encoding. `serde_json` objects keep keys
/// sorted, so two queries that differ only in key order hash the same.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryHash(String);

impl QueryHash {
    /// Hash a query shape.
    pub fn of(query: &Query) -> Self {
        let canonical = query.to_string();
        let digest = Sha256::digest(canonical.as_bytes());
        Self(hex::encode(&digest[..16]))
    }

    /// Hex representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueryHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Connection status. Exactly one holds at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// A channel is being opened.
    Connecting,
    /// The channel is open, handshake not yet acknowledged.
    Opened,
    /// Handshake acknowledged; queries and mutations flow.
    Authenticated,
    /// No channel.
    Closed,
    /// The handshake failed in a way retrying will not fix.
    Errored,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connecting => "connecting",
            Self::Opened => "opened",
            Self::Authenticated => "authenticated",
            Self::Closed => "closed",
            Self::Errored => "errored",
        };
        f.write_str(s)
    }
}

/// Published connection state.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionState {
    /// Current status
    pub status: ConnectionStatus,
    /// Handshake error while `Errored`
    pub error: Option<ErrorPayload>,
}

impl ConnectionState {
    /// State without an error.
    pub fn new(status: ConnectionStatus) -> Self {
        Self { status, error: None }
    }
}

/// Signed-in user as cached in the key-value store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// User id
    pub id: String,
    /// Email, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Credential sent with `init`
    pub refresh_token: String,
}

/// Lifecycle of a pushed mutation.
///
/// `Enqueued`, `Synced`, `Error` and `Timeout` are the terminal outcomes a
/// caller can receive; `Pending` is only observable through the lifecycle watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationStatus {
    /// Sent, awaiting acknowledgement.
    Pending,
    /// Stored locally; will be sent once authenticated.
    Enqueued,
    /// Acknowledged by the server.
    Synced,
    /// Rejected by the server or failed to compile.
    Error,
    /// No acknowledgement within the deadline.
    Timeout,
}

impl MutationStatus {
    /// Whether the caller's deferred resolves (rather than rejects) with this status.
    pub fn is_success(self) -> bool {
        matches!(self, Self::Pending | Self::Enqueued | Self::Synced)
    }
}

impl fmt::Display for MutationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Enqueued => "enqueued",
            Self::Synced => "synced",
            Self::Error => "error",
            Self::Timeout => "timeout",
        };
        f.write_str(s)
    }
}
