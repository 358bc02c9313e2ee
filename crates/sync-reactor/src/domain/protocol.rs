//! # Wire Protocol
//!
//! JSON messages tagged by `op`. Client messages travel inside an envelope
//! that adds `client-event-id`; the server echoes it in replies.

use super::attrs::Attr;
use super::errors::ErrorPayload;
use super::steps::{EditStep, Triple};
use super::value_objects::{EventId, Query, TxId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Client → server messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case", rename_all_fields = "kebab-case")]
pub enum ClientMessage {
    /// Handshake.
    Init {
        /// Application id
        app_id: String,
        /// Cached credential, if signed in
        #[serde(default)]
        refresh_token: Option<String>,
        /// Client library versions
        #[serde(default)]
        versions: BTreeMap<String, String>,
    },
    /// Start a live query.
    AddQuery {
        /// Query shape
        q: Query,
    },
    /// Stop a live query.
    RemoveQuery {
        /// Query shape
        q: Query,
    },
    /// Apply a mutation.
    Transact {
        /// Edit steps, already reconciled
        tx_steps: Vec<EditStep>,
    },
    /// Join a presence room.
    JoinRoom {
        /// Room id
        room_id: String,
        /// Initial presence
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
    /// Leave a presence room.
    LeaveRoom {
        /// Room id
        room_id: String,
    },
    /// Replace own presence.
    SetPresence {
        /// Room id
        room_id: String,
        /// Presence document
        data: Value,
    },
    /// Broadcast to a room topic.
    ClientBroadcast {
        /// Room id
        room_id: String,
        /// Topic name
        topic: String,
        /// Payload
        data: Value,
    },
}

impl ClientMessage {
    /// Wire name of the operation.
    pub fn op(&self) -> &'static str {
        match self {
            Self::Init { .. } => "init",
            Self::AddQuery { .. } => "add-query",
            Self::RemoveQuery { .. } => "remove-query",
            Self::Transact { .. } => "transact",
            Self::JoinRoom { .. } => "join-room",
            Self::LeaveRoom { .. } => "leave-room",
            Self::SetPresence { .. } => "set-presence",
            Self::ClientBroadcast { .. } => "client-broadcast",
        }
    }
}

/// A client message with its event id.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientEnvelope {
    /// Echoed back by the server
    pub client_event_id: EventId,
    /// The message
    pub message: ClientMessage,
}

/// Codec failures.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Not valid JSON, or not a known message.
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The envelope has no usable `client-event-id`.
    #[error("Missing client-event-id")]
    MissingEventId,
}

impl ClientEnvelope {
    /// Encode for the channel.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        let mut value = serde_json::to_value(&self.message)?;
        if let Value::Object(fields) = &mut value {
            fields.insert(
                "client-event-id".to_string(),
                Value::String(self.client_event_id.to_string()),
            );
        }
        Ok(serde_json::to_string(&value)?)
    }

    /// Decode a message produced by [`ClientEnvelope::to_json`].
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let mut value: Value = serde_json::from_str(text)?;
        let client_event_id = value
            .as_object_mut()
            .and_then(|fields| fields.remove("client-event-id"))
            .and_then(|id| id.as_str().and_then(|s| EventId::parse(s).ok()))
            .ok_or(ProtocolError::MissingEventId)?;
        let message = serde_json::from_value(value)?;
        Ok(Self {
            client_event_id,
            message,
        })
    }
}

/// A refreshed query in `refresh-ok`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Computation {
    /// Query shape
    pub instaql_query: Query,
    /// Result tree
    #[serde(default)]
    pub instaql_result: Value,
}

/// Payload of `server-broadcast`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BroadcastData {
    /// Session that sent the broadcast
    #[serde(default)]
    pub peer_id: Option<String>,
    /// Broadcast payload
    #[serde(default)]
    pub data: Value,
}

/// Server → client messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case", rename_all_fields = "kebab-case")]
pub enum ServerMessage {
    /// Handshake accepted.
    InitOk {
        /// Canonical attributes
        #[serde(default)]
        attrs: Vec<Attr>,
        /// This connection's session id
        #[serde(default)]
        session_id: Option<String>,
    },
    /// First result of a query.
    AddQueryOk {
        /// Query shape
        q: Query,
        /// Result tree
        #[serde(default)]
        result: Value,
        /// Highest transaction reflected in `result`
        #[serde(default)]
        processed_tx_id: Option<TxId>,
    },
    /// The query is already live on this session.
    AddQueryExists {
        /// Query shape
        q: Query,
    },
    /// Fresh results after a write or schema change.
    RefreshOk {
        /// Updated queries
        #[serde(default)]
        computations: Vec<Computation>,
        /// Canonical attributes
        #[serde(default)]
        attrs: Vec<Attr>,
        /// Highest transaction reflected in the computations
        #[serde(default)]
        processed_tx_id: Option<TxId>,
    },
    /// Mutation accepted.
    TransactOk {
        /// Mutation event id
        client_event_id: EventId,
        /// Assigned transaction id
        tx_id: TxId,
    },
    /// Request failed.
    Error {
        /// Event id of the failed request
        #[serde(default)]
        client_event_id: Option<EventId>,
        /// The request that failed
        #[serde(default)]
        original_event: Option<Value>,
        /// Message
        #[serde(default)]
        message: String,
        /// Structured details
        #[serde(default)]
        hint: Option<Value>,
        /// Classification
        #[serde(rename = "type", default)]
        error_type: Option<String>,
        /// Status code
        #[serde(default)]
        status: Option<u16>,
    },
    /// Room joined.
    JoinRoomOk {
        /// Room id
        room_id: String,
    },
    /// Room join failed.
    JoinRoomError {
        /// Room id
        room_id: String,
        /// Failure details
        #[serde(default)]
        error: Option<Value>,
    },
    /// Full presence state of a room, keyed by session id.
    RefreshPresence {
        /// Room id
        room_id: String,
        /// Session id → `{ "data": ... }`
        #[serde(default)]
        data: BTreeMap<String, Value>,
    },
    /// Incremental presence edits: `[path, op, value?]`.
    PatchPresence {
        /// Room id
        room_id: String,
        /// Edits
        #[serde(default)]
        edits: Vec<Value>,
    },
    /// Broadcast from a peer.
    ServerBroadcast {
        /// Room id
        room_id: String,
        /// Topic
        topic: String,
        /// Sender and payload
        #[serde(default)]
        data: BroadcastData,
    },
    /// Any operation this client does not know.
    #[serde(other)]
    Unknown,
}

impl ServerMessage {
    /// Decode from channel text.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Error body of an `error` message.
    pub fn error_payload(&self) -> Option<ErrorPayload> {
        match self {
            Self::Error {
                message,
                hint,
                error_type,
                status,
                ..
            } => Some(ErrorPayload {
                message: message.clone(),
                hint: hint.clone(),
                error_type: error_type.clone(),
                status: *status,
            }),
            _ => None,
        }
    }
}

/// Collect the facts of a result tree.
///
/// Nodes carry rows under `data.datalog-result.join-rows`; children live under
/// `child-nodes`.
pub fn extract_triples(result: &Value) -> Vec<Triple> {
    let mut out = Vec::new();
    collect_triples(result, &mut out);
    out
}

fn collect_triples(node: &Value, out: &mut Vec<Triple>) {
    match node {
        Value::Array(nodes) => nodes.iter().for_each(|n| collect_triples(n, out)),
        Value::Object(fields) => {
            let rows = fields
                .get("data")
                .and_then(|d| d.get("datalog-result"))
                .and_then(|d| d.get("join-rows"))
                .and_then(Value::as_array);
            for row in rows.into_iter().flatten() {
                for fact in row.as_array().into_iter().flatten() {
                    if let Some(triple) = Triple::from_row(fact) {
                        out.push(triple);
                    }
                }
            }
            if let Some(children) = fields.get("child-nodes") {
                collect_triples(children, out);
            }
        }
        _ => {}
    }
}

/// `page-info` of the first result node.
pub fn page_info(result: &Value) -> Option<Value> {
    result.get(0)?.get("data")?.get("page-info").cloned()
}

/// `aggregate` of the first result node.
pub fn aggregate(result: &Value) -> Option<Value> {
    result.get(0)?.get("data")?.get("aggregate").cloned()
}
