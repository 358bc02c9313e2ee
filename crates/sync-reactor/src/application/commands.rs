//! Messages consumed by the event loop.

use super::handles::{BroadcastEvent, PresenceView};
use crate::domain::{
    Deferred, EventId, MutationError, MutationStatus, Query, QueryData, QueryHash, QueryResponse,
    ReactorError, Schema, StorageError, TxChunk, User,
};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};

/// Reply channel for a request.
pub(crate) type Reply<T> = oneshot::Sender<Result<T, ReactorError>>;

/// Deferred outcome of a mutation.
pub(crate) type MutationOutcome = Deferred<Result<MutationStatus, MutationError>>;

/// A registered query listener.
#[derive(Debug)]
pub(crate) struct QueryListener {
    pub id: u64,
    pub tx: mpsc::UnboundedSender<QueryResponse>,
    /// Last response delivered to this listener
    pub last: Option<QueryResponse>,
}

/// The loop's side of a mutation handle.
#[derive(Debug)]
pub(crate) struct MutationWaiter {
    pub outcome: MutationOutcome,
    pub status: watch::Sender<MutationStatus>,
}

/// Requests from [`Reactor`](super::Reactor) handles.
#[derive(Debug)]
pub(crate) enum Command {
    SubscribeQuery {
        query: Query,
        listener: QueryListener,
    },
    Unsubscribe {
        hash: QueryHash,
        listener_id: u64,
    },
    QueryOnce {
        query: Query,
        reply: Reply<QueryData>,
    },
    Transact {
        chunks: Vec<TxChunk>,
        event_id: EventId,
        waiter: MutationWaiter,
    },
    Clear {
        reply: Reply<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
    SetOnline(bool),
    LocalId {
        name: String,
        reply: Reply<String>,
    },
    ChangeUser {
        user: Option<User>,
        reply: Reply<()>,
    },
    UpdateSchema(Option<Schema>),
    JoinRoom {
        room_id: String,
        initial: Option<Value>,
    },
    LeaveRoom {
        room_id: String,
    },
    PublishPresence {
        room_id: String,
        patch: Value,
    },
    PublishTopic {
        room_id: String,
        topic: String,
        data: Value,
    },
    SubscribePresence {
        room_id: String,
        tx: mpsc::UnboundedSender<PresenceView>,
    },
    SubscribeTopic {
        room_id: String,
        topic: String,
        tx: mpsc::UnboundedSender<BroadcastEvent>,
    },
}

/// Events the loop posts to itself from timers and spawned I/O.
#[derive(Debug)]
pub(crate) enum LoopEvent {
    StorageLoaded {
        subs: Result<Option<String>, StorageError>,
        mutations: Result<Option<String>, StorageError>,
    },
    NetworkChanged(bool),
    CredentialLoaded {
        generation: u64,
        refresh_token: Option<String>,
    },
    ReconnectDue,
    MutationTimeout {
        event_id: EventId,
        generation: u64,
    },
    QueryOnceTimeout {
        hash: QueryHash,
        request_id: u64,
    },
}
