//! # Domain Layer
//!
//! Pure state and algorithms: no I/O, no timers, no channels except the
//! `oneshot` inside [`Deferred`].

pub mod attrs;
pub mod backoff;
pub mod deferred;
pub mod errors;
pub mod mutation;
pub mod presence;
pub mod protocol;
pub mod reconcile;
pub mod schema;
pub mod snapshot;
pub mod steps;
pub mod subscription;
pub mod value_objects;
pub mod versioned;

pub use attrs::{attr_map, find_by_forward, find_by_reverse, Attr, AttrId, AttrMap, Cardinality, Identity, ValueType};
pub use backoff::ReconnectBackoff;
pub use deferred::Deferred;
pub use errors::{
    CompileError, ErrorPayload, EvalError, MutationError, ReactorError, StorageError, TransportError,
};
pub use mutation::{mutation_timeout, MutationQueue, PendingMutation};
pub use presence::{Peers, RoomState};
pub use protocol::{ClientEnvelope, ClientMessage, ProtocolError, ServerMessage};
pub use reconcile::{rewrite_sorted, Reconciler};
pub use schema::{merge_with_local, AttrDef, LinkDef, Schema};
pub use snapshot::Snapshot;
pub use steps::{EditStep, EntityId, Triple, TxChunk, TxOp};
pub use subscription::{QueryData, QueryResponse, QueryResult, QuerySub, QuerySubs};
pub use value_objects::{
    ConnectionState, ConnectionStatus, EventId, MutationStatus, Query, QueryHash, Timestamp, TxId,
    User,
};
pub use versioned::Versioned;
