//! # Sync Reactor
//!
//! Client-side sync engine for a realtime graph database. Applications keep
//! working offline: reads come from a durable query cache, writes go into a
//! durable mutation queue and show up in live queries immediately, and
//! everything is reconciled with the server when the channel comes back.
//!
//! **Architecture:** Hexagonal (DDD + Ports/Adapters)
//!
//! ## Components
//!
//! | Component | Responsibility |
//! |-----------|----------------|
//! | Connection state machine | `connecting → opened → authenticated`, reconnect with linear backoff |
//! | Query subscription cache | One cache entry and one `add-query` per query hash, optimistic projections |
//! | Pending mutation queue | Ordered, durable, replayed after every `init-ok` |
//! | Attribute reconciliation | Rewrites locally fabricated attribute ids to the server's |
//! | Protocol dispatcher | Routes server messages by `op` |
//! | Presence rooms | Ephemeral presence and broadcast on the same channel |
//!
//! ## Concurrency
//!
//! All state lives in one event-loop task. [`Reactor`] is a cheap, cloneable
//! handle that sends commands to it; observable state flows back over
//! `watch` and `broadcast` channels. Nothing is shared behind a lock.
//!
//! ## Module Structure
//!
//! ```text
//! sync-reactor/
//! ├── domain/          # Attributes, snapshots, queue, reconciliation, protocol
//! ├── ports/           # ReactorApi (inbound) + store/network/transport/evaluator (outbound)
//! ├── application/     # Event loop, split by concern, and caller handles
//! ├── adapters/        # Memory store, network listeners, loopback transport, reference evaluator/compiler
//! └── config.rs        # ReactorConfig
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sync_reactor::{
//!     LoopbackTransport, MemoryStore, OnlineNetworkListener, Reactor, ReactorApi, ReactorConfig,
//!     ReactorDeps,
//! };
//!
//! let (transport, _server) = LoopbackTransport::new();
//! let deps = ReactorDeps::new(
//!     Arc::new(MemoryStore::new("my-app")),
//!     Arc::new(OnlineNetworkListener),
//!     Arc::new(transport),
//! );
//! let reactor = Reactor::start(ReactorConfig::new("my-app"), deps).await;
//! let mut todos = reactor.subscribe_query(serde_json::json!({"todos": {}}))?;
//! while let Some(response) = todos.next().await {
//!     println!("{response:?}");
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;

// Re-exports
pub use adapters::{
    BasicCompiler, BasicEvaluator, DynamicNetworkListener, LoopbackServer, LoopbackTransport,
    MemoryStore, OfflineNetworkListener, OnlineNetworkListener, ServerEndpoint,
};
pub use application::{
    BroadcastEvent, PendingTransaction, PresenceView, QuerySubscription, Reactor, ReactorDeps,
    RoomHandle,
};
pub use config::ReactorConfig;
pub use domain::{
    Attr, AttrId, AttrMap, ClientEnvelope, ClientMessage, ConnectionState, ConnectionStatus,
    EditStep, ErrorPayload, EventId, MutationError, MutationStatus, Query, QueryData, QueryHash,
    QueryResponse, ReactorError, Schema, ServerMessage, StorageError, TxChunk, TxId, TxOp, User,
};
pub use ports::{
    KeyValueStore, MockKeyValueStore, MockTimeSource, MutationCompiler, NetworkListener,
    QueryEvaluator, ReactorApi, SystemTimeSource, TimeSource, Transport,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
