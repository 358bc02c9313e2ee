//! # Inbound Ports
//!
//! API trait defining what the Reactor offers its host application.

use crate::application::{PendingTransaction, QuerySubscription, RoomHandle};
use crate::domain::{
    AttrMap, ConnectionState, MutationError, Query, QueryData, ReactorError, Schema, TxChunk, User,
};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

/// Reactor API - inbound port.
#[async_trait]
pub trait ReactorApi: Send + Sync {
    /// Register a live query. The first response arrives as soon as a
    /// result is cached or computable offline.
    fn subscribe_query(&self, query: Query) -> Result<QuerySubscription, ReactorError>;

    /// Resolve a query once.
    ///
    /// Offline, this answers from local data. Online, it waits for the
    /// server unless a live subscription already holds the result.
    async fn query_once(&self, query: Query) -> Result<QueryData, ReactorError>;

    /// Push a transaction. Its effects show up in live queries immediately.
    fn transact(&self, chunks: Vec<TxChunk>) -> Result<PendingTransaction, ReactorError>;

    /// Drop every persisted and cached record.
    async fn clear(&self) -> Result<(), ReactorError>;

    /// Stop the event loop after flushing durable state. Idempotent.
    async fn shutdown(&self);

    /// Observe connection status changes.
    fn subscribe_connection_status(&self) -> watch::Receiver<ConnectionState>;

    /// Current connection state.
    fn connection_state(&self) -> ConnectionState;

    /// Observe the optimistic attribute mapping.
    fn subscribe_attrs(&self) -> watch::Receiver<Arc<AttrMap>>;

    /// Observe failed mutations, whether or not anyone awaits them.
    fn subscribe_mutation_errors(&self) -> broadcast::Receiver<MutationError>;

    /// Stable per-install id for `name`, generated on first request.
    async fn get_local_id(&self, name: &str) -> Result<String, ReactorError>;

    /// Override network reachability.
    fn set_online(&self, online: bool) -> Result<(), ReactorError>;

    /// Sign in (`Some`) or out (`None`) and restart the session.
    async fn change_current_user(&self, user: Option<User>) -> Result<(), ReactorError>;

    /// Replace the local schema.
    fn update_schema(&self, schema: Option<Schema>) -> Result<(), ReactorError>;

    /// Join a presence room.
    fn join_room(&self, room_id: &str, initial_presence: Option<Value>) -> Result<RoomHandle, ReactorError>;
}
