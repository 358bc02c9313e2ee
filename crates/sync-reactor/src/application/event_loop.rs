//! # Event Loop
//!
//! The single task that owns every piece of mutable Reactor state. Channel
//! signals, self-posted events (timers, storage and credential reads) and
//! caller commands are processed one at a time, in that priority order, and
//! dirty durable collections are flushed after each one.

use super::commands::{Command, LoopEvent, MutationWaiter, QueryListener};
use super::queries::ReadReply;
use super::rooms::Room;
use crate::config::ReactorConfig;
use crate::domain::subscription::{decode_subs, encode_subs, merge_on_load};
use crate::domain::{
    AttrMap, ConnectionState, ConnectionStatus, Deferred, ErrorPayload, EventId, MutationError,
    MutationQueue, Query, QueryHash, QueryResponse, QueryResult, QuerySubs, ReconnectBackoff,
    ReactorError, Schema, Snapshot, StorageError, Versioned,
};
use crate::ports::{
    Channel, ChannelSignal, KeyValueStore, MutationCompiler, NetworkListener, QueryEvaluator,
    TimeSource, Transport,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use sync_telemetry::{components, log_event};
use tokio::sync::{broadcast, mpsc, watch};
use uuid::Uuid;

/// Storage key of the subscription cache.
pub const QUERY_SUBS_KEY: &str = "querySubs";
/// Storage key of the mutation queue.
pub const PENDING_MUTATIONS_KEY: &str = "pendingMutations";

/// A one-shot query waiting for a server result.
#[derive(Debug)]
pub(super) struct QueryOnceWaiter {
    pub request_id: u64,
    pub query: Query,
    pub reply: ReadReply,
}

/// Memoized projection of one query.
#[derive(Debug, Clone)]
pub(super) struct MemoView {
    /// `(subscriptions version, queue version)` the view was computed at
    pub versions: (u64, u64),
    pub response: QueryResponse,
}

/// Collaborators handed to the loop.
pub(super) struct LoopPorts {
    pub store: Arc<dyn KeyValueStore>,
    pub transport: Arc<dyn Transport>,
    pub evaluator: Arc<dyn QueryEvaluator>,
    pub compiler: Arc<dyn MutationCompiler>,
    pub clock: Arc<dyn TimeSource>,
}

/// Publishing side of the Reactor's observable state.
pub(super) struct LoopOutputs {
    pub status: watch::Sender<ConnectionState>,
    pub attrs: watch::Sender<Arc<AttrMap>>,
    pub mutation_errors: broadcast::Sender<MutationError>,
}

pub(super) struct ReactorLoop {
    pub(super) config: ReactorConfig,
    pub(super) ports: LoopPorts,
    pub(super) outputs: LoopOutputs,

    commands: mpsc::UnboundedReceiver<Command>,
    signals: mpsc::UnboundedReceiver<ChannelSignal>,
    pub(super) signals_tx: mpsc::UnboundedSender<ChannelSignal>,
    events: mpsc::UnboundedReceiver<LoopEvent>,
    pub(super) events_tx: mpsc::UnboundedSender<LoopEvent>,

    // Connection
    pub(super) status: ConnectionStatus,
    pub(super) status_error: Option<ErrorPayload>,
    pub(super) is_online: bool,
    pub(super) is_shutdown: bool,
    pub(super) channel: Option<Box<dyn Channel>>,
    pub(super) generation: u64,
    pub(super) backoff: ReconnectBackoff,
    pub(super) reconnect_scheduled: bool,
    pub(super) session_id: Option<String>,

    // Data
    pub(super) attrs: Option<Arc<AttrMap>>,
    pub(super) query_subs: Versioned<QuerySubs>,
    pub(super) pending: Versioned<MutationQueue>,
    pub(super) listeners: HashMap<QueryHash, Vec<QueryListener>>,
    pub(super) query_once: HashMap<QueryHash, Vec<QueryOnceWaiter>>,
    pub(super) next_request_id: u64,
    pub(super) reads_before_load: Vec<(Query, ReadReply)>,
    pub(super) views: HashMap<QueryHash, MemoView>,
    pub(super) mutation_waiters: HashMap<EventId, MutationWaiter>,

    // Rooms
    pub(super) rooms: HashMap<String, Room>,
    pub(super) pending_leaves: HashSet<String>,
}

impl ReactorLoop {
    pub(super) fn new(
        config: ReactorConfig,
        ports: LoopPorts,
        outputs: LoopOutputs,
        commands: mpsc::UnboundedReceiver<Command>,
    ) -> Self {
        let (signals_tx, signals) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();
        let backoff = ReconnectBackoff::new(config.reconnect_step_ms, config.reconnect_max_ms);
        Self {
            config,
            ports,
            outputs,
            commands,
            signals,
            signals_tx,
            events,
            events_tx,
            status: ConnectionStatus::Connecting,
            status_error: None,
            is_online: false,
            is_shutdown: false,
            channel: None,
            generation: 0,
            backoff,
            reconnect_scheduled: false,
            session_id: None,
            attrs: None,
            query_subs: Versioned::default(),
            pending: Versioned::default(),
            listeners: HashMap::new(),
            query_once: HashMap::new(),
            next_request_id: 0,
            reads_before_load: Vec::new(),
            views: HashMap::new(),
            mutation_waiters: HashMap::new(),
            rooms: HashMap::new(),
            pending_leaves: HashSet::new(),
        }
    }

    /// Start the storage load and network watch, then connect or settle offline.
    pub(super) fn boot(&mut self, online: bool, network: Arc<dyn NetworkListener>) {
        self.spawn_storage_load();
        self.spawn_network_watch(network);

        self.is_online = online;
        if online {
            self.start_channel();
        } else {
            if self.attrs.is_none() {
                if let Some(schema) = &self.config.schema {
                    self.attrs = Some(Arc::new(schema.to_attrs()));
                    self.publish_attrs();
                }
            }
            self.set_status(ConnectionStatus::Closed, None);
        }
    }

    pub(super) async fn run(mut self) {
        log_event!(info, components::CONNECTION, "Reactor started", app_id = %self.config.app_id);
        loop {
            tokio::select! {
                biased;
                Some(signal) = self.signals.recv() => self.on_signal(signal).await,
                Some(event) = self.events.recv() => self.on_loop_event(event),
                command = self.commands.recv() => match command {
                    Some(command) => self.on_command(command).await,
                    None => self.shutdown(),
                },
            }
            self.persist().await;
            if self.is_shutdown {
                break;
            }
        }
        log_event!(info, components::CONNECTION, "Reactor stopped", app_id = %self.config.app_id);
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::SubscribeQuery { query, listener } => self.subscribe_query(query, listener),
            Command::Unsubscribe { hash, listener_id } => self.unsubscribe(&hash, listener_id),
            Command::QueryOnce { query, reply } => self.query_once(query, Deferred::from_sender(reply)),
            Command::Transact {
                chunks,
                event_id,
                waiter,
            } => self.push_transaction(event_id, &chunks, waiter),
            Command::Clear { reply } => {
                let result = self.clear().await;
                let _ = reply.send(result);
            }
            Command::Shutdown { reply } => {
                self.shutdown();
                self.persist().await;
                let _ = reply.send(());
            }
            Command::SetOnline(online) => self.on_network_changed(online),
            Command::LocalId { name, reply } => {
                let result = self.local_id(&name).await;
                let _ = reply.send(result);
            }
            Command::ChangeUser { user, reply } => {
                let result = self.change_current_user(user).await;
                let _ = reply.send(result);
            }
            Command::UpdateSchema(schema) => self.update_schema(schema),
            Command::JoinRoom { room_id, initial } => self.join_room(room_id, initial),
            Command::LeaveRoom { room_id } => self.leave_room(&room_id),
            Command::PublishPresence { room_id, patch } => self.publish_presence(&room_id, patch),
            Command::PublishTopic {
                room_id,
                topic,
                data,
            } => self.publish_topic(&room_id, topic, data),
            Command::SubscribePresence { room_id, tx } => self.subscribe_presence(&room_id, tx),
            Command::SubscribeTopic { room_id, topic, tx } => self.subscribe_topic(&room_id, topic, tx),
        }
    }

    fn on_loop_event(&mut self, event: LoopEvent) {
        match event {
            LoopEvent::StorageLoaded { subs, mutations } => self.on_storage_loaded(subs, mutations),
            LoopEvent::NetworkChanged(online) => self.on_network_changed(online),
            LoopEvent::CredentialLoaded {
                generation,
                refresh_token,
            } => self.on_credential_loaded(generation, refresh_token),
            LoopEvent::ReconnectDue => self.on_reconnect_due(),
            LoopEvent::MutationTimeout {
                event_id,
                generation,
            } => self.on_mutation_timeout(event_id, generation),
            LoopEvent::QueryOnceTimeout { hash, request_id } => {
                self.on_query_once_timeout(&hash, request_id)
            }
        }
    }

    /// Post `event` back into the loop after `delay`.
    pub(super) fn post_after(&self, delay: std::time::Duration, event: LoopEvent) {
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(event);
        });
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    fn spawn_storage_load(&self) {
        let store = Arc::clone(&self.ports.store);
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let subs = store.get(QUERY_SUBS_KEY).await;
            let mutations = store.get(PENDING_MUTATIONS_KEY).await;
            let _ = events.send(LoopEvent::StorageLoaded { subs, mutations });
        });
    }

    fn spawn_network_watch(&self, network: Arc<dyn NetworkListener>) {
        let events = self.events_tx.clone();
        let mut changes = network.listen();
        tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                let online = *changes.borrow_and_update();
                if events.send(LoopEvent::NetworkChanged(online)).is_err() {
                    break;
                }
            }
        });
    }

    fn on_storage_loaded(
        &mut self,
        subs: Result<Option<String>, StorageError>,
        mutations: Result<Option<String>, StorageError>,
    ) {
        let stored_subs = decode_stored(QUERY_SUBS_KEY, subs, decode_subs);
        let merged = merge_on_load(stored_subs, self.query_subs.get(), self.config.query_cache_limit);
        self.query_subs.set(|_| merged);
        self.query_subs.mark_loaded();
        let listened: Vec<QueryHash> = self.listeners.keys().cloned().collect();
        self.fill_local_results(&listened);

        let stored_queue: MutationQueue =
            decode_stored(PENDING_MUTATIONS_KEY, mutations, |text| serde_json::from_str(text));
        let (merged, resend) = MutationQueue::merge_on_load(stored_queue, self.pending.get());
        self.pending.set(|_| merged);
        self.pending.mark_loaded();

        log_event!(
            info,
            components::STORAGE,
            "Durable state loaded",
            subscriptions = self.query_subs.get().len(),
            pending = self.pending.get().len(),
            resend = resend.len()
        );

        for event_id in resend {
            self.send_mutation(event_id);
        }
        self.publish_attrs();
        self.replay_reads_before_load();
        self.notify_all();
    }

    /// Whether both durable collections have been merged in.
    pub(super) fn is_loaded(&self) -> bool {
        self.query_subs.is_loaded() && self.pending.is_loaded()
    }

    async fn persist(&mut self) {
        if self.query_subs.is_loaded() && self.query_subs.take_dirty() {
            match encode_subs(self.query_subs.get()) {
                Ok(text) => self.write(QUERY_SUBS_KEY, text).await,
                Err(err) => log_event!(warn, components::STORAGE, "Failed to encode subscriptions", error = %err),
            }
        }
        if self.pending.is_loaded() && self.pending.take_dirty() {
            match serde_json::to_string(self.pending.get()) {
                Ok(text) => self.write(PENDING_MUTATIONS_KEY, text).await,
                Err(err) => log_event!(warn, components::STORAGE, "Failed to encode mutation queue", error = %err),
            }
        }
    }

    async fn write(&self, key: &str, text: String) {
        if let Err(err) = self.ports.store.set(key, text).await {
            log_event!(warn, components::STORAGE, "Failed to persist collection", key = key, error = %err);
        }
    }

    // =========================================================================
    // Whole-engine operations
    // =========================================================================

    async fn clear(&mut self) -> Result<(), ReactorError> {
        let cleared = self.ports.store.clear().await;

        self.pending.set(|_| MutationQueue::new());
        self.mutation_waiters.clear();
        self.attrs = self
            .config
            .schema
            .as_ref()
            .map(|schema| Arc::new(schema.to_attrs()));
        self.views.clear();

        let empty = self.empty_snapshot();
        self.query_subs.update(|subs| {
            for sub in subs.values_mut() {
                sub.result = Some(QueryResult::local(empty.clone()));
            }
        });
        for (_, waiters) in self.query_once.drain() {
            for mut waiter in waiters {
                waiter.reply.reject(ReactorError::Cancelled);
            }
        }
        for (_, mut reply) in self.reads_before_load.drain(..) {
            reply.reject(ReactorError::Cancelled);
        }
        self.clear_rooms();

        self.status_error = None;
        self.publish_status();
        self.publish_attrs();
        self.notify_all();
        log_event!(info, components::STORAGE, "Local state cleared");

        cleared.map_err(ReactorError::from)
    }

    fn shutdown(&mut self) {
        if self.is_shutdown {
            return;
        }
        self.is_shutdown = true;
        self.retire_channel();
        self.set_status(ConnectionStatus::Closed, None);
    }

    async fn local_id(&mut self, name: &str) -> Result<String, ReactorError> {
        let key = format!("localToken_{name}");
        if let Some(id) = self.ports.store.get(&key).await? {
            return Ok(id);
        }
        let id = Uuid::new_v4().to_string();
        self.ports.store.set(&key, id.clone()).await?;
        log_event!(debug, components::STORAGE, "Generated local id", name = name);
        Ok(id)
    }

    fn update_schema(&mut self, schema: Option<Schema>) {
        self.config.schema = schema;
        if self.attrs.is_none() {
            if let Some(schema) = &self.config.schema {
                self.attrs = Some(Arc::new(schema.to_attrs()));
            }
        }
        self.views.clear();
        self.publish_attrs();
        self.notify_all();
    }

    /// Empty snapshot over the optimistic attributes.
    pub(super) fn empty_snapshot(&self) -> Snapshot {
        Snapshot::empty(self.optimistic_attrs(), self.config.cardinality_inference())
    }
}

fn decode_stored<T: Default>(
    key: &str,
    loaded: Result<Option<String>, StorageError>,
    decode: impl FnOnce(&str) -> serde_json::Result<T>,
) -> T {
    match loaded {
        Ok(Some(text)) => decode(&text).unwrap_or_else(|err| {
            log_event!(warn, components::STORAGE, "Discarding corrupt collection", key = key, error = %err);
            T::default()
        }),
        Ok(None) => T::default(),
        Err(err) => {
            log_event!(warn, components::STORAGE, "Failed to load collection", key = key, error = %err);
            T::default()
        }
    }
}
