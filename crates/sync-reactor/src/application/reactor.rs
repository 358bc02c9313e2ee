//! # Reactor
//!
//! Cloneable handle to a running event loop. Every call turns into a
//! [`Command`]; observable state is published through `watch` and
//! `broadcast` channels the handle subscribes to.

use super::commands::{Command, MutationWaiter, QueryListener};
use super::event_loop::{LoopOutputs, LoopPorts, ReactorLoop};
use super::handles::{send_command, PendingTransaction, QuerySubscription, RoomHandle};
use crate::adapters::{BasicCompiler, BasicEvaluator};
use crate::config::ReactorConfig;
use crate::domain::{
    AttrMap, ConnectionState, ConnectionStatus, Deferred, EventId, MutationError, MutationStatus,
    Query, QueryData, QueryHash, ReactorError, Schema, TxChunk, User,
};
use crate::ports::{
    KeyValueStore, MutationCompiler, NetworkListener, QueryEvaluator, ReactorApi, SystemTimeSource,
    TimeSource, Transport,
};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

/// Capacity of the mutation error broadcast.
const MUTATION_ERROR_CAPACITY: usize = 64;

/// Collaborators a Reactor runs against.
pub struct ReactorDeps {
    store: Arc<dyn KeyValueStore>,
    network: Arc<dyn NetworkListener>,
    transport: Arc<dyn Transport>,
    evaluator: Arc<dyn QueryEvaluator>,
    compiler: Arc<dyn MutationCompiler>,
    clock: Arc<dyn TimeSource>,
}

impl ReactorDeps {
    /// Host-provided ports with the bundled evaluator, compiler and system clock.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        network: Arc<dyn NetworkListener>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            store,
            network,
            transport,
            evaluator: Arc::new(BasicEvaluator),
            compiler: Arc::new(BasicCompiler),
            clock: Arc::new(SystemTimeSource),
        }
    }

    /// Replace the clock.
    pub fn with_clock(mut self, clock: Arc<dyn TimeSource>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the query evaluator.
    pub fn with_evaluator(mut self, evaluator: Arc<dyn QueryEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// Replace the mutation compiler.
    pub fn with_compiler(mut self, compiler: Arc<dyn MutationCompiler>) -> Self {
        self.compiler = compiler;
        self
    }
}

/// Handle to a running sync engine.
#[derive(Clone)]
pub struct Reactor {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionState>,
    attrs: watch::Receiver<Arc<AttrMap>>,
    mutation_errors: broadcast::Sender<MutationError>,
    next_listener_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for Reactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reactor")
            .field("status", &self.status.borrow().status)
            .finish_non_exhaustive()
    }
}

impl Reactor {
    /// Spawn the event loop on the current runtime.
    ///
    /// Durable state loads in the background; live queries receive their
    /// first response once it has been merged in.
    pub async fn start(config: ReactorConfig, deps: ReactorDeps) -> Self {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(ConnectionState::new(ConnectionStatus::Connecting));
        let (attrs_tx, attrs) = watch::channel(Arc::new(AttrMap::new()));
        let (mutation_errors, _) = broadcast::channel(MUTATION_ERROR_CAPACITY);

        let ports = LoopPorts {
            store: deps.store,
            transport: deps.transport,
            evaluator: deps.evaluator,
            compiler: deps.compiler,
            clock: deps.clock,
        };
        let outputs = LoopOutputs {
            status: status_tx,
            attrs: attrs_tx,
            mutation_errors: mutation_errors.clone(),
        };

        let online = deps.network.is_online().await;
        let mut event_loop = ReactorLoop::new(config, ports, outputs, commands_rx);
        event_loop.boot(online, deps.network);
        tokio::spawn(event_loop.run());

        Self {
            commands,
            status,
            attrs,
            mutation_errors,
            next_listener_id: Arc::new(AtomicU64::new(1)),
        }
    }

    fn send(&self, command: Command) -> Result<(), ReactorError> {
        send_command(&self.commands, command)
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<Result<T, ReactorError>>) -> Command,
    ) -> Result<T, ReactorError> {
        let (reply, rx) = oneshot::channel();
        self.send(command(reply))?;
        rx.await.map_err(|_| ReactorError::Shutdown)?
    }
}

#[async_trait]
impl ReactorApi for Reactor {
    fn subscribe_query(&self, query: Query) -> Result<QuerySubscription, ReactorError> {
        let hash = QueryHash::of(&query);
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.send(Command::SubscribeQuery {
            query,
            listener: QueryListener { id, tx, last: None },
        })?;
        Ok(QuerySubscription::new(hash, id, rx, self.commands.clone()))
    }

    async fn query_once(&self, query: Query) -> Result<QueryData, ReactorError> {
        self.request(|reply| Command::QueryOnce { query, reply }).await
    }

    fn transact(&self, chunks: Vec<TxChunk>) -> Result<PendingTransaction, ReactorError> {
        let event_id = EventId::new();
        let (outcome, outcome_rx) = Deferred::channel();
        let (status, status_rx) = watch::channel(MutationStatus::Pending);
        self.send(Command::Transact {
            chunks,
            event_id,
            waiter: MutationWaiter { outcome, status },
        })?;
        Ok(PendingTransaction::new(event_id, outcome_rx, status_rx))
    }

    async fn clear(&self) -> Result<(), ReactorError> {
        self.request(|reply| Command::Clear { reply }).await
    }

    async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown { reply }).is_ok() {
            let _ = rx.await;
        }
    }

    fn subscribe_connection_status(&self) -> watch::Receiver<ConnectionState> {
        self.status.clone()
    }

    fn connection_state(&self) -> ConnectionState {
        self.status.borrow().clone()
    }

    fn subscribe_attrs(&self) -> watch::Receiver<Arc<AttrMap>> {
        self.attrs.clone()
    }

    fn subscribe_mutation_errors(&self) -> broadcast::Receiver<MutationError> {
        self.mutation_errors.subscribe()
    }

    async fn get_local_id(&self, name: &str) -> Result<String, ReactorError> {
        let name = name.to_string();
        self.request(|reply| Command::LocalId { name, reply }).await
    }

    fn set_online(&self, online: bool) -> Result<(), ReactorError> {
        self.send(Command::SetOnline(online))
    }

    async fn change_current_user(&self, user: Option<User>) -> Result<(), ReactorError> {
        self.request(|reply| Command::ChangeUser { user, reply }).await
    }

    fn update_schema(&self, schema: Option<Schema>) -> Result<(), ReactorError> {
        self.send(Command::UpdateSchema(schema))
    }

    fn join_room(&self, room_id: &str, initial_presence: Option<Value>) -> Result<RoomHandle, ReactorError> {
        self.send(Command::JoinRoom {
            room_id: room_id.to_string(),
            initial: initial_presence,
        })?;
        Ok(RoomHandle::new(room_id.to_string(), self.commands.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{LoopbackTransport, MemoryStore, OfflineNetworkListener, OnlineNetworkListener};
    use crate::domain::{QueryResponse, ServerMessage};
    use crate::ports::MockKeyValueStore;
    use serde_json::json;
    use std::time::Duration;

    async fn offline_reactor(store: Arc<dyn KeyValueStore>) -> Reactor {
        let (transport, _server) = LoopbackTransport::new();
        let deps = ReactorDeps::new(store, Arc::new(OfflineNetworkListener), Arc::new(transport));
        Reactor::start(ReactorConfig::for_testing(), deps).await
    }

    async fn next_data(sub: &mut QuerySubscription) -> Value {
        let response = tokio::time::timeout(Duration::from_secs(1), sub.next())
            .await
            .unwrap()
            .unwrap();
        match response {
            QueryResponse::Data(data) => data.data,
            QueryResponse::Error(err) => panic!("unexpected error: {}", err.message),
        }
    }

    #[tokio::test]
    async fn test_offline_start_reports_closed() {
        let reactor = offline_reactor(Arc::new(MemoryStore::new("app"))).await;
        let mut status = reactor.subscribe_connection_status();
        status
            .wait_for(|s| s.status == ConnectionStatus::Closed)
            .await
            .unwrap();
        reactor.shutdown().await;
    }

    #[tokio::test]
    async fn test_offline_write_shows_up_in_live_query() {
        let reactor = offline_reactor(Arc::new(MemoryStore::new("app"))).await;
        let mut sub = reactor.subscribe_query(json!({"todos": {}})).unwrap();
        assert_eq!(next_data(&mut sub).await, json!({"todos": []}));

        let mut tx = reactor
            .transact(vec![TxChunk::new("todos", "t1").update(json!({"text": "milk"}))])
            .unwrap();
        assert_eq!(tx.outcome().await, Ok(MutationStatus::Enqueued));

        let data = next_data(&mut sub).await;
        assert_eq!(data["todos"][0]["text"], json!("milk"));
        assert_eq!(data["todos"][0]["id"], json!("t1"));
        reactor.shutdown().await;
    }

    #[tokio::test]
    async fn test_local_id_is_stable() {
        let store = Arc::new(MockKeyValueStore::new());
        let reactor = offline_reactor(store.clone()).await;
        let first = reactor.get_local_id("device").await.unwrap();
        let second = reactor.get_local_id("device").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.peek("localToken_device"), Some(first));
        reactor.shutdown().await;
    }

    #[tokio::test]
    async fn test_commands_after_shutdown_fail() {
        let reactor = offline_reactor(Arc::new(MemoryStore::new("app"))).await;
        reactor.shutdown().await;
        // Second shutdown is a no-op
        reactor.shutdown().await;
        assert!(matches!(
            reactor.query_once(json!({"todos": {}})).await,
            Err(ReactorError::Shutdown)
        ));
    }

    #[tokio::test]
    async fn test_schema_update_publishes_local_attrs() {
        use crate::domain::AttrDef;
        use crate::ports::MockTimeSource;
        use std::collections::BTreeMap;

        let (transport, _server) = LoopbackTransport::new();
        let deps = ReactorDeps::new(
            Arc::new(MemoryStore::new("app")),
            Arc::new(OfflineNetworkListener),
            Arc::new(transport),
        )
        .with_clock(Arc::new(MockTimeSource::new(1_000)))
        .with_evaluator(Arc::new(BasicEvaluator))
        .with_compiler(Arc::new(BasicCompiler));
        let reactor = Reactor::start(ReactorConfig::for_testing(), deps).await;
        let mut attrs = reactor.subscribe_attrs();

        let schema = Schema {
            entities: BTreeMap::from([(
                "posts".to_string(),
                BTreeMap::from([("title".to_string(), AttrDef::default())]),
            )]),
            links: vec![],
        };
        reactor.update_schema(Some(schema)).unwrap();
        let published = attrs
            .wait_for(|map| map.values().any(|a| a.etype() == "posts" && a.label() == "title"))
            .await
            .unwrap()
            .clone();
        assert!(published.values().all(|a| a.is_unsynced));

        let data = reactor.query_once(json!({"posts": {}})).await.unwrap();
        assert_eq!(data.data, json!({"posts": []}));
        reactor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_server_times_out_reads_and_writes() {
        let (transport, mut server) = LoopbackTransport::new();
        let deps = ReactorDeps::new(
            Arc::new(MemoryStore::new("app")),
            Arc::new(OnlineNetworkListener),
            Arc::new(transport),
        );
        let reactor = Reactor::start(ReactorConfig::new("app"), deps).await;
        let mut endpoint = server.accept().await.unwrap();
        endpoint.open();
        assert_eq!(endpoint.recv().await.unwrap().message.op(), "init");
        endpoint
            .send(&ServerMessage::InitOk {
                attrs: vec![],
                session_id: None,
            })
            .unwrap();

        let mut tx = reactor
            .transact(vec![TxChunk::new("todos", "t1").update(json!({"text": "milk"}))])
            .unwrap();
        let err = tx.outcome().await.unwrap_err();
        assert_eq!(err.status, MutationStatus::Timeout);

        let err = reactor.query_once(json!({"todos": {}})).await.unwrap_err();
        assert!(matches!(err, ReactorError::QueryTimeout { .. }));
        reactor.shutdown().await;
    }

    #[tokio::test]
    async fn test_subscribing_during_slow_load_keeps_cached_result() {
        use crate::application::QUERY_SUBS_KEY;
        use crate::domain::subscription::{decode_subs, encode_subs};
        use crate::domain::{attr_map, Attr, QueryHash, QueryResult, QuerySub, QuerySubs, Triple};
        use crate::ports::QueryEvaluator;

        let query = json!({"posts": {}});
        let (post_id, title) = (Attr::id_attr("posts"), Attr::blob("posts", "title"));
        let fact = |attr: &Attr, value: Value| Triple {
            entity: "p1".into(),
            attr_id: attr.id,
            value,
            created_at: None,
        };
        let store = BasicEvaluator.build_snapshot(
            &attr_map([post_id.clone(), title.clone()]),
            vec![fact(&post_id, json!("p1")), fact(&title, json!("Cached"))],
            false,
        );
        let mut cached = QuerySub::new(query.clone(), 1);
        cached.result = Some(QueryResult {
            processed_tx_id: Some(5),
            ..QueryResult::local(store)
        });
        let hash = QueryHash::of(&query);
        let subs: QuerySubs = [(hash.clone(), cached)].into_iter().collect();

        let kv = Arc::new(MockKeyValueStore::with_entries([(
            QUERY_SUBS_KEY,
            encode_subs(&subs).unwrap(),
        )]));
        kv.delay_reads(Duration::from_millis(50));
        let reactor = offline_reactor(kv.clone()).await;

        // Subscribed before the durable copy has been read
        let mut sub = reactor.subscribe_query(query.clone()).unwrap();
        let data = next_data(&mut sub).await;
        assert_eq!(data["posts"][0]["title"], json!("Cached"));

        let once = reactor.query_once(query).await.unwrap();
        assert_eq!(once.data, data);

        let persisted = decode_subs(&kv.peek(QUERY_SUBS_KEY).unwrap()).unwrap();
        let result = persisted[&hash].result.as_ref().unwrap();
        assert_eq!(result.processed_tx_id, Some(5));
        assert_eq!(result.store.values("p1", &title.id), [json!("Cached")]);
        reactor.shutdown().await;
    }

    #[tokio::test]
    async fn test_offline_query_once_answers_locally() {
        let reactor = offline_reactor(Arc::new(MemoryStore::new("app"))).await;
        let data = reactor.query_once(json!({"todos": {}})).await.unwrap();
        assert_eq!(data.data, json!({"todos": []}));
        reactor.shutdown().await;
    }
}
