//! Reactor + loopback server fixture.

use anyhow::{anyhow, ensure, Context, Result};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use sync_reactor::adapters::SharedBackend;
use sync_reactor::{
    Attr, ClientEnvelope, DynamicNetworkListener, LoopbackServer, LoopbackTransport, MemoryStore,
    Query, QueryResponse, QuerySubscription, Reactor, ReactorConfig, ReactorDeps, ServerEndpoint,
    ServerMessage, TxId,
};
use tokio::time::timeout;

/// How long any single step may take before a test fails.
pub const WAIT: Duration = Duration::from_secs(2);

/// Session id the fixture server assigns.
pub const SESSION_ID: &str = "session-self";

/// A Reactor wired to a hand-driven server.
pub struct Harness {
    pub reactor: Reactor,
    pub server: LoopbackServer,
    pub network: Arc<DynamicNetworkListener>,
    pub backend: SharedBackend,
}

impl Harness {
    /// Start with the testing config.
    pub async fn start(online: bool) -> Self {
        Self::start_with(ReactorConfig::for_testing(), online, SharedBackend::default()).await
    }

    /// Start over an existing storage backend, e.g. to simulate a restart.
    pub async fn start_with(config: ReactorConfig, online: bool, backend: SharedBackend) -> Self {
        sync_telemetry::init_test_logging();
        let store = MemoryStore::with_backend(&config.app_id, Arc::clone(&backend));
        let network = Arc::new(DynamicNetworkListener::new(online));
        let (transport, server) = LoopbackTransport::new();
        let deps = ReactorDeps::new(Arc::new(store), network.clone(), Arc::new(transport));
        let reactor = Reactor::start(config, deps).await;
        Self {
            reactor,
            server,
            network,
            backend,
        }
    }

    /// Wait for the next channel the Reactor opens.
    pub async fn accept(&mut self) -> Result<Remote> {
        let endpoint = timeout(WAIT, self.server.accept())
            .await
            .context("no channel opened")?
            .ok_or_else(|| anyhow!("transport dropped"))?;
        Ok(Remote { endpoint })
    }

    /// Accept, open and authenticate a channel with `attrs` as the server's schema.
    pub async fn connect(&mut self, attrs: Vec<Attr>) -> Result<Remote> {
        let mut remote = self.accept().await?;
        remote.endpoint.open();
        remote.expect_op("init").await?;
        remote.send(&ServerMessage::InitOk {
            attrs,
            session_id: Some(SESSION_ID.to_string()),
        })?;
        Ok(remote)
    }
}

/// The server end of one channel.
pub struct Remote {
    pub endpoint: ServerEndpoint,
}

impl Remote {
    /// Next client message.
    pub async fn next(&mut self) -> Result<ClientEnvelope> {
        timeout(WAIT, self.endpoint.recv())
            .await
            .context("client sent nothing")?
            .ok_or_else(|| anyhow!("client channel dropped"))
    }

    /// Next client message, which must be `op`.
    pub async fn expect_op(&mut self, op: &str) -> Result<ClientEnvelope> {
        let envelope = self.next().await?;
        ensure!(
            envelope.message.op() == op,
            "expected {op}, got {}",
            envelope.message.op()
        );
        Ok(envelope)
    }

    /// Skip client messages until one is `op`.
    pub async fn skip_to(&mut self, op: &str) -> Result<ClientEnvelope> {
        loop {
            let envelope = self.next().await?;
            if envelope.message.op() == op {
                return Ok(envelope);
            }
        }
    }

    /// Fail if the client sends anything within `window`.
    pub async fn expect_quiet(&mut self, window: Duration) -> Result<()> {
        match timeout(window, self.endpoint.recv()).await {
            Err(_) | Ok(None) => Ok(()),
            Ok(Some(envelope)) => Err(anyhow!("unexpected {}", envelope.message.op())),
        }
    }

    /// Deliver a server message.
    pub fn send(&self, message: &ServerMessage) -> Result<()> {
        self.endpoint.send(message)?;
        Ok(())
    }
}

/// `add-query-ok` carrying `rows` as `[entity, attr-id, value]` facts.
pub fn add_query_ok(q: &Query, rows: &[(&str, &Attr, Value)], processed_tx_id: Option<TxId>) -> ServerMessage {
    let join_rows: Vec<Value> = rows
        .iter()
        .map(|(entity, attr, value)| json!([[entity, attr.id, value]]))
        .collect();
    ServerMessage::AddQueryOk {
        q: q.clone(),
        result: json!([{"data": {"datalog-result": {"join-rows": join_rows}}}]),
        processed_tx_id,
    }
}

/// Next data response of a live query.
pub async fn next_data(sub: &mut QuerySubscription) -> Result<Value> {
    match timeout(WAIT, sub.next()).await.context("no query response")? {
        Some(QueryResponse::Data(data)) => Ok(data.data),
        Some(QueryResponse::Error(err)) => Err(anyhow!("query error: {}", err.message)),
        None => Err(anyhow!("reactor stopped")),
    }
}

/// Wait until a live query's data satisfies `pred`.
pub async fn data_until(sub: &mut QuerySubscription, pred: impl Fn(&Value) -> bool) -> Result<Value> {
    loop {
        let data = next_data(sub).await?;
        if pred(&data) {
            return Ok(data);
        }
    }
}
