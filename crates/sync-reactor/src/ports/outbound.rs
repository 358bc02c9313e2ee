//! # Outbound Ports
//!
//! Traits for everything the Reactor consumes from its host: durable storage,
//! network reachability, the duplex channel, the query evaluator, the
//! mutation compiler and the clock.

use crate::domain::{
    AttrMap, CompileError, EditStep, EvalError, Query, Schema, Snapshot, StorageError, Timestamp,
    TransportError, Triple, TxChunk,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Persisted key-value store - outbound port.
///
/// One instance per application namespace.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value.
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write a value.
    async fn set(&self, key: &str, value: String) -> Result<(), StorageError>;

    /// Delete a value.
    async fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Delete every value in this namespace.
    async fn clear(&self) -> Result<(), StorageError>;
}

/// Network reachability signal - outbound port.
#[async_trait]
pub trait NetworkListener: Send + Sync {
    /// Current reachability, queried once at startup.
    async fn is_online(&self) -> bool;

    /// Receiver that observes every reachability change.
    fn listen(&self) -> watch::Receiver<bool>;
}

/// Something that happened on a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The channel is ready to send.
    Opened,
    /// A text frame arrived.
    Message(String),
    /// The channel closed.
    Closed,
    /// The channel failed; a `Closed` follows.
    Error(String),
}

/// A channel event stamped with the generation of the channel that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSignal {
    /// Generation of the producing channel
    pub generation: u64,
    /// What happened
    pub event: ChannelEvent,
}

/// Handle a transport uses to report events of one channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    generation: u64,
    tx: mpsc::UnboundedSender<ChannelSignal>,
}

impl ChannelSink {
    /// Sink for channel `generation`.
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<ChannelSignal>) -> Self {
        Self { generation, tx }
    }

    /// Generation this sink stamps.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Report an event. Returns false once the Reactor has stopped listening.
    pub fn emit(&self, event: ChannelEvent) -> bool {
        self.tx
            .send(ChannelSignal {
                generation: self.generation,
                event,
            })
            .is_ok()
    }

    /// Report `Opened`.
    pub fn opened(&self) -> bool {
        self.emit(ChannelEvent::Opened)
    }

    /// Report a text frame.
    pub fn message(&self, text: impl Into<String>) -> bool {
        self.emit(ChannelEvent::Message(text.into()))
    }

    /// Report `Closed`.
    pub fn closed(&self) -> bool {
        self.emit(ChannelEvent::Closed)
    }

    /// Report a failure.
    pub fn error(&self, reason: impl Into<String>) -> bool {
        self.emit(ChannelEvent::Error(reason.into()))
    }
}

/// An open or opening duplex channel.
pub trait Channel: Send + Sync {
    /// Send a text frame.
    fn send(&self, text: String) -> Result<(), TransportError>;

    /// Close the channel. Idempotent.
    fn close(&self);

    /// Whether frames can be sent.
    fn is_open(&self) -> bool;

    /// Whether the channel is still being established.
    fn is_connecting(&self) -> bool;
}

/// Duplex channel factory - outbound port.
pub trait Transport: Send + Sync {
    /// Start opening a channel to `uri`. Events arrive through `sink`.
    fn open(&self, uri: &str, sink: ChannelSink) -> Box<dyn Channel>;
}

/// Query evaluator - outbound port.
pub trait QueryEvaluator: Send + Sync {
    /// Build a snapshot from server facts.
    fn build_snapshot(&self, attrs: &AttrMap, triples: Vec<Triple>, cardinality_inference: bool) -> Snapshot;

    /// Apply edit steps, producing a new snapshot.
    fn transact(&self, snapshot: &Snapshot, steps: &[EditStep]) -> Snapshot;

    /// Project a snapshot through a query shape.
    fn evaluate(&self, snapshot: &Snapshot, query: &Query) -> Result<serde_json::Value, EvalError>;
}

/// What the mutation compiler may consult.
#[derive(Debug, Clone, Copy)]
pub struct CompileContext<'a> {
    /// Optimistic attribute mapping
    pub attrs: &'a AttrMap,
    /// Local schema, if configured
    pub schema: Option<&'a Schema>,
    /// Every cached snapshot, so references to unsynced entities resolve
    pub snapshots: &'a [&'a Snapshot],
}

/// Mutation compiler - outbound port.
pub trait MutationCompiler: Send + Sync {
    /// Turn transaction chunks into edit steps.
    fn compile(&self, ctx: CompileContext<'_>, chunks: &[TxChunk]) -> Result<Vec<EditStep>, CompileError>;
}

/// Time source for timestamps on persisted records.
pub trait TimeSource: Send + Sync {
    /// Returns the current timestamp in milliseconds.
    fn now(&self) -> Timestamp;
}

/// Default system time source.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Timestamp {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as Timestamp
    }
}

// =============================================================================
// Mock Implementations for Testing
// =============================================================================

/// Mock time source with a manually advanced clock.
#[derive(Debug, Default)]
pub struct MockTimeSource {
    time: AtomicU64,
}

impl MockTimeSource {
    /// Clock starting at `initial`.
    pub fn new(initial: Timestamp) -> Self {
        Self {
            time: AtomicU64::new(initial),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, ms: u64) {
        self.time.fetch_add(ms, Ordering::SeqCst);
    }

    /// Set the clock.
    pub fn set(&self, time: Timestamp) {
        self.time.store(time, Ordering::SeqCst);
    }
}

impl TimeSource for MockTimeSource {
    fn now(&self) -> Timestamp {
        self.time.load(Ordering::SeqCst)
    }
}

/// Mock key-value store with write counting, failure injection and slow reads.
#[derive(Debug, Default)]
pub struct MockKeyValueStore {
    values: Mutex<HashMap<String, String>>,
    fail_writes: AtomicBool,
    writes: AtomicU64,
    read_delay: Mutex<Duration>,
}

impl MockKeyValueStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `entries`.
    pub fn with_entries<K: Into<String>, V: Into<String>>(entries: impl IntoIterator<Item = (K, V)>) -> Self {
        let store = Self::new();
        store
            .values
            .lock()
            .extend(entries.into_iter().map(|(k, v)| (k.into(), v.into())));
        store
    }

    /// Make every later `set` fail.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every later `get` wait `delay` before answering.
    pub fn delay_reads(&self, delay: Duration) {
        *self.read_delay.lock() = delay;
    }

    /// Successful writes so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Current value, bypassing the async interface.
    pub fn peek(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }
}

#[async_trait]
impl KeyValueStore for MockKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let delay = *self.read_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(self.values.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("Mock failure".to_string()));
        }
        self.values.lock().insert(key.to_string(), value);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.values.lock().remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.values.lock().clear();
        Ok(())
    }
}
