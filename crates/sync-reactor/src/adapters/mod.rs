//! # Adapters Layer (Hexagonal Architecture)
//!
//! Implementations of the outbound ports that ship with the crate: an
//! in-memory store, network listeners, an in-process transport, and the
//! reference evaluator and compiler.

mod compiler;
mod evaluator;
mod loopback;
mod memory_store;
mod network;

pub use compiler::BasicCompiler;
pub use evaluator::BasicEvaluator;
pub use loopback::{LoopbackServer, LoopbackTransport, ServerEndpoint};
pub use memory_store::{MemoryStore, SharedBackend};
pub use network::{DynamicNetworkListener, OfflineNetworkListener, OnlineNetworkListener};
