//! # Offline Sync Test Suite
//!
//! Drives a real [`sync_reactor::Reactor`] against the in-process loopback
//! server, playing the remote authority by hand.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── harness.rs        # Reactor + loopback server fixture
//! └── integration/      # End-to-end flows
//!     ├── offline_flow.rs
//!     ├── reconnect.rs
//!     ├── reconciliation.rs
//!     ├── ordering.rs
//!     ├── rooms.rs
//!     └── subscriptions.rs
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p sync-tests
//! cargo test -p sync-tests integration::reconnect
//!
//! # Benchmarks
//! cargo bench -p sync-tests
//! ```

#![allow(dead_code)]

pub mod harness;
pub mod integration;
