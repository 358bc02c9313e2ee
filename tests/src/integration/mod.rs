//! End-to-end flows between a Reactor and a hand-driven server.

pub mod offline_flow;
pub mod ordering;
pub mod reconciliation;
pub mod reconnect;
pub mod rooms;
pub mod subscriptions;
