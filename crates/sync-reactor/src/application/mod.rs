//! # Application Layer
//!
//! The event loop that owns all engine state, split by concern, and the
//! handles callers hold.

mod commands;
mod connection;
mod dispatcher;
mod event_loop;
mod handles;
mod mutations;
mod queries;
mod reactor;
mod rooms;

pub use connection::CURRENT_USER_KEY;
pub use event_loop::{PENDING_MUTATIONS_KEY, QUERY_SUBS_KEY};
pub use handles::{BroadcastEvent, PendingTransaction, PresenceView, QuerySubscription, RoomHandle};
pub use reactor::{Reactor, ReactorDeps};
