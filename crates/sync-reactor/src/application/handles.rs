//! # Caller Handles
//!
//! What the public API hands out: live query subscriptions, pending
//! transactions and joined rooms. Each handle talks to the event loop through
//! the command channel; dropping one detaches it.

use super::commands::Command;
use crate::domain::{
    ErrorPayload, EventId, MutationError, MutationStatus, Peers, QueryHash, QueryResponse,
    ReactorError,
};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};

pub(crate) fn send_command(
    commands: &mpsc::UnboundedSender<Command>,
    command: Command,
) -> Result<(), ReactorError> {
    commands.send(command).map_err(|_| ReactorError::Shutdown)
}

/// A live query. Yields a response every time the projected result changes.
#[derive(Debug)]
pub struct QuerySubscription {
    hash: QueryHash,
    listener_id: u64,
    responses: mpsc::UnboundedReceiver<QueryResponse>,
    commands: mpsc::UnboundedSender<Command>,
    detached: bool,
}

impl QuerySubscription {
    pub(crate) fn new(
        hash: QueryHash,
        listener_id: u64,
        responses: mpsc::UnboundedReceiver<QueryResponse>,
        commands: mpsc::UnboundedSender<Command>,
    ) -> Self {
        Self {
            hash,
            listener_id,
            responses,
            commands,
            detached: false,
        }
    }

    /// Hash of the subscribed query.
    pub fn hash(&self) -> &QueryHash {
        &self.hash
    }

    /// Wait for the next response. `None` once the Reactor has stopped.
    pub async fn next(&mut self) -> Option<QueryResponse> {
        self.responses.recv().await
    }

    /// A response that is already waiting, if any.
    pub fn try_next(&mut self) -> Option<QueryResponse> {
        self.responses.try_recv().ok()
    }

    /// Stop listening. Same as dropping the handle.
    pub fn unsubscribe(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if self.detached {
            return;
        }
        self.detached = true;
        // A stopped loop has nothing left to unsubscribe from.
        let _ = self.commands.send(Command::Unsubscribe {
            hash: self.hash.clone(),
            listener_id: self.listener_id,
        });
    }
}

impl Drop for QuerySubscription {
    fn drop(&mut self) {
        self.detach();
    }
}

/// A pushed mutation.
///
/// [`outcome`](Self::outcome) settles once, with `Synced` when the server
/// acknowledged it, `Enqueued` when it was stored for later delivery, or a
/// [`MutationError`]. The status watch keeps following the mutation after
/// that, e.g. from `Enqueued` to `Synced` once replayed.
#[derive(Debug)]
pub struct PendingTransaction {
    event_id: EventId,
    outcome: Option<oneshot::Receiver<Result<MutationStatus, MutationError>>>,
    settled: Option<Result<MutationStatus, MutationError>>,
    status: watch::Receiver<MutationStatus>,
}

impl PendingTransaction {
    pub(crate) fn new(
        event_id: EventId,
        outcome: oneshot::Receiver<Result<MutationStatus, MutationError>>,
        status: watch::Receiver<MutationStatus>,
    ) -> Self {
        Self {
            event_id,
            outcome: Some(outcome),
            settled: None,
            status,
        }
    }

    /// Event id of the mutation.
    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    /// Latest lifecycle status.
    pub fn status(&self) -> MutationStatus {
        *self.status.borrow()
    }

    /// Receiver following every lifecycle change.
    pub fn watch_status(&self) -> watch::Receiver<MutationStatus> {
        self.status.clone()
    }

    /// First terminal outcome.
    pub async fn outcome(&mut self) -> Result<MutationStatus, MutationError> {
        if let Some(done) = &self.settled {
            return done.clone();
        }
        let result = match self.outcome.take() {
            Some(rx) => rx.await.unwrap_or_else(|_| Err(self.abandoned())),
            None => Err(self.abandoned()),
        };
        self.settled = Some(result.clone());
        result
    }

    /// Wait until the server has acknowledged the mutation.
    pub async fn synced(&mut self) -> Result<(), MutationError> {
        let mut status = self.status.clone();
        let reached = status
            .wait_for(|s| {
                matches!(
                    s,
                    MutationStatus::Synced | MutationStatus::Error | MutationStatus::Timeout
                )
            })
            .await
            .map(|s| *s);
        match reached {
            Ok(MutationStatus::Synced) => Ok(()),
            Ok(failed) => match self.outcome().await {
                Err(err) => Err(err),
                Ok(_) => Err(MutationError {
                    event_id: self.event_id,
                    status: failed,
                    payload: ErrorPayload::message(format!("Mutation {failed} after being enqueued")),
                }),
            },
            Err(_) => Err(self.abandoned()),
        }
    }

    fn abandoned(&self) -> MutationError {
        MutationError {
            event_id: self.event_id,
            status: MutationStatus::Error,
            payload: ErrorPayload::message("Mutation dropped before completion"),
        }
    }
}

/// Presence state of a room as seen by subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PresenceView {
    /// Own presence
    pub user: Option<Value>,
    /// Other sessions keyed by session id
    pub peers: Peers,
    /// Whether the room is joined on the current connection
    pub connected: bool,
    /// Last join error
    pub error: Option<Value>,
}

/// A broadcast delivered to a topic subscriber.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BroadcastEvent {
    /// Topic
    pub topic: String,
    /// Payload
    pub data: Value,
    /// Presence of the sending peer, when known
    pub peer: Option<Value>,
}

/// Membership in a presence room. Dropping the last handle leaves the room.
#[derive(Debug)]
pub struct RoomHandle {
    room_id: String,
    commands: mpsc::UnboundedSender<Command>,
    left: bool,
}

impl RoomHandle {
    pub(crate) fn new(room_id: String, commands: mpsc::UnboundedSender<Command>) -> Self {
        Self {
            room_id,
            commands,
            left: false,
        }
    }

    /// Room id.
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Merge `patch` into own presence.
    pub fn publish_presence(&self, patch: Value) -> Result<(), ReactorError> {
        send_command(
            &self.commands,
            Command::PublishPresence {
                room_id: self.room_id.clone(),
                patch,
            },
        )
    }

    /// Broadcast `data` on `topic`. Queued until the room is joined.
    pub fn publish_topic(&self, topic: impl Into<String>, data: Value) -> Result<(), ReactorError> {
        send_command(
            &self.commands,
            Command::PublishTopic {
                room_id: self.room_id.clone(),
                topic: topic.into(),
                data,
            },
        )
    }

    /// Receive presence changes, starting with the current state.
    pub fn subscribe_presence(&self) -> Result<mpsc::UnboundedReceiver<PresenceView>, ReactorError> {
        let (tx, rx) = mpsc::unbounded_channel();
        send_command(
            &self.commands,
            Command::SubscribePresence {
                room_id: self.room_id.clone(),
                tx,
            },
        )?;
        Ok(rx)
    }

    /// Receive broadcasts on `topic`.
    pub fn subscribe_topic(
        &self,
        topic: impl Into<String>,
    ) -> Result<mpsc::UnboundedReceiver<BroadcastEvent>, ReactorError> {
        let (tx, rx) = mpsc::unbounded_channel();
        send_command(
            &self.commands,
            Command::SubscribeTopic {
                room_id: self.room_id.clone(),
                topic: topic.into(),
                tx,
            },
        )?;
        Ok(rx)
    }

    /// Leave the room. Same as dropping the handle.
    pub fn leave(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.left {
            return;
        }
        self.left = true;
        let _ = self.commands.send(Command::LeaveRoom {
            room_id: self.room_id.clone(),
        });
    }
}

impl Drop for RoomHandle {
    fn drop(&mut self) {
        self.release();
    }
}
