//! # Presence Rooms
//!
//! Rooms ride on the same channel as queries but never touch durable state.
//! A room exists while at least one [`RoomHandle`](super::RoomHandle) is
//! alive; it is (re)joined on every authenticated session.

use super::event_loop::ReactorLoop;
use super::handles::{BroadcastEvent, PresenceView};
use crate::domain::protocol::BroadcastData;
use crate::domain::{ClientMessage, EventId, RoomState};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use sync_telemetry::{components, log_event};
use tokio::sync::mpsc::UnboundedSender;

/// Loop-side bookkeeping for one room.
#[derive(Debug, Default)]
pub(super) struct Room {
    pub state: RoomState,
    /// Live handles
    pub handles: usize,
    pub presence_subs: Vec<UnboundedSender<PresenceView>>,
    pub topic_subs: HashMap<String, Vec<UnboundedSender<BroadcastEvent>>>,
}

impl Room {
    fn view(&self) -> PresenceView {
        PresenceView {
            user: self.state.user.clone(),
            peers: self.state.peers.clone(),
            connected: self.state.connected,
            error: self.state.error.clone(),
        }
    }

    fn notify_presence(&mut self) {
        let view = self.view();
        self.presence_subs.retain(|tx| tx.send(view.clone()).is_ok());
    }
}

impl ReactorLoop {
    pub(super) fn join_room(&mut self, room_id: String, initial: Option<Value>) {
        self.pending_leaves.remove(&room_id);
        let room = self.rooms.entry(room_id.clone()).or_insert_with(|| Room {
            state: RoomState::new(initial),
            ..Room::default()
        });
        room.handles += 1;
        let first = room.handles == 1;
        let data = room.state.user.clone();
        log_event!(debug, components::ROOMS, "Room handle attached", room_id = %room_id, handles = room.handles);
        if first {
            self.send_authed(EventId::new(), ClientMessage::JoinRoom { room_id, data });
        }
    }

    pub(super) fn leave_room(&mut self, room_id: &str) {
        let Some(room) = self.rooms.get_mut(room_id) else {
            return;
        };
        room.handles = room.handles.saturating_sub(1);
        if room.handles > 0 {
            return;
        }
        let was_connected = room.state.connected;
        self.rooms.remove(room_id);
        log_event!(debug, components::ROOMS, "Room left", room_id = %room_id);

        let leave = ClientMessage::LeaveRoom {
            room_id: room_id.to_string(),
        };
        if was_connected {
            self.send_authed(EventId::new(), leave);
        } else if self.is_authenticated() {
            // Join is in flight; leave once it is acknowledged.
            self.pending_leaves.insert(room_id.to_string());
        }
    }

    pub(super) fn publish_presence(&mut self, room_id: &str, patch: Value) {
        let Some(room) = self.rooms.get_mut(room_id) else {
            log_event!(debug, components::ROOMS, "Presence for unknown room", room_id = %room_id);
            return;
        };
        let data = room.state.merge_user(patch);
        let connected = room.state.connected;
        room.notify_presence();
        if connected {
            self.send_authed(
                EventId::new(),
                ClientMessage::SetPresence {
                    room_id: room_id.to_string(),
                    data,
                },
            );
        }
    }

    pub(super) fn publish_topic(&mut self, room_id: &str, topic: String, data: Value) {
        let Some(room) = self.rooms.get_mut(room_id) else {
            log_event!(debug, components::ROOMS, "Broadcast for unknown room", room_id = %room_id);
            return;
        };
        if !room.state.connected {
            room.state.queued.push((topic, data));
            return;
        }
        self.send_authed(
            EventId::new(),
            ClientMessage::ClientBroadcast {
                room_id: room_id.to_string(),
                topic,
                data,
            },
        );
    }

    pub(super) fn subscribe_presence(&mut self, room_id: &str, tx: UnboundedSender<PresenceView>) {
        let Some(room) = self.rooms.get_mut(room_id) else {
            return;
        };
        if tx.send(room.view()).is_ok() {
            room.presence_subs.push(tx);
        }
    }

    pub(super) fn subscribe_topic(&mut self, room_id: &str, topic: String, tx: UnboundedSender<BroadcastEvent>) {
        if let Some(room) = self.rooms.get_mut(room_id) {
            room.topic_subs.entry(topic).or_default().push(tx);
        }
    }

    pub(super) fn on_join_room_ok(&mut self, room_id: &str) {
        if self.pending_leaves.remove(room_id) {
            self.send_authed(
                EventId::new(),
                ClientMessage::LeaveRoom {
                    room_id: room_id.to_string(),
                },
            );
            return;
        }
        let Some(room) = self.rooms.get_mut(room_id) else {
            return;
        };
        room.state.connected = true;
        room.state.error = None;
        let presence = room.state.user.clone();
        let queued = std::mem::take(&mut room.state.queued);
        room.notify_presence();
        log_event!(info, components::ROOMS, "Room joined", room_id = %room_id, queued = queued.len());

        if let Some(data) = presence {
            self.send_authed(
                EventId::new(),
                ClientMessage::SetPresence {
                    room_id: room_id.to_string(),
                    data,
                },
            );
        }
        for (topic, data) in queued {
            self.send_authed(
                EventId::new(),
                ClientMessage::ClientBroadcast {
                    room_id: room_id.to_string(),
                    topic,
                    data,
                },
            );
        }
    }

    pub(super) fn on_join_room_error(&mut self, room_id: &str, error: Option<Value>) {
        log_event!(warn, components::ROOMS, "Room join rejected", room_id = %room_id, error = ?error);
        self.pending_leaves.remove(room_id);
        if let Some(room) = self.rooms.get_mut(room_id) {
            room.state.connected = false;
            room.state.error = Some(error.unwrap_or(Value::Null));
            room.notify_presence();
        }
    }

    pub(super) fn on_refresh_presence(&mut self, room_id: &str, sessions: &BTreeMap<String, Value>) {
        let own = self.session_id.clone();
        if let Some(room) = self.rooms.get_mut(room_id) {
            room.state.refresh_peers(sessions, own.as_deref());
            room.notify_presence();
        }
    }

    pub(super) fn on_patch_presence(&mut self, room_id: &str, edits: &[Value]) {
        let own = self.session_id.clone();
        if let Some(room) = self.rooms.get_mut(room_id) {
            room.state.patch_peers(edits, own.as_deref());
            room.notify_presence();
        }
    }

    pub(super) fn on_server_broadcast(&mut self, room_id: &str, topic: String, data: BroadcastData) {
        let Some(room) = self.rooms.get_mut(room_id) else {
            return;
        };
        let peer = data
            .peer_id
            .as_ref()
            .and_then(|peer_id| room.state.peers.get(peer_id))
            .cloned();
        let Some(subs) = room.topic_subs.get_mut(&topic) else {
            return;
        };
        let event = BroadcastEvent {
            topic,
            data: data.data,
            peer,
        };
        subs.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Join every live room on a fresh session and flush deferred leaves.
    pub(super) fn rejoin_rooms(&mut self) {
        for room_id in std::mem::take(&mut self.pending_leaves) {
            self.send_authed(EventId::new(), ClientMessage::LeaveRoom { room_id });
        }
        let joins: Vec<(String, Option<Value>)> = self
            .rooms
            .iter()
            .map(|(room_id, room)| (room_id.clone(), room.state.user.clone()))
            .collect();
        for (room_id, data) in joins {
            self.send_authed(EventId::new(), ClientMessage::JoinRoom { room_id, data });
        }
    }

    /// Mark every room disconnected after the channel went away.
    pub(super) fn disconnect_rooms(&mut self) {
        // Leaves owed to the old session died with it.
        self.pending_leaves.clear();
        for room in self.rooms.values_mut() {
            if room.state.connected {
                room.state.connected = false;
                room.state.peers.clear();
                room.notify_presence();
            }
        }
    }

    /// Leave and forget every room.
    pub(super) fn clear_rooms(&mut self) {
        let connected: Vec<String> = self
            .rooms
            .iter()
            .filter(|(_, room)| room.state.connected)
            .map(|(room_id, _)| room_id.clone())
            .collect();
        for room_id in connected {
            self.send_authed(EventId::new(), ClientMessage::LeaveRoom { room_id });
        }
        self.rooms.clear();
        self.pending_leaves.clear();
    }
}
