//! # Connection State Machine
//!
//! `connecting → opened → authenticated`, with `closed` and `errored` exits.
//! Every channel gets a fresh generation; events stamped with an older
//! generation are ignored, so a late close from a replaced channel cannot
//! schedule a reconnect.

use super::commands::LoopEvent;
use super::event_loop::ReactorLoop;
use crate::domain::{
    ClientEnvelope, ClientMessage, ConnectionState, ConnectionStatus, ErrorPayload, EventId,
    QueryResult, ReactorError, StorageError, User,
};
use crate::ports::{ChannelEvent, ChannelSignal, ChannelSink};
use std::sync::Arc;
use sync_telemetry::{components, log_channel_event, log_event};

/// Storage key of the cached signed-in user.
pub const CURRENT_USER_KEY: &str = "currentUser";

impl ReactorLoop {
    pub(super) fn is_authenticated(&self) -> bool {
        self.status == ConnectionStatus::Authenticated
    }

    pub(super) fn set_status(&mut self, status: ConnectionStatus, error: Option<ErrorPayload>) {
        if self.status != status {
            log_channel_event!(debug, "Connection status changed", self.generation, from = %self.status, to = %status);
        }
        self.status = status;
        self.status_error = error;
        self.publish_status();
    }

    pub(super) fn publish_status(&self) {
        self.outputs.status.send_replace(ConnectionState {
            status: self.status,
            error: self.status_error.clone(),
        });
    }

    /// Open a new channel unless one is already being established.
    pub(super) fn start_channel(&mut self) {
        if self.is_shutdown {
            return;
        }
        if self.channel.as_ref().is_some_and(|ch| ch.is_connecting()) {
            log_channel_event!(debug, "Channel already connecting", self.generation);
            return;
        }
        let previous = self.channel.take();
        self.generation += 1;
        let sink = ChannelSink::new(self.generation, self.signals_tx.clone());
        self.channel = Some(self.ports.transport.open(&self.config.channel_uri, sink));
        if let Some(previous) = previous {
            previous.close();
        }
        self.set_status(ConnectionStatus::Connecting, None);
        log_channel_event!(info, "Opening channel", self.generation, uri = %self.config.channel_uri);
    }

    /// Close the current channel and make its pending events stale.
    pub(super) fn retire_channel(&mut self) {
        if let Some(channel) = self.channel.take() {
            channel.close();
        }
        self.generation += 1;
    }

    pub(super) async fn on_signal(&mut self, signal: ChannelSignal) {
        if signal.generation != self.generation {
            log_channel_event!(trace, "Ignoring event from stale channel", signal.generation, current = self.generation);
            return;
        }
        match signal.event {
            ChannelEvent::Opened => self.on_opened(),
            ChannelEvent::Message(text) => self.on_message(&text).await,
            ChannelEvent::Error(reason) => {
                log_channel_event!(warn, "Channel error", self.generation, reason = %reason);
            }
            ChannelEvent::Closed => self.on_closed(),
        }
    }

    fn on_opened(&mut self) {
        self.set_status(ConnectionStatus::Opened, None);
        let store = Arc::clone(&self.ports.store);
        let events = self.events_tx.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            let refresh_token = match store.get(CURRENT_USER_KEY).await {
                Ok(Some(text)) => serde_json::from_str::<User>(&text)
                    .ok()
                    .map(|user| user.refresh_token),
                Ok(None) => None,
                Err(err) => {
                    log_event!(warn, components::STORAGE, "Failed to read current user", error = %err);
                    None
                }
            };
            let _ = events.send(LoopEvent::CredentialLoaded {
                generation,
                refresh_token,
            });
        });
    }

    pub(super) fn on_credential_loaded(&mut self, generation: u64, refresh_token: Option<String>) {
        if generation != self.generation || self.status != ConnectionStatus::Opened {
            return;
        }
        let init = ClientMessage::Init {
            app_id: self.config.app_id.clone(),
            refresh_token,
            versions: self.config.versions.clone(),
        };
        self.send(EventId::new(), init);
    }

    fn on_closed(&mut self) {
        self.channel = None;
        self.session_id = None;
        self.set_status(ConnectionStatus::Closed, None);
        self.disconnect_rooms();
        if self.is_shutdown {
            return;
        }
        if self.is_online {
            self.schedule_reconnect();
        }
    }

    fn schedule_reconnect(&mut self) {
        if self.reconnect_scheduled {
            return;
        }
        self.reconnect_scheduled = true;
        let delay = self.backoff.next_delay();
        log_channel_event!(info, "Reconnect scheduled", self.generation, delay_ms = delay.as_millis() as u64);
        self.post_after(delay, LoopEvent::ReconnectDue);
    }

    pub(super) fn on_reconnect_due(&mut self) {
        self.reconnect_scheduled = false;
        if self.is_shutdown || !self.is_online {
            return;
        }
        self.start_channel();
    }

    pub(super) fn on_network_changed(&mut self, online: bool) {
        if online == self.is_online {
            return;
        }
        self.is_online = online;
        log_event!(info, components::CONNECTION, "Network reachability changed", online = online);
        if online {
            self.start_channel();
        } else {
            self.retire_channel();
            self.session_id = None;
            self.set_status(ConnectionStatus::Closed, None);
            self.disconnect_rooms();
            self.resolve_waiters_locally();
        }
    }

    /// Send on the current channel. Returns false when nothing was sent.
    pub(super) fn send(&self, event_id: EventId, message: ClientMessage) -> bool {
        let Some(channel) = self.channel.as_ref().filter(|ch| ch.is_open()) else {
            return false;
        };
        let op = message.op();
        let envelope = ClientEnvelope {
            client_event_id: event_id,
            message,
        };
        let text = match envelope.to_json() {
            Ok(text) => text,
            Err(err) => {
                log_channel_event!(warn, "Failed to encode message", self.generation, op = op, error = %err);
                return false;
            }
        };
        match channel.send(text) {
            Ok(()) => {
                log_channel_event!(trace, "Sent message", self.generation, op = op, event_id = %event_id);
                true
            }
            Err(err) => {
                log_channel_event!(warn, "Failed to send message", self.generation, op = op, error = %err);
                false
            }
        }
    }

    /// Send only once the session is authenticated.
    pub(super) fn send_authed(&self, event_id: EventId, message: ClientMessage) -> bool {
        self.is_authenticated() && self.send(event_id, message)
    }

    /// Switch the cached user and restart the session under it.
    pub(super) async fn change_current_user(&mut self, user: Option<User>) -> Result<(), ReactorError> {
        match &user {
            Some(user) => {
                let text = serde_json::to_string(user).map_err(|err| StorageError::Corrupt {
                    key: CURRENT_USER_KEY.to_string(),
                    reason: err.to_string(),
                })?;
                self.ports.store.set(CURRENT_USER_KEY, text).await?;
            }
            None => self.ports.store.remove(CURRENT_USER_KEY).await?,
        }
        log_event!(info, components::CONNECTION, "Current user changed", signed_in = user.is_some());

        // Results of the previous user must not leak into the new session.
        let replacement = (!self.is_online).then(|| QueryResult::local(self.empty_snapshot()));
        self.views.clear();
        self.query_subs.update(|subs| {
            for sub in subs.values_mut() {
                sub.result = replacement.clone();
            }
        });
        self.notify_all();
        self.backoff.reset();
        self.retire_channel();
        if self.is_online {
            self.start_channel();
        } else {
            self.set_status(ConnectionStatus::Closed, None);
        }
        Ok(())
    }
}
