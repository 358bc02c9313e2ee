//! # Protocol Dispatcher
//!
//! Routes decoded server messages to the subsystem they concern.

use super::event_loop::ReactorLoop;
use crate::domain::protocol::{aggregate, extract_triples, page_info, Computation};
use crate::domain::{
    Attr, ConnectionStatus, ErrorPayload, EventId, MutationStatus, Query, QueryHash, QueryResult,
    ServerMessage, TxId,
};
use serde_json::Value;
use std::sync::Arc;
use sync_telemetry::{components, log_event};

impl ReactorLoop {
    pub(super) async fn on_message(&mut self, text: &str) {
        match ServerMessage::parse(text) {
            Ok(message) => self.dispatch(message).await,
            Err(err) => {
                log_event!(warn, components::DISPATCHER, "Dropping undecodable message", error = %err);
            }
        }
    }

    async fn dispatch(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::InitOk { attrs, session_id } => {
                self.set_status(ConnectionStatus::Authenticated, None);
                self.backoff.reset();
                self.set_server_attrs(attrs);
                self.session_id = session_id;
                log_event!(info, components::DISPATCHER, "Session authenticated", session_id = ?self.session_id);
                self.flush_pending_messages();
                self.rejoin_rooms();
                self.notify_all();
            }
            ServerMessage::AddQueryExists { q } => {
                self.notify_query_once(&QueryHash::of(&q));
            }
            ServerMessage::AddQueryOk {
                q,
                result,
                processed_tx_id,
            } => self.on_add_query_ok(&q, &result, processed_tx_id),
            ServerMessage::RefreshOk {
                computations,
                attrs,
                processed_tx_id,
            } => self.on_refresh_ok(computations, attrs, processed_tx_id),
            ServerMessage::TransactOk {
                client_event_id,
                tx_id,
            } => self.on_transact_ok(client_event_id, tx_id),
            error @ ServerMessage::Error { .. } => self.on_error(error).await,
            ServerMessage::JoinRoomOk { room_id } => self.on_join_room_ok(&room_id),
            ServerMessage::JoinRoomError { room_id, error } => self.on_join_room_error(&room_id, error),
            ServerMessage::RefreshPresence { room_id, data } => self.on_refresh_presence(&room_id, &data),
            ServerMessage::PatchPresence { room_id, edits } => self.on_patch_presence(&room_id, &edits),
            ServerMessage::ServerBroadcast { room_id, topic, data } => {
                self.on_server_broadcast(&room_id, topic, data)
            }
            ServerMessage::Unknown => {
                log_event!(debug, components::DISPATCHER, "Ignoring unknown operation");
            }
        }
    }

    fn result_from_server(&self, result: &Value, processed_tx_id: Option<TxId>) -> QueryResult {
        let attrs = self.attrs.as_deref().cloned().unwrap_or_default();
        let store = self.ports.evaluator.build_snapshot(
            &attrs,
            extract_triples(result),
            self.config.cardinality_inference(),
        );
        QueryResult {
            store: Arc::new(store),
            page_info: page_info(result),
            aggregate: aggregate(result),
            processed_tx_id,
        }
    }

    fn on_add_query_ok(&mut self, q: &Query, result: &Value, processed_tx_id: Option<TxId>) {
        let hash = QueryHash::of(q);
        let result = self.result_from_server(result, processed_tx_id);
        if !self.set_query_result(&hash, result) {
            log_event!(debug, components::DISPATCHER, "Result for a released query", hash = %hash);
            return;
        }
        self.cleanup_processed();
        self.notify_one(&hash);
        self.notify_query_once(&hash);
        self.cleanup_aged();
    }

    fn on_refresh_ok(&mut self, computations: Vec<Computation>, attrs: Vec<Attr>, processed_tx_id: Option<TxId>) {
        self.set_server_attrs(attrs);
        self.cleanup_aged();
        for computation in computations {
            let hash = QueryHash::of(&computation.instaql_query);
            let result = self.result_from_server(&computation.instaql_result, processed_tx_id);
            self.set_query_result(&hash, result);
        }
        self.cleanup_processed();
        self.notify_all();
    }

    /// Send everything that waited for authentication: one `add-query` per
    /// interesting hash, then unacknowledged mutations in replay order.
    fn flush_pending_messages(&mut self) {
        for hash in self.interested_hashes() {
            self.send_add_query(&hash);
        }
        for event_id in self.pending.get().unsent() {
            self.send_mutation(event_id);
        }
    }

    async fn on_error(&mut self, message: ServerMessage) {
        let Some(payload) = message.error_payload() else {
            return;
        };
        let ServerMessage::Error {
            client_event_id,
            original_event,
            ..
        } = message
        else {
            return;
        };

        if let Some(event_id) = client_event_id.filter(|id| self.pending.get().contains(id)) {
            self.handle_mutation_error(MutationStatus::Error, event_id, payload);
            return;
        }

        let original = original_event.unwrap_or(Value::Null);
        match original.get("op").and_then(Value::as_str) {
            Some("add-query") => match original.get("q") {
                Some(q) => self.notify_query_error(&QueryHash::of(q), payload),
                None => self.log_unhandled(client_event_id, &payload),
            },
            Some("init") => {
                if is_missing_app_user(&payload) {
                    log_event!(warn, components::DISPATCHER, "Cached user no longer exists; signing out");
                    if let Err(err) = self.change_current_user(None).await {
                        log_event!(warn, components::DISPATCHER, "Failed to drop cached user", error = %err);
                    }
                    return;
                }
                log_event!(error, components::DISPATCHER, "Handshake rejected", message = %payload.message);
                self.set_status(ConnectionStatus::Errored, Some(payload));
                self.notify_all();
            }
            _ => self.log_unhandled(client_event_id, &payload),
        }
    }

    fn log_unhandled(&self, client_event_id: Option<EventId>, payload: &ErrorPayload) {
        log_event!(
            warn,
            components::DISPATCHER,
            "Unhandled server error",
            client_event_id = ?client_event_id,
            message = %payload.message
        );
    }
}

fn is_missing_app_user(payload: &ErrorPayload) -> bool {
    payload.error_type.as_deref() == Some("record-not-found")
        && payload
            .hint
            .as_ref()
            .and_then(|hint| hint.get("record-type"))
            .and_then(Value::as_str)
            == Some("app-user")
}
