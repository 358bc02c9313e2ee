//! # Pending Mutation Queue
//!
//! Every write is compiled, appended to the durable queue and applied to
//! live views before the server has seen it. Delivery happens only while
//! authenticated; otherwise the mutation stays queued and is replayed, in
//! order, after the next `init-ok`.

use super::commands::{LoopEvent, MutationWaiter};
use super::event_loop::ReactorLoop;
use crate::domain::reconcile::rewrite_sorted;
use crate::domain::schema::merge_with_local;
use crate::domain::subscription::min_processed_tx_id;
use crate::domain::{
    mutation_timeout, Attr, AttrMap, ClientMessage, EditStep, ErrorPayload, EventId,
    MutationError, MutationStatus, Snapshot, TxChunk, TxId,
};
use crate::ports::CompileContext;
use std::sync::Arc;
use sync_telemetry::{components, log_event, log_mutation_event};

impl ReactorLoop {
    pub(super) fn push_transaction(&mut self, event_id: EventId, chunks: &[TxChunk], waiter: MutationWaiter) {
        let compiled = {
            let attrs = self.optimistic_attrs();
            let snapshots: Vec<&Snapshot> = self
                .query_subs
                .get()
                .values()
                .filter_map(|sub| sub.result.as_ref())
                .map(|result| result.store.as_ref())
                .collect();
            let ctx = CompileContext {
                attrs: &attrs,
                schema: self.config.schema.as_ref(),
                snapshots: &snapshots,
            };
            self.ports.compiler.compile(ctx, chunks)
        };
        let (tx_steps, error) = match compiled {
            Ok(steps) => (steps, None),
            Err(err) => {
                log_mutation_event!(warn, "Mutation failed to compile", event_id, error = %err);
                (Vec::new(), Some(ErrorPayload::from(err)))
            }
        };

        let now = self.ports.clock.now();
        self.pending
            .update(|queue| queue.push_with_id(event_id, tx_steps, error, now));
        self.mutation_waiters.insert(event_id, waiter);
        log_mutation_event!(debug, "Mutation queued", event_id, pending = self.pending.get().len());

        self.notify_all();
        self.publish_attrs();
        self.send_mutation(event_id);
    }

    /// Deliver one queued mutation, or report it as enqueued.
    pub(super) fn send_mutation(&mut self, event_id: EventId) {
        let Some(mutation) = self.pending.get().get(&event_id) else {
            return;
        };
        if let Some(error) = mutation.error.clone() {
            self.handle_mutation_error(MutationStatus::Error, event_id, error);
            return;
        }
        if !self.is_authenticated() {
            self.finish_transaction(event_id, MutationStatus::Enqueued, None);
            return;
        }
        let Some(tx_steps) = self.rewritten_steps(&event_id) else {
            return;
        };
        let timeout = mutation_timeout(self.config.mutation_timeout_base_ms, self.pending.get().len());
        self.send(event_id, ClientMessage::Transact { tx_steps });
        self.post_after(
            timeout,
            LoopEvent::MutationTimeout {
                event_id,
                generation: self.generation,
            },
        );
        log_mutation_event!(debug, "Mutation sent", event_id, timeout_ms = timeout.as_millis() as u64);
    }

    /// Steps of one mutation rewritten against the server attributes, with
    /// declarations from earlier queued mutations taken into account.
    fn rewritten_steps(&self, event_id: &EventId) -> Option<Vec<EditStep>> {
        rewrite_sorted(self.attrs.as_deref(), self.pending.get())
            .into_iter()
            .find(|(id, _)| id == event_id)
            .map(|(_, mutation)| mutation.tx_steps)
    }

    pub(super) fn on_mutation_timeout(&mut self, event_id: EventId, generation: u64) {
        if !self.is_online || generation != self.generation {
            return;
        }
        let acknowledged = match self.pending.get().get(&event_id) {
            Some(mutation) => mutation.tx_id.is_some(),
            None => return,
        };
        if acknowledged {
            return;
        }
        self.handle_mutation_error(
            MutationStatus::Timeout,
            event_id,
            ErrorPayload::message("Transaction timed out waiting for the server"),
        );
    }

    pub(super) fn handle_mutation_error(&mut self, status: MutationStatus, event_id: EventId, payload: ErrorPayload) {
        let Some(mutation) = self.pending.get().get(&event_id) else {
            return;
        };
        if status == MutationStatus::Timeout && mutation.tx_id.is_some() {
            return;
        }
        self.pending.update(|queue| queue.remove(&event_id));
        log_mutation_event!(warn, "Mutation failed", event_id, status = %status, message = %payload.message);

        self.notify_all();
        self.publish_attrs();
        let _ = self.outputs.mutation_errors.send(MutationError {
            event_id,
            status,
            payload: payload.clone(),
        });
        self.finish_transaction(event_id, status, Some(payload));
    }

    /// Report a lifecycle step. The deferred keeps the first terminal outcome.
    pub(super) fn finish_transaction(&mut self, event_id: EventId, status: MutationStatus, error: Option<ErrorPayload>) {
        let Some(waiter) = self.mutation_waiters.get_mut(&event_id) else {
            if !status.is_success() {
                log_mutation_event!(debug, "Mutation failed with nobody waiting", event_id, status = %status);
            }
            return;
        };
        waiter.status.send_replace(status);
        if status.is_success() {
            waiter.outcome.resolve(status);
        } else {
            waiter.outcome.reject(MutationError {
                event_id,
                status,
                payload: error.unwrap_or_default(),
            });
        }
        if status != MutationStatus::Enqueued {
            self.mutation_waiters.remove(&event_id);
        }
    }

    pub(super) fn on_transact_ok(&mut self, event_id: EventId, tx_id: TxId) {
        if !self.pending.get().contains(&event_id) {
            log_mutation_event!(debug, "Acknowledgement for unknown mutation", event_id, tx_id = tx_id);
            return;
        }
        let declared: Vec<Attr> = self
            .rewritten_steps(&event_id)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|step| match step {
                EditStep::AddAttr { attr } => Some(Attr {
                    is_unsynced: false,
                    ..attr
                }),
                _ => None,
            })
            .collect();

        let now = self.ports.clock.now();
        self.pending.update(|queue| queue.confirm(&event_id, tx_id, now));
        log_mutation_event!(debug, "Mutation acknowledged", event_id, tx_id = tx_id);
        self.cleanup_aged();

        if !declared.is_empty() {
            let mut attrs: AttrMap = self.attrs.as_deref().cloned().unwrap_or_default();
            attrs.extend(declared.into_iter().map(|attr| (attr.id, attr)));
            self.attrs = Some(Arc::new(attrs));
            self.publish_attrs();
        }
        self.finish_transaction(event_id, MutationStatus::Synced, None);
    }

    /// Drop acknowledged entries every cached result already reflects.
    pub(super) fn cleanup_processed(&mut self) {
        let min = min_processed_tx_id(self.query_subs.get(), |hash| self.has_interest(hash))
            .unwrap_or(TxId::MAX);
        let mut queue = self.pending.get().clone();
        let pruned = queue.prune_processed(min);
        if !pruned.is_empty() {
            self.pending.set(|_| queue);
            log_event!(debug, components::MUTATIONS, "Pruned reflected mutations", pruned = pruned.len(), min_processed = min);
        }
    }

    /// Age-based pruning for queues that outgrew the threshold.
    pub(super) fn cleanup_aged(&mut self) {
        if self.pending.get().len() <= self.config.pending_cleanup_threshold {
            return;
        }
        let now = self.ports.clock.now();
        let mut queue = self.pending.get().clone();
        let pruned = queue.prune_aged(now, self.config.confirmed_ttl_ms, self.config.pending_cleanup_threshold);
        if !pruned.is_empty() {
            self.pending.set(|_| queue);
            log_event!(debug, components::MUTATIONS, "Pruned aged mutations", pruned = pruned.len());
        }
    }

    /// Server attributes plus what queued mutations declare, patch or delete.
    pub(super) fn optimistic_attrs(&self) -> AttrMap {
        let mut attrs: AttrMap = self.attrs.as_deref().cloned().unwrap_or_default();
        let mut deleted = Vec::new();
        for (_, mutation) in self.pending.get().sorted() {
            for step in &mutation.tx_steps {
                match step {
                    EditStep::AddAttr { attr } => {
                        attrs.insert(attr.id, attr.clone());
                    }
                    EditStep::UpdateAttr { id, changes } => {
                        if let Some(patched) = attrs.get(id).map(|a| a.patched(changes)) {
                            attrs.insert(*id, patched);
                        }
                    }
                    EditStep::DeleteAttr { id } => deleted.push(*id),
                    _ => {}
                }
            }
        }
        for id in deleted {
            attrs.remove(&id);
        }
        attrs
    }

    pub(super) fn publish_attrs(&self) {
        self.outputs.attrs.send_replace(Arc::new(self.optimistic_attrs()));
    }

    /// Adopt the server's attributes, keeping local knowledge when a schema is set.
    pub(super) fn set_server_attrs(&mut self, server: Vec<Attr>) {
        let local = if self.config.schema.is_some() {
            self.attrs.as_deref()
        } else {
            None
        };
        let merged = merge_with_local(server, local);
        self.attrs = Some(Arc::new(merged));
        self.publish_attrs();
    }
}
