//! # Query Subscription Cache
//!
//! Live listeners and one-shot waiters share one cache entry and one
//! `add-query` per query hash. Results are projections: the last synced
//! snapshot with every pending mutation it does not yet reflect applied on
//! top, memoized on the versions of both durable collections.

use super::commands::{LoopEvent, QueryListener};
use super::event_loop::{MemoView, QueryOnceWaiter, ReactorLoop};
use crate::domain::reconcile::rewrite_sorted;
use crate::domain::{
    ClientMessage, ConnectionStatus, Deferred, ErrorPayload, Query, QueryData, QueryHash,
    QueryResponse, QueryResult, QuerySub, ReactorError, Snapshot,
};
use sync_telemetry::log_query_event;

/// Reply to a one-shot query.
pub(super) type ReadReply = Deferred<Result<QueryData, ReactorError>>;

impl ReactorLoop {
    pub(super) fn subscribe_query(&mut self, query: Query, mut listener: QueryListener) {
        let hash = QueryHash::of(&query);
        let first_interest = !self.has_interest(&hash);
        self.ensure_sub(&hash, &query);

        if let Some(response) = self.data_for_query(&hash) {
            if listener.tx.send(response.clone()).is_ok() {
                listener.last = Some(response);
            }
        }
        let group = self.listeners.entry(hash.clone()).or_default();
        group.push(listener);
        log_query_event!(debug, "Listener attached", hash, listeners = group.len());

        if first_interest {
            self.send_add_query(&hash);
        }
    }

    pub(super) fn unsubscribe(&mut self, hash: &QueryHash, listener_id: u64) {
        if let Some(group) = self.listeners.get_mut(hash) {
            group.retain(|l| l.id != listener_id);
            if group.is_empty() {
                self.listeners.remove(hash);
            }
        }
        self.release_if_unused(hash);
    }

    pub(super) fn query_once(&mut self, query: Query, mut reply: ReadReply) {
        let hash = QueryHash::of(&query);

        if !self.is_online {
            if self.is_loaded() {
                self.resolve_locally(&hash, &query, &mut reply);
            } else {
                self.reads_before_load.push((query, reply));
            }
            return;
        }
        if self.status == ConnectionStatus::Errored {
            reply.reject(ReactorError::Connection(self.status_error.clone().unwrap_or_default()));
            return;
        }
        if self.listeners.get(&hash).is_some_and(|group| !group.is_empty()) {
            if let Some(response) = self.data_for_query(&hash) {
                settle_read(&mut reply, response);
                return;
            }
        }

        let first_interest = !self.has_interest(&hash);
        self.ensure_sub(&hash, &query);
        self.next_request_id += 1;
        let request_id = self.next_request_id;
        let waiters = self.query_once.entry(hash.clone()).or_default();
        waiters.retain(|w| !w.reply.is_abandoned());
        waiters.push(QueryOnceWaiter {
            request_id,
            query,
            reply,
        });
        log_query_event!(debug, "One-shot query waiting for server", hash, request_id = request_id);

        if first_interest {
            self.send_add_query(&hash);
        }
        self.post_after(
            self.config.query_once_timeout(),
            LoopEvent::QueryOnceTimeout { hash, request_id },
        );
    }

    pub(super) fn on_query_once_timeout(&mut self, hash: &QueryHash, request_id: u64) {
        let Some(waiters) = self.query_once.get_mut(hash) else {
            return;
        };
        let Some(position) = waiters.iter().position(|w| w.request_id == request_id) else {
            return;
        };
        let mut waiter = waiters.remove(position);
        if waiters.is_empty() {
            self.query_once.remove(hash);
        }
        log_query_event!(warn, "One-shot query timed out", hash, request_id = request_id);
        waiter.reply.reject(ReactorError::QueryTimeout { hash: hash.clone() });
        self.release_if_unused(hash);
    }

    /// Answer every one-shot waiter from local data.
    pub(super) fn resolve_waiters_locally(&mut self) {
        let drained: Vec<(QueryHash, Vec<QueryOnceWaiter>)> = self.query_once.drain().collect();
        for (hash, waiters) in drained {
            for mut waiter in waiters {
                self.resolve_locally(&hash, &waiter.query, &mut waiter.reply);
            }
            self.release_if_unused(&hash);
        }
    }

    /// Re-issue reads that arrived before the durable state was loaded.
    pub(super) fn replay_reads_before_load(&mut self) {
        for (query, reply) in std::mem::take(&mut self.reads_before_load) {
            self.query_once(query, reply);
        }
    }

    fn resolve_locally(&mut self, hash: &QueryHash, query: &Query, reply: &mut ReadReply) {
        let response = match self.data_for_query(hash) {
            Some(response) => response,
            None => self.project(query, &QueryResult::local(self.empty_snapshot())),
        };
        settle_read(reply, response);
    }

    pub(super) fn has_interest(&self, hash: &QueryHash) -> bool {
        self.listeners.get(hash).is_some_and(|g| !g.is_empty())
            || self.query_once.get(hash).is_some_and(|w| !w.is_empty())
    }

    /// Make sure a cache entry exists. Offline entries get an empty local
    /// result so views are computable right away, but only once the durable
    /// copy is merged: before that the stored result may still fill it.
    fn ensure_sub(&mut self, hash: &QueryHash, query: &Query) {
        if !self.query_subs.get().contains_key(hash) {
            let sub = QuerySub::new(query.clone(), self.ports.clock.now());
            self.query_subs.update(|subs| {
                subs.insert(hash.clone(), sub);
            });
        }
        if self.query_subs.is_loaded() {
            self.fill_local_results(std::slice::from_ref(hash));
        }
    }

    /// Give listened-to entries still lacking a result an empty local one
    /// while offline.
    pub(super) fn fill_local_results(&mut self, hashes: &[QueryHash]) {
        if self.is_online {
            return;
        }
        let missing: Vec<&QueryHash> = hashes
            .iter()
            .filter(|hash| self.query_subs.get().get(*hash).is_some_and(|sub| sub.result.is_none()))
            .collect();
        if missing.is_empty() {
            return;
        }
        let local = QueryResult::local(self.empty_snapshot());
        self.query_subs.update(|subs| {
            for hash in missing {
                if let Some(sub) = subs.get_mut(hash) {
                    sub.result = Some(local.clone());
                }
            }
        });
    }

    /// Drop the cache entry once nobody listens or waits.
    pub(super) fn release_if_unused(&mut self, hash: &QueryHash) {
        if self.has_interest(hash) {
            return;
        }
        self.views.remove(hash);
        let Some(sub) = self.query_subs.get().get(hash) else {
            return;
        };
        let (event_id, q) = (sub.event_id, sub.query.clone());
        self.query_subs.update(|subs| {
            subs.remove(hash);
        });
        self.send_authed(event_id, ClientMessage::RemoveQuery { q });
        log_query_event!(debug, "Query released", hash);
    }

    pub(super) fn send_add_query(&self, hash: &QueryHash) -> bool {
        let Some(sub) = self.query_subs.get().get(hash) else {
            return false;
        };
        self.send_authed(sub.event_id, ClientMessage::AddQuery { q: sub.query.clone() })
    }

    /// Store a server result. Returns false for queries nobody registered.
    pub(super) fn set_query_result(&mut self, hash: &QueryHash, result: QueryResult) -> bool {
        if !self.query_subs.get().contains_key(hash) {
            return false;
        }
        self.query_subs.update(|subs| {
            if let Some(sub) = subs.get_mut(hash) {
                sub.result = Some(result);
            }
        });
        true
    }

    /// Current projection of a cached query, memoized on collection versions.
    pub(super) fn data_for_query(&mut self, hash: &QueryHash) -> Option<QueryResponse> {
        if self.status == ConnectionStatus::Errored {
            return Some(QueryResponse::Error(self.status_error.clone().unwrap_or_default()));
        }
        let versions = (self.query_subs.version(), self.pending.version());
        if let Some(memo) = self.views.get(hash) {
            if memo.versions == versions {
                return Some(memo.response.clone());
            }
        }
        let response = {
            let sub = self.query_subs.get().get(hash)?;
            let result = sub.result.as_ref()?;
            self.project(&sub.query, result)
        };
        self.views.insert(
            hash.clone(),
            MemoView {
                versions,
                response: response.clone(),
            },
        );
        Some(response)
    }

    /// Apply pending mutations the result does not reflect, then evaluate.
    fn project(&self, query: &Query, result: &QueryResult) -> QueryResponse {
        let evaluator = &self.ports.evaluator;
        let rewritten = rewrite_sorted(Some(result.store.attrs()), self.pending.get());
        let mut optimistic: Option<Snapshot> = None;
        for (_, mutation) in rewritten {
            if mutation.error.is_some() || mutation.is_reflected_in(result.processed_tx_id) {
                continue;
            }
            let next = {
                let base = optimistic.as_ref().unwrap_or(&*result.store);
                evaluator.transact(base, &mutation.tx_steps)
            };
            optimistic = Some(next);
        }
        let snapshot = optimistic.as_ref().unwrap_or(&*result.store);
        match evaluator.evaluate(snapshot, query) {
            Ok(data) => QueryResponse::Data(QueryData {
                data,
                page_info: result.page_info.clone(),
                aggregate: result.aggregate.clone(),
            }),
            Err(err) => QueryResponse::Error(ErrorPayload::from(err)),
        }
    }

    pub(super) fn notify_one(&mut self, hash: &QueryHash) {
        if !self.listeners.get(hash).is_some_and(|g| !g.is_empty()) {
            return;
        }
        let Some(response) = self.data_for_query(hash) else {
            return;
        };
        self.deliver(hash, &response);
    }

    /// Recompute every live query. Suppressed until durable state is loaded.
    pub(super) fn notify_all(&mut self) {
        if !self.is_loaded() {
            return;
        }
        let hashes: Vec<QueryHash> = self.listeners.keys().cloned().collect();
        for hash in hashes {
            self.notify_one(&hash);
        }
    }

    /// Send `response` to listeners that have not seen it yet.
    fn deliver(&mut self, hash: &QueryHash, response: &QueryResponse) {
        let Some(group) = self.listeners.get_mut(hash) else {
            return;
        };
        group.retain_mut(|listener| {
            if listener.last.as_ref() == Some(response) {
                return true;
            }
            if listener.tx.send(response.clone()).is_err() {
                return false;
            }
            listener.last = Some(response.clone());
            true
        });
        if group.is_empty() {
            self.listeners.remove(hash);
        }
    }

    /// Resolve one-shot waiters once the server has answered.
    pub(super) fn notify_query_once(&mut self, hash: &QueryHash) {
        let Some(waiters) = self.query_once.remove(hash) else {
            return;
        };
        let Some(response) = self.data_for_query(hash) else {
            self.query_once.insert(hash.clone(), waiters);
            return;
        };
        for mut waiter in waiters {
            settle_read(&mut waiter.reply, response.clone());
        }
        self.release_if_unused(hash);
    }

    /// Route a failed `add-query` to everyone interested in the hash.
    pub(super) fn notify_query_error(&mut self, hash: &QueryHash, payload: ErrorPayload) {
        log_query_event!(warn, "Query rejected by server", hash, message = %payload.message);
        self.deliver(hash, &QueryResponse::Error(payload.clone()));
        if let Some(waiters) = self.query_once.remove(hash) {
            for mut waiter in waiters {
                waiter.reply.reject(ReactorError::Query(payload.clone()));
            }
        }
        self.release_if_unused(hash);
    }

    /// Queries that need an `add-query` on a fresh session.
    pub(super) fn interested_hashes(&self) -> Vec<QueryHash> {
        let mut hashes: Vec<QueryHash> = self
            .listeners
            .keys()
            .chain(self.query_once.keys())
            .cloned()
            .collect();
        hashes.sort();
        hashes.dedup();
        hashes
    }
}

fn settle_read(reply: &mut ReadReply, response: QueryResponse) {
    match response {
        QueryResponse::Data(data) => reply.resolve(data),
        QueryResponse::Error(payload) => reply.reject(ReactorError::Query(payload)),
    };
}
