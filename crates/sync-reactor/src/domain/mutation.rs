//! # Pending Mutation Queue
//!
//! Client-side write-ahead log of mutations not yet reflected in every live
//! query. Entries replay in `(order, event id)` order.

use super::errors::ErrorPayload;
use super::steps::EditStep;
use super::value_objects::{EventId, Timestamp, TxId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// One queued mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PendingMutation {
    /// Compiled edit steps; empty when compilation failed
    pub tx_steps: Vec<EditStep>,
    /// Creation time
    pub created: Timestamp,
    /// Replay position
    pub order: u64,
    /// Server transaction id, once acknowledged
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_id: Option<TxId>,
    /// Acknowledgement time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed: Option<Timestamp>,
    /// Compile failure, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
}

impl PendingMutation {
    /// Whether a synced result at `processed_tx_id` already contains this write.
    ///
    /// Results that never came from the server (`None`) contain nothing.
    pub fn is_reflected_in(&self, processed_tx_id: Option<TxId>) -> bool {
        match (self.tx_id, processed_tx_id) {
            (Some(tx), Some(processed)) => tx <= processed,
            _ => false,
        }
    }
}

/// Timeout for a mutation sent while `pending` entries are queued.
pub fn mutation_timeout(base_ms: u64, pending: usize) -> Duration {
    let scaled = base_ms.saturating_mul(pending as u64);
    Duration::from_millis(scaled.max(base_ms))
}

/// The queue, keyed by event id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MutationQueue {
    entries: BTreeMap<EventId, PendingMutation>,
}

impl MutationQueue {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry for `event_id`.
    pub fn get(&self, event_id: &EventId) -> Option<&PendingMutation> {
        self.entries.get(event_id)
    }

    /// Whether `event_id` is queued.
    pub fn contains(&self, event_id: &EventId) -> bool {
        self.entries.contains_key(event_id)
    }

    /// Entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&EventId, &PendingMutation)> {
        self.entries.iter()
    }

    /// The order the next entry gets: one past the largest, starting at 1.
    pub fn next_order(&self) -> u64 {
        self.entries.values().map(|m| m.order).max().unwrap_or(0) + 1
    }

    /// Append a mutation with the next order. Returns its event id.
    pub fn push(&mut self, tx_steps: Vec<EditStep>, error: Option<ErrorPayload>, now: Timestamp) -> EventId {
        let event_id = EventId::new();
        self.push_with_id(event_id, tx_steps, error, now);
        event_id
    }

    /// Append a mutation under a caller-chosen event id.
    pub fn push_with_id(
        &mut self,
        event_id: EventId,
        tx_steps: Vec<EditStep>,
        error: Option<ErrorPayload>,
        now: Timestamp,
    ) {
        let mutation = PendingMutation {
            tx_steps,
            created: now,
            order: self.next_order(),
            tx_id: None,
            confirmed: None,
            error,
        };
        self.entries.insert(event_id, mutation);
    }

    /// Insert or replace an entry.
    pub fn insert(&mut self, event_id: EventId, mutation: PendingMutation) {
        self.entries.insert(event_id, mutation);
    }

    /// Remove an entry.
    pub fn remove(&mut self, event_id: &EventId) -> Option<PendingMutation> {
        self.entries.remove(event_id)
    }

    /// Entries sorted by `(order, event id)`.
    pub fn sorted(&self) -> Vec<(EventId, &PendingMutation)> {
        let mut entries: Vec<(EventId, &PendingMutation)> =
            self.entries.iter().map(|(id, m)| (*id, m)).collect();
        entries.sort_by(|a, b| a.1.order.cmp(&b.1.order).then(a.0.cmp(&b.0)));
        entries
    }

    /// Event ids of entries the server has not acknowledged, in replay order.
    pub fn unsent(&self) -> Vec<EventId> {
        self.sorted()
            .into_iter()
            .filter(|(_, m)| m.tx_id.is_none())
            .map(|(id, _)| id)
            .collect()
    }

    /// Record the server's acknowledgement. Returns false for unknown ids.
    pub fn confirm(&mut self, event_id: &EventId, tx_id: TxId, now: Timestamp) -> bool {
        match self.entries.get_mut(event_id) {
            Some(m) => {
                m.tx_id = Some(tx_id);
                m.confirmed = Some(now);
                true
            }
            None => false,
        }
    }

    /// Drop acknowledged entries every live query already reflects.
    pub fn prune_processed(&mut self, min_processed_tx_id: TxId) -> Vec<EventId> {
        let doomed: Vec<EventId> = self
            .entries
            .iter()
            .filter(|(_, m)| m.tx_id.is_some_and(|tx| tx <= min_processed_tx_id))
            .map(|(id, _)| *id)
            .collect();
        for id in &doomed {
            self.entries.remove(id);
        }
        doomed
    }

    /// Once the queue holds more than `threshold` entries, drop acknowledged
    /// entries confirmed more than `ttl_ms` ago.
    ///
    /// Acknowledged entries without a confirmation time count as confirmed at
    /// time zero. Unacknowledged entries are never dropped here.
    pub fn prune_aged(&mut self, now: Timestamp, ttl_ms: u64, threshold: usize) -> Vec<EventId> {
        if self.entries.len() <= threshold {
            return Vec::new();
        }
        let doomed: Vec<EventId> = self
            .entries
            .iter()
            .filter(|(_, m)| {
                m.tx_id.is_some() && now.saturating_sub(m.confirmed.unwrap_or(0)) > ttl_ms
            })
            .map(|(id, _)| *id)
            .collect();
        for id in &doomed {
            self.entries.remove(id);
        }
        doomed
    }

    /// Union of the stored queue and the in-memory one; memory wins on
    /// conflicts. Also returns stored, unacknowledged entries memory did not
    /// know about, in replay order, so the caller can deliver them.
    pub fn merge_on_load(stored: MutationQueue, memory: &MutationQueue) -> (MutationQueue, Vec<EventId>) {
        let resend: Vec<EventId> = stored
            .unsent()
            .into_iter()
            .filter(|id| !memory.contains(id))
            .collect();
        let mut merged = stored;
        for (id, m) in memory.iter() {
            merged.insert(*id, m.clone());
        }
        (merged, resend)
    }
}
