//! # Query Subscriptions
//!
//! The durable half of the query cache: one entry per query hash holding the
//! last synced result, plus the merge-on-load and persistence codecs.

use super::errors::ErrorPayload;
use super::snapshot::Snapshot;
use super::value_objects::{EventId, Query, QueryHash, Timestamp, TxId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// What a query read produces.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryData {
    /// Result tree
    pub data: Value,
    /// Cursor information from the server
    pub page_info: Option<Value>,
    /// Aggregate values from the server
    pub aggregate: Option<Value>,
}

/// Delivered to query listeners: a result or an error, never a panic.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResponse {
    /// Projected result
    Data(QueryData),
    /// Query or connection error
    Error(ErrorPayload),
}

impl QueryResponse {
    /// The data, if this is not an error.
    pub fn data(&self) -> Option<&QueryData> {
        match self {
            Self::Data(data) => Some(data),
            Self::Error(_) => None,
        }
    }
}

/// Last synced result of a query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    /// Facts returned by the server
    pub store: Arc<Snapshot>,
    /// Cursor information from the server
    pub page_info: Option<Value>,
    /// Aggregate values from the server
    pub aggregate: Option<Value>,
    /// Highest server transaction already reflected in `store`
    pub processed_tx_id: Option<TxId>,
}

impl QueryResult {
    /// A result with no facts, used before the server has answered.
    pub fn local(store: Snapshot) -> Self {
        Self {
            store: Arc::new(store),
            page_info: None,
            aggregate: None,
            processed_tx_id: None,
        }
    }
}

/// One cached query.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySub {
    /// The query shape as registered
    pub query: Query,
    /// Last synced result, if any
    pub result: Option<QueryResult>,
    /// Event id of the `add-query` request
    pub event_id: EventId,
    /// Last time a caller asked for this query
    pub last_accessed: Timestamp,
}

impl QuerySub {
    /// Fresh entry without a result.
    pub fn new(query: Query, now: Timestamp) -> Self {
        Self {
            query,
            result: None,
            event_id: EventId::new(),
            last_accessed: now,
        }
    }
}

/// Subscription map keyed by query hash.
pub type QuerySubs = BTreeMap<QueryHash, QuerySub>;

/// Minimum processed transaction id over subscriptions with a result.
///
/// A result built locally (no processed id) counts as zero while `is_live`
/// holds for its hash, since someone is looking at it and it reflects no
/// server transaction yet. Otherwise it is skipped. `None` when nothing counts.
pub fn min_processed_tx_id(subs: &QuerySubs, is_live: impl Fn(&QueryHash) -> bool) -> Option<TxId> {
    subs.iter()
        .filter_map(|(hash, sub)| {
            let result = sub.result.as_ref()?;
            match result.processed_tx_id {
                Some(tx) => Some(tx),
                None => is_live(hash).then_some(0),
            }
        })
        .min()
}

/// Merge the durable copy into the in-memory map.
///
/// In-memory entries without a result borrow the stored result. Stored
/// entries nobody has subscribed to yet are re-admitted, most recently
/// accessed first, up to `limit`.
pub fn merge_on_load(mut stored: QuerySubs, memory: &QuerySubs, limit: usize) -> QuerySubs {
    let mut merged = memory.clone();

    for (hash, sub) in merged.iter_mut() {
        if sub.result.is_none() {
            if let Some(durable) = stored.get_mut(hash) {
                sub.result = durable.result.take();
            }
        }
    }

    let mut candidates: Vec<(QueryHash, QuerySub)> = stored
        .into_iter()
        .filter(|(hash, _)| !memory.contains_key(hash))
        .collect();
    candidates.sort_by(|a, b| b.1.last_accessed.cmp(&a.1.last_accessed));
    merged.extend(candidates.into_iter().take(limit));

    merged
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StoredResultRef<'a> {
    store: &'a Snapshot,
    page_info: &'a Option<Value>,
    aggregate: &'a Option<Value>,
    processed_tx_id: Option<TxId>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StoredSubRef<'a> {
    q: &'a Query,
    result: Option<StoredResultRef<'a>>,
    event_id: EventId,
    last_accessed: Timestamp,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredResult {
    store: Snapshot,
    #[serde(default)]
    page_info: Option<Value>,
    #[serde(default)]
    aggregate: Option<Value>,
    #[serde(default)]
    processed_tx_id: Option<TxId>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredSub {
    q: Query,
    #[serde(default)]
    result: Option<StoredResult>,
    event_id: EventId,
    #[serde(default)]
    last_accessed: Timestamp,
}

/// Encode the subscription map for the key-value store.
pub fn encode_subs(subs: &QuerySubs) -> serde_json::Result<String> {
    let stored: BTreeMap<&QueryHash, StoredSubRef<'_>> = subs
        .iter()
        .map(|(hash, sub)| {
            let result = sub.result.as_ref().map(|r| StoredResultRef {
                store: &r.store,
                page_info: &r.page_info,
                aggregate: &r.aggregate,
                processed_tx_id: r.processed_tx_id,
            });
            (
                hash,
                StoredSubRef {
                    q: &sub.query,
                    result,
                    event_id: sub.event_id,
                    last_accessed: sub.last_accessed,
                },
            )
        })
        .collect();
    serde_json::to_string(&stored)
}

/// Decode a subscription map written by [`encode_subs`].
pub fn decode_subs(text: &str) -> serde_json::Result<QuerySubs> {
    let stored: BTreeMap<QueryHash, StoredSub> = serde_json::from_str(text)?;
    Ok(stored
        .into_iter()
        .map(|(hash, sub)| {
            let result = sub.result.map(|r| QueryResult {
                store: Arc::new(r.store),
                page_info: r.page_info,
                aggregate: r.aggregate,
                processed_tx_id: r.processed_tx_id,
            });
            (
                hash,
                QuerySub {
                    query: sub.q,
                    result,
                    event_id: sub.event_id,
                    last_accessed: sub.last_accessed,
                },
            )
        })
        .collect())
}
