//! # Graph Snapshot
//!
//! An immutable value combining facts with the attribute mapping they were
//! built against. Evaluators produce new snapshots by cloning and editing;
//! the Reactor shares them behind `Arc` and never edits one in place.

use super::attrs::{Attr, AttrId, AttrMap, Cardinality};
use super::steps::{EntityId, Triple};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Entity → attribute → values.
pub type FactIndex = BTreeMap<EntityId, BTreeMap<AttrId, Vec<Value>>>;

/// Graph snapshot ("store").
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Snapshot {
    attrs: AttrMap,
    facts: FactIndex,
    #[serde(default)]
    cardinality_inference: bool,
}

impl Snapshot {
    /// Empty snapshot over `attrs`.
    pub fn empty(attrs: AttrMap, cardinality_inference: bool) -> Self {
        Self {
            attrs,
            facts: FactIndex::new(),
            cardinality_inference,
        }
    }

    /// Attribute mapping the snapshot was built against.
    pub fn attrs(&self) -> &AttrMap {
        &self.attrs
    }

    /// Replace the attribute mapping.
    pub fn set_attrs(&mut self, attrs: AttrMap) {
        self.attrs = attrs;
    }

    /// Add or replace one attribute.
    pub fn upsert_attr(&mut self, attr: Attr) {
        self.attrs.insert(attr.id, attr);
    }

    /// Remove an attribute together with its facts.
    pub fn remove_attr(&mut self, attr_id: &AttrId) {
        self.attrs.remove(attr_id);
        self.remove_attr_facts(attr_id);
    }

    /// Whether cardinality-one attributes collapse to a single value.
    pub fn cardinality_inference(&self) -> bool {
        self.cardinality_inference
    }

    /// All facts, indexed by entity.
    pub fn facts(&self) -> &FactIndex {
        &self.facts
    }

    /// Values of `attr_id` on `entity`.
    pub fn values(&self, entity: &str, attr_id: &AttrId) -> &[Value] {
        self.facts
            .get(entity)
            .and_then(|attrs| attrs.get(attr_id))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Number of stored facts.
    pub fn fact_count(&self) -> usize {
        self.facts
            .values()
            .flat_map(|attrs| attrs.values())
            .map(Vec::len)
            .sum()
    }

    /// Assert a fact. Cardinality-one attributes keep only the newest value.
    pub fn insert(&mut self, triple: Triple) {
        let one = self
            .attrs
            .get(&triple.attr_id)
            .is_some_and(|a| a.cardinality == Cardinality::One);
        let values = self
            .facts
            .entry(triple.entity)
            .or_default()
            .entry(triple.attr_id)
            .or_default();
        if one {
            values.clear();
        }
        if !values.contains(&triple.value) {
            values.push(triple.value);
        }
    }

    /// Retract a fact. Empty entries are dropped.
    pub fn retract(&mut self, entity: &str, attr_id: &AttrId, value: &Value) {
        let Some(attrs) = self.facts.get_mut(entity) else {
            return;
        };
        if let Some(values) = attrs.get_mut(attr_id) {
            values.retain(|v| v != value);
            if values.is_empty() {
                attrs.remove(attr_id);
            }
        }
        if attrs.is_empty() {
            self.facts.remove(entity);
        }
    }

    /// Remove every fact about `entity`, and every ref pointing at it.
    pub fn remove_entity(&mut self, entity: &str) {
        self.facts.remove(entity);
        let target = Value::String(entity.to_string());
        for attrs in self.facts.values_mut() {
            for values in attrs.values_mut() {
                values.retain(|v| v != &target);
            }
            attrs.retain(|_, values| !values.is_empty());
        }
        self.facts.retain(|_, attrs| !attrs.is_empty());
    }

    /// Remove every fact of `attr_id`.
    pub fn remove_attr_facts(&mut self, attr_id: &AttrId) {
        for attrs in self.facts.values_mut() {
            attrs.remove(attr_id);
        }
        self.facts.retain(|_, attrs| !attrs.is_empty());
    }
}
