//! # Attribute Reconciliation
//!
//! Mutations compiled offline may declare attributes the server already has
//! under locally fabricated ids, then reference those ids in fact edits.
//! Reconciliation maps each such local id to the server's id and drops the
//! redundant declaration.
//!
//! ## Algorithm
//!
//! For each `add-attr` step:
//! 1. A server attribute with the same forward `(etype, label)` exists:
//!    map local id → server id, drop the step.
//! 2. Otherwise, for refs, a server attribute whose *reverse* identity is
//!    `(etype, label)` exists: map the id, remember that fact direction must be
//!    swapped, drop the step.
//! 3. Otherwise keep the step.
//!
//! Attributes still marked unsynced are local speculation, never a match.
//!
//! Every later fact edit has its attribute id rewritten through the mapping.
//! The mapping is shared across the whole queue, so a declaration in one
//! mutation rewrites references in later ones.

use super::attrs::{find_by_forward, find_by_reverse, AttrId, AttrMap, ValueType};
use super::mutation::{MutationQueue, PendingMutation};
use super::steps::EditStep;
use super::value_objects::EventId;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Rewrites edit steps against a server attribute mapping.
#[derive(Debug)]
pub struct Reconciler<'a> {
    attrs: &'a AttrMap,
    mapping: HashMap<AttrId, AttrId>,
    swapped: HashSet<AttrId>,
}

impl<'a> Reconciler<'a> {
    /// Start with an empty mapping.
    pub fn new(attrs: &'a AttrMap) -> Self {
        Self {
            attrs,
            mapping: HashMap::new(),
            swapped: HashSet::new(),
        }
    }

    /// Server id recorded for a local id.
    pub fn mapped(&self, local: &AttrId) -> Option<AttrId> {
        self.mapping.get(local).copied()
    }

    /// Rewrite one mutation's steps.
    pub fn rewrite(&mut self, steps: &[EditStep]) -> Vec<EditStep> {
        let mut out = Vec::with_capacity(steps.len());
        for step in steps {
            if let EditStep::AddAttr { attr } = step {
                let (etype, label) = (attr.etype(), attr.label());
                if let Some(existing) = find_by_forward(self.attrs, etype, label).filter(|a| !a.is_unsynced) {
                    self.mapping.insert(attr.id, existing.id);
                    continue;
                }
                if attr.value_type == ValueType::Ref {
                    if let Some(reverse) = find_by_reverse(self.attrs, etype, label).filter(|a| !a.is_unsynced) {
                        self.mapping.insert(attr.id, reverse.id);
                        self.swapped.insert(attr.id);
                        continue;
                    }
                }
            }
            out.push(self.rewrite_step(step));
        }
        out
    }

    fn rewrite_step(&self, step: &EditStep) -> EditStep {
        match step {
            EditStep::AddTriple { entity, attr_id, value } => {
                let (entity, attr_id, value) = self.rewrite_fact(entity, attr_id, value);
                EditStep::AddTriple { entity, attr_id, value }
            }
            EditStep::RetractTriple { entity, attr_id, value } => {
                let (entity, attr_id, value) = self.rewrite_fact(entity, attr_id, value);
                EditStep::RetractTriple { entity, attr_id, value }
            }
            EditStep::UpdateAttr { id, changes } => EditStep::UpdateAttr {
                id: self.mapped(id).unwrap_or(*id),
                changes: changes.clone(),
            },
            EditStep::DeleteAttr { id } => EditStep::DeleteAttr {
                id: self.mapped(id).unwrap_or(*id),
            },
            other => other.clone(),
        }
    }

    fn rewrite_fact(&self, entity: &str, attr_id: &AttrId, value: &Value) -> (String, AttrId, Value) {
        let Some(server_id) = self.mapped(attr_id) else {
            return (entity.to_string(), *attr_id, value.clone());
        };
        match value {
            Value::String(target) if self.swapped.contains(attr_id) => {
                (target.clone(), server_id, Value::String(entity.to_string()))
            }
            _ => (entity.to_string(), server_id, value.clone()),
        }
    }
}

/// Rewrite every queued mutation in replay order.
///
/// Without a server mapping the steps are returned unchanged.
pub fn rewrite_sorted(attrs: Option<&AttrMap>, queue: &MutationQueue) -> Vec<(EventId, PendingMutation)> {
    let sorted = queue.sorted();
    let Some(attrs) = attrs else {
        return sorted.into_iter().map(|(id, m)| (id, m.clone())).collect();
    };
    let mut reconciler = Reconciler::new(attrs);
    sorted
        .into_iter()
        .map(|(id, m)| {
            let tx_steps = reconciler.rewrite(&m.tx_steps);
            (id, PendingMutation { tx_steps, ..m.clone() })
        })
        .collect()
}
