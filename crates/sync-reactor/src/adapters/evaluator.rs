//! Reference query evaluator.
//!
//! Understands the common shape `{etype: {"$": {"where": {...}}, link: {...}}}`:
//! top-level entity types, equality filters on attribute labels, and links
//! followed in either direction as nested queries. Blob attributes appear
//! as plain values; links appear as arrays, or as a single object (or null)
//! for cardinality-one links when cardinality inference is on.

use crate::domain::{
    find_by_forward, find_by_reverse, Attr, AttrMap, Cardinality, EditStep, EvalError, Query,
    Snapshot, Triple, ValueType,
};
use crate::ports::QueryEvaluator;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Evaluator over [`Snapshot`]'s fact index.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicEvaluator;

impl QueryEvaluator for BasicEvaluator {
    fn build_snapshot(&self, attrs: &AttrMap, triples: Vec<Triple>, cardinality_inference: bool) -> Snapshot {
        let mut snapshot = Snapshot::empty(attrs.clone(), cardinality_inference);
        for triple in triples {
            snapshot.insert(triple);
        }
        snapshot
    }

    fn transact(&self, snapshot: &Snapshot, steps: &[EditStep]) -> Snapshot {
        let mut next = snapshot.clone();
        for step in steps {
            match step {
                EditStep::AddAttr { attr } => next.upsert_attr(attr.clone()),
                EditStep::UpdateAttr { id, changes } => {
                    if let Some(patched) = next.attrs().get(id).map(|a| a.patched(changes)) {
                        next.upsert_attr(patched);
                    }
                }
                EditStep::DeleteAttr { id } => next.remove_attr(id),
                EditStep::AddTriple { entity, attr_id, value } => next.insert(Triple {
                    entity: entity.clone(),
                    attr_id: *attr_id,
                    value: value.clone(),
                    created_at: None,
                }),
                EditStep::RetractTriple { entity, attr_id, value } => next.retract(entity, attr_id, value),
                EditStep::DeleteEntity { entity, .. } => next.remove_entity(entity),
            }
        }
        next
    }

    fn evaluate(&self, snapshot: &Snapshot, query: &Query) -> Result<Value, EvalError> {
        let Value::Object(forms) = query else {
            return Err(EvalError::InvalidQuery("query must be an object".to_string()));
        };
        let mut out = Map::new();
        for (etype, form) in forms {
            let entities = members(snapshot, etype);
            let rows = select(snapshot, etype, entities, form)?;
            out.insert(etype.clone(), Value::Array(rows));
        }
        Ok(Value::Object(out))
    }
}

/// Entities holding at least one fact of an `etype` attribute.
fn members(snapshot: &Snapshot, etype: &str) -> Vec<String> {
    let attrs = snapshot.attrs();
    snapshot
        .facts()
        .iter()
        .filter(|(_, by_attr)| {
            by_attr
                .keys()
                .any(|id| attrs.get(id).is_some_and(|a| a.etype() == etype))
        })
        .map(|(entity, _)| entity.clone())
        .collect()
}

fn select(snapshot: &Snapshot, etype: &str, entities: Vec<String>, form: &Value) -> Result<Vec<Value>, EvalError> {
    let filters = where_clause(form)?;
    let mut rows = Vec::new();
    for entity in entities {
        if matches_where(snapshot, etype, &entity, filters)? {
            rows.push(project(snapshot, etype, &entity, form)?);
        }
    }
    Ok(rows)
}

fn where_clause(form: &Value) -> Result<Option<&Map<String, Value>>, EvalError> {
    match form.get("$").and_then(|opts| opts.get("where")) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(filters)) => Ok(Some(filters)),
        Some(_) => Err(EvalError::InvalidQuery("where must be an object".to_string())),
    }
}

fn matches_where(
    snapshot: &Snapshot,
    etype: &str,
    entity: &str,
    filters: Option<&Map<String, Value>>,
) -> Result<bool, EvalError> {
    let Some(filters) = filters else {
        return Ok(true);
    };
    for (label, expected) in filters {
        if expected.is_object() || expected.is_array() {
            return Err(EvalError::InvalidQuery(format!("unsupported filter on {label}")));
        }
        let matched = if label == "id" {
            expected.as_str() == Some(entity)
        } else {
            let attrs = snapshot.attrs();
            match find_by_forward(attrs, etype, label) {
                Some(attr) => snapshot.values(entity, &attr.id).contains(expected),
                None => match find_by_reverse(attrs, etype, label) {
                    Some(attr) => referrers(snapshot, attr, entity)
                        .iter()
                        .any(|id| Some(id.as_str()) == expected.as_str()),
                    None => false,
                },
            }
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Entities whose `attr` points at `target`.
fn referrers(snapshot: &Snapshot, attr: &Attr, target: &str) -> Vec<String> {
    let wanted = Value::String(target.to_string());
    snapshot
        .facts()
        .iter()
        .filter(|(_, by_attr)| by_attr.get(&attr.id).is_some_and(|values| values.contains(&wanted)))
        .map(|(entity, _)| entity.clone())
        .collect()
}

fn project(snapshot: &Snapshot, etype: &str, entity: &str, form: &Value) -> Result<Value, EvalError> {
    let attrs = snapshot.attrs();
    let mut row = Map::new();
    row.insert("id".to_string(), Value::String(entity.to_string()));

    if let Some(by_attr) = snapshot.facts().get(entity) {
        for (attr_id, values) in by_attr {
            let Some(attr) = attrs.get(attr_id) else { continue };
            if attr.value_type != ValueType::Blob || attr.etype() != etype || attr.label() == "id" {
                continue;
            }
            if let Some(value) = values.last() {
                row.insert(attr.label().to_string(), value.clone());
            }
        }
    }

    let Some(links) = form.as_object() else {
        return Ok(Value::Object(row));
    };
    for (label, sub_form) in links.iter().filter(|(label, _)| label.as_str() != "$") {
        let (target_etype, targets, one) = if let Some(attr) = find_by_forward(attrs, etype, label) {
            let targets: BTreeSet<String> = snapshot
                .values(entity, &attr.id)
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect();
            let target_etype = attr
                .reverse_identity
                .as_ref()
                .map(|r| r.etype.clone())
                .unwrap_or_default();
            (target_etype, targets, attr.cardinality == Cardinality::One)
        } else if let Some(attr) = find_by_reverse(attrs, etype, label) {
            let targets: BTreeSet<String> = referrers(snapshot, attr, entity).into_iter().collect();
            (attr.etype().to_string(), targets, attr.unique)
        } else {
            return Err(EvalError::InvalidQuery(format!("unknown link {etype}.{label}")));
        };

        let nested = select(snapshot, &target_etype, targets.into_iter().collect(), sub_form)?;
        let value = if one && snapshot.cardinality_inference() {
            nested.into_iter().next().unwrap_or(Value::Null)
        } else {
            Value::Array(nested)
        };
        row.insert(label.clone(), value);
    }
    Ok(Value::Object(row))
}
