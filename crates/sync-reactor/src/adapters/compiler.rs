//! Reference mutation compiler.
//!
//! Turns [`TxChunk`]s into edit steps against the optimistic attribute
//! mapping. Labels nobody knows yet get a fabricated, unsynced blob
//! attribute declared in the same mutation; links must be known from the
//! mapping or the schema.

use crate::domain::{
    find_by_forward, find_by_reverse, Attr, AttrId, AttrMap, Cardinality, CompileError, EditStep,
    Schema, Snapshot, TxChunk, TxOp,
};
use crate::ports::{CompileContext, MutationCompiler};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Compiler for `update`, `merge`, `delete`, `link` and `unlink`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicCompiler;

impl MutationCompiler for BasicCompiler {
    fn compile(&self, ctx: CompileContext<'_>, chunks: &[TxChunk]) -> Result<Vec<EditStep>, CompileError> {
        let mut run = Compilation {
            attrs: ctx.attrs.clone(),
            schema: ctx.schema,
            snapshots: ctx.snapshots,
            declared: HashSet::new(),
            steps: Vec::new(),
        };
        for chunk in chunks {
            run.chunk(chunk)?;
        }
        Ok(run.steps)
    }
}

struct Compilation<'a> {
    attrs: AttrMap,
    schema: Option<&'a Schema>,
    snapshots: &'a [&'a Snapshot],
    declared: HashSet<AttrId>,
    steps: Vec<EditStep>,
}

/// Which way a link fact is stored.
enum Direction {
    Forward,
    Reverse,
}

impl Compilation<'_> {
    fn chunk(&mut self, chunk: &TxChunk) -> Result<(), CompileError> {
        if chunk.etype.is_empty() {
            return Err(CompileError::Malformed("missing entity type".to_string()));
        }
        if chunk.id.is_empty() {
            return Err(CompileError::Malformed(format!("missing id for {}", chunk.etype)));
        }
        for op in &chunk.ops {
            match op {
                TxOp::Update(fields) => self.set_fields(chunk, fields, false),
                TxOp::Merge(fields) => self.set_fields(chunk, fields, true),
                TxOp::Delete => self.steps.push(EditStep::DeleteEntity {
                    entity: chunk.id.clone(),
                    etype: Some(chunk.etype.clone()),
                }),
                TxOp::Link(links) => self.links(chunk, links, true)?,
                TxOp::Unlink(links) => self.links(chunk, links, false)?,
            }
        }
        Ok(())
    }

    fn set_fields(&mut self, chunk: &TxChunk, fields: &Map<String, Value>, merge: bool) {
        let id_attr = self.ensure_attr(&chunk.etype, "id");
        self.steps.push(EditStep::AddTriple {
            entity: chunk.id.clone(),
            attr_id: id_attr,
            value: Value::String(chunk.id.clone()),
        });
        for (label, value) in fields.iter().filter(|(label, _)| label.as_str() != "id") {
            let attr_id = self.ensure_attr(&chunk.etype, label);
            let value = if merge {
                let mut current = self.current_value(&chunk.id, &attr_id).unwrap_or(Value::Null);
                deep_merge(&mut current, value);
                current
            } else {
                value.clone()
            };
            self.steps.push(EditStep::AddTriple {
                entity: chunk.id.clone(),
                attr_id,
                value,
            });
        }
    }

    fn links(&mut self, chunk: &TxChunk, links: &Map<String, Value>, add: bool) -> Result<(), CompileError> {
        for (label, targets) in links {
            let targets = link_targets(targets)
                .ok_or_else(|| CompileError::Malformed(format!("link {label} needs an id or a list of ids")))?;
            let (attr_id, direction) = self.link_attr(&chunk.etype, label)?;
            for target in targets {
                let (entity, value) = match direction {
                    Direction::Forward => (chunk.id.clone(), target),
                    Direction::Reverse => (target, chunk.id.clone()),
                };
                let value = Value::String(value);
                self.steps.push(if add {
                    EditStep::AddTriple { entity, attr_id, value }
                } else {
                    EditStep::RetractTriple { entity, attr_id, value }
                });
            }
        }
        Ok(())
    }

    /// Attribute id for a blob label, declaring one when needed.
    fn ensure_attr(&mut self, etype: &str, label: &str) -> AttrId {
        if let Some(attr) = find_by_forward(&self.attrs, etype, label).cloned() {
            self.declare_if_unsynced(attr.clone());
            return attr.id;
        }
        let mut attr = if label == "id" {
            Attr::id_attr(etype)
        } else {
            Attr::blob(etype, label)
        }
        .unsynced();
        attr.checked_data_type = self
            .schema
            .and_then(|schema| schema.entities.get(etype))
            .and_then(|defs| defs.get(label))
            .and_then(|def| def.value_type.clone());
        let id = attr.id;
        self.attrs.insert(id, attr.clone());
        self.declare_if_unsynced(attr);
        id
    }

    fn link_attr(&mut self, etype: &str, label: &str) -> Result<(AttrId, Direction), CompileError> {
        if let Some(attr) = find_by_forward(&self.attrs, etype, label).cloned() {
            self.declare_if_unsynced(attr.clone());
            return Ok((attr.id, Direction::Forward));
        }
        if let Some(attr) = find_by_reverse(&self.attrs, etype, label).cloned() {
            self.declare_if_unsynced(attr.clone());
            return Ok((attr.id, Direction::Reverse));
        }
        let unknown = || CompileError::UnknownLink {
            etype: etype.to_string(),
            label: label.to_string(),
        };
        let schema = self.schema.ok_or_else(unknown)?;
        let (def, direction) = schema
            .links
            .iter()
            .find_map(|link| {
                if link.from == etype && link.forward == label {
                    Some((link, Direction::Forward))
                } else if link.to == etype && link.reverse == label {
                    Some((link, Direction::Reverse))
                } else {
                    None
                }
            })
            .ok_or_else(unknown)?;
        let mut attr = Attr::link(&def.from, &def.forward, &def.to, &def.reverse).unsynced();
        if !def.has_many {
            attr.cardinality = Cardinality::One;
        }
        let id = attr.id;
        self.attrs.insert(id, attr.clone());
        self.declare_if_unsynced(attr);
        Ok((id, direction))
    }

    fn declare_if_unsynced(&mut self, attr: Attr) {
        if attr.is_unsynced && self.declared.insert(attr.id) {
            self.steps.push(EditStep::AddAttr { attr });
        }
    }

    /// Latest value of `attr_id` on `entity`, earlier steps of this run first.
    fn current_value(&self, entity: &str, attr_id: &AttrId) -> Option<Value> {
        let pending = self.steps.iter().rev().find_map(|step| match step {
            EditStep::AddTriple {
                entity: e,
                attr_id: a,
                value,
            } if e == entity && a == attr_id => Some(value.clone()),
            _ => None,
        });
        pending.or_else(|| {
            self.snapshots
                .iter()
                .find_map(|snapshot| snapshot.values(entity, attr_id).last().cloned())
        })
    }
}

fn link_targets(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::String(id) => Some(vec![id.clone()]),
        Value::Array(ids) => ids.iter().map(|id| id.as_str().map(str::to_string)).collect(),
        _ => None,
    }
}

/// Merge `patch` into `target`: objects recursively, everything else replaced.
fn deep_merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(current), Value::Object(changes)) => {
            for (key, value) in changes {
                deep_merge(current.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}
