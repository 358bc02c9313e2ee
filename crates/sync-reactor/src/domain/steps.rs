//! # Edit Steps
//!
//! Low-level graph edits produced by the mutation compiler, the facts they
//! touch, and the high-level transaction chunks the compiler consumes.

use super::attrs::{Attr, AttrId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Entity id.
pub type EntityId = String;

/// One low-level graph mutation instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case", rename_all_fields = "kebab-case")]
pub enum EditStep {
    /// Declare an attribute.
    AddAttr {
        /// The declared attribute
        attr: Attr,
    },
    /// Change fields of an existing attribute.
    UpdateAttr {
        /// Attribute to change
        id: AttrId,
        /// Wire-named fields to overwrite
        changes: Map<String, Value>,
    },
    /// Remove an attribute.
    DeleteAttr {
        /// Attribute to remove
        id: AttrId,
    },
    /// Assert a fact.
    AddTriple {
        /// Subject
        entity: EntityId,
        /// Attribute
        attr_id: AttrId,
        /// Value, an entity id for refs
        value: Value,
    },
    /// Retract a fact.
    RetractTriple {
        /// Subject
        entity: EntityId,
        /// Attribute
        attr_id: AttrId,
        /// Value
        value: Value,
    },
    /// Remove every fact about an entity.
    DeleteEntity {
        /// Subject
        entity: EntityId,
        /// Entity type, when known
        #[serde(default, skip_serializing_if = "Option::is_none")]
        etype: Option<String>,
    },
}

impl EditStep {
    /// The attribute this step declares, if any.
    pub fn declared_attr(&self) -> Option<&Attr> {
        match self {
            Self::AddAttr { attr } => Some(attr),
            _ => None,
        }
    }
}

/// A fact as delivered in server results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Triple {
    /// Subject
    pub entity: EntityId,
    /// Attribute
    pub attr_id: AttrId,
    /// Value
    pub value: Value,
    /// Server timestamp, when present
    pub created_at: Option<u64>,
}

impl Triple {
    /// Parse a `[entity, attr, value, timestamp?]` join-row element.
    pub fn from_row(row: &Value) -> Option<Self> {
        let parts = row.as_array()?;
        let entity = match parts.first()? {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let attr_id = parts.get(1)?.as_str()?.parse().ok()?;
        let value = parts.get(2)?.clone();
        let created_at = parts.get(3).and_then(Value::as_u64);
        Some(Self {
            entity,
            attr_id,
            value,
            created_at,
        })
    }
}

/// Operation within a transaction chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "args", rename_all = "kebab-case")]
pub enum TxOp {
    /// Set fields, replacing previous values.
    Update(Map<String, Value>),
    /// Set fields, deep-merging object values.
    Merge(Map<String, Value>),
    /// Delete the entity.
    Delete,
    /// Link to other entities: label → id or ids.
    Link(Map<String, Value>),
    /// Unlink from other entities: label → id or ids.
    Unlink(Map<String, Value>),
}

/// Application-level transaction chunk: operations on one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxChunk {
    /// Entity type, e.g. `users`
    pub etype: String,
    /// Entity id
    pub id: EntityId,
    /// Operations, applied in order
    pub ops: Vec<TxOp>,
}

impl TxChunk {
    /// Empty chunk for `etype` / `id`.
    pub fn new(etype: impl Into<String>, id: impl Into<EntityId>) -> Self {
        Self {
            etype: etype.into(),
            id: id.into(),
            ops: Vec::new(),
        }
    }

    /// Append an `update`. Non-object arguments are ignored.
    pub fn update(mut self, fields: Value) -> Self {
        if let Value::Object(map) = fields {
            self.ops.push(TxOp::Update(map));
        }
        self
    }

    /// Append a `merge`. Non-object arguments are ignored.
    pub fn merge(mut self, fields: Value) -> Self {
        if let Value::Object(map) = fields {
            self.ops.push(TxOp::Merge(map));
        }
        self
    }

    /// Append a `link`. Non-object arguments are ignored.
    pub fn link(mut self, links: Value) -> Self {
        if let Value::Object(map) = links {
            self.ops.push(TxOp::Link(map));
        }
        self
    }

    /// Append an `unlink`. Non-object arguments are ignored.
    pub fn unlink(mut self, links: Value) -> Self {
        if let Value::Object(map) = links {
            self.ops.push(TxOp::Unlink(map));
        }
        self
    }

    /// Append a `delete`.
    pub fn delete(mut self) -> Self {
        self.ops.push(TxOp::Delete);
        self
    }
}
