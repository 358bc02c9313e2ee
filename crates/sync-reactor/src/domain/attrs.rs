//! # Attributes
//!
//! Schema-level edge/property descriptors and the id-keyed mapping the
//! Reactor owns.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Attribute id.
pub type AttrId = Uuid;

/// Attribute mapping keyed by id.
pub type AttrMap = BTreeMap<AttrId, Attr>;

/// `(id, entity type, label)`; serialized as a three-element array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(Uuid, String, String)", into = "(Uuid, String, String)")]
pub struct Identity {
    /// Identity id
    pub id: Uuid,
    /// Entity type, e.g. `posts`
    pub etype: String,
    /// Attribute label, e.g. `title`
    pub label: String,
}

impl Identity {
    /// New identity with a fresh id.
    pub fn new(etype: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            etype: etype.into(),
            label: label.into(),
        }
    }

    fn names(&self, etype: &str, label: &str) -> bool {
        self.etype == etype && self.label == label
    }
}

impl From<(Uuid, String, String)> for Identity {
    fn from((id, etype, label): (Uuid, String, String)) -> Self {
        Self { id, etype, label }
    }
}

impl From<Identity> for (Uuid, String, String) {
    fn from(identity: Identity) -> Self {
        (identity.id, identity.etype, identity.label)
    }
}

/// What an attribute's values are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    /// Any JSON value
    Blob,
    /// Entity id of another entity
    Ref,
}

/// How many values an entity may hold for an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    /// At most one value
    One,
    /// Any number of values
    Many,
}

/// Attribute descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Attr {
    /// Attribute id
    pub id: AttrId,
    /// Forward name
    pub forward_identity: Identity,
    /// Reverse name, for refs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverse_identity: Option<Identity>,
    /// Blob or ref
    pub value_type: ValueType,
    /// One or many
    pub cardinality: Cardinality,
    /// Values are unique across entities
    #[serde(rename = "unique?", default)]
    pub unique: bool,
    /// Values are indexed
    #[serde(rename = "index?", default)]
    pub index: bool,
    /// Declared primitive type, if checked
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checked_data_type: Option<String>,
    /// Speculated locally, not yet confirmed by the server
    #[serde(rename = "isUnsynced", default, skip_serializing_if = "std::ops::Not::not")]
    pub is_unsynced: bool,
}

impl Attr {
    /// A blob attribute `etype.label` with a fresh id.
    pub fn blob(etype: &str, label: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            forward_identity: Identity::new(etype, label),
            reverse_identity: None,
            value_type: ValueType::Blob,
            cardinality: Cardinality::One,
            unique: false,
            index: false,
            checked_data_type: None,
            is_unsynced: false,
        }
    }

    /// A ref attribute `etype.label` pointing at `target.reverse_label`.
    pub fn link(etype: &str, label: &str, target: &str, reverse_label: &str) -> Self {
        Self {
            reverse_identity: Some(Identity::new(target, reverse_label)),
            value_type: ValueType::Ref,
            cardinality: Cardinality::Many,
            ..Self::blob(etype, label)
        }
    }

    /// The `id` attribute every entity type carries.
    pub fn id_attr(etype: &str) -> Self {
        Self {
            unique: true,
            index: true,
            ..Self::blob(etype, "id")
        }
    }

    /// Mark as locally speculated.
    pub fn unsynced(mut self) -> Self {
        self.is_unsynced = true;
        self
    }

    /// Entity type of the forward identity.
    pub fn etype(&self) -> &str {
        &self.forward_identity.etype
    }

    /// Label of the forward identity.
    pub fn label(&self) -> &str {
        &self.forward_identity.label
    }

    /// Apply a partial update. Fields that fail to decode leave the attribute unchanged.
    pub fn patched(&self, changes: &serde_json::Map<String, serde_json::Value>) -> Self {
        let Ok(serde_json::Value::Object(mut fields)) = serde_json::to_value(self) else {
            return self.clone();
        };
        for (key, value) in changes {
            if key != "id" {
                fields.insert(key.clone(), value.clone());
            }
        }
        serde_json::from_value(serde_json::Value::Object(fields)).unwrap_or_else(|_| self.clone())
    }
}

/// Build a mapping from a list, last write wins.
pub fn attr_map(attrs: impl IntoIterator<Item = Attr>) -> AttrMap {
    attrs.into_iter().map(|a| (a.id, a)).collect()
}

/// Find an attribute whose forward identity is `etype.label`.
pub fn find_by_forward<'a>(attrs: &'a AttrMap, etype: &str, label: &str) -> Option<&'a Attr> {
    attrs.values().find(|a| a.forward_identity.names(etype, label))
}

/// Find an attribute whose reverse identity is `etype.label`.
pub fn find_by_reverse<'a>(attrs: &'a AttrMap, etype: &str, label: &str) -> Option<&'a Attr> {
    attrs.values().find(|a| {
        a.reverse_identity
            .as_ref()
            .is_some_and(|rev| rev.names(etype, label))
    })
}
