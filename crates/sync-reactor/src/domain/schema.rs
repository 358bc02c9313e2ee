//! # Local Schema
//!
//! Optional application schema. Lets the engine fabricate attributes when it
//! starts offline, and keeps local typing information when the server's
//! attributes arrive.

use super::attrs::{find_by_forward, Attr, AttrMap, Cardinality};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Declared attribute of an entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttrDef {
    /// Primitive type to check, e.g. `string`
    #[serde(default)]
    pub value_type: Option<String>,
    /// Values are unique
    #[serde(default)]
    pub unique: bool,
    /// Values are indexed
    #[serde(default)]
    pub indexed: bool,
}

/// Declared link between two entity types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkDef {
    /// Source entity type
    pub from: String,
    /// Label on the source
    pub forward: String,
    /// Target entity type
    pub to: String,
    /// Label on the target
    pub reverse: String,
    /// Whether the source may link to many targets
    #[serde(default)]
    pub has_many: bool,
}

/// Application schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    /// Entity type → label → definition
    #[serde(default)]
    pub entities: BTreeMap<String, BTreeMap<String, AttrDef>>,
    /// Links between entity types
    #[serde(default)]
    pub links: Vec<LinkDef>,
}

impl Schema {
    /// Unsynced attributes for every entity, attribute and link.
    pub fn to_attrs(&self) -> AttrMap {
        let mut attrs = AttrMap::new();
        for (etype, defs) in &self.entities {
            let id_attr = Attr::id_attr(etype).unsynced();
            attrs.insert(id_attr.id, id_attr);
            for (label, def) in defs {
                let attr = Attr {
                    unique: def.unique,
                    index: def.indexed,
                    checked_data_type: def.value_type.clone(),
                    ..Attr::blob(etype, label).unsynced()
                };
                attrs.insert(attr.id, attr);
            }
        }
        for link in &self.links {
            let mut attr = Attr::link(&link.from, &link.forward, &link.to, &link.reverse).unsynced();
            if !link.has_many {
                attr.cardinality = Cardinality::One;
            }
            attrs.insert(attr.id, attr);
        }
        attrs
    }
}

/// Combine server attributes with what the engine knew locally.
///
/// Server attributes win. A local `checked-data-type` survives where the
/// server has none, and unsynced local attributes whose name the server does
/// not know are kept so offline writes stay typed.
pub fn merge_with_local(server: Vec<Attr>, local: Option<&AttrMap>) -> AttrMap {
    let mut merged: AttrMap = server.into_iter().map(|a| (a.id, a)).collect();
    let Some(local) = local else {
        return merged;
    };

    let mut kept = Vec::new();
    for local_attr in local.values() {
        let found = find_by_forward(&merged, local_attr.etype(), local_attr.label()).map(|a| a.id);
        match found {
            Some(id) => {
                if let Some(server_attr) = merged.get_mut(&id) {
                    if server_attr.checked_data_type.is_none() {
                        server_attr.checked_data_type = local_attr.checked_data_type.clone();
                    }
                }
            }
            None if local_attr.is_unsynced => kept.push(local_attr.clone()),
            None => {}
        }
    }
    merged.extend(kept.into_iter().map(|a| (a.id, a)));
    merged
}
