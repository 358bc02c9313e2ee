//! # Presence Rooms
//!
//! Ephemeral per-room state: own presence, peers' presence, queued broadcasts.
//! Rebuilt on every join; never persisted.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Peers keyed by session id.
pub type Peers = BTreeMap<String, Value>;

/// State of one joined room.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoomState {
    /// `join-room-ok` received on the current channel
    pub connected: bool,
    /// Last join error
    pub error: Option<Value>,
    /// Own presence document
    pub user: Option<Value>,
    /// Other sessions' presence
    pub peers: Peers,
    /// Broadcasts sent before the room connected: `(topic, data)`
    pub queued: Vec<(String, Value)>,
}

impl RoomState {
    /// New room with optional initial presence.
    pub fn new(initial: Option<Value>) -> Self {
        Self {
            user: initial,
            ..Self::default()
        }
    }

    /// Shallow-merge `patch` into own presence.
    pub fn merge_user(&mut self, patch: Value) -> Value {
        let merged = match (self.user.take(), patch) {
            (Some(Value::Object(mut current)), Value::Object(changes)) => {
                current.extend(changes);
                Value::Object(current)
            }
            (_, replacement) => replacement,
        };
        self.user = Some(merged.clone());
        merged
    }

    /// Replace peers from a `refresh-presence` body (`session → {data}`).
    pub fn refresh_peers(&mut self, sessions: &BTreeMap<String, Value>, own_session: Option<&str>) {
        self.peers = sessions
            .iter()
            .filter(|(session, _)| Some(session.as_str()) != own_session)
            .map(|(session, body)| (session.clone(), body.get("data").cloned().unwrap_or(Value::Null)))
            .collect();
    }

    /// Apply `patch-presence` edits. Paths are rooted at `session → {data}`.
    pub fn patch_peers(&mut self, edits: &[Value], own_session: Option<&str>) {
        let sessions: Map<String, Value> = self
            .peers
            .iter()
            .map(|(session, data)| {
                let mut body = Map::new();
                body.insert("data".to_string(), data.clone());
                (session.clone(), Value::Object(body))
            })
            .collect();
        let mut root = Value::Object(sessions);

        for edit in edits {
            let Some(parts) = edit.as_array() else { continue };
            let Some(path) = parts.first().and_then(Value::as_array) else { continue };
            let path: Vec<String> = path.iter().map(path_key).collect();
            match parts.get(1).and_then(Value::as_str) {
                Some("+") => insert_in(&mut root, &path, parts.get(2).cloned().unwrap_or(Value::Null), true),
                Some("r") => insert_in(&mut root, &path, parts.get(2).cloned().unwrap_or(Value::Null), false),
                Some("-") => remove_in(&mut root, &path),
                _ => {}
            }
        }

        let sessions: BTreeMap<String, Value> = match root {
            Value::Object(map) => map.into_iter().collect(),
            _ => BTreeMap::new(),
        };
        self.refresh_peers(&sessions, own_session);
    }
}

fn path_key(segment: &Value) -> String {
    match segment {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn insert_in(root: &mut Value, path: &[String], value: Value, insert: bool) {
    let Some((last, parents)) = path.split_last() else {
        *root = value;
        return;
    };
    let mut node = root;
    for key in parents {
        if !node.is_object() && !node.is_array() {
            *node = Value::Object(Map::new());
        }
        node = match node {
            Value::Object(map) => map.entry(key.clone()).or_insert(Value::Null),
            Value::Array(items) => match key.parse::<usize>().ok().and_then(|i| items.get_mut(i)) {
                Some(item) => item,
                None => return,
            },
            _ => return,
        };
    }
    match node {
        Value::Array(items) => {
            let Ok(index) = last.parse::<usize>() else { return };
            if insert && index <= items.len() {
                items.insert(index, value);
            } else if let Some(slot) = items.get_mut(index) {
                *slot = value;
            }
        }
        Value::Object(map) => {
            map.insert(last.clone(), value);
        }
        other => {
            let mut map = Map::new();
            map.insert(last.clone(), value);
            *other = Value::Object(map);
        }
    }
}

fn remove_in(root: &mut Value, path: &[String]) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut node = root;
    for key in parents {
        node = match node {
            Value::Object(map) => match map.get_mut(key) {
                Some(child) => child,
                None => return,
            },
            Value::Array(items) => match key.parse::<usize>().ok().and_then(|i| items.get_mut(i)) {
                Some(item) => item,
                None => return,
            },
            _ => return,
        };
    }
    match node {
        Value::Object(map) => {
            map.remove(last);
        }
        Value::Array(items) => {
            if let Ok(index) = last.parse::<usize>() {
                if index < items.len() {
                    items.remove(index);
                }
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sessions(value: Value) -> BTreeMap<String, Value> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_refresh_drops_own_session() {
        let mut room = RoomState::new(None);
        room.refresh_peers(
            &sessions(json!({"me": {"data": {"x": 1}}, "s2": {"data": {"x": 2}}})),
            Some("me"),
        );
        assert_eq!(room.peers.len(), 1);
        assert_eq!(room.peers["s2"], json!({"x": 2}));
    }

    #[test]
    fn test_patch_set_replace_delete() {
        let mut room = RoomState::new(None);
        room.refresh_peers(&sessions(json!({"s2": {"data": {"cursor": [1, 2]}}})), None);

        room.patch_peers(
            &[
                json!([["s2", "data", "name"], "r", "Ann"]),
                json!([["s2", "data", "cursor", 0], "+", 0]),
                json!([["s3"], "+", {"data": {"name": "Bea"}}]),
                json!([["me"], "+", {"data": {}}]),
            ],
            Some("me"),
        );
        assert_eq!(room.peers["s2"], json!({"cursor": [0, 1, 2], "name": "Ann"}));
        assert_eq!(room.peers["s3"], json!({"name": "Bea"}));
        assert!(!room.peers.contains_key("me"));

        room.patch_peers(&[json!([["s3"], "-"]), json!([["s2", "data", "cursor"], "-"])], Some("me"));
        assert_eq!(room.peers.len(), 1);
        assert_eq!(room.peers["s2"], json!({"name": "Ann"}));
    }

    #[test]
    fn test_merge_user_is_shallow() {
        let mut room = RoomState::new(Some(json!({"name": "Ann", "x": 1})));
        let merged = room.merge_user(json!({"x": 2}));
        assert_eq!(merged, json!({"name": "Ann", "x": 2}));
        assert_eq!(room.user, Some(merged));
    }
}
