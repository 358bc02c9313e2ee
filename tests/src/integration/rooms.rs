//! # Rooms
//!
//! Presence and broadcast over the shared channel.

#[cfg(test)]
mod tests {
    use crate::harness::{Harness, SESSION_ID, WAIT};
    use serde_json::json;
    use std::collections::BTreeMap;
    use sync_reactor::domain::protocol::BroadcastData;
    use sync_reactor::{ClientMessage, PresenceView, ReactorApi, ServerMessage};
    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio::time::timeout;

    async fn view_until(
        rx: &mut UnboundedReceiver<PresenceView>,
        pred: impl Fn(&PresenceView) -> bool,
    ) -> anyhow::Result<PresenceView> {
        loop {
            let view = timeout(WAIT, rx.recv())
                .await?
                .ok_or_else(|| anyhow::anyhow!("room gone"))?;
            if pred(&view) {
                return Ok(view);
            }
        }
    }

    fn join_ok(room_id: &str) -> ServerMessage {
        ServerMessage::JoinRoomOk {
            room_id: room_id.to_string(),
        }
    }

    #[tokio::test]
    async fn test_join_then_publish_initial_presence() -> anyhow::Result<()> {
        let mut h = Harness::start(true).await;
        let mut remote = h.connect(vec![]).await?;

        let room = h.reactor.join_room("lobby", Some(json!({"name": "ada"})))?;
        assert_eq!(room.room_id(), "lobby");
        let mut presence = room.subscribe_presence()?;
        let join = remote.expect_op("join-room").await?;
        assert_eq!(
            join.message,
            ClientMessage::JoinRoom {
                room_id: "lobby".into(),
                data: Some(json!({"name": "ada"})),
            }
        );
        assert!(!view_until(&mut presence, |_| true).await?.connected);

        remote.send(&join_ok("lobby"))?;
        let set = remote.expect_op("set-presence").await?;
        assert_eq!(
            set.message,
            ClientMessage::SetPresence {
                room_id: "lobby".into(),
                data: json!({"name": "ada"}),
            }
        );
        view_until(&mut presence, |v| v.connected).await?;

        room.publish_presence(json!({"typing": true}))?;
        let update = remote.expect_op("set-presence").await?;
        assert!(matches!(
            update.message,
            ClientMessage::SetPresence { ref data, .. } if *data == json!({"name": "ada", "typing": true})
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_peers_exclude_own_session_and_tag_broadcasts() -> anyhow::Result<()> {
        let mut h = Harness::start(true).await;
        let mut remote = h.connect(vec![]).await?;
        let room = h.reactor.join_room("doc-1", None)?;
        let mut presence = room.subscribe_presence()?;
        let mut cursors = room.subscribe_topic("cursor")?;
        remote.expect_op("join-room").await?;
        remote.send(&join_ok("doc-1"))?;

        let sessions = BTreeMap::from([
            (SESSION_ID.to_string(), json!({"data": {"name": "me"}})),
            ("peer-1".to_string(), json!({"data": {"name": "grace"}})),
        ]);
        remote.send(&ServerMessage::RefreshPresence {
            room_id: "doc-1".into(),
            data: sessions,
        })?;
        let view = view_until(&mut presence, |v| !v.peers.is_empty()).await?;
        assert_eq!(view.peers.len(), 1);
        assert_eq!(view.peers["peer-1"], json!({"name": "grace"}));

        remote.send(&ServerMessage::ServerBroadcast {
            room_id: "doc-1".into(),
            topic: "cursor".into(),
            data: BroadcastData {
                peer_id: Some("peer-1".into()),
                data: json!({"x": 3}),
            },
        })?;
        let event = timeout(WAIT, cursors.recv())
            .await?
            .ok_or_else(|| anyhow::anyhow!("topic closed"))?;
        assert_eq!(event.data, json!({"x": 3}));
        assert_eq!(event.peer, Some(json!({"name": "grace"})));
        Ok(())
    }

    #[tokio::test]
    async fn test_broadcast_before_join_is_flushed_after_ack() -> anyhow::Result<()> {
        let mut h = Harness::start(true).await;
        let room = h.reactor.join_room("lobby", None)?;
        room.publish_topic("wave", json!({"hand": "left"}))?;

        let mut remote = h.connect(vec![]).await?;
        remote.expect_op("join-room").await?;
        remote.expect_quiet(std::time::Duration::from_millis(50)).await?;
        remote.send(&join_ok("lobby"))?;

        let sent = remote.expect_op("client-broadcast").await?;
        assert_eq!(
            sent.message,
            ClientMessage::ClientBroadcast {
                room_id: "lobby".into(),
                topic: "wave".into(),
                data: json!({"hand": "left"}),
            }
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_last_handle_leaves() -> anyhow::Result<()> {
        let mut h = Harness::start(true).await;
        let mut remote = h.connect(vec![]).await?;
        let first = h.reactor.join_room("lobby", None)?;
        let second = h.reactor.join_room("lobby", None)?;
        remote.expect_op("join-room").await?;
        remote.send(&join_ok("lobby"))?;

        drop(first);
        remote.expect_quiet(std::time::Duration::from_millis(50)).await?;
        second.leave();
        let leave = remote.expect_op("leave-room").await?;
        assert_eq!(
            leave.message,
            ClientMessage::LeaveRoom {
                room_id: "lobby".into()
            }
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_rooms_rejoin_after_reconnect() -> anyhow::Result<()> {
        let mut h = Harness::start(true).await;
        let mut remote = h.connect(vec![]).await?;
        let room = h.reactor.join_room("lobby", Some(json!({"name": "ada"})))?;
        let mut presence = room.subscribe_presence()?;
        remote.expect_op("join-room").await?;
        remote.send(&join_ok("lobby"))?;
        view_until(&mut presence, |v| v.connected).await?;

        remote.endpoint.close();
        view_until(&mut presence, |v| !v.connected).await?;

        let mut again = h.connect(vec![]).await?;
        let join = again.expect_op("join-room").await?;
        assert!(matches!(
            join.message,
            ClientMessage::JoinRoom { ref room_id, data: Some(_) } if room_id == "lobby"
        ));
        Ok(())
    }
}
