//! # Reconciliation
//!
//! Attributes fabricated offline are mapped onto the server's on replay.

#[cfg(test)]
mod tests {
    use crate::harness::{Harness, WAIT};
    use serde_json::json;
    use std::collections::HashSet;
    use sync_reactor::{
        Attr, ClientEnvelope, ClientMessage, EditStep, ReactorApi, ServerMessage, TxChunk,
    };
    use tokio::time::timeout;

    fn steps(envelope: ClientEnvelope) -> Vec<EditStep> {
        match envelope.message {
            ClientMessage::Transact { tx_steps } => tx_steps,
            other => panic!("expected transact, got {}", other.op()),
        }
    }

    fn declared(steps: &[EditStep]) -> Vec<String> {
        steps
            .iter()
            .filter_map(EditStep::declared_attr)
            .map(|attr| format!("{}.{}", attr.etype(), attr.label()))
            .collect()
    }

    #[tokio::test]
    async fn test_offline_write_adopts_server_attr_ids() -> anyhow::Result<()> {
        let title = Attr::blob("posts", "title");
        let post_id = Attr::id_attr("posts");
        let server_ids: HashSet<_> = [title.id, post_id.id].into();

        let mut h = Harness::start(false).await;
        let mut tx = h
            .reactor
            .transact(vec![TxChunk::new("posts", "p1").update(json!({"title": "Hi"}))])?;
        tx.outcome().await?;

        h.network.set_online(true);
        let mut remote = h.connect(vec![title.clone(), post_id]).await?;
        let sent = steps(remote.expect_op("transact").await?);

        assert!(declared(&sent).is_empty());
        let mut saw_title = false;
        for step in &sent {
            if let EditStep::AddTriple { attr_id, value, .. } = step {
                assert!(server_ids.contains(attr_id));
                saw_title |= *attr_id == title.id && *value == json!("Hi");
            }
        }
        assert!(saw_title);
        Ok(())
    }

    #[tokio::test]
    async fn test_new_attr_is_declared_once_and_adopted_on_ack() -> anyhow::Result<()> {
        let post_id = Attr::id_attr("posts");
        let mut h = Harness::start(true).await;
        let mut remote = h.connect(vec![post_id]).await?;

        let mut tx = h
            .reactor
            .transact(vec![TxChunk::new("posts", "p1").update(json!({"body": "text"}))])?;
        let sent = steps(remote.expect_op("transact").await?);
        assert_eq!(declared(&sent), vec!["posts.body".to_string()]);

        remote.send(&ServerMessage::TransactOk {
            client_event_id: tx.event_id(),
            tx_id: 7,
        })?;
        timeout(WAIT, tx.synced()).await??;

        let attrs = h.reactor.subscribe_attrs().borrow().clone();
        let body = attrs
            .values()
            .find(|a| a.etype() == "posts" && a.label() == "body")
            .ok_or_else(|| anyhow::anyhow!("posts.body missing"))?;
        assert!(!body.is_unsynced);
        Ok(())
    }

    #[tokio::test]
    async fn test_declaration_in_earlier_write_covers_later_ones() -> anyhow::Result<()> {
        let post_id = Attr::id_attr("posts");
        let rating = Attr::blob("posts", "rating");

        let mut h = Harness::start(false).await;
        let mut first = h
            .reactor
            .transact(vec![TxChunk::new("posts", "p1").update(json!({"rating": 4}))])?;
        let mut second = h
            .reactor
            .transact(vec![TxChunk::new("posts", "p2").update(json!({"rating": 5}))])?;
        first.outcome().await?;
        second.outcome().await?;

        // The server learned posts.rating from another client in the meantime
        h.network.set_online(true);
        let mut remote = h.connect(vec![post_id, rating.clone()]).await?;
        for expected in [first.event_id(), second.event_id()] {
            let envelope = remote.expect_op("transact").await?;
            assert_eq!(envelope.client_event_id, expected);
            let sent = steps(envelope);
            assert!(declared(&sent).is_empty());
            assert!(sent.iter().any(|step| matches!(
                step,
                EditStep::AddTriple { attr_id, .. } if *attr_id == rating.id
            )));
        }
        Ok(())
    }
}
