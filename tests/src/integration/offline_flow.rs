//! # Offline Flow
//!
//! Writes made without a connection show up immediately, survive a restart,
//! and are delivered once the server is reachable.

#[cfg(test)]
mod tests {
    use crate::harness::{add_query_ok, data_until, next_data, Harness, WAIT};
    use serde_json::json;
    use std::time::Duration;
    use sync_reactor::{
        ClientMessage, ConnectionStatus, MutationStatus, ReactorApi, ReactorConfig, ServerMessage,
        TxChunk,
    };
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_offline_write_is_visible_then_delivered() -> anyhow::Result<()> {
        let mut h = Harness::start(false).await;
        let query = json!({"todos": {}});
        let mut todos = h.reactor.subscribe_query(query.clone())?;
        assert_eq!(next_data(&mut todos).await?, json!({"todos": []}));

        let mut tx = h
            .reactor
            .transact(vec![TxChunk::new("todos", "t1").update(json!({"text": "milk"}))])?;
        assert_eq!(tx.outcome().await, Ok(MutationStatus::Enqueued));
        let mut lifecycle = tx.watch_status();
        assert_eq!(*lifecycle.borrow_and_update(), MutationStatus::Enqueued);
        let data = next_data(&mut todos).await?;
        assert_eq!(data["todos"][0]["text"], json!("milk"));

        // Back online: queries first, then the queued write
        h.network.set_online(true);
        let mut remote = h.connect(vec![]).await?;
        let add = remote.expect_op("add-query").await?;
        assert_eq!(add.message, ClientMessage::AddQuery { q: query.clone() });
        let sent = remote.expect_op("transact").await?;
        assert_eq!(sent.client_event_id, tx.event_id());

        remote.send(&ServerMessage::TransactOk {
            client_event_id: tx.event_id(),
            tx_id: 1,
        })?;
        timeout(WAIT, tx.synced()).await??;
        assert_eq!(tx.status(), MutationStatus::Synced);
        assert!(lifecycle.has_changed()?);
        Ok(())
    }

    #[tokio::test]
    async fn test_pending_writes_survive_restart() -> anyhow::Result<()> {
        let h = Harness::start(false).await;
        let mut tx = h
            .reactor
            .transact(vec![TxChunk::new("todos", "t1").update(json!({"text": "bread"}))])?;
        tx.outcome().await?;
        h.reactor.shutdown().await;

        let restarted = Harness::start_with(ReactorConfig::for_testing(), false, h.backend.clone()).await;
        let data = restarted.reactor.query_once(json!({"todos": {}})).await?;
        assert_eq!(data.data["todos"][0]["text"], json!("bread"));
        Ok(())
    }

    #[tokio::test]
    async fn test_offline_start_settles_closed() -> anyhow::Result<()> {
        let h = Harness::start(false).await;
        let mut status = h.reactor.subscribe_connection_status();
        timeout(WAIT, status.wait_for(|s| s.status == ConnectionStatus::Closed)).await??;
        Ok(())
    }

    #[tokio::test]
    async fn test_server_result_replaces_local_projection() -> anyhow::Result<()> {
        let title = sync_reactor::Attr::blob("posts", "title");
        let post_id = sync_reactor::Attr::id_attr("posts");
        let mut h = Harness::start(true).await;
        let query = json!({"posts": {}});
        let mut posts = h.reactor.subscribe_query(query.clone())?;

        let mut remote = h.connect(vec![title.clone(), post_id.clone()]).await?;
        remote.expect_op("add-query").await?;
        remote.send(&add_query_ok(
            &query,
            &[("p1", &post_id, json!("p1")), ("p1", &title, json!("Hello"))],
            Some(3),
        ))?;

        let data = data_until(&mut posts, |d| d["posts"].as_array().is_some_and(|a| !a.is_empty())).await?;
        assert_eq!(data, json!({"posts": [{"id": "p1", "title": "Hello"}]}));

        // A live subscription answers one-shot reads without a round trip
        let once = h.reactor.query_once(query).await?;
        assert_eq!(once.data, data);
        remote.expect_quiet(Duration::from_millis(50)).await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_clear_drops_pending_writes() -> anyhow::Result<()> {
        let h = Harness::start(false).await;
        let mut tx = h
            .reactor
            .transact(vec![TxChunk::new("todos", "t1").update(json!({"text": "x"}))])?;
        tx.outcome().await?;
        h.reactor.clear().await?;
        let data = h.reactor.query_once(json!({"todos": {}})).await?;
        assert_eq!(data.data, json!({"todos": []}));
        Ok(())
    }
}
