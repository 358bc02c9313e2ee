//! # Ordering and Failure
//!
//! Replay order, server rejections, timeouts and acknowledged writes that a
//! result does not reflect yet.

#[cfg(test)]
mod tests {
    use crate::harness::{add_query_ok, data_until, next_data, Harness, WAIT};
    use serde_json::json;
    use sync_reactor::application::PENDING_MUTATIONS_KEY;
    use sync_reactor::domain::MutationQueue;
    use sync_reactor::{Attr, MutationStatus, ReactorApi, ReactorConfig, ServerMessage, TxChunk};
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_offline_writes_replay_in_order() -> anyhow::Result<()> {
        let mut h = Harness::start(false).await;
        let mut ids = Vec::new();
        for n in 0..5 {
            let mut tx = h
                .reactor
                .transact(vec![TxChunk::new("counters", "c1").update(json!({"value": n}))])?;
            assert_eq!(tx.outcome().await, Ok(MutationStatus::Enqueued));
            ids.push(tx.event_id());
        }

        h.network.set_online(true);
        let mut remote = h.connect(vec![]).await?;
        for expected in ids {
            let sent = remote.expect_op("transact").await?;
            assert_eq!(sent.client_event_id, expected);
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_rejected_write_rolls_back_and_is_broadcast() -> anyhow::Result<()> {
        let mut h = Harness::start(true).await;
        let mut errors = h.reactor.subscribe_mutation_errors();
        let query = json!({"posts": {}});
        let mut posts = h.reactor.subscribe_query(query.clone())?;
        let mut remote = h.connect(vec![]).await?;
        remote.expect_op("add-query").await?;
        remote.send(&add_query_ok(&query, &[], None))?;
        assert_eq!(next_data(&mut posts).await?, json!({"posts": []}));

        let mut tx = h
            .reactor
            .transact(vec![TxChunk::new("posts", "p1").update(json!({"title": "nope"}))])?;
        data_until(&mut posts, |d| d["posts"].as_array().is_some_and(|a| a.len() == 1)).await?;
        remote.expect_op("transact").await?;

        remote.send(&ServerMessage::Error {
            client_event_id: Some(tx.event_id()),
            original_event: Some(json!({"op": "transact"})),
            message: "permission denied".into(),
            hint: None,
            error_type: Some("permission-denied".into()),
            status: Some(400),
        })?;

        let err = tx.outcome().await.unwrap_err();
        assert_eq!(err.status, MutationStatus::Error);
        assert_eq!(err.payload.message, "permission denied");
        let broadcast = timeout(WAIT, errors.recv()).await??;
        assert_eq!(broadcast.event_id, tx.event_id());

        let data = next_data(&mut posts).await?;
        assert_eq!(data, json!({"posts": []}));
        Ok(())
    }

    #[tokio::test]
    async fn test_unacknowledged_write_times_out() -> anyhow::Result<()> {
        let mut h = Harness::start(true).await;
        let mut remote = h.connect(vec![]).await?;
        let mut tx = h
            .reactor
            .transact(vec![TxChunk::new("posts", "p1").update(json!({"title": "slow"}))])?;
        remote.expect_op("transact").await?;

        let err = timeout(WAIT, tx.outcome()).await?.unwrap_err();
        assert_eq!(err.status, MutationStatus::Timeout);
        assert_eq!(tx.status(), MutationStatus::Timeout);
        Ok(())
    }

    /// The mutation queue as last written to storage.
    fn persisted_queue(h: &Harness) -> anyhow::Result<MutationQueue> {
        let key = format!("{}:{}", ReactorConfig::for_testing().app_id, PENDING_MUTATIONS_KEY);
        let text = h
            .backend
            .get(&key)
            .map(|v| v.value().clone())
            .ok_or_else(|| anyhow::anyhow!("queue never persisted"))?;
        Ok(serde_json::from_str(&text)?)
    }

    #[tokio::test]
    async fn test_acknowledged_write_stays_until_reflected() -> anyhow::Result<()> {
        let name = Attr::blob("users", "name");
        let user_id = Attr::id_attr("users");
        let query = json!({"users": {}});

        let mut h = Harness::start(true).await;
        let mut users = h.reactor.subscribe_query(query.clone())?;
        let mut remote = h.connect(vec![name.clone(), user_id.clone()]).await?;
        remote.expect_op("add-query").await?;
        remote.send(&add_query_ok(&query, &[], Some(1)))?;
        assert_eq!(next_data(&mut users).await?, json!({"users": []}));

        let mut tx = h
            .reactor
            .transact(vec![TxChunk::new("users", "1").update(json!({"name": "Ann"}))])?;
        remote.expect_op("transact").await?;
        remote.send(&ServerMessage::TransactOk {
            client_event_id: tx.event_id(),
            tx_id: 42,
        })?;
        timeout(WAIT, tx.synced()).await??;

        // A result computed before tx 42 must not hide the write
        remote.send(&add_query_ok(&query, &[], Some(1)))?;
        let once = h.reactor.query_once(query.clone()).await?;
        assert_eq!(once.data["users"][0]["name"], json!("Ann"));
        let queue = persisted_queue(&h)?;
        assert_eq!(queue.get(&tx.event_id()).and_then(|m| m.tx_id), Some(42));

        // Once reflected, the server's copy is what shows and the entry goes
        remote.send(&add_query_ok(
            &query,
            &[("1", &user_id, json!("1")), ("1", &name, json!("Ann from server"))],
            Some(42),
        ))?;
        let data = data_until(&mut users, |d| d["users"][0]["name"] == json!("Ann from server")).await?;
        assert_eq!(data["users"].as_array().map(Vec::len), Some(1));
        h.reactor.query_once(query).await?;
        assert!(!persisted_queue(&h)?.contains(&tx.event_id()));
        Ok(())
    }
}
