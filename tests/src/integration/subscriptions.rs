//! # Subscriptions
//!
//! Sharing of cache entries between listeners, release on unsubscribe, and
//! channel hygiene around them.

#[cfg(test)]
mod tests {
    use crate::harness::{add_query_ok, next_data, Harness};
    use serde_json::json;
    use std::time::Duration;
    use sync_reactor::{QueryHash, ReactorApi, ReactorConfig};

    const QUIET: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn test_identical_queries_share_one_request() -> anyhow::Result<()> {
        let mut h = Harness::start(true).await;
        let mut remote = h.connect(vec![]).await?;
        let query = json!({"todos": {"$": {"where": {"done": false}}}});

        let first = h.reactor.subscribe_query(query.clone())?;
        let add = remote.expect_op("add-query").await?;
        let mut second = h.reactor.subscribe_query(query.clone())?;
        remote.expect_quiet(QUIET).await?;

        assert_eq!(first.hash(), second.hash());
        assert_eq!(*second.hash(), QueryHash::of(&query));
        // No result yet, so nothing was delivered
        assert!(second.try_next().is_none());

        drop(first);
        remote.expect_quiet(QUIET).await?;
        second.unsubscribe();
        let remove = remote.expect_op("remove-query").await?;
        assert_eq!(remove.client_event_id, add.client_event_id);
        Ok(())
    }

    #[tokio::test]
    async fn test_undecodable_frames_are_skipped() -> anyhow::Result<()> {
        let mut h = Harness::start(true).await;
        let query = json!({"todos": {}});
        let mut todos = h.reactor.subscribe_query(query.clone())?;
        let mut remote = h.connect(vec![]).await?;
        assert_eq!(remote.endpoint.uri(), ReactorConfig::for_testing().channel_uri);
        remote.expect_op("add-query").await?;

        remote.endpoint.send_raw("not json");
        remote.endpoint.send_raw(r#"{"op": "add-query-ok"}"#);
        remote.send(&add_query_ok(&query, &[], None))?;
        assert_eq!(next_data(&mut todos).await?, json!({"todos": []}));
        Ok(())
    }

    #[tokio::test]
    async fn test_channel_error_reconnects_and_resubscribes() -> anyhow::Result<()> {
        let mut h = Harness::start(true).await;
        let _todos = h.reactor.subscribe_query(json!({"todos": {}}))?;
        let first = h.connect(vec![]).await?;

        first.endpoint.error("connection reset");
        let mut second = h.connect(vec![]).await?;
        assert!(second.endpoint.generation() > first.endpoint.generation());
        second.expect_op("add-query").await?;
        Ok(())
    }
}
