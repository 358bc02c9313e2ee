//! # Reconnect
//!
//! Channel loss, stale channel events, handshake failures and reachability
//! changes.

#[cfg(test)]
mod tests {
    use crate::harness::{Harness, WAIT};
    use serde_json::json;
    use std::time::Duration;
    use sync_reactor::{
        ConnectionStatus, ReactorApi, ReactorError, ServerMessage, User,
    };
    use tokio::time::{sleep, timeout};

    fn init_error(message: &str, error_type: Option<&str>, hint: Option<serde_json::Value>) -> ServerMessage {
        ServerMessage::Error {
            client_event_id: None,
            original_event: Some(json!({"op": "init"})),
            message: message.to_string(),
            hint,
            error_type: error_type.map(str::to_string),
            status: Some(400),
        }
    }

    #[tokio::test]
    async fn test_reconnects_after_close() -> anyhow::Result<()> {
        let mut h = Harness::start(true).await;
        let first = h.connect(vec![]).await?;
        let mut status = h.reactor.subscribe_connection_status();
        timeout(WAIT, status.wait_for(|s| s.status == ConnectionStatus::Authenticated)).await??;

        first.endpoint.close();
        let second = h.connect(vec![]).await?;
        assert!(second.endpoint.generation() > first.endpoint.generation());
        timeout(WAIT, status.wait_for(|s| s.status == ConnectionStatus::Authenticated)).await??;
        Ok(())
    }

    #[tokio::test]
    async fn test_events_from_replaced_channel_are_ignored() -> anyhow::Result<()> {
        let mut h = Harness::start(true).await;
        let first = h.connect(vec![]).await?;
        first.endpoint.close();

        let second = h.accept().await?;
        // The old channel answers late; the Reactor must not authenticate on it.
        first.send(&ServerMessage::InitOk {
            attrs: vec![],
            session_id: None,
        })?;
        sleep(Duration::from_millis(50)).await;
        assert_eq!(h.reactor.connection_state().status, ConnectionStatus::Connecting);
        assert!(!second.endpoint.is_closed());
        Ok(())
    }

    #[tokio::test]
    async fn test_handshake_error_surfaces_to_readers() -> anyhow::Result<()> {
        let mut h = Harness::start(true).await;
        let mut remote = h.accept().await?;
        remote.endpoint.open();
        remote.expect_op("init").await?;
        remote.send(&init_error("app not found", Some("validation"), None))?;

        let mut status = h.reactor.subscribe_connection_status();
        let state = timeout(WAIT, status.wait_for(|s| s.status == ConnectionStatus::Errored)).await??.clone();
        assert_eq!(state.error.map(|e| e.message).as_deref(), Some("app not found"));

        let err = h.reactor.query_once(json!({"todos": {}})).await.unwrap_err();
        assert!(matches!(err, ReactorError::Connection(_)));
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_user_signs_out_and_retries() -> anyhow::Result<()> {
        let mut h = Harness::start(false).await;
        h.reactor
            .change_current_user(Some(User {
                id: "u1".into(),
                email: None,
                refresh_token: "stale".into(),
            }))
            .await?;

        h.network.set_online(true);
        let mut remote = h.accept().await?;
        remote.endpoint.open();
        let init = remote.expect_op("init").await?;
        assert!(matches!(
            init.message,
            sync_reactor::ClientMessage::Init { refresh_token: Some(ref t), .. } if t == "stale"
        ));
        remote.send(&init_error(
            "user not found",
            Some("record-not-found"),
            Some(json!({"record-type": "app-user"})),
        ))?;

        // Signed out, the next handshake goes without a credential
        let mut retry = h.accept().await?;
        retry.endpoint.open();
        let init = retry.expect_op("init").await?;
        assert!(matches!(
            init.message,
            sync_reactor::ClientMessage::Init { refresh_token: None, .. }
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_going_offline_answers_waiting_reads_locally() -> anyhow::Result<()> {
        let mut h = Harness::start(true).await;
        let mut remote = h.connect(vec![]).await?;

        let reactor = h.reactor.clone();
        let read = tokio::spawn(async move { reactor.query_once(json!({"todos": {}})).await });
        remote.expect_op("add-query").await?;

        h.network.set_online(false);
        let data = timeout(WAIT, read).await???;
        assert_eq!(data.data, json!({"todos": []}));
        assert_eq!(h.reactor.connection_state().status, ConnectionStatus::Closed);
        Ok(())
    }

    #[tokio::test]
    async fn test_one_shot_query_times_out() -> anyhow::Result<()> {
        let mut h = Harness::start(true).await;
        let mut remote = h.connect(vec![]).await?;
        let reactor = h.reactor.clone();
        let read = tokio::spawn(async move { reactor.query_once(json!({"slow": {}})).await });
        let add = remote.expect_op("add-query").await?;

        let err = timeout(WAIT, read).await??.unwrap_err();
        assert!(matches!(err, ReactorError::QueryTimeout { .. }));
        // Released: nobody else wanted the query
        let remove = remote.expect_op("remove-query").await?;
        assert_eq!(remove.client_event_id, add.client_event_id);
        Ok(())
    }
}
