//! Network reachability listeners.

use crate::ports::NetworkListener;
use async_trait::async_trait;
use tokio::sync::watch;

/// Reachability driven by the host, e.g. from OS connectivity callbacks.
#[derive(Debug)]
pub struct DynamicNetworkListener {
    online: watch::Sender<bool>,
}

impl DynamicNetworkListener {
    /// Listener starting at `online`.
    pub fn new(online: bool) -> Self {
        let (online, _) = watch::channel(online);
        Self { online }
    }

    /// Report reachability. Repeating the current value notifies nobody.
    pub fn set_online(&self, online: bool) {
        self.online.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            *current = online;
            true
        });
    }
}

#[async_trait]
impl NetworkListener for DynamicNetworkListener {
    async fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    fn listen(&self) -> watch::Receiver<bool> {
        self.online.subscribe()
    }
}

/// Always offline.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineNetworkListener;

#[async_trait]
impl NetworkListener for OfflineNetworkListener {
    async fn is_online(&self) -> bool {
        false
    }

    fn listen(&self) -> watch::Receiver<bool> {
        // The sender is dropped, so the receiver never reports a change.
        watch::channel(false).1
    }
}

/// Always online.
#[derive(Debug, Clone, Copy, Default)]
pub struct OnlineNetworkListener;

#[async_trait]
impl NetworkListener for OnlineNetworkListener {
    async fn is_online(&self) -> bool {
        true
    }

    fn listen(&self) -> watch::Receiver<bool> {
        watch::channel(true).1
    }
}
