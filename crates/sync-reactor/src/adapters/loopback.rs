//! In-process transport.
//!
//! Each channel the Reactor opens surfaces as a [`ServerEndpoint`] on the
//! paired [`LoopbackServer`]. Whoever holds the endpoint plays the remote
//! authority: it opens the channel, reads client frames and answers with
//! server messages.

use crate::domain::{ClientEnvelope, ProtocolError, ServerMessage, TransportError};
use crate::ports::{Channel, ChannelSink, Transport};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkState {
    Connecting,
    Open,
    Closed,
}

type SharedLink = Arc<Mutex<LinkState>>;

/// Client side of the loopback transport.
#[derive(Debug)]
pub struct LoopbackTransport {
    accepted: mpsc::UnboundedSender<ServerEndpoint>,
}

impl LoopbackTransport {
    /// Transport and the server that receives its channels.
    pub fn new() -> (Self, LoopbackServer) {
        let (accepted, incoming) = mpsc::unbounded_channel();
        (Self { accepted }, LoopbackServer { incoming })
    }
}

impl Transport for LoopbackTransport {
    fn open(&self, uri: &str, sink: ChannelSink) -> Box<dyn Channel> {
        let link: SharedLink = Arc::new(Mutex::new(LinkState::Connecting));
        let (frames_tx, frames) = mpsc::unbounded_channel();
        let endpoint = ServerEndpoint {
            uri: uri.to_string(),
            sink,
            link: Arc::clone(&link),
            frames,
        };
        if let Err(mpsc::error::SendError(endpoint)) = self.accepted.send(endpoint) {
            // Nobody accepts: the channel fails like an unreachable host.
            endpoint.close();
        }
        Box::new(LoopbackChannel { link, frames_tx })
    }
}

struct LoopbackChannel {
    link: SharedLink,
    frames_tx: mpsc::UnboundedSender<String>,
}

impl Channel for LoopbackChannel {
    fn send(&self, text: String) -> Result<(), TransportError> {
        if *self.link.lock() != LinkState::Open {
            return Err(TransportError::Closed);
        }
        self.frames_tx
            .send(text)
            .map_err(|_| TransportError::Send("server endpoint dropped".to_string()))
    }

    fn close(&self) {
        *self.link.lock() = LinkState::Closed;
    }

    fn is_open(&self) -> bool {
        *self.link.lock() == LinkState::Open
    }

    fn is_connecting(&self) -> bool {
        *self.link.lock() == LinkState::Connecting
    }
}

/// Accepts channels opened through the paired [`LoopbackTransport`].
#[derive(Debug)]
pub struct LoopbackServer {
    incoming: mpsc::UnboundedReceiver<ServerEndpoint>,
}

impl LoopbackServer {
    /// Wait for the next channel. `None` once the transport is gone.
    pub async fn accept(&mut self) -> Option<ServerEndpoint> {
        self.incoming.recv().await
    }

    /// A channel that is already waiting, if any.
    pub fn try_accept(&mut self) -> Option<ServerEndpoint> {
        self.incoming.try_recv().ok()
    }
}

/// Server end of one loopback channel.
#[derive(Debug)]
pub struct ServerEndpoint {
    uri: String,
    sink: ChannelSink,
    link: SharedLink,
    frames: mpsc::UnboundedReceiver<String>,
}

impl ServerEndpoint {
    /// URI the client opened.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Generation the client assigned to this channel.
    pub fn generation(&self) -> u64 {
        self.sink.generation()
    }

    /// Whether the client has closed or replaced the channel.
    pub fn is_closed(&self) -> bool {
        *self.link.lock() == LinkState::Closed
    }

    /// Complete the connection.
    pub fn open(&self) {
        let mut link = self.link.lock();
        if *link == LinkState::Connecting {
            *link = LinkState::Open;
            drop(link);
            self.sink.opened();
        }
    }

    /// Deliver a server message.
    pub fn send(&self, message: &ServerMessage) -> Result<(), ProtocolError> {
        let text = serde_json::to_string(message)?;
        self.send_raw(text);
        Ok(())
    }

    /// Deliver a raw text frame.
    pub fn send_raw(&self, text: impl Into<String>) {
        self.sink.message(text);
    }

    /// Wait for the next client message. `None` once the client side is gone.
    pub async fn recv(&mut self) -> Option<ClientEnvelope> {
        loop {
            let text = self.frames.recv().await?;
            if let Ok(envelope) = ClientEnvelope::parse(&text) {
                return Some(envelope);
            }
        }
    }

    /// A client message that is already waiting, if any.
    pub fn try_recv(&mut self) -> Option<ClientEnvelope> {
        while let Ok(text) = self.frames.try_recv() {
            if let Ok(envelope) = ClientEnvelope::parse(&text) {
                return Some(envelope);
            }
        }
        None
    }

    /// Close from the server side.
    pub fn close(&self) {
        *self.link.lock() = LinkState::Closed;
        self.sink.closed();
    }

    /// Fail the channel. A close follows, as with a real socket.
    pub fn error(&self, reason: &str) {
        self.sink.error(reason);
        self.close();
    }
}
