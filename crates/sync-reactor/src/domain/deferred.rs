//! # Deferred Results
//!
//! Single-resolution handles for one-shot queries and mutations, built on
//! `oneshot`. Settling twice is a no-op, as is settling after the receiver
//! was dropped.

use tokio::sync::oneshot;

/// Sending half of a single-resolution result.
#[derive(Debug)]
pub struct Deferred<T> {
    sender: Option<oneshot::Sender<T>>,
}

impl<T> Deferred<T> {
    /// Create a deferred and the receiver that observes it.
    pub fn channel() -> (Self, oneshot::Receiver<T>) {
        let (tx, rx) = oneshot::channel();
        (Self { sender: Some(tx) }, rx)
    }

    /// Wrap an existing sender.
    pub fn from_sender(sender: oneshot::Sender<T>) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    /// Deliver `value`. Returns false if already settled or nobody is listening.
    pub fn settle(&mut self, value: T) -> bool {
        match self.sender.take() {
            Some(tx) => tx.send(value).is_ok(),
            None => false,
        }
    }

    /// Whether a value was already delivered.
    pub fn is_settled(&self) -> bool {
        self.sender.is_none()
    }

    /// Whether the receiver was dropped.
    pub fn is_abandoned(&self) -> bool {
        self.sender.as_ref().map_or(true, |tx| tx.is_closed())
    }
}

impl<T, E> Deferred<Result<T, E>> {
    /// Settle with `Ok(value)`.
    pub fn resolve(&mut self, value: T) -> bool {
        self.settle(Ok(value))
    }

    /// Settle with `Err(error)`.
    pub fn reject(&mut self, error: E) -> bool {
        self.settle(Err(error))
    }
}
