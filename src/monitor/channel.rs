//! In-process recipient and stream built on tokio channels.
//!
//! Used to wire a `MonitorServer` directly to a `MonitorClient` without a
//! network transport, and by tests.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::TransportError;

use super::client::EventStream;
use super::recipient::Recipient;

/// A recipient that pushes messages into an mpsc channel.
#[derive(Debug, Clone)]
pub struct ChannelRecipient<M> {
    tx: mpsc::Sender<M>,
}

impl<M> ChannelRecipient<M> {
    /// Wrap the sending half of a channel.
    #[must_use]
    pub const fn new(tx: mpsc::Sender<M>) -> Self {
        Self { tx }
    }

    /// Resolves once the receiving half is dropped.
    pub async fn closed(&self) {
        self.tx.closed().await;
    }
}

#[async_trait]
impl<M: Send + 'static> Recipient<M> for ChannelRecipient<M> {
    async fn send_msg(&self, msg: M) -> Result<(), TransportError> {
        self.tx.send(msg).await.map_err(|_| TransportError::SendFailed {
            message: "receiver dropped".to_string(),
        })
    }
}

/// A stream reading messages from an mpsc channel. A closed channel reads as
/// [`TransportError::StreamClosed`].
#[derive(Debug)]
pub struct ChannelStream<M> {
    rx: mpsc::Receiver<M>,
}

impl<M> ChannelStream<M> {
    /// Wrap the receiving half of a channel.
    #[must_use]
    pub const fn new(rx: mpsc::Receiver<M>) -> Self {
        Self { rx }
    }
}

#[async_trait]
impl<M: Send + 'static> EventStream<M> for ChannelStream<M> {
    async fn recv(&mut self) -> Result<M, TransportError> {
        self.rx.recv().await.ok_or(TransportError::StreamClosed)
    }
}

/// A connected recipient/stream pair.
#[must_use]
pub fn pipe<M>(capacity: usize) -> (ChannelRecipient<M>, ChannelStream<M>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ChannelRecipient::new(tx), ChannelStream::new(rx))
}
