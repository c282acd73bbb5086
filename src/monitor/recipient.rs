//! Recipients: sinks that receive serialized events from the server.
//!
//! Each registered recipient gets its own bounded outbound queue drained by a
//! dedicated forwarder task, so a slow recipient only delays itself.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::TransportError;

/// Unique identifier for a registered recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecipientId(Uuid);

impl RecipientId {
    /// Create a new random recipient id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RecipientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecipientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The server side of a subscriber's stream.
#[async_trait]
pub trait Recipient<M: Send + 'static>: Send + Sync + 'static {
    /// Deliver one message. Failures are logged by the caller and never
    /// unregister the recipient.
    async fn send_msg(&self, msg: M) -> Result<(), TransportError>;
}

/// Server-side bookkeeping for one recipient.
///
/// Dropping it stops the forwarder, even one stuck in `send_msg`, and any
/// task waiting for the recipient to drain.
pub(crate) struct Outbound<M> {
    pub id: RecipientId,
    pub tx: mpsc::Sender<M>,
    /// Broadcasts are skipped until a fresh snapshot has been queued.
    pub lagging: bool,
    pub stop: CancellationToken,
    _guard: DropGuard,
}

impl<M> Outbound<M> {
    pub fn new(id: RecipientId, tx: mpsc::Sender<M>, stop: CancellationToken) -> Self {
        Self {
            id,
            tx,
            lagging: false,
            _guard: stop.clone().drop_guard(),
            stop,
        }
    }
}

/// Drain `rx` into `recipient` until the server removes the recipient.
///
/// `done` is dropped on exit, which tells a waiting `monitor_entities` call
/// that the recipient is gone.
pub(crate) async fn forward<M: Send + 'static>(
    id: RecipientId,
    recipient: Box<dyn Recipient<M>>,
    mut rx: mpsc::Receiver<M>,
    stop: CancellationToken,
    done: oneshot::Sender<()>,
) {
    loop {
        let msg = tokio::select! {
            biased;
            () = stop.cancelled() => break,
            msg = rx.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };

        tokio::select! {
            biased;
            () = stop.cancelled() => break,
            sent = recipient.send_msg(msg) => {
                if let Err(e) = sent {
                    warn!(recipient = %id, error = %e, "send to recipient failed");
                }
            }
        }
    }
    debug!(recipient = %id, "forwarder stopped");
    drop(done);
}
