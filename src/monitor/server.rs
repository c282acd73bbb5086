//! Monitor server: canonical entity state and broadcast to recipients.
//!
//! All mutation of the entity mapping and of the recipient set happens inside
//! a single `serve` task. Producers, registrations, deregistrations and
//! queries share one bounded FIFO command queue, so every request observes
//! the effect of every request enqueued before it. A full queue blocks the
//! caller.
//!
//! A recipient whose outbound queue is full at broadcast time is marked
//! lagging: it is skipped until its forwarder frees a slot, then it is sent a
//! fresh initial state transfer and rejoins the broadcast. Only deregistration
//! removes a recipient.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use crate::config::MonitorServerConfig;
use crate::entity::Entity;
use crate::error::{MonitorResult, TransportError};

use super::event::{Event, EventType};
use super::factory::EventFactory;
use super::recipient::{forward, Outbound, Recipient, RecipientId};

struct Registration<M> {
    id: RecipientId,
    recipient: Box<dyn Recipient<M>>,
    done: oneshot::Sender<()>,
    ack: oneshot::Sender<()>,
}

type EntitiesReply = oneshot::Sender<BTreeMap<String, Entity>>;

enum Command<M> {
    Publish(Event),
    Register(Registration<M>),
    Deregister(RecipientId),
    Query(EntitiesReply),
    /// A lagging recipient's outbound queue has room again.
    Resync(RecipientId),
}

/// Handle to a running monitor server.
///
/// Cheap to clone. The `serve` task exits once every handle is dropped.
pub struct MonitorServer<F: EventFactory> {
    name: Arc<str>,
    commands: mpsc::Sender<Command<F::Message>>,
}

impl<F: EventFactory> Clone for MonitorServer<F> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            commands: self.commands.clone(),
        }
    }
}

impl<F: EventFactory> std::fmt::Debug for MonitorServer<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorServer").field("name", &self.name).finish_non_exhaustive()
    }
}

impl<F: EventFactory> MonitorServer<F> {
    /// Spawn the `serve` task on the current tokio runtime, inside a
    /// `monitor_server` span named after the factory.
    #[must_use]
    pub fn start(factory: F, cfg: &MonitorServerConfig) -> Self {
        let span = info_span!("monitor_server", factory = %factory.name());
        Self::start_with_span(factory, cfg, span)
    }

    /// Spawn the `serve` task inside `span`. Recipient forwarder spans are
    /// created as its children.
    #[must_use]
    pub fn start_with_span(factory: F, cfg: &MonitorServerConfig, span: Span) -> Self {
        let name: Arc<str> = Arc::from(factory.name());
        let (commands, rx) = mpsc::channel(cfg.event_queue_capacity.max(1));

        let state = ServerState {
            factory,
            entities: BTreeMap::new(),
            recipients: Vec::new(),
            outbound_capacity: cfg.outbound_queue_capacity.max(1),
            commands: commands.downgrade(),
        };
        tokio::spawn(serve(state, rx).instrument(span));

        Self { name, commands }
    }

    /// The factory name this server was started with.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueue an `Update` event for `entity`. Blocks while the queue is full.
    pub async fn update(&self, entity: impl Into<Entity>) -> MonitorResult<()> {
        self.send(Command::Publish(Event::update(entity))).await
    }

    /// Enqueue a `Delete` event for `entity`. Blocks while the queue is full.
    pub async fn delete(&self, entity: impl Into<Entity>) -> MonitorResult<()> {
        self.send(Command::Publish(Event::delete(entity))).await
    }

    async fn send(&self, command: Command<F::Message>) -> MonitorResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| TransportError::disconnected("monitor_server.commands").into())
    }

    /// Register a recipient.
    ///
    /// Returns once the server has queued the initial state transfer for it.
    /// The snapshot reflects every event enqueued before this call, and every
    /// event enqueued afterwards is delivered after it.
    pub async fn add_recipient<R: Recipient<F::Message>>(
        &self,
        recipient: R,
    ) -> MonitorResult<RecipientId> {
        let (id, _done) = self.register(Box::new(recipient)).await?;
        Ok(id)
    }

    async fn register(
        &self,
        recipient: Box<dyn Recipient<F::Message>>,
    ) -> MonitorResult<(RecipientId, oneshot::Receiver<()>)> {
        let id = RecipientId::new();
        info!(factory = %self.name, recipient = %id, "adding recipient");

        let (done_tx, done_rx) = oneshot::channel();
        let (ack_tx, ack_rx) = oneshot::channel();
        self.send(Command::Register(Registration {
            id,
            recipient,
            done: done_tx,
            ack: ack_tx,
        }))
        .await?;

        ack_rx
            .await
            .map_err(|_| TransportError::disconnected("monitor_server.commands"))?;
        Ok((id, done_rx))
    }

    /// Deregister a recipient. Unknown ids are ignored.
    pub async fn delete_recipient(&self, id: RecipientId) -> MonitorResult<()> {
        info!(factory = %self.name, recipient = %id, "deleting recipient");
        self.send(Command::Deregister(id)).await
    }

    /// Serve one subscriber for the lifetime of its stream.
    ///
    /// Registers `recipient`, then waits until either `cancelled` resolves (the
    /// peer went away) or the recipient's forwarder has stopped, and
    /// deregisters it.
    pub async fn monitor_entities<R, C>(&self, recipient: R, cancelled: C) -> MonitorResult<()>
    where
        R: Recipient<F::Message>,
        C: Future<Output = ()>,
    {
        let (id, done) = self.register(Box::new(recipient)).await?;

        tokio::select! {
            () = cancelled => debug!(recipient = %id, "subscriber cancelled"),
            _ = done => debug!(recipient = %id, "recipient forwarder stopped"),
        }

        self.delete_recipient(id).await
    }

    /// Snapshot of the canonical entity mapping, including every event
    /// enqueued before this call.
    pub async fn entities(&self) -> MonitorResult<BTreeMap<String, Entity>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Command::Query(reply_tx)).await?;
        reply_rx
            .await
            .map_err(|_| TransportError::disconnected("monitor_server.commands").into())
    }
}

struct ServerState<F: EventFactory> {
    factory: F,
    entities: BTreeMap<String, Entity>,
    recipients: Vec<Outbound<F::Message>>,
    outbound_capacity: usize,
    commands: mpsc::WeakSender<Command<F::Message>>,
}

async fn serve<F: EventFactory>(
    mut state: ServerState<F>,
    mut commands: mpsc::Receiver<Command<F::Message>>,
) {
    info!("serve starting");

    while let Some(command) = commands.recv().await {
        match command {
            Command::Publish(event) => state.apply(event),
            Command::Register(reg) => state.add_recipient(reg),
            Command::Deregister(id) => state.remove_recipient(id),
            Command::Query(reply) => {
                let _ = reply.send(state.entities.clone());
            }
            Command::Resync(id) => state.resync(id),
        }
    }

    info!("serve stopped");
}

impl<F: EventFactory> ServerState<F> {
    fn snapshot(&self) -> Option<F::Message> {
        let snapshot = Event::initial_state_transfer(self.entities.clone());
        match self.factory.to_message(&snapshot) {
            Ok(msg) => Some(msg),
            Err(e) => {
                error!(error = %e, "failed to convert initial state transfer");
                None
            }
        }
    }

    fn add_recipient(&mut self, reg: Registration<F::Message>) {
        let Registration {
            id,
            recipient,
            done,
            ack,
        } = reg;
        let (tx, rx) = mpsc::channel(self.outbound_capacity);

        // The snapshot is the first message in the fresh queue, ahead of any
        // broadcast the recipient can see.
        if let Some(msg) = self.snapshot() {
            if tx.try_send(msg).is_err() {
                error!(recipient = %id, "failed to queue initial state transfer");
            }
        }

        let stop = CancellationToken::new();
        tokio::spawn(
            forward(id, recipient, rx, stop.clone(), done)
                .instrument(info_span!("recipient", recipient = %id)),
        );
        self.recipients.push(Outbound::new(id, tx, stop));
        let _ = ack.send(());
    }

    fn remove_recipient(&mut self, id: RecipientId) {
        if let Some(pos) = self.recipients.iter().position(|r| r.id == id) {
            self.recipients.remove(pos);
        }
    }

    fn apply(&mut self, event: Event) {
        info!(%event, "new event");

        match event.event_type() {
            EventType::Update => {
                for (id, entity) in event.entities() {
                    self.entities.insert(id.clone(), entity.clone());
                }
            }
            EventType::Delete => {
                for id in event.entities().keys() {
                    self.entities.remove(id);
                }
            }
            // Only ever built per recipient at registration or resync.
            EventType::InitialStateTransfer => {}
        }

        let msg = match self.factory.to_message(&event) {
            Ok(msg) => msg,
            Err(e) => {
                error!(error = %e, "failed to convert event");
                return;
            }
        };

        let commands = &self.commands;
        self.recipients.retain_mut(|r| {
            if r.lagging {
                debug!(recipient = %r.id, "recipient lagging, skipping event");
                return true;
            }
            match r.tx.try_send(msg.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        recipient = %r.id,
                        "recipient not draining, holding events until it does"
                    );
                    r.lagging = true;
                    tokio::spawn(
                        resync_when_drained(r.id, r.tx.clone(), r.stop.clone(), commands.clone())
                            .in_current_span(),
                    );
                    true
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(recipient = %r.id, "recipient forwarder gone");
                    false
                }
            }
        });
    }

    fn resync(&mut self, id: RecipientId) {
        let Some(pos) = self.recipients.iter().position(|r| r.id == id && r.lagging) else {
            return;
        };
        let Some(msg) = self.snapshot() else {
            return;
        };

        let r = &mut self.recipients[pos];
        match r.tx.try_send(msg) {
            Ok(()) => {
                info!(recipient = %id, "recipient drained, resent initial state transfer");
                r.lagging = false;
            }
            Err(TrySendError::Full(_)) => {
                tokio::spawn(
                    resync_when_drained(id, r.tx.clone(), r.stop.clone(), self.commands.clone())
                        .in_current_span(),
                );
            }
            Err(TrySendError::Closed(_)) => {
                debug!(recipient = %id, "recipient forwarder gone");
                self.recipients.remove(pos);
            }
        }
    }
}

/// Wait until `tx` has a free slot, then ask the serve loop to resync `id`.
async fn resync_when_drained<M: Send + 'static>(
    id: RecipientId,
    tx: mpsc::Sender<M>,
    stop: CancellationToken,
    commands: mpsc::WeakSender<Command<M>>,
) {
    let drained = tokio::select! {
        biased;
        () = stop.cancelled() => false,
        permit = tx.reserve() => permit.is_ok(),
    };
    if !drained {
        return;
    }
    if let Some(commands) = commands.upgrade() {
        let _ = commands.send(Command::Resync(id)).await;
    }
}
