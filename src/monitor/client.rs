//! Monitor client: one outbound subscription decoded into generic events.

use std::future::Future;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument, Span};

use crate::config::MonitorClientConfig;
use crate::error::{MonitorResult, TransportError};

use super::event::Event;
use super::factory::EventFactory;

/// The receiving side of a subscription stream.
#[async_trait]
pub trait EventStream<M: Send + 'static>: Send + 'static {
    /// Receive the next wire message. The end of the stream is reported as
    /// [`TransportError::StreamClosed`].
    async fn recv(&mut self) -> Result<M, TransportError>;
}

/// A single subscription to a monitor server.
///
/// A background task reads the stream, decodes each message with the event
/// factory and publishes the result on the event sink. The first transport
/// error is published on the error sink and ends the task for good; a new
/// client must be connected to resume.
#[derive(Debug)]
pub struct MonitorClient {
    events: mpsc::Receiver<Event>,
    errors: mpsc::Receiver<TransportError>,
    cancel: CancellationToken,
}

impl MonitorClient {
    /// Open one stream over `conn` using `open` and start the receive task.
    pub async fn connect<C, F, S, O, Fut>(
        conn: C,
        factory: F,
        open: O,
        cfg: &MonitorClientConfig,
    ) -> MonitorResult<Self>
    where
        F: EventFactory,
        S: EventStream<F::Message>,
        O: FnOnce(C) -> Fut,
        Fut: Future<Output = Result<S, TransportError>>,
    {
        let stream = open(conn).await?;
        Ok(Self::spawn(factory, stream, cfg))
    }

    /// Like [`connect`](Self::connect), with the receive task in `span`.
    pub async fn connect_with_span<C, F, S, O, Fut>(
        conn: C,
        factory: F,
        open: O,
        cfg: &MonitorClientConfig,
        span: Span,
    ) -> MonitorResult<Self>
    where
        F: EventFactory,
        S: EventStream<F::Message>,
        O: FnOnce(C) -> Fut,
        Fut: Future<Output = Result<S, TransportError>>,
    {
        let stream = open(conn).await?;
        Ok(Self::spawn_with_span(factory, stream, cfg, span))
    }

    /// Start the receive task over an already opened stream, inside a
    /// `monitor_client` span named after the factory.
    #[must_use]
    pub fn spawn<F, S>(factory: F, stream: S, cfg: &MonitorClientConfig) -> Self
    where
        F: EventFactory,
        S: EventStream<F::Message>,
    {
        let span = info_span!("monitor_client", factory = %factory.name());
        Self::spawn_with_span(factory, stream, cfg, span)
    }

    /// Start the receive task over an already opened stream, inside `span`.
    #[must_use]
    pub fn spawn_with_span<F, S>(
        factory: F,
        stream: S,
        cfg: &MonitorClientConfig,
        span: Span,
    ) -> Self
    where
        F: EventFactory,
        S: EventStream<F::Message>,
    {
        let (event_tx, events) = mpsc::channel(cfg.event_sink_capacity.max(1));
        let (error_tx, errors) = mpsc::channel(cfg.error_sink_capacity.max(1));
        let cancel = CancellationToken::new();

        tokio::spawn(receive(factory, stream, event_tx, error_tx, cancel.clone()).instrument(span));

        Self {
            events,
            errors,
            cancel,
        }
    }

    /// Decoded events, in stream order.
    pub fn event_channel(&mut self) -> &mut mpsc::Receiver<Event> {
        &mut self.events
    }

    /// At most one transport error, after which no more events arrive.
    pub fn error_channel(&mut self) -> &mut mpsc::Receiver<TransportError> {
        &mut self.errors
    }

    /// Wait for the next event or the terminal transport error.
    ///
    /// Events already decoded are returned before the error. Cancel safe.
    pub async fn recv(&mut self) -> Result<Event, TransportError> {
        tokio::select! {
            biased;
            Some(event) = self.events.recv() => Ok(event),
            Some(err) = self.errors.recv() => Err(err),
            else => Err(TransportError::disconnected("monitor_client")),
        }
    }

    /// Stop the receive task, which drops the underlying stream.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for MonitorClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn receive<F, S>(
    factory: F,
    mut stream: S,
    event_tx: mpsc::Sender<Event>,
    error_tx: mpsc::Sender<TransportError>,
    cancel: CancellationToken,
) where
    F: EventFactory,
    S: EventStream<F::Message>,
{
    loop {
        let received = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!("monitor client closed");
                return;
            }
            received = stream.recv() => received,
        };

        match received {
            Ok(msg) => match factory.from_message(msg) {
                Ok(event) => {
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => return,
                        sent = event_tx.send(event) => {
                            if sent.is_err() {
                                return;
                            }
                        }
                    }
                }
                Err(e) => warn!(error = %e, "dropping message that failed to translate"),
            },
            Err(e) => {
                warn!(error = %e, "monitor stream failed");
                let _ = error_tx.send(e).await;
                return;
            }
        }
    }
}
