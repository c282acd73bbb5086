//! Healer: keep a local copy of monitored connections and repair them.
//!
//! The healer subscribes to a connection monitor through a [`Connector`],
//! mirrors every connection it hears about into a [`ConnectionCache`], and
//! after the first initial state transfer of each subscription re-requests
//! every cached connection that is not up. A transport failure marks the
//! whole cache down and starts a new subscription, whose snapshot then
//! decides which connections still need repair.
//!
//! ```text
//! Connecting -> AwaitingSnapshot -> Recovering -> Steady
//!      ^                                            |
//!      +------------- stream error -----------------+
//! ```

pub mod cache;
pub mod recovery;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument, Span};

use crate::config::{DeletePolicy, HealerConfig};
use crate::connection::{Connection, NetworkServiceRequest};
use crate::error::{MonitorResult, ReconciliationError, TransportError};
use crate::monitor::{Event, EventType, MonitorClient};

pub use cache::ConnectionCache;
pub use recovery::{sweep, SweepReport};

/// The external request-connection operation.
#[async_trait]
pub trait ConnectionRequester: Send + Sync {
    /// Ask the control plane for `request.connection`. The returned
    /// connection may carry a new id.
    async fn request(
        &self,
        request: NetworkServiceRequest,
    ) -> Result<Connection, ReconciliationError>;
}

/// One live subscription plus the requester to heal through.
#[allow(missing_docs)]
pub struct Session<R> {
    pub client: MonitorClient,
    pub requester: R,
}

impl<R> fmt::Debug for Session<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").field("client", &self.client).finish_non_exhaustive()
    }
}

/// Opens subscriptions for the healer. Called again after every failure.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Requester bound to the same control plane as the subscription.
    type Requester: ConnectionRequester;

    /// Open a new subscription.
    async fn connect(&self) -> Result<Session<Self::Requester>, TransportError>;
}

/// Notifications about healing progress. Every method defaults to a no-op.
pub trait HealingHandler: Send + Sync {
    /// The first snapshot of a subscription was applied.
    fn connected(&self, _connections: &BTreeMap<String, Connection>) {}

    /// A connection is about to be re-requested.
    fn healing(&self, _request: &NetworkServiceRequest) {}

    /// A re-request finished.
    fn healed(&self, _result: Result<&Connection, &ReconciliationError>) {}

    /// A connection was inserted or replaced from a monitor event.
    fn updated(&self, _old: Option<&Connection>, _new: &Connection) {}

    /// The monitor reported a connection as deleted.
    fn closed(&self, _connection: &Connection) {}

    /// `Healer::run` is about to return.
    fn stopped(&self) {}
}

/// A handler that ignores every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHandler;

impl HealingHandler for NoopHandler {}

/// Where the healer currently is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealerState {
    /// No subscription yet, or re-subscribing after a failure.
    Connecting,
    /// Subscribed, waiting for the initial state transfer.
    AwaitingSnapshot,
    /// Snapshot applied, cache considered authoritative.
    Steady,
    /// Running recovery sweeps.
    Recovering,
    /// `run` has returned.
    Stopped,
}

impl fmt::Display for HealerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connecting => "connecting",
            Self::AwaitingSnapshot => "awaiting_snapshot",
            Self::Steady => "steady",
            Self::Recovering => "recovering",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Why `Healer::run` returned successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealerExit {
    /// Stop was requested.
    Stopped,
    /// A connection was deleted under [`DeletePolicy::StopMonitoring`].
    #[allow(missing_docs)]
    ConnectionClosed { connection_id: String },
}

/// Control side of a running healer.
#[derive(Debug, Clone)]
pub struct HealerHandle {
    stop: CancellationToken,
    state: watch::Receiver<HealerState>,
}

impl HealerHandle {
    /// Request the healer to stop. Observed at the next wait point.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// The most recently published state.
    #[must_use]
    pub fn state(&self) -> HealerState {
        *self.state.borrow()
    }

    /// A receiver that observes every state change.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<HealerState> {
        self.state.clone()
    }
}

enum SessionEnd {
    Stopped,
    Closed(String),
    Failed(TransportError),
}

/// Subscriber-side repair loop.
pub struct Healer<C: Connector> {
    connector: C,
    cfg: HealerConfig,
    handler: Box<dyn HealingHandler>,
    cache: ConnectionCache,
    stop: CancellationToken,
    state: watch::Sender<HealerState>,
    span: Span,
}

impl<C: Connector> Healer<C> {
    /// Create a healer and the handle used to stop and observe it.
    #[must_use]
    pub fn new(connector: C, cfg: HealerConfig) -> (Self, HealerHandle) {
        let stop = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(HealerState::Connecting);
        let healer = Self {
            connector,
            cfg,
            handler: Box::new(NoopHandler),
            cache: ConnectionCache::new(),
            stop: stop.clone(),
            state: state_tx,
            span: info_span!("healer"),
        };
        let handle = HealerHandle {
            stop,
            state: state_rx,
        };
        (healer, handle)
    }

    /// Receive healing progress notifications.
    #[must_use]
    pub fn with_handler(mut self, handler: impl HealingHandler + 'static) -> Self {
        self.handler = Box::new(handler);
        self
    }

    /// Run inside `span` instead of the default `healer` span.
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Start from an existing cache, e.g. connections restored from a
    /// previous run.
    #[must_use]
    pub fn with_cache(mut self, cache: ConnectionCache) -> Self {
        self.cache = cache;
        self
    }

    /// The local connection cache.
    #[must_use]
    pub fn connections(&self) -> &BTreeMap<String, Connection> {
        self.cache.connections()
    }

    /// Monitor and heal until stopped.
    ///
    /// Returns an error only when `max_reconnect_attempts` consecutive connect
    /// attempts fail.
    pub async fn run(&mut self) -> MonitorResult<HealerExit> {
        let span = self.span.clone();
        let result = self.supervise().instrument(span).await;
        self.set_state(HealerState::Stopped);
        self.handler.stopped();
        result
    }

    async fn supervise(&mut self) -> MonitorResult<HealerExit> {
        let mut failed_attempts: u32 = 0;

        loop {
            self.set_state(HealerState::Connecting);
            let connected = tokio::select! {
                biased;
                () = self.stop.cancelled() => return Ok(HealerExit::Stopped),
                connected = self.connector.connect() => connected,
            };

            let session = match connected {
                Ok(session) => {
                    failed_attempts = 0;
                    session
                }
                Err(e) => {
                    failed_attempts = failed_attempts.saturating_add(1);
                    warn!(error = %e, attempt = failed_attempts, "failed to connect to monitor");
                    if self
                        .cfg
                        .max_reconnect_attempts
                        .is_some_and(|max| failed_attempts >= max)
                    {
                        return Err(e.into());
                    }
                    if !self.pause().await {
                        return Ok(HealerExit::Stopped);
                    }
                    continue;
                }
            };

            match self.monitor(session).await {
                SessionEnd::Stopped => return Ok(HealerExit::Stopped),
                SessionEnd::Closed(connection_id) => {
                    return Ok(HealerExit::ConnectionClosed { connection_id })
                }
                SessionEnd::Failed(e) => {
                    warn!(error = %e, "monitor stream failed, re-connecting");
                }
            }
        }
    }

    async fn monitor(&mut self, mut session: Session<C::Requester>) -> SessionEnd {
        self.set_state(HealerState::AwaitingSnapshot);
        let mut init_received = false;

        loop {
            let received = tokio::select! {
                biased;
                () = self.stop.cancelled() => return SessionEnd::Stopped,
                received = session.client.recv() => received,
            };

            let event = match received {
                Ok(event) => event,
                Err(e) => {
                    self.cache.mark_all_down();
                    return SessionEnd::Failed(e);
                }
            };

            let is_snapshot = event.event_type() == EventType::InitialStateTransfer;
            if let Some(end) = self.apply(event) {
                return end;
            }

            if is_snapshot && !init_received {
                init_received = true;
                info!(connections = self.cache.len(), "initial state received");
                self.handler.connected(self.cache.connections());
                if !self.recover(&session.requester).await {
                    return SessionEnd::Stopped;
                }
            }
        }
    }

    fn apply(&mut self, event: Event) -> Option<SessionEnd> {
        let event_type = event.event_type();
        debug!(%event, "monitor event");

        for entity in event.into_entities().into_values() {
            let Some(conn) = entity.into_connection() else {
                debug!("ignoring non-connection entity");
                continue;
            };

            match event_type {
                EventType::InitialStateTransfer | EventType::Update => {
                    let id = conn.id.clone();
                    let old = self.cache.insert(conn);
                    if let Some(new) = self.cache.get(&id) {
                        self.handler.updated(old.as_ref(), new);
                    }
                }
                EventType::Delete => {
                    info!(connection = %conn.id, "connection deleted");
                    self.cache.remove(&conn.id);
                    self.handler.closed(&conn);
                    if self.cfg.delete_policy == DeletePolicy::StopMonitoring {
                        return Some(SessionEnd::Closed(conn.id));
                    }
                }
            }
        }
        None
    }

    /// Sweep until nothing is left to retry. Returns false if stopped.
    async fn recover(&mut self, requester: &C::Requester) -> bool {
        self.set_state(HealerState::Recovering);
        loop {
            let report = sweep(&mut self.cache, requester, self.handler.as_ref()).await;
            if !report.needs_retry() {
                self.set_state(HealerState::Steady);
                return true;
            }
            info!(pending = report.failed.len(), "recovery incomplete, retrying");
            if !self.pause().await {
                return false;
            }
        }
    }

    /// Wait for the retry delay. Returns false if stopped meanwhile.
    async fn pause(&self) -> bool {
        tokio::select! {
            biased;
            () = self.stop.cancelled() => false,
            () = tokio::time::sleep(self.cfg.retry_delay()) => true,
        }
    }

    fn set_state(&self, state: HealerState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "healer state");
        }
    }
}

impl<C: Connector> fmt::Debug for Healer<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Healer")
            .field("cfg", &self.cfg)
            .field("cache", &self.cache)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitorClientConfig;
    use crate::monitor::{pipe, ChannelStream, ConnectionEventFactory, EventFactory, Recipient};
    use crate::wire;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::timeout;

    struct AlwaysUp;

    #[async_trait]
    impl ConnectionRequester for AlwaysUp {
        async fn request(
            &self,
            request: NetworkServiceRequest,
        ) -> Result<Connection, ReconciliationError> {
            Ok(request.connection.with_state(crate::connection::State::Up))
        }
    }

    /// Hands out pre-built streams, last first, one per connect call.
    struct Scripted {
        streams: Mutex<Vec<ChannelStream<wire::ConnectionEvent>>>,
    }

    impl Scripted {
        fn empty() -> Self {
            Self {
                streams: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Connector for Scripted {
        type Requester = AlwaysUp;

        async fn connect(&self) -> Result<Session<AlwaysUp>, TransportError> {
            let stream = self.streams.lock().unwrap().pop().ok_or_else(|| {
                TransportError::ConnectFailed {
                    message: "script exhausted".to_string(),
                }
            })?;
            let client = MonitorClient::spawn(
                ConnectionEventFactory::default(),
                stream,
                &MonitorClientConfig::default(),
            );
            Ok(Session {
                client,
                requester: AlwaysUp,
            })
        }
    }

    fn fast_cfg() -> HealerConfig {
        HealerConfig {
            retry_delay_ms: 10,
            ..HealerConfig::default()
        }
    }

    #[tokio::test]
    async fn stop_before_run_returns_stopped() {
        let connector = Scripted::empty();
        let (mut healer, handle) = Healer::new(connector, fast_cfg());
        handle.stop();
        let exit = healer.run().await.unwrap();
        assert_eq!(exit, HealerExit::Stopped);
        assert_eq!(handle.state(), HealerState::Stopped);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let connector = Scripted::empty();
        let cfg = HealerConfig {
            max_reconnect_attempts: Some(3),
            ..fast_cfg()
        };
        let (mut healer, handle) = Healer::new(connector, cfg);
        let err = timeout(Duration::from_secs(1), healer.run())
            .await
            .unwrap()
            .unwrap_err();
        assert!(err.is_transport());
        assert_eq!(handle.state(), HealerState::Stopped);
    }

    #[tokio::test]
    async fn run_logs_in_the_given_span() {
        let (logs, _guard) = crate::telemetry::capture_logs();
        let cfg = HealerConfig {
            max_reconnect_attempts: Some(1),
            ..fast_cfg()
        };
        let (healer, _handle) = Healer::new(Scripted::empty(), cfg);
        let mut healer = healer.with_span(tracing::info_span!("edge_healer"));
        assert!(healer.run().await.is_err());

        let logs = logs.contents();
        let line = logs
            .lines()
            .find(|l| l.contains("failed to connect to monitor"))
            .expect("connect failure not logged");
        assert!(line.contains("edge_healer"), "{line}");
    }

    #[tokio::test]
    async fn stream_error_marks_cache_down() {
        let (recipient, stream) = pipe::<wire::ConnectionEvent>(8);
        let factory = ConnectionEventFactory::default();
        let snapshot = Event::initial_state_transfer(
            [("c1".to_string(), Connection::new("c1", "svc").into())]
                .into_iter()
                .collect(),
        );
        recipient
            .send_msg(factory.to_message(&snapshot).unwrap())
            .await
            .unwrap();
        drop(recipient);

        let session = Session {
            client: MonitorClient::spawn(factory, stream, &MonitorClientConfig::default()),
            requester: AlwaysUp,
        };
        let connector = Scripted::empty();
        let (mut healer, _handle) = Healer::new(connector, fast_cfg());

        match healer.monitor(session).await {
            SessionEnd::Failed(e) => assert_eq!(e, TransportError::StreamClosed),
            _ => panic!("expected stream failure"),
        }
        assert!(!healer.connections()["c1"].is_up());
    }
}
