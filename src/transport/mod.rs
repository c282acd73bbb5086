//! gRPC transport layer.
//!
//! Server side: one tonic service per payload kind, each backed by a
//! [`MonitorServer`]. Every inbound subscription becomes one recipient whose
//! lifetime is the response stream. Client side: a `tonic::Streaming`
//! adapter for [`MonitorClient`], a `NetworkService` client used as the
//! healer's requester, and a [`Connector`] tying both to one endpoint.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, warn};

use crate::config::MonitorClientConfig;
use crate::connection::{Connection, NetworkServiceRequest};
use crate::error::{MonitorResult, ReconciliationError, TransportError};
use crate::healer::{ConnectionRequester, Connector, Session};
use crate::monitor::{
    BundleEventFactory, ConnectionEventFactory, EventFactory, EventStream, MonitorClient,
    MonitorServer, Recipient,
};
use crate::wire;
use crate::wire::bundle_monitor_client::BundleMonitorClient;
use crate::wire::bundle_monitor_server::{BundleMonitor, BundleMonitorServer};
use crate::wire::monitor_connection_client::MonitorConnectionClient;
use crate::wire::monitor_connection_server::{MonitorConnection, MonitorConnectionServer};
use crate::wire::network_service_client::NetworkServiceClient;

/// Response-stream buffer per subscriber.
const DEFAULT_STREAM_CAPACITY: usize = 16;

// ----------------------------------------------------------------------------
// Server side
// ----------------------------------------------------------------------------

/// Forwards serialized events into one subscriber's response stream.
struct StreamRecipient<M> {
    tx: mpsc::Sender<Result<M, Status>>,
}

#[async_trait]
impl<M: Send + 'static> Recipient<M> for StreamRecipient<M> {
    async fn send_msg(&self, msg: M) -> Result<(), TransportError> {
        self.tx.send(Ok(msg)).await.map_err(|_| TransportError::SendFailed {
            message: "subscriber stream closed".to_string(),
        })
    }
}

/// Register a new subscriber and return its response stream.
///
/// The recipient is deregistered when the peer drops the stream.
fn subscribe<F: EventFactory>(
    server: &MonitorServer<F>,
    capacity: usize,
) -> ReceiverStream<Result<F::Message, Status>> {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let recipient = StreamRecipient { tx: tx.clone() };
    let server = server.clone();

    tokio::spawn(async move {
        let peer_gone = async move { tx.closed().await };
        match server.monitor_entities(recipient, peer_gone).await {
            Ok(()) => debug!(factory = server.name(), "subscription finished"),
            Err(e) => warn!(factory = server.name(), error = %e, "subscription failed"),
        }
    });

    ReceiverStream::new(rx)
}

/// `MonitorConnection` service backed by a connection monitor.
#[derive(Debug, Clone)]
pub struct ConnectionMonitorService {
    server: MonitorServer<ConnectionEventFactory>,
    stream_capacity: usize,
}

impl ConnectionMonitorService {
    /// Serve subscriptions from `server`.
    #[must_use]
    pub const fn new(server: MonitorServer<ConnectionEventFactory>) -> Self {
        Self {
            server,
            stream_capacity: DEFAULT_STREAM_CAPACITY,
        }
    }

    /// Response-stream buffer per subscriber.
    #[must_use]
    pub fn with_stream_capacity(mut self, capacity: usize) -> Self {
        self.stream_capacity = capacity;
        self
    }

    /// Wrap in the generated tonic server.
    #[must_use]
    pub fn into_server(self) -> MonitorConnectionServer<Self> {
        MonitorConnectionServer::new(self)
    }
}

#[tonic::async_trait]
impl MonitorConnection for ConnectionMonitorService {
    type MonitorConnectionsStream = ReceiverStream<Result<wire::ConnectionEvent, Status>>;

    async fn monitor_connections(
        &self,
        _request: Request<wire::MonitorRequest>,
    ) -> Result<Response<Self::MonitorConnectionsStream>, Status> {
        Ok(Response::new(subscribe(&self.server, self.stream_capacity)))
    }
}

/// `BundleMonitor` service backed by a trust-bundle monitor.
#[derive(Debug, Clone)]
pub struct BundleMonitorService {
    server: MonitorServer<BundleEventFactory>,
    stream_capacity: usize,
}

impl BundleMonitorService {
    /// Serve subscriptions from `server`.
    #[must_use]
    pub const fn new(server: MonitorServer<BundleEventFactory>) -> Self {
        Self {
            server,
            stream_capacity: DEFAULT_STREAM_CAPACITY,
        }
    }

    /// Wrap in the generated tonic server.
    #[must_use]
    pub fn into_server(self) -> BundleMonitorServer<Self> {
        BundleMonitorServer::new(self)
    }
}

#[tonic::async_trait]
impl BundleMonitor for BundleMonitorService {
    type MonitorBundlesStream = ReceiverStream<Result<wire::BundleEvent, Status>>;

    async fn monitor_bundles(
        &self,
        _request: Request<wire::MonitorRequest>,
    ) -> Result<Response<Self::MonitorBundlesStream>, Status> {
        Ok(Response::new(subscribe(&self.server, self.stream_capacity)))
    }
}

// ----------------------------------------------------------------------------
// Client side
// ----------------------------------------------------------------------------

/// [`EventStream`] over a server-streaming gRPC response.
pub struct GrpcEventStream<M> {
    inner: Streaming<M>,
}

impl<M> GrpcEventStream<M> {
    /// Adapt a tonic response stream.
    #[must_use]
    pub const fn new(inner: Streaming<M>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<M: Send + 'static> EventStream<M> for GrpcEventStream<M> {
    async fn recv(&mut self) -> Result<M, TransportError> {
        match self.inner.message().await {
            Ok(Some(msg)) => Ok(msg),
            Ok(None) => Err(TransportError::StreamClosed),
            Err(status) => Err(TransportError::RecvFailed {
                message: status.to_string(),
            }),
        }
    }
}

fn open_failed(status: &Status) -> TransportError {
    TransportError::ConnectFailed {
        message: status.to_string(),
    }
}

async fn open_connection_stream(
    channel: Channel,
) -> Result<GrpcEventStream<wire::ConnectionEvent>, TransportError> {
    let mut client = MonitorConnectionClient::new(channel);
    let response = client
        .monitor_connections(wire::MonitorRequest {})
        .await
        .map_err(|s| open_failed(&s))?;
    Ok(GrpcEventStream::new(response.into_inner()))
}

async fn open_bundle_stream(
    channel: Channel,
) -> Result<GrpcEventStream<wire::BundleEvent>, TransportError> {
    let mut client = BundleMonitorClient::new(channel);
    let response = client
        .monitor_bundles(wire::MonitorRequest {})
        .await
        .map_err(|s| open_failed(&s))?;
    Ok(GrpcEventStream::new(response.into_inner()))
}

/// Subscribe to connection events over `channel`.
pub async fn connect_connections(
    channel: Channel,
    cfg: &MonitorClientConfig,
) -> MonitorResult<MonitorClient> {
    MonitorClient::connect(channel, ConnectionEventFactory::default(), open_connection_stream, cfg)
        .await
}

/// Subscribe to trust-bundle events over `channel`.
pub async fn connect_bundles(
    channel: Channel,
    cfg: &MonitorClientConfig,
) -> MonitorResult<MonitorClient> {
    MonitorClient::connect(channel, BundleEventFactory::default(), open_bundle_stream, cfg).await
}

/// [`ConnectionRequester`] calling the `NetworkService.Request` RPC.
#[derive(Debug, Clone)]
pub struct GrpcConnectionRequester {
    client: NetworkServiceClient<Channel>,
}

impl GrpcConnectionRequester {
    /// Request connections over `channel`.
    #[must_use]
    pub fn new(channel: Channel) -> Self {
        Self {
            client: NetworkServiceClient::new(channel),
        }
    }
}

#[async_trait]
impl ConnectionRequester for GrpcConnectionRequester {
    async fn request(
        &self,
        request: NetworkServiceRequest,
    ) -> Result<Connection, ReconciliationError> {
        let connection_id = request.connection.id.clone();
        let mut client = self.client.clone();

        let reply = client
            .request(wire::NetworkServiceRequest::from(request))
            .await
            .map_err(|status| ReconciliationError::RequestFailed {
                connection_id: connection_id.clone(),
                message: status.message().to_string(),
            })?;

        Connection::try_from(reply.into_inner()).map_err(|e| ReconciliationError::RequestFailed {
            connection_id,
            message: e.to_string(),
        })
    }
}

/// Connects the healer to a control plane endpoint that serves both the
/// connection monitor and the network service.
#[derive(Debug, Clone)]
pub struct GrpcConnector {
    endpoint: Endpoint,
    client_cfg: MonitorClientConfig,
}

impl GrpcConnector {
    /// Connect to `endpoint` on every attempt.
    #[must_use]
    pub const fn new(endpoint: Endpoint, client_cfg: MonitorClientConfig) -> Self {
        Self {
            endpoint,
            client_cfg,
        }
    }
}

#[async_trait]
impl Connector for GrpcConnector {
    type Requester = GrpcConnectionRequester;

    async fn connect(&self) -> Result<Session<GrpcConnectionRequester>, TransportError> {
        let channel = self
            .endpoint
            .connect()
            .await
            .map_err(|e| TransportError::ConnectFailed {
                message: e.to_string(),
            })?;

        let stream = open_connection_stream(channel.clone()).await?;
        let client = MonitorClient::spawn(ConnectionEventFactory::default(), stream, &self.client_cfg);
        Ok(Session {
            client,
            requester: GrpcConnectionRequester::new(channel),
        })
    }
}
