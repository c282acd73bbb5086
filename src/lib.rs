//! # nsm-monitor - Connection monitoring and healing
//!
//! A monitor server replicates the state of network service mesh entities
//! (connections, federated trust bundles) to any number of subscribers. A
//! subscriber-side healer mirrors the connections it is responsible for and
//! re-requests the broken ones after the monitor stream restarts.
//!
//! ## Core Concepts
//!
//! - **Entity**: a replicated value with a stable id (`Connection`, `TrustBundle`)
//! - **Event**: an `InitialStateTransfer`, `Update` or `Delete` over a set of entities
//! - **EventFactory**: translator between events and one payload kind's wire messages
//! - **Recipient**: the server side of one subscriber's stream
//! - **Healer**: local connection cache plus recovery sweeps
//!
//! ## Usage
//!
//! ```rust,ignore
//! use nsm_monitor::{Connection, ConnectionEventFactory, MonitorServer, MonitorServerConfig};
//! use nsm_monitor::monitor::pipe;
//!
//! let server = MonitorServer::start(ConnectionEventFactory::default(), &MonitorServerConfig::default());
//! server.update(Connection::new("conn-1", "secure-intranet")).await?;
//!
//! let (recipient, stream) = pipe(16);
//! server.add_recipient(recipient).await?;
//! // `stream` yields the initial state transfer, then every later change.
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod bundle;
pub mod config;
pub mod connection;
pub mod entity;
pub mod error;
pub mod wire;

// Replication and repair
pub mod healer;
pub mod monitor;
pub mod telemetry;

#[cfg(feature = "transport-grpc")]
pub mod transport;

// Re-export primary types at crate root for convenience
pub use bundle::{JwtSigningKey, TrustBundle};
pub use config::{
    Config, DeletePolicy, HealerConfig, LogFormat, LoggingConfig, MonitorClientConfig,
    MonitorServerConfig,
};
pub use connection::{
    Connection, ConnectionContext, DnsConfig, DnsContext, IpContext, Mechanism,
    NetworkServiceRequest, State, SENTINEL_CONNECTION_ID,
};
pub use entity::{Entity, EntityKind};
pub use error::{
    ConfigError, MonitorError, MonitorResult, ReconciliationError, TranslationError,
    TransportError,
};
pub use healer::{
    ConnectionCache, ConnectionRequester, Connector, Healer, HealerExit, HealerHandle,
    HealerState, HealingHandler, NoopHandler, Session,
};
pub use monitor::{
    BundleEventFactory, ConnectionEventFactory, Event, EventFactory, EventStream, EventType,
    MonitorClient, MonitorServer, Recipient, RecipientId,
};
