//! Monitor subsystem: replicate entity state from a server to subscribers.
//!
//! A [`MonitorServer`] owns the canonical mapping of entity id to entity and
//! broadcasts every change to its registered recipients. A newly registered
//! recipient first receives an initial state transfer, then incremental
//! `Update`/`Delete` events. A [`MonitorClient`] consumes one such stream and
//! exposes it as decoded [`Event`]s.
//!
//! The core is payload agnostic: an [`EventFactory`] translates between the
//! generic [`Event`] and a concrete wire message. Connection and trust-bundle
//! factories are provided.

/// Trust-bundle event factory.
pub mod bundle_events;
/// In-process recipient/stream pair.
pub mod channel;
/// Subscription client.
pub mod client;
/// Connection event factory.
pub mod connection_events;
/// Generic event type.
pub mod event;
/// Event factory trait.
pub mod factory;
/// Recipient trait and per-recipient forwarding.
pub mod recipient;
/// Server state machine.
pub mod server;

pub use bundle_events::BundleEventFactory;
pub use channel::{pipe, ChannelRecipient, ChannelStream};
pub use client::{EventStream, MonitorClient};
pub use connection_events::ConnectionEventFactory;
pub use event::{Event, EventType};
pub use factory::EventFactory;
pub use recipient::{Recipient, RecipientId};
pub use server::MonitorServer;
