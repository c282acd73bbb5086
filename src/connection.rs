//! Network connection descriptors.
//!
//! A `Connection` is owned by the connection-establishment subsystem; the
//! monitor only replicates copies of it. Conversions to and from the protobuf
//! wire form live here so every payload consumer shares one mapping.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::TranslationError;
use crate::wire;

/// Id assigned to a cached connection whose re-request failed.
///
/// The next request then asks the control plane for a fresh id instead of
/// reusing one it has already rejected.
pub const SENTINEL_CONNECTION_ID: &str = "-";

/// Lifecycle state of a connection.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    #[default]
    Up,
    Down,
}

/// The dataplane technique used to realize a connection (e.g. a kernel interface).
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Mechanism {
    pub cls: String,
    pub mechanism_type: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

impl Mechanism {
    /// A mechanism without parameters.
    #[must_use]
    pub fn new(cls: impl Into<String>, mechanism_type: impl Into<String>) -> Self {
        Self {
            cls: cls.into(),
            mechanism_type: mechanism_type.into(),
            parameters: BTreeMap::new(),
        }
    }
}

/// IP addressing of a connection.
///
/// The `*_required` flags tell the control plane that the caller wants the
/// given address back rather than a freshly allocated one.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IpContext {
    pub src_ip_addr: String,
    pub dst_ip_addr: String,
    pub src_ip_required: bool,
    pub dst_ip_required: bool,
}

impl IpContext {
    /// Mark every already-assigned address as required.
    pub fn require_assigned(&mut self) {
        if !self.src_ip_addr.is_empty() {
            self.src_ip_required = true;
        }
        if !self.dst_ip_addr.is_empty() {
            self.dst_ip_required = true;
        }
    }
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DnsConfig {
    pub dns_server_ips: Vec<String>,
    pub search_domains: Vec<String>,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DnsContext {
    pub configs: Vec<DnsConfig>,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConnectionContext {
    pub ip_context: Option<IpContext>,
    pub dns_context: Option<DnsContext>,
}

/// A network connection as replicated by the monitor.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Connection {
    pub id: String,
    pub network_service: String,
    pub mechanism: Option<Mechanism>,
    pub context: ConnectionContext,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub state: State,
}

impl Connection {
    /// Create an `Up` connection with an empty context.
    #[must_use]
    pub fn new(id: impl Into<String>, network_service: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            network_service: network_service.into(),
            ..Self::default()
        }
    }

    /// Set the mechanism.
    #[must_use]
    pub fn with_mechanism(mut self, mechanism: Mechanism) -> Self {
        self.mechanism = Some(mechanism);
        self
    }

    /// Set the IP context.
    #[must_use]
    pub fn with_ip_context(mut self, ip_context: IpContext) -> Self {
        self.context.ip_context = Some(ip_context);
        self
    }

    /// Set the lifecycle state.
    #[must_use]
    pub fn with_state(mut self, state: State) -> Self {
        self.state = state;
        self
    }

    /// Whether the connection is in the `Up` state.
    #[must_use]
    pub fn is_up(&self) -> bool {
        self.state == State::Up
    }
}

/// A request for a connection, as sent to the external request-connection
/// operation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NetworkServiceRequest {
    /// Desired state of the connection.
    pub connection: Connection,
    /// Acceptable mechanisms, most preferred first.
    pub mechanism_preferences: Vec<Mechanism>,
}

impl NetworkServiceRequest {
    /// Build the request that asks for `connection` to be restored as it was.
    ///
    /// Assigned IP addresses are marked required and the original mechanism
    /// is the only preference.
    #[must_use]
    pub fn restore(connection: &Connection) -> Self {
        let mut desired = connection.clone();
        if let Some(ip) = desired.context.ip_context.as_mut() {
            ip.require_assigned();
        }
        Self {
            mechanism_preferences: connection.mechanism.iter().cloned().collect(),
            connection: desired,
        }
    }
}

// ----------------------------------------------------------------------------
// Wire conversions
// ----------------------------------------------------------------------------

impl From<State> for wire::State {
    fn from(state: State) -> Self {
        match state {
            State::Up => Self::Up,
            State::Down => Self::Down,
        }
    }
}

impl From<Mechanism> for wire::Mechanism {
    fn from(m: Mechanism) -> Self {
        Self {
            cls: m.cls,
            r#type: m.mechanism_type,
            parameters: m.parameters.into_iter().collect(),
        }
    }
}

impl From<wire::Mechanism> for Mechanism {
    fn from(m: wire::Mechanism) -> Self {
        Self {
            cls: m.cls,
            mechanism_type: m.r#type,
            parameters: m.parameters.into_iter().collect(),
        }
    }
}

impl From<IpContext> for wire::IpContext {
    fn from(ip: IpContext) -> Self {
        Self {
            src_ip_addr: ip.src_ip_addr,
            dst_ip_addr: ip.dst_ip_addr,
            src_ip_required: ip.src_ip_required,
            dst_ip_required: ip.dst_ip_required,
        }
    }
}

impl From<wire::IpContext> for IpContext {
    fn from(ip: wire::IpContext) -> Self {
        Self {
            src_ip_addr: ip.src_ip_addr,
            dst_ip_addr: ip.dst_ip_addr,
            src_ip_required: ip.src_ip_required,
            dst_ip_required: ip.dst_ip_required,
        }
    }
}

impl From<DnsContext> for wire::DnsContext {
    fn from(dns: DnsContext) -> Self {
        Self {
            configs: dns
                .configs
                .into_iter()
                .map(|c| wire::DnsConfig {
                    dns_server_ips: c.dns_server_ips,
                    search_domains: c.search_domains,
                })
                .collect(),
        }
    }
}

impl From<wire::DnsContext> for DnsContext {
    fn from(dns: wire::DnsContext) -> Self {
        Self {
            configs: dns
                .configs
                .into_iter()
                .map(|c| DnsConfig {
                    dns_server_ips: c.dns_server_ips,
                    search_domains: c.search_domains,
                })
                .collect(),
        }
    }
}

impl From<Connection> for wire::Connection {
    fn from(c: Connection) -> Self {
        Self {
            id: c.id,
            network_service: c.network_service,
            mechanism: c.mechanism.map(Into::into),
            context: Some(wire::ConnectionContext {
                ip_context: c.context.ip_context.map(Into::into),
                dns_context: c.context.dns_context.map(Into::into),
            }),
            labels: c.labels.into_iter().collect(),
            state: wire::State::from(c.state) as i32,
        }
    }
}

impl TryFrom<wire::Connection> for Connection {
    type Error = TranslationError;

    fn try_from(c: wire::Connection) -> Result<Self, Self::Error> {
        let state = match wire::State::try_from(c.state) {
            Ok(wire::State::Up) => State::Up,
            Ok(wire::State::Down) => State::Down,
            Err(_) => {
                return Err(TranslationError::InvalidField {
                    field: "connection.state",
                    reason: format!("unknown state code {}", c.state),
                })
            }
        };
        let context = c.context.unwrap_or_default();
        Ok(Self {
            id: c.id,
            network_service: c.network_service,
            mechanism: c.mechanism.map(Into::into),
            context: ConnectionContext {
                ip_context: context.ip_context.map(Into::into),
                dns_context: context.dns_context.map(Into::into),
            },
            labels: c.labels.into_iter().collect(),
            state,
        })
    }
}

impl From<NetworkServiceRequest> for wire::NetworkServiceRequest {
    fn from(r: NetworkServiceRequest) -> Self {
        Self {
            connection: Some(r.connection.into()),
            mechanism_preferences: r.mechanism_preferences.into_iter().map(Into::into).collect(),
        }
    }
}

impl TryFrom<wire::NetworkServiceRequest> for NetworkServiceRequest {
    type Error = TranslationError;

    fn try_from(r: wire::NetworkServiceRequest) -> Result<Self, Self::Error> {
        let connection = r.connection.ok_or_else(|| TranslationError::InvalidField {
            field: "request.connection",
            reason: "missing".to_string(),
        })?;
        Ok(Self {
            connection: connection.try_into()?,
            mechanism_preferences: r.mechanism_preferences.into_iter().map(Into::into).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kernel() -> Mechanism {
        Mechanism::new("LOCAL", "KERNEL_INTERFACE")
    }

    #[test]
    fn test_restore_marks_assigned_addresses_required() {
        let conn = Connection::new("c1", "icmp-responder")
            .with_mechanism(kernel())
            .with_ip_context(IpContext {
                src_ip_addr: "10.0.0.1/30".to_string(),
                dst_ip_addr: String::new(),
                ..IpContext::default()
            })
            .with_state(State::Down);

        let req = NetworkServiceRequest::restore(&conn);
        let ip = req.connection.context.ip_context.as_ref().unwrap();
        assert!(ip.src_ip_required);
        assert!(!ip.dst_ip_required);
        assert_eq!(req.mechanism_preferences, vec![kernel()]);

        // The cached original is left untouched.
        assert!(!conn.context.ip_context.unwrap().src_ip_required);
    }

    #[test]
    fn test_restore_without_mechanism_or_ip() {
        let conn = Connection::new("c1", "svc").with_state(State::Down);
        let req = NetworkServiceRequest::restore(&conn);
        assert!(req.mechanism_preferences.is_empty());
        assert!(req.connection.context.ip_context.is_none());
    }

    #[test]
    fn test_wire_roundtrip_preserves_connection() {
        let mut conn = Connection::new("c1", "svc")
            .with_mechanism(kernel())
            .with_ip_context(IpContext {
                src_ip_addr: "10.0.0.1/30".to_string(),
                dst_ip_addr: "10.0.0.2/30".to_string(),
                src_ip_required: true,
                dst_ip_required: false,
            })
            .with_state(State::Down);
        conn.labels.insert("app".to_string(), "web".to_string());
        conn.context.dns_context = Some(DnsContext {
            configs: vec![DnsConfig {
                dns_server_ips: vec!["10.96.0.10".to_string()],
                search_domains: vec!["cluster.local".to_string()],
            }],
        });

        let back = Connection::try_from(wire::Connection::from(conn.clone())).unwrap();
        assert_eq!(back, conn);
    }

    #[test]
    fn test_unknown_state_code_rejected() {
        let msg = wire::Connection {
            id: "c1".to_string(),
            state: 9,
            ..wire::Connection::default()
        };
        let err = Connection::try_from(msg).unwrap_err();
        assert!(matches!(err, TranslationError::InvalidField { field: "connection.state", .. }));
    }

    #[test]
    fn test_missing_wire_context_defaults() {
        let msg = wire::Connection {
            id: "c1".to_string(),
            ..wire::Connection::default()
        };
        let conn = Connection::try_from(msg).unwrap();
        assert_eq!(conn.context, ConnectionContext::default());
        assert!(conn.is_up());
    }
}
