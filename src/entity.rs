//! Entities replicated by the monitor.
//!
//! The monitor core only needs a stable identifier per entity. Payload kinds
//! are a closed set, so `Entity` is a sum type rather than an open trait; an
//! event factory matches on it to reach the concrete payload.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::bundle::TrustBundle;
use crate::connection::Connection;

/// Discriminant of an [`Entity`].
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Connection,
    TrustBundle,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection => f.write_str("connection"),
            Self::TrustBundle => f.write_str("trust bundle"),
        }
    }
}

/// Anything the monitor replicates.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Entity {
    Connection(Connection),
    TrustBundle(TrustBundle),
}

impl Entity {
    /// The stable identifier the monitor keys this entity by.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Connection(c) => &c.id,
            Self::TrustBundle(b) => &b.trust_domain_id,
        }
    }

    /// Which payload kind this entity is.
    #[must_use]
    pub const fn kind(&self) -> EntityKind {
        match self {
            Self::Connection(_) => EntityKind::Connection,
            Self::TrustBundle(_) => EntityKind::TrustBundle,
        }
    }

    /// The connection payload, if this is a connection.
    #[must_use]
    pub const fn as_connection(&self) -> Option<&Connection> {
        match self {
            Self::Connection(c) => Some(c),
            Self::TrustBundle(_) => None,
        }
    }

    /// The connection payload, if this is a connection.
    #[must_use]
    pub fn into_connection(self) -> Option<Connection> {
        match self {
            Self::Connection(c) => Some(c),
            Self::TrustBundle(_) => None,
        }
    }
}

impl From<Connection> for Entity {
    fn from(c: Connection) -> Self {
        Self::Connection(c)
    }
}

impl From<TrustBundle> for Entity {
    fn from(b: TrustBundle) -> Self {
        Self::TrustBundle(b)
    }
}
