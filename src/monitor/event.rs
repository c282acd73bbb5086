//! Generic monitor events.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::entity::Entity;

/// Kind of change an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Full snapshot sent once to a new subscriber before any other event.
    InitialStateTransfer,
    /// Entities were created or changed.
    Update,
    /// Entities were removed.
    Delete,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InitialStateTransfer => f.write_str("initial_state_transfer"),
            Self::Update => f.write_str("update"),
            Self::Delete => f.write_str("delete"),
        }
    }
}

/// An immutable notification that a set of entities changed.
///
/// Entities are keyed by [`Entity::id`]. The map is ordered so that the wire
/// form of an event is deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    event_type: EventType,
    entities: BTreeMap<String, Entity>,
}

impl Event {
    /// Build an event from a set of entities, keying each by its id.
    #[must_use]
    pub fn new(event_type: EventType, entities: impl IntoIterator<Item = Entity>) -> Self {
        let entities = entities
            .into_iter()
            .map(|e| (e.id().to_string(), e))
            .collect();
        Self {
            event_type,
            entities,
        }
    }

    /// Snapshot event carrying the given canonical mapping.
    #[must_use]
    pub fn initial_state_transfer(entities: BTreeMap<String, Entity>) -> Self {
        Self {
            event_type: EventType::InitialStateTransfer,
            entities,
        }
    }

    /// Single-entity `Update` event.
    #[must_use]
    pub fn update(entity: impl Into<Entity>) -> Self {
        Self::new(EventType::Update, [entity.into()])
    }

    /// Single-entity `Delete` event.
    #[must_use]
    pub fn delete(entity: impl Into<Entity>) -> Self {
        Self::new(EventType::Delete, [entity.into()])
    }

    /// The kind of change.
    #[must_use]
    pub const fn event_type(&self) -> EventType {
        self.event_type
    }

    /// Entities carried by the event, keyed by id.
    #[must_use]
    pub const fn entities(&self) -> &BTreeMap<String, Entity> {
        &self.entities
    }

    /// Consume the event, keeping its entities.
    #[must_use]
    pub fn into_entities(self) -> BTreeMap<String, Entity> {
        self.entities
    }

    /// Number of entities carried.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether the event carries no entities.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[", self.event_type)?;
        for (i, id) in self.entities.keys().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(id)?;
        }
        f.write_str("]")
    }
}
