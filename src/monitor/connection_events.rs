//! Event factory for the connection monitoring protocol.

use crate::connection::Connection;
use crate::entity::{Entity, EntityKind};
use crate::error::TranslationError;
use crate::wire;

use super::event::{Event, EventType};
use super::factory::EventFactory;

/// Translates events to and from [`wire::ConnectionEvent`].
#[derive(Debug, Clone)]
pub struct ConnectionEventFactory {
    name: String,
}

impl ConnectionEventFactory {
    /// A factory logging under `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for ConnectionEventFactory {
    fn default() -> Self {
        Self::new("connections")
    }
}

impl EventFactory for ConnectionEventFactory {
    type Message = wire::ConnectionEvent;

    fn name(&self) -> &str {
        &self.name
    }

    fn to_message(&self, event: &Event) -> Result<Self::Message, TranslationError> {
        let wire_type = match event.event_type() {
            EventType::InitialStateTransfer => wire::ConnectionEventType::InitialStateTransfer,
            EventType::Update => wire::ConnectionEventType::Update,
            EventType::Delete => wire::ConnectionEventType::Delete,
        };

        let connections = event
            .entities()
            .values()
            .map(|entity| match entity {
                Entity::Connection(c) => Ok(wire::Connection::from(c.clone())),
                other => Err(TranslationError::UnexpectedPayload {
                    expected: EntityKind::Connection,
                    actual: other.kind(),
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(wire::ConnectionEvent {
            r#type: wire_type as i32,
            connections,
        })
    }

    fn from_message(&self, message: Self::Message) -> Result<Event, TranslationError> {
        let event_type = match wire::ConnectionEventType::try_from(message.r#type) {
            Ok(wire::ConnectionEventType::InitialStateTransfer) => EventType::InitialStateTransfer,
            Ok(wire::ConnectionEventType::Update) => EventType::Update,
            Ok(wire::ConnectionEventType::Delete) => EventType::Delete,
            Err(_) => {
                return Err(TranslationError::UnknownEventType {
                    code: message.r#type,
                })
            }
        };

        let entities = message
            .connections
            .into_iter()
            .map(|c| Connection::try_from(c).map(Entity::Connection))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Event::new(event_type, entities))
    }
}
