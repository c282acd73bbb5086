//! Event factory for trust-bundle federation.

use crate::bundle::TrustBundle;
use crate::entity::{Entity, EntityKind};
use crate::error::TranslationError;
use crate::wire;

use super::event::{Event, EventType};
use super::factory::EventFactory;

/// Translates events to and from [`wire::BundleEvent`].
#[derive(Debug, Clone)]
pub struct BundleEventFactory {
    name: String,
}

impl BundleEventFactory {
    /// A factory logging under `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for BundleEventFactory {
    fn default() -> Self {
        Self::new("bundles")
    }
}

impl EventFactory for BundleEventFactory {
    type Message = wire::BundleEvent;

    fn name(&self) -> &str {
        &self.name
    }

    fn to_message(&self, event: &Event) -> Result<Self::Message, TranslationError> {
        let wire_type = match event.event_type() {
            EventType::InitialStateTransfer => wire::BundleEventType::InitialStateTransfer,
            EventType::Update => wire::BundleEventType::Update,
            EventType::Delete => wire::BundleEventType::Delete,
        };

        let bundles = event
            .entities()
            .values()
            .map(|entity| match entity {
                Entity::TrustBundle(b) => Ok(wire::Bundle::from(b.clone())),
                other => Err(TranslationError::UnexpectedPayload {
                    expected: EntityKind::TrustBundle,
                    actual: other.kind(),
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(wire::BundleEvent {
            r#type: wire_type as i32,
            bundles,
        })
    }

    fn from_message(&self, message: Self::Message) -> Result<Event, TranslationError> {
        let event_type = match wire::BundleEventType::try_from(message.r#type) {
            Ok(wire::BundleEventType::InitialStateTransfer) => EventType::InitialStateTransfer,
            Ok(wire::BundleEventType::Update) => EventType::Update,
            Ok(wire::BundleEventType::Delete) => EventType::Delete,
            Err(_) => {
                return Err(TranslationError::UnknownEventType {
                    code: message.r#type,
                })
            }
        };

        let entities = message
            .bundles
            .into_iter()
            .map(|b| Entity::TrustBundle(TrustBundle::from(b)));

        Ok(Event::new(event_type, entities))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::JwtSigningKey;
    use crate::connection::Connection;

    #[test]
    fn test_bundle_roundtrip() {
        let factory = BundleEventFactory::default();
        let mut bundle = TrustBundle::new("spiffe://example.org").with_root_ca(vec![0x30, 0x82]);
        bundle.jwt_signing_keys.push(JwtSigningKey {
            kid: "k1".to_string(),
            pkix_bytes: vec![1, 2, 3],
            not_after: 1_700_000_000,
        });
        bundle.refresh_hint = 300;

        let event = Event::update(bundle);
        let msg = factory.to_message(&event).unwrap();
        assert_eq!(msg.r#type, wire::BundleEventType::Update as i32);
        assert_eq!(factory.from_message(msg).unwrap(), event);
    }

    #[test]
    fn test_connection_payload_rejected() {
        let factory = BundleEventFactory::default();
        let event = Event::delete(Connection::new("c1", "svc"));
        assert!(matches!(
            factory.to_message(&event),
            Err(TranslationError::UnexpectedPayload {
                expected: EntityKind::TrustBundle,
                actual: EntityKind::Connection,
            })
        ));
    }

    #[test]
    fn test_unknown_wire_type_rejected() {
        let factory = BundleEventFactory::new("federation");
        assert_eq!(factory.name(), "federation");
        let msg = wire::BundleEvent {
            r#type: -1,
            bundles: Vec::new(),
        };
        assert!(matches!(
            factory.from_message(msg),
            Err(TranslationError::UnknownEventType { code: -1 })
        ));
    }
}
