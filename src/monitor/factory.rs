//! Translation between generic events and transport-specific wire messages.

use crate::error::TranslationError;

use super::event::Event;

/// Per-payload-kind translator.
///
/// One implementation exists for each wire protocol (connections, trust
/// bundles). The server, recipient and client machinery is generic over this
/// trait and never inspects payloads itself.
pub trait EventFactory: Send + Sync + 'static {
    /// The wire message carried by the stream.
    type Message: Clone + Send + 'static;

    /// Name used in log spans.
    fn name(&self) -> &str;

    /// Outbound: serialize an event into a wire message.
    fn to_message(&self, event: &Event) -> Result<Self::Message, TranslationError>;

    /// Inbound: decode a wire message into an event.
    fn from_message(&self, message: Self::Message) -> Result<Event, TranslationError>;
}
