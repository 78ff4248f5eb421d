//! Chat relay: publish local messages, deliver every broadcast locally.

use std::sync::Arc;

use relay_common::ServerEvent;

use crate::store::ChannelBus;

use super::events::BusEvent;
use super::registry::SessionRegistry;
use super::session::GatewaySession;

pub struct MessageRelay {
    bus: Arc<dyn ChannelBus>,
    sessions: Arc<SessionRegistry>,
}

impl MessageRelay {
    pub fn new(bus: Arc<dyn ChannelBus>, sessions: Arc<SessionRegistry>) -> Self {
        Self { bus, sessions }
    }

    /// Publish a message authored by a local client. There is no local echo:
    /// the author receives it back through the subscription like everyone
    /// else. If the bus is unavailable the message is delivered to local
    /// sessions only.
    pub async fn on_client_message(&self, session: &GatewaySession, text: String) {
        let event = BusEvent::ChatMessage(text);
        if let Err(err) = self.bus.publish(event.channel(), &event.encode()).await {
            let BusEvent::ChatMessage(text) = event else {
                return;
            };
            let delivered = self.on_chat_broadcast(text);
            tracing::warn!(
                session_id = %session.session_id,
                %err,
                delivered,
                "failed to publish chat message, delivered locally"
            );
        }
    }

    /// Deliver a chat broadcast to every local session, regardless of origin.
    pub fn on_chat_broadcast(&self, text: String) -> usize {
        self.sessions.push_all(&ServerEvent::NewMessage { message: text })
    }
}
