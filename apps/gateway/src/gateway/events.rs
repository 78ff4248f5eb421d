//! Cross-process bus names and the decoded form of bus payloads.

use crate::store::BusMessage;

/// Store key holding the cluster-wide connected-client count.
pub const CONNECTION_COUNT_KEY: &str = "chat:connection-count";
/// Channel carrying the post-update counter value as decimal text.
pub const CONNECTION_COUNT_UPDATED_CHANNEL: &str = "chat:connection-count-updated";
/// Channel carrying chat message text verbatim.
pub const NEW_MESSAGE_CHANNEL: &str = "chat:new-message";

/// Every channel a gateway must be subscribed to before it is healthy.
pub const SUBSCRIBED_CHANNELS: [&str; 2] = [CONNECTION_COUNT_UPDATED_CHANNEL, NEW_MESSAGE_CHANNEL];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("message on unknown channel `{0}`")]
    UnknownChannel(String),
    #[error("counter payload `{0}` is not an integer")]
    InvalidCount(String),
}

/// A payload received on one of the gateway channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    CounterUpdate(u64),
    ChatMessage(String),
}

impl BusEvent {
    /// Decode a raw bus message. Negative counter values are clamped to zero
    /// so no subscriber ever forwards a negative total.
    pub fn decode(msg: BusMessage) -> Result<Self, DecodeError> {
        match msg.channel.as_str() {
            CONNECTION_COUNT_UPDATED_CHANNEL => {
                let value: i64 = msg
                    .payload
                    .trim()
                    .parse()
                    .map_err(|_| DecodeError::InvalidCount(msg.payload.clone()))?;
                Ok(Self::CounterUpdate(value.max(0) as u64))
            }
            NEW_MESSAGE_CHANNEL => Ok(Self::ChatMessage(msg.payload)),
            _ => Err(DecodeError::UnknownChannel(msg.channel)),
        }
    }

    pub fn channel(&self) -> &'static str {
        match self {
            Self::CounterUpdate(_) => CONNECTION_COUNT_UPDATED_CHANNEL,
            Self::ChatMessage(_) => NEW_MESSAGE_CHANNEL,
        }
    }

    pub fn encode(&self) -> String {
        match self {
            Self::CounterUpdate(count) => count.to_string(),
            Self::ChatMessage(text) => text.clone(),
        }
    }
}
