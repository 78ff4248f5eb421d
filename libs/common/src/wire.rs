//! Client-facing WebSocket wire format.
//!
//! Every frame is a JSON object `{"event": <name>, "data": <payload>}`.

use serde::{Deserialize, Serialize};

/// An event pushed from a gateway to one of its connected clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// The cluster-wide number of connected clients changed.
    ConnectionCountUpdated { count: u64 },
    /// A chat message relayed from any client in the cluster.
    NewMessage { message: String },
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ConnectionCountUpdated { .. } => "connection-count-updated",
            Self::NewMessage { .. } => "new-message",
        }
    }
}

/// An event sent by a client to the gateway it is attached to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    NewMessage { message: String },
}
