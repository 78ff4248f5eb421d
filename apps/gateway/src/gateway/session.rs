//! Per-connection gateway session state.

use std::sync::atomic::{AtomicBool, Ordering};

use relay_common::ServerEvent;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Outbound events queued per session before new ones are dropped.
pub const SESSION_OUTBOUND_CAPACITY: usize = 256;

/// A client connected to this process. Sessions are never shared with, or
/// visible to, other gateway processes.
#[derive(Debug)]
pub struct GatewaySession {
    /// Unique session identifier (`ses_` prefixed ULID).
    pub session_id: String,
    outbound: mpsc::Sender<ServerEvent>,
    connected: AtomicBool,
}

impl GatewaySession {
    pub fn new(session_id: String, outbound: mpsc::Sender<ServerEvent>) -> Self {
        Self {
            session_id,
            outbound,
            connected: AtomicBool::new(true),
        }
    }

    /// Queue an event for delivery to the client. Returns `false` if the event
    /// was not queued (client gone or too slow).
    pub fn push(&self, event: ServerEvent) -> bool {
        match self.outbound.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                tracing::warn!(
                    session_id = %self.session_id,
                    event = event.name(),
                    "session outbound queue full, dropping event"
                );
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Flip the session to disconnected. Returns `true` only for the call that
    /// actually performed the transition.
    pub fn mark_disconnected(&self) -> bool {
        self.connected.swap(false, Ordering::SeqCst)
    }
}
