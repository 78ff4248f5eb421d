//! Registry of the sessions owned by this process.

use std::sync::Arc;

use dashmap::DashMap;
use relay_common::ServerEvent;

use super::session::GatewaySession;

/// Shared registry of live local sessions, keyed by session ID.
///
/// Uses `DashMap` for shard-level concurrency so connects, disconnects and
/// fanout never serialize on a single lock.
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<GatewaySession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    pub fn insert(&self, session: Arc<GatewaySession>) {
        self.sessions.insert(session.session_id.clone(), session);
    }

    pub fn remove(&self, session_id: &str) -> Option<Arc<GatewaySession>> {
        self.sessions.remove(session_id).map(|(_, session)| session)
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<GatewaySession>> {
        self.sessions.get(session_id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Deliver an event to one local session.
    pub fn push_to_session(&self, session_id: &str, event: ServerEvent) -> bool {
        match self.get(session_id) {
            Some(session) => session.push(event),
            None => false,
        }
    }

    /// Deliver an event to every local session. Returns how many accepted it.
    pub fn push_all(&self, event: &ServerEvent) -> usize {
        // Snapshot first so no shard lock is held while queueing.
        let targets: Vec<Arc<GatewaySession>> =
            self.sessions.iter().map(|e| e.value().clone()).collect();
        targets
            .iter()
            .filter(|session| session.push(event.clone()))
            .count()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
