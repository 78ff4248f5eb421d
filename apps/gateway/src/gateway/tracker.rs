//! Local session accounting mirrored into the shared connection counter.

use std::sync::Arc;

use parking_lot::Mutex;
use relay_common::id::{prefix, prefixed_ulid};
use relay_common::ServerEvent;
use tokio::sync::{mpsc, watch};

use crate::error::StoreError;
use crate::store::{ChannelBus, CounterStore};

use super::events::{BusEvent, CONNECTION_COUNT_KEY};
use super::registry::SessionRegistry;
use super::session::GatewaySession;

struct LocalState {
    /// Live sessions on this process.
    count: u64,
    /// Store updates started but not yet finished and announced.
    in_flight: u64,
    /// Set once the shutdown reconciler has taken over the remaining
    /// sessions. From then on local deltas are no longer mirrored.
    detached: bool,
}

/// Local session count alongside the shared-counter updates still pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LocalCounts {
    pub live: u64,
    pub in_flight: u64,
}

impl LocalCounts {
    /// No live sessions and nothing left to mirror.
    pub fn is_settled(&self) -> bool {
        self.live == 0 && self.in_flight == 0
    }
}

/// Counts locally-owned sessions and mirrors every delta into the shared
/// counter, announcing each new total on the counter channel.
pub struct ConnectionTracker {
    store: Arc<dyn CounterStore>,
    bus: Arc<dyn ChannelBus>,
    sessions: Arc<SessionRegistry>,
    local: Mutex<LocalState>,
    counts_tx: watch::Sender<LocalCounts>,
}

/// Held for the duration of one mirrored store update. Dropping it settles
/// the update even if the owning task is cancelled.
struct InFlight<'a> {
    tracker: &'a ConnectionTracker,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut local = self.tracker.local.lock();
        local.in_flight = local.in_flight.saturating_sub(1);
        self.tracker.publish_counts(&local);
    }
}

impl ConnectionTracker {
    pub fn new(
        store: Arc<dyn CounterStore>,
        bus: Arc<dyn ChannelBus>,
        sessions: Arc<SessionRegistry>,
    ) -> Self {
        let (counts_tx, _) = watch::channel(LocalCounts::default());
        Self {
            store,
            bus,
            sessions,
            local: Mutex::new(LocalState {
                count: 0,
                in_flight: 0,
                detached: false,
            }),
            counts_tx,
        }
    }

    /// Create the shared counter at zero unless some process already did.
    /// Returns whether this call created it.
    pub async fn initialize_counter(&self) -> Result<bool, StoreError> {
        let created = self.store.set_if_absent(CONNECTION_COUNT_KEY, 0).await?;
        if created {
            tracing::info!(key = CONNECTION_COUNT_KEY, "initialized shared connection counter");
        } else {
            tracing::debug!(key = CONNECTION_COUNT_KEY, "shared connection counter already present");
        }
        Ok(created)
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub fn local_session_count(&self) -> u64 {
        self.local.lock().count
    }

    pub fn local_counts(&self) -> LocalCounts {
        *self.counts_tx.borrow()
    }

    /// Observe live sessions and pending store updates as they change.
    pub fn watch_local_counts(&self) -> watch::Receiver<LocalCounts> {
        self.counts_tx.subscribe()
    }

    fn publish_counts(&self, local: &LocalState) {
        self.counts_tx.send_replace(LocalCounts {
            live: local.count,
            in_flight: local.in_flight,
        });
    }

    /// Bump the local count and, unless detached, register a pending store
    /// update. Returns the guard for that update.
    fn begin_mirror(&self, delta: Delta) -> Option<InFlight<'_>> {
        let mut local = self.local.lock();
        local.count = match delta {
            Delta::Up => local.count + 1,
            Delta::Down => local.count.saturating_sub(1),
        };
        let guard = if local.detached {
            None
        } else {
            local.in_flight += 1;
            Some(InFlight { tracker: self })
        };
        self.publish_counts(&local);
        guard
    }

    /// Register a newly connected client and bump the shared counter.
    ///
    /// Store failures are logged and swallowed: the session proceeds and no
    /// total is announced, since there is no correct value to announce.
    pub async fn on_connect(&self, outbound: mpsc::Sender<ServerEvent>) -> Arc<GatewaySession> {
        let session = Arc::new(GatewaySession::new(
            prefixed_ulid(prefix::SESSION),
            outbound,
        ));
        self.sessions.insert(session.clone());

        let Some(_in_flight) = self.begin_mirror(Delta::Up) else {
            tracing::warn!(
                session_id = %session.session_id,
                "session connected after counter reconciliation, not mirrored"
            );
            return session;
        };

        match self.store.increment(CONNECTION_COUNT_KEY).await {
            Ok(total) => self.announce(total).await,
            Err(err) => tracing::warn!(
                session_id = %session.session_id,
                %err,
                "failed to increment shared connection counter"
            ),
        }
        session
    }

    /// Release a session and decrement the shared counter, clamping at zero.
    /// The update stays in flight until the new total has been announced.
    /// Calling this twice for the same session is a no-op.
    pub async fn on_disconnect(&self, session: &GatewaySession) {
        if !session.mark_disconnected() {
            return;
        }
        self.sessions.remove(&session.session_id);

        let Some(_in_flight) = self.begin_mirror(Delta::Down) else {
            tracing::debug!(
                session_id = %session.session_id,
                "shared counter already reconciled, skipping decrement"
            );
            return;
        };

        let total = match self.store.decrement(CONNECTION_COUNT_KEY).await {
            Ok(total) if total < 0 => {
                tracing::warn!(total, "shared connection counter went negative, clamping");
                // Undo our own step below zero atomically instead of
                // overwriting concurrent increments from other processes.
                match self.store.increment(CONNECTION_COUNT_KEY).await {
                    Ok(restored) => restored,
                    Err(err) => {
                        tracing::warn!(%err, "failed to restore negative connection counter");
                        0
                    }
                }
            }
            Ok(total) => total,
            Err(err) => {
                tracing::warn!(
                    session_id = %session.session_id,
                    %err,
                    "failed to decrement shared connection counter"
                );
                return;
            }
        };
        self.announce(total).await;
    }

    /// Forward a counter update from any process to every local session.
    pub fn on_counter_broadcast(&self, count: u64) -> usize {
        self.sessions
            .push_all(&ServerEvent::ConnectionCountUpdated { count })
    }

    /// Publish a total on the counter channel. Negative values go out as 0.
    pub async fn announce(&self, total: i64) {
        let event = BusEvent::CounterUpdate(total.max(0) as u64);
        if let Err(err) = self.bus.publish(event.channel(), &event.encode()).await {
            tracing::warn!(total, %err, "failed to publish connection count");
        }
    }

    /// Stop mirroring local deltas and hand the remaining sessions over to the
    /// caller. Returns how many sessions are still live. Updates already in
    /// flight still complete.
    pub fn detach(&self) -> u64 {
        let mut local = self.local.lock();
        local.detached = true;
        local.count
    }
}

#[derive(Clone, Copy)]
enum Delta {
    Up,
    Down,
}
