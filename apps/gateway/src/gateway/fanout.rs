//! Subscription to the cluster channels and dispatch of inbound payloads.
//!
//! One subscriber task per process receives every counter update and chat
//! message published by any gateway (this one included), decodes it into a
//! `BusEvent` and hands it to the tracker or the relay.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::StoreError;
use crate::store::{BusMessage, ChannelBus};

use super::events::{BusEvent, SUBSCRIBED_CHANNELS};
use super::relay::MessageRelay;
use super::tracker::ConnectionTracker;

/// Whether the cross-process subscription is still delivering.
#[derive(Clone, Default)]
pub struct SubscriptionStatus {
    live: Arc<AtomicBool>,
}

impl SubscriptionStatus {
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn set(&self, live: bool) {
        self.live.store(live, Ordering::SeqCst);
    }
}

pub struct Fanout {
    tracker: Arc<ConnectionTracker>,
    relay: Arc<MessageRelay>,
}

impl Fanout {
    pub fn new(tracker: Arc<ConnectionTracker>, relay: Arc<MessageRelay>) -> Self {
        Self { tracker, relay }
    }

    /// Subscribe to both gateway channels and spawn the dispatch loop.
    ///
    /// A subscription failure is returned to the caller: a process that cannot
    /// hear the cluster must not come up.
    pub async fn start(self, bus: &dyn ChannelBus) -> Result<SubscriptionStatus, StoreError> {
        let rx = bus.subscribe(&SUBSCRIBED_CHANNELS).await.map_err(|err| {
            tracing::error!(%err, "failed to subscribe to gateway channels");
            err
        })?;

        let status = SubscriptionStatus::default();
        status.set(true);
        tokio::spawn(self.run(rx, status.clone()));
        Ok(status)
    }

    async fn run(self, mut rx: mpsc::Receiver<BusMessage>, status: SubscriptionStatus) {
        while let Some(msg) = rx.recv().await {
            match BusEvent::decode(msg) {
                Ok(event) => self.dispatch(event),
                Err(err) => tracing::warn!(%err, "dropping undecodable bus message"),
            }
        }
        status.set(false);
        tracing::error!("gateway subscription closed, no longer receiving cluster updates");
    }

    pub fn dispatch(&self, event: BusEvent) {
        match event {
            BusEvent::CounterUpdate(count) => {
                let delivered = self.tracker.on_counter_broadcast(count);
                tracing::debug!(count, delivered, "connection count fanned out");
            }
            BusEvent::ChatMessage(text) => {
                let delivered = self.relay.on_chat_broadcast(text);
                tracing::debug!(delivered, "chat message fanned out");
            }
        }
    }
}
