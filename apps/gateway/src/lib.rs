pub mod config;
pub mod error;
pub mod gateway;
pub mod routes;
pub mod store;

use std::sync::Arc;

use config::Config;
use error::StoreError;
use gateway::fanout::{Fanout, SubscriptionStatus};
use gateway::registry::SessionRegistry;
use gateway::relay::MessageRelay;
use gateway::shutdown::ShutdownReconciler;
use gateway::tracker::ConnectionTracker;
use relay_common::id::{prefix, prefixed_ulid};
use store::{ChannelBus, CounterStore};

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Identifies this gateway process in logs and health output.
    pub node_id: String,
    pub tracker: Arc<ConnectionTracker>,
    pub relay: Arc<MessageRelay>,
    pub shutdown: Arc<ShutdownReconciler>,
    pub subscription: SubscriptionStatus,
}

impl AppState {
    /// Wire the gateway core against a counter store and channel bus.
    ///
    /// Initializes the shared counter if absent and subscribes to both
    /// gateway channels. Either failure is fatal for the process.
    pub async fn bootstrap(
        config: Config,
        store: Arc<dyn CounterStore>,
        bus: Arc<dyn ChannelBus>,
    ) -> Result<Self, StoreError> {
        let node_id = prefixed_ulid(prefix::NODE);
        let sessions = Arc::new(SessionRegistry::new());
        let tracker = Arc::new(ConnectionTracker::new(
            store.clone(),
            bus.clone(),
            sessions.clone(),
        ));
        let relay = Arc::new(MessageRelay::new(bus.clone(), sessions));
        let shutdown = Arc::new(ShutdownReconciler::new(
            tracker.clone(),
            store,
            config.shutdown_grace,
            config.store_timeout,
        ));

        tracker.initialize_counter().await.map_err(|err| {
            tracing::error!(%err, "failed to initialize shared connection counter");
            err
        })?;
        let subscription = Fanout::new(tracker.clone(), relay.clone())
            .start(bus.as_ref())
            .await?;

        tracing::info!(%node_id, "gateway core ready");

        Ok(Self {
            config: Arc::new(config),
            node_id,
            tracker,
            relay,
            shutdown,
            subscription,
        })
    }
}
