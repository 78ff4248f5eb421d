#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time;

use relay_common::ServerEvent;
use relay_gateway::config::Config;
use relay_gateway::error::StoreError;
use relay_gateway::gateway::events::CONNECTION_COUNT_KEY;
use relay_gateway::gateway::session::GatewaySession;
use relay_gateway::store::{CounterStore, MemoryBus, MemoryStore};
use relay_gateway::AppState;

/// How long a test waits for an event before failing.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

pub fn test_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origin: "http://localhost:3000".to_string(),
        redis_url: "memory://".to_string(),
        shutdown_grace: Duration::from_millis(200),
        store_timeout: Duration::from_secs(1),
    }
}

/// One shared store + bus; every node spawned from it behaves like a
/// separate gateway process attached to the same Redis.
pub struct Cluster {
    pub store: Arc<MemoryStore>,
    pub bus: Arc<MemoryBus>,
}

impl Cluster {
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            bus: Arc::new(MemoryBus::new()),
        }
    }

    pub async fn spawn_node(&self) -> AppState {
        AppState::bootstrap(test_config(), self.store.clone(), self.bus.clone())
            .await
            .expect("bootstrap node")
    }

    /// A node whose counter decrements take `delay` to land.
    pub async fn spawn_slow_node(&self, delay: Duration) -> AppState {
        let store = Arc::new(SlowDecrementStore {
            inner: self.store.clone(),
            delay,
        });
        AppState::bootstrap(test_config(), store, self.bus.clone())
            .await
            .expect("bootstrap node")
    }

    pub async fn counter(&self) -> Option<i64> {
        self.store.get(CONNECTION_COUNT_KEY).await.expect("read counter")
    }
}

/// Shared store whose decrements are delayed, like a slow Redis round trip.
pub struct SlowDecrementStore {
    inner: Arc<MemoryStore>,
    delay: Duration,
}

#[async_trait]
impl CounterStore for SlowDecrementStore {
    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError> {
        self.inner.get(key).await
    }

    async fn set_if_absent(&self, key: &str, value: i64) -> Result<bool, StoreError> {
        self.inner.set_if_absent(key, value).await
    }

    async fn increment(&self, key: &str) -> Result<i64, StoreError> {
        self.inner.increment(key).await
    }

    async fn decrement(&self, key: &str) -> Result<i64, StoreError> {
        time::sleep(self.delay).await;
        self.inner.decrement(key).await
    }

    async fn set(&self, key: &str, value: i64) -> Result<(), StoreError> {
        self.inner.set(key, value).await
    }
}

/// A synthetic client attached directly to the tracker, no transport.
pub struct TestClient {
    pub session: Arc<GatewaySession>,
    pub rx: mpsc::Receiver<ServerEvent>,
}

pub async fn connect(node: &AppState) -> TestClient {
    let (tx, rx) = mpsc::channel(256);
    let session = node.tracker.on_connect(tx).await;
    TestClient { session, rx }
}

pub async fn disconnect(node: &AppState, client: &TestClient) {
    node.tracker.on_disconnect(&client.session).await;
}

pub async fn next_event(rx: &mut mpsc::Receiver<ServerEvent>) -> ServerEvent {
    time::timeout(EVENT_TIMEOUT, rx.recv())
        .await
        .expect("timeout waiting for event")
        .expect("session channel closed")
}

/// Receive events until `done` holds for everything received so far.
pub async fn collect_until(
    rx: &mut mpsc::Receiver<ServerEvent>,
    done: impl Fn(&[ServerEvent]) -> bool,
) -> Vec<ServerEvent> {
    let mut seen = Vec::new();
    while !done(&seen) {
        seen.push(next_event(rx).await);
    }
    seen
}

pub async fn wait_for_count(rx: &mut mpsc::Receiver<ServerEvent>, count: u64) -> Vec<ServerEvent> {
    collect_until(rx, |seen| seen.contains(&count_event(count))).await
}

pub fn count_event(count: u64) -> ServerEvent {
    ServerEvent::ConnectionCountUpdated { count }
}

pub fn message_event(text: &str) -> ServerEvent {
    ServerEvent::NewMessage {
        message: text.to_string(),
    }
}

/// Give in-flight bus deliveries a moment to land.
pub async fn settle() {
    time::sleep(Duration::from_millis(50)).await;
}
