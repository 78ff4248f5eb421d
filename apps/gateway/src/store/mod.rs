//! Coordination substrate shared by every gateway process.
//!
//! Backed by Redis in production and in-memory maps / broadcast channels in
//! tests. The gateway never talks to a peer process directly; everything goes
//! through these two traits.

pub mod memory;
pub mod redis_backend;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::StoreError;

pub use memory::{MemoryBus, MemoryStore};
pub use redis_backend::{RedisBus, RedisStore};

/// Buffered messages per subscription before the bus applies backpressure.
pub const SUBSCRIPTION_BUFFER: usize = 1024;

/// Atomic integer storage keyed by name.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError>;
    /// Set `key` to `value` only if it does not exist yet. Returns whether the
    /// value was written.
    async fn set_if_absent(&self, key: &str, value: i64) -> Result<bool, StoreError>;
    /// Atomically add one and return the new value.
    async fn increment(&self, key: &str) -> Result<i64, StoreError>;
    /// Atomically subtract one and return the new value. Does not clamp.
    async fn decrement(&self, key: &str) -> Result<i64, StoreError>;
    async fn set(&self, key: &str, value: i64) -> Result<(), StoreError>;
}

/// A single value delivered on a subscribed channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub channel: String,
    pub payload: String,
}

/// Named pub/sub topics. Every subscriber receives every publication,
/// including its own, in per-channel publish order.
#[async_trait]
pub trait ChannelBus: Send + Sync {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), StoreError>;
    /// Subscribe to all `channels` at once. The returned receiver closes when
    /// the underlying subscription is lost.
    async fn subscribe(&self, channels: &[&str]) -> Result<mpsc::Receiver<BusMessage>, StoreError>;
}
