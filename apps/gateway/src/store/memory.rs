//! In-process store and bus. A single instance shared between several
//! `AppState`s behaves like one Redis shared by several gateway processes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};

use super::{BusMessage, ChannelBus, CounterStore, SUBSCRIPTION_BUFFER};
use crate::error::StoreError;

const CHANNEL_CAPACITY: usize = 4096;

pub struct MemoryStore {
    data: Mutex<HashMap<String, i64>>,
    available: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the store going down (or coming back).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store offline".to_string()))
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError> {
        self.check()?;
        Ok(self.data.lock().get(key).copied())
    }

    async fn set_if_absent(&self, key: &str, value: i64) -> Result<bool, StoreError> {
        self.check()?;
        let mut data = self.data.lock();
        if data.contains_key(key) {
            return Ok(false);
        }
        data.insert(key.to_string(), value);
        Ok(true)
    }

    async fn increment(&self, key: &str) -> Result<i64, StoreError> {
        self.check()?;
        let mut data = self.data.lock();
        let value = data.entry(key.to_string()).or_insert(0);
        *value += 1;
        Ok(*value)
    }

    async fn decrement(&self, key: &str) -> Result<i64, StoreError> {
        self.check()?;
        let mut data = self.data.lock();
        let value = data.entry(key.to_string()).or_insert(0);
        *value -= 1;
        Ok(*value)
    }

    async fn set(&self, key: &str, value: i64) -> Result<(), StoreError> {
        self.check()?;
        self.data.lock().insert(key.to_string(), value);
        Ok(())
    }
}

pub struct MemoryBus {
    channels: DashMap<String, broadcast::Sender<String>>,
    available: AtomicBool,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory bus offline".to_string()))
        }
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChannelBus for MemoryBus {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), StoreError> {
        self.check()?;
        // send() returns Err if nobody is subscribed.
        let _ = self.sender(channel).send(payload.to_string());
        Ok(())
    }

    async fn subscribe(&self, channels: &[&str]) -> Result<mpsc::Receiver<BusMessage>, StoreError> {
        self.check()?;
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);

        for channel in channels {
            let mut inbound = self.sender(channel).subscribe();
            let tx = tx.clone();
            let channel = channel.to_string();
            tokio::spawn(async move {
                loop {
                    match inbound.recv().await {
                        Ok(payload) => {
                            let msg = BusMessage {
                                channel: channel.clone(),
                                payload,
                            };
                            if tx.send(msg).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!(%channel, skipped = n, "memory bus subscriber lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            });
        }

        Ok(rx)
    }
}
