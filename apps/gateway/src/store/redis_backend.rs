//! Redis-backed counter store and pub/sub bus.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisResult};
use tokio::sync::mpsc;
use tokio::time;

use super::{BusMessage, ChannelBus, CounterStore, SUBSCRIPTION_BUFFER};
use crate::error::StoreError;

async fn bounded<T>(
    limit: Duration,
    fut: impl Future<Output = RedisResult<T>>,
) -> Result<T, StoreError> {
    match time::timeout(limit, fut).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(StoreError::Timeout),
    }
}

async fn connect(
    client: redis::Client,
    limit: Duration,
) -> Result<ConnectionManager, StoreError> {
    bounded(limit, ConnectionManager::new(client)).await
}

/// `INCR`/`DECR`/`GET`/`SET` against a single Redis instance.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    timeout: Duration,
}

impl RedisStore {
    pub async fn connect(redis_url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;
        let conn = connect(client, timeout).await?;
        tracing::info!("redis counter store connected");
        Ok(Self { conn, timeout })
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError> {
        let mut conn = self.conn.clone();
        bounded(self.timeout, conn.get::<_, Option<i64>>(key)).await
    }

    async fn set_if_absent(&self, key: &str, value: i64) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        bounded(self.timeout, conn.set_nx::<_, _, bool>(key, value)).await
    }

    async fn increment(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        bounded(self.timeout, conn.incr::<_, _, i64>(key, 1)).await
    }

    async fn decrement(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        bounded(self.timeout, conn.decr::<_, _, i64>(key, 1)).await
    }

    async fn set(&self, key: &str, value: i64) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        bounded(self.timeout, conn.set::<_, _, ()>(key, value)).await
    }
}

/// Redis pub/sub. Publishing goes through a shared multiplexed connection;
/// each subscription gets its own dedicated pub/sub connection.
pub struct RedisBus {
    client: redis::Client,
    conn: ConnectionManager,
    timeout: Duration,
}

impl RedisBus {
    pub async fn connect(redis_url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;
        let conn = connect(client.clone(), timeout).await?;
        tracing::info!("redis channel bus connected");
        Ok(Self {
            client,
            conn,
            timeout,
        })
    }
}

#[async_trait]
impl ChannelBus for RedisBus {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let receivers = bounded(self.timeout, conn.publish::<_, _, i64>(channel, payload)).await?;
        tracing::trace!(%channel, receivers, "published to redis");
        Ok(())
    }

    async fn subscribe(&self, channels: &[&str]) -> Result<mpsc::Receiver<BusMessage>, StoreError> {
        let mut pubsub = bounded(self.timeout, self.client.get_async_pubsub()).await?;
        for channel in channels {
            bounded(self.timeout, pubsub.subscribe(*channel)).await?;
        }
        tracing::info!(?channels, "redis subscription established");

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        tokio::spawn(async move {
            let mut stream = pubsub.into_on_message();
            while let Some(msg) = stream.next().await {
                let channel = msg.get_channel_name().to_string();
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::warn!(error = %e, %channel, "invalid pub/sub payload");
                        continue;
                    }
                };
                if tx.send(BusMessage { channel, payload }).await.is_err() {
                    return;
                }
            }
            // Stream returned None: the pub/sub connection was lost.
            tracing::error!("redis subscription stream ended");
        });

        Ok(rx)
    }
}
