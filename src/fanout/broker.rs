use crate::redis_client::RedisClient;
use async_trait::async_trait;
use redis::AsyncCommands;
use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    #[error("event encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<redis::RedisError> for BrokerError {
    fn from(e: redis::RedisError) -> Self {
        BrokerError::Unavailable(e.to_string())
    }
}

/// Publish side of the shared channel
#[async_trait]
pub trait Broker: Send + Sync {
    async fn publish(&self, channel: &str, payload: String) -> Result<(), BrokerError>;
}

/// Redis PUBLISH; every instance subscribed to the channel receives it
pub struct RedisBroker {
    redis: RedisClient,
}

impl RedisBroker {
    pub fn new(redis: RedisClient) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn publish(&self, channel: &str, payload: String) -> Result<(), BrokerError> {
        let mut conn = self.redis.get_multiplexed_async_connection().await?;
        conn.publish::<_, _, ()>(channel, payload).await?;
        Ok(())
    }
}

/// Single-process broker for tests and local runs. Channel names are
/// ignored; there is only one.
#[derive(Clone)]
pub struct LocalBroker {
    tx: broadcast::Sender<String>,
}

impl LocalBroker {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }
}

impl Default for LocalBroker {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl Broker for LocalBroker {
    async fn publish(&self, _channel: &str, payload: String) -> Result<(), BrokerError> {
        // no receivers is not an error: nothing is listening yet
        let _ = self.tx.send(payload);
        Ok(())
    }
}
