use redis::aio::ConnectionManager;
use redis::{Client, RedisResult};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Shared Redis connection manager guarded by a Tokio mutex.
pub type SharedConnectionManager = Arc<Mutex<ConnectionManager>>;

/// Command connection plus the client needed to open dedicated pub/sub
/// connections.
#[derive(Clone)]
pub struct RedisClient {
    client: Client,
    manager: SharedConnectionManager,
}

impl RedisClient {
    pub async fn from_url(url: &str) -> RedisResult<Self> {
        let client = Client::open(url)?;
        let manager = ConnectionManager::new(client.clone()).await?;
        Ok(Self {
            client,
            manager: Arc::new(Mutex::new(manager)),
        })
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    pub async fn get_multiplexed_async_connection(&self) -> RedisResult<ConnectionManager> {
        let guard = self.manager.lock().await;
        Ok(guard.clone())
    }
}
