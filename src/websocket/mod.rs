use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{
    mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    RwLock,
};
use uuid::Uuid;

pub mod message_types;
pub mod session;

const IDENTITY_TOPIC_PREFIX: &str = "identity:";

/// Delivery address of one identity. A connection may only ever hold the
/// topic derived from its own bound identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Topic(Uuid);

impl Topic {
    pub fn identity(id: Uuid) -> Self {
        Self(id)
    }

    /// Parse `identity:{uuid}`
    pub fn parse(value: &str) -> Option<Self> {
        value
            .strip_prefix(IDENTITY_TOPIC_PREFIX)
            .and_then(|id| Uuid::parse_str(id).ok())
            .map(Self)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{IDENTITY_TOPIC_PREFIX}{}", self.0)
    }
}

/// Unique identifier for a WebSocket subscriber
///
/// Each WebSocket connection gets a unique subscriber ID when it registers.
/// This allows for precise cleanup when connections close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// Subscriber entry with ID and channel
struct Subscriber {
    id: SubscriberId,
    sender: UnboundedSender<String>,
}

/// Local connections of this process, keyed by identity topic.
///
/// Several connections (devices) of one identity share a topic.
#[derive(Default, Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<HashMap<Topic, Vec<Subscriber>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber to a topic
    ///
    /// Returns the subscriber id (used for cleanup) and the receiving end of
    /// its delivery channel.
    pub async fn add_subscriber(&self, topic: Topic) -> (SubscriberId, UnboundedReceiver<String>) {
        let (tx, rx) = unbounded_channel();
        let subscriber_id = SubscriberId::new();

        let mut guard = self.inner.write().await;
        let subscribers = guard.entry(topic).or_default();
        subscribers.push(Subscriber {
            id: subscriber_id,
            sender: tx,
        });

        tracing::debug!(
            %topic,
            ?subscriber_id,
            total = subscribers.len(),
            "subscriber added"
        );

        (subscriber_id, rx)
    }

    /// Must be called when a connection closes
    pub async fn remove_subscriber(&self, topic: Topic, subscriber_id: SubscriberId) {
        let mut guard = self.inner.write().await;

        if let Some(subscribers) = guard.get_mut(&topic) {
            subscribers.retain(|s| s.id != subscriber_id);
            tracing::debug!(%topic, ?subscriber_id, remaining = subscribers.len(), "subscriber removed");

            if subscribers.is_empty() {
                guard.remove(&topic);
            }
        }
    }

    /// Push a frame to every local connection on `topic`, dropping dead
    /// senders. Returns how many connections received it.
    pub async fn broadcast(&self, topic: Topic, msg: &str) -> usize {
        let mut guard = self.inner.write().await;
        let Some(subscribers) = guard.get_mut(&topic) else {
            return 0;
        };

        let before = subscribers.len();
        subscribers.retain(|subscriber| subscriber.sender.send(msg.to_string()).is_ok());
        let delivered = subscribers.len();

        if before != delivered {
            tracing::debug!(
                %topic,
                dead = before - delivered,
                active = delivered,
                "cleaned up dead senders"
            );
        }
        if subscribers.is_empty() {
            guard.remove(&topic);
        }

        delivered
    }

    pub async fn subscriber_count(&self, topic: Topic) -> usize {
        let guard = self.inner.read().await;
        guard.get(&topic).map(|v| v.len()).unwrap_or(0)
    }
}
