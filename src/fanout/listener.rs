use super::FanoutBridge;
use futures_util::StreamExt;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{error, info, warn};

const RESUBSCRIBE_BACKOFF: Duration = Duration::from_secs(1);

/// Subscribe to the shared channel and dispatch every publication to
/// local connections. Reconnects forever; a lost subscription only pauses
/// live delivery.
pub async fn run_pubsub_listener(client: redis::Client, bridge: FanoutBridge) {
    loop {
        match listen_once(&client, &bridge).await {
            Ok(()) => warn!(channel = bridge.channel(), "pub/sub stream ended, resubscribing"),
            Err(e) => error!(error = %e, channel = bridge.channel(), "pub/sub listener failed"),
        }
        tokio::time::sleep(RESUBSCRIBE_BACKOFF).await;
    }
}

async fn listen_once(client: &redis::Client, bridge: &FanoutBridge) -> redis::RedisResult<()> {
    // Pub/sub needs a dedicated connection, not the multiplexed one
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.subscribe(bridge.channel()).await?;
    info!(channel = bridge.channel(), "subscribed to fan-out channel");

    let mut stream = pubsub.on_message();
    while let Some(msg) = stream.next().await {
        let payload: String = match msg.get_payload() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "non-text pub/sub payload");
                continue;
            }
        };
        bridge.dispatch(&payload).await;
    }
    Ok(())
}

/// Same loop over a [`super::LocalBroker`] subscription
pub async fn run_local_listener(mut rx: broadcast::Receiver<String>, bridge: FanoutBridge) {
    loop {
        match rx.recv().await {
            Ok(payload) => bridge.dispatch(&payload).await,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "local fan-out listener lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fanout::{ChannelEvent, LocalBroker, TypingEvent};
    use crate::websocket::{ConnectionRegistry, Topic};
    use std::sync::Arc;
    use uuid::Uuid;

    #[tokio::test]
    async fn local_listener_delivers_published_events() {
        let broker = LocalBroker::default();
        let registry = ConnectionRegistry::new();
        let bridge = FanoutBridge::new(Arc::new(broker.clone()), registry.clone(), "chat".into());
        tokio::spawn(run_local_listener(broker.subscribe(), bridge.clone()));

        let receiver = Uuid::new_v4();
        let (_, mut rx) = registry.add_subscriber(Topic::identity(receiver)).await;

        bridge
            .publish(&ChannelEvent::Typing(TypingEvent {
                sender_id: Uuid::new_v4(),
                receiver_id: receiver,
            }))
            .await
            .unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let json: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(json["type"], "typing");
        assert_eq!(json["receiver_id"], receiver.to_string());
    }

    #[tokio::test]
    async fn redis_round_trip_when_available() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
        let redis = match crate::redis_client::RedisClient::from_url(&url).await {
            Ok(redis) => redis,
            Err(e) => {
                eprintln!("Skipping test - Redis not available: {}", e);
                return;
            }
        };

        let registry = ConnectionRegistry::new();
        let channel = format!("chat-test-{}", Uuid::new_v4());
        let bridge = FanoutBridge::new(
            Arc::new(crate::fanout::RedisBroker::new(redis.clone())),
            registry.clone(),
            channel,
        );
        tokio::spawn(run_pubsub_listener(redis.client(), bridge.clone()));

        let receiver = Uuid::new_v4();
        let (_, mut rx) = registry.add_subscriber(Topic::identity(receiver)).await;
        // give the listener time to subscribe
        tokio::time::sleep(Duration::from_millis(300)).await;

        bridge
            .publish(&ChannelEvent::Typing(TypingEvent {
                sender_id: Uuid::new_v4(),
                receiver_id: receiver,
            }))
            .await
            .unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(frame.contains("\"typing\""));
    }
}
