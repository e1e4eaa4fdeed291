//! Fan-out Bridge
//!
//! Persisted events are published once on a channel shared by every
//! gateway process. Each process receives every publication (its own
//! included), normalizes it and re-delivers it to the identity topics of
//! its local connections.
//!
//! Publications are tagged by `kind`. Untagged payloads from older
//! publishers are still accepted: a message-id list marks a read receipt,
//! anything else is a chat message.

pub mod broker;
pub mod listener;

use crate::metrics;
use crate::models::MessageView;
use crate::websocket::message_types::WsOutboundEvent;
use crate::websocket::{ConnectionRegistry, Topic};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

pub use broker::{Broker, BrokerError, LocalBroker, RedisBroker};

/// Tells the original sender which of their messages were read
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadReceiptEvent {
    /// Original sender, the only recipient of this event
    pub notify_id: Uuid,
    pub reader_id: Uuid,
    pub message_ids: Vec<i64>,
}

/// Best-effort, never persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingEvent {
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
}

/// Everything published on the shared channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ChannelEvent {
    #[serde(rename = "chat.message")]
    ChatMessage(MessageView),
    #[serde(rename = "read.receipt")]
    ReadReceipt(ReadReceiptEvent),
    #[serde(rename = "typing")]
    Typing(TypingEvent),
}

impl ChannelEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ChannelEvent::ChatMessage(_) => "chat.message",
            ChannelEvent::ReadReceipt(_) => "read.receipt",
            ChannelEvent::Typing(_) => "typing",
        }
    }

    /// Identity topics this event is delivered to
    pub fn recipients(&self) -> Vec<Topic> {
        match self {
            ChannelEvent::ChatMessage(message) => {
                let receiver = Topic::identity(message.receiver_id);
                let sender = Topic::identity(message.sender_id);
                if receiver == sender {
                    vec![receiver]
                } else {
                    vec![receiver, sender]
                }
            }
            ChannelEvent::ReadReceipt(receipt) => vec![Topic::identity(receipt.notify_id)],
            ChannelEvent::Typing(typing) => vec![Topic::identity(typing.receiver_id)],
        }
    }

    fn into_frame(self) -> WsOutboundEvent {
        match self {
            ChannelEvent::ChatMessage(message) => WsOutboundEvent::Message(message),
            ChannelEvent::ReadReceipt(receipt) => WsOutboundEvent::ReadReceipt(receipt),
            ChannelEvent::Typing(typing) => WsOutboundEvent::Typing(typing),
        }
    }
}

#[derive(Debug, Error)]
#[error("malformed channel payload: {0}")]
pub struct MalformedPayload(String);

/// Unwrap one layer of string encoding if the publisher serialized an
/// already-serialized payload.
pub fn normalize(raw: &str) -> Result<String, MalformedPayload> {
    let trimmed = raw.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        serde_json::from_str::<String>(trimmed)
            .map_err(|e| MalformedPayload(format!("string layer: {e}")))
    } else {
        Ok(trimmed.to_string())
    }
}

/// Untagged chat message as published by older instances
#[derive(Debug, Deserialize)]
struct LegacyChatMessage {
    id: i64,
    #[serde(alias = "senderId")]
    sender_id: Uuid,
    #[serde(default, alias = "senderNickname", alias = "senderDisplayName")]
    sender_display_name: String,
    #[serde(default, alias = "senderAvatar")]
    sender_avatar: Option<String>,
    #[serde(alias = "receiverId")]
    receiver_id: Uuid,
    #[serde(alias = "content")]
    body: String,
    #[serde(default, alias = "createdAt")]
    created_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "readAt")]
    read_at: Option<DateTime<Utc>>,
}

impl From<LegacyChatMessage> for MessageView {
    fn from(legacy: LegacyChatMessage) -> Self {
        MessageView {
            id: legacy.id,
            sender_id: legacy.sender_id,
            sender_display_name: legacy.sender_display_name,
            sender_avatar: crate::models::identity::normalize_avatar(
                legacy.sender_avatar.as_deref(),
            ),
            receiver_id: legacy.receiver_id,
            body: legacy.body,
            created_at: legacy.created_at.unwrap_or_else(Utc::now),
            read_at: legacy.read_at,
        }
    }
}

/// Untagged receipt. Older publishers name the party to notify `senderId`.
#[derive(Debug, Deserialize)]
struct LegacyReadReceipt {
    #[serde(alias = "senderId", alias = "sender_id", alias = "notifyId")]
    notify_id: Uuid,
    #[serde(alias = "receiverId", alias = "receiver_id", alias = "readerId")]
    reader_id: Uuid,
    #[serde(alias = "messageIds", deserialize_with = "flatten_message_ids")]
    message_ids: Vec<i64>,
}

/// Accepts `[1,2]` as well as type-wrapped lists like
/// `["java.util.ArrayList",[1,2]]`.
fn flatten_message_ids<'de, D>(deserializer: D) -> Result<Vec<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    fn collect(value: &Value, out: &mut Vec<i64>) {
        match value {
            Value::Number(n) => {
                if let Some(id) = n.as_i64() {
                    out.push(id);
                }
            }
            Value::Array(items) => items.iter().for_each(|item| collect(item, out)),
            _ => {}
        }
    }

    let value = Value::deserialize(deserializer)?;
    let mut ids = Vec::new();
    collect(&value, &mut ids);
    Ok(ids)
}

/// Normalize and discriminate one channel payload
pub fn decode(raw: &str) -> Result<ChannelEvent, MalformedPayload> {
    let normalized = normalize(raw)?;
    let value: Value =
        serde_json::from_str(&normalized).map_err(|e| MalformedPayload(e.to_string()))?;

    let Some(object) = value.as_object() else {
        return Err(MalformedPayload("payload is not an object".into()));
    };

    if object.contains_key("kind") {
        return serde_json::from_value(value).map_err(|e| MalformedPayload(e.to_string()));
    }

    if object.contains_key("messageIds") || object.contains_key("message_ids") {
        let legacy: LegacyReadReceipt =
            serde_json::from_value(value).map_err(|e| MalformedPayload(e.to_string()))?;
        return Ok(ChannelEvent::ReadReceipt(ReadReceiptEvent {
            notify_id: legacy.notify_id,
            reader_id: legacy.reader_id,
            message_ids: legacy.message_ids,
        }));
    }

    let legacy: LegacyChatMessage =
        serde_json::from_value(value).map_err(|e| MalformedPayload(e.to_string()))?;
    Ok(ChannelEvent::ChatMessage(legacy.into()))
}

#[derive(Clone)]
pub struct FanoutBridge {
    broker: Arc<dyn Broker>,
    registry: ConnectionRegistry,
    channel: String,
}

impl FanoutBridge {
    pub fn new(broker: Arc<dyn Broker>, registry: ConnectionRegistry, channel: String) -> Self {
        Self {
            broker,
            registry,
            channel,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Serialize once and publish on the shared channel
    pub async fn publish(&self, event: &ChannelEvent) -> Result<(), BrokerError> {
        let payload = serde_json::to_string(event)?;
        self.broker.publish(&self.channel, payload).await?;
        debug!(kind = event.kind(), channel = %self.channel, "event published");
        Ok(())
    }

    /// Publish without failing the caller; persistence already happened
    pub async fn publish_best_effort(&self, event: &ChannelEvent) {
        if let Err(e) = self.publish(event).await {
            metrics::record_publish_failure();
            warn!(error = %e, kind = event.kind(), "live delivery skipped, broker publish failed");
        }
    }

    /// Deliver one received publication to local connections. Returns the
    /// topics it was addressed to.
    pub async fn on_channel_message(&self, raw: &str) -> Result<Vec<Topic>, MalformedPayload> {
        let event = decode(raw)?;
        let kind = event.kind();
        let recipients = event.recipients();
        let frame = serde_json::to_string(&event.into_frame())
            .map_err(|e| MalformedPayload(format!("frame encoding: {e}")))?;

        for topic in &recipients {
            let delivered = self.registry.broadcast(*topic, &frame).await;
            metrics::record_delivery(kind, delivered);
            debug!(kind, %topic, delivered, "fan-out delivered");
        }

        Ok(recipients)
    }

    /// Subscriber-loop entry point: a bad payload is logged and dropped
    pub async fn dispatch(&self, raw: &str) {
        if let Err(e) = self.on_channel_message(raw).await {
            metrics::record_malformed_payload();
            warn!(error = %e, "dropping channel payload");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn view(sender: Uuid, receiver: Uuid) -> MessageView {
        MessageView {
            id: 11,
            sender_id: sender,
            sender_display_name: "anon".into(),
            sender_avatar: "/profiles/default_profile.png".into(),
            receiver_id: receiver,
            body: "hello".into(),
            created_at: Utc::now(),
            read_at: None,
        }
    }

    #[test]
    fn tagged_payload_decodes() {
        let event = ChannelEvent::ChatMessage(view(Uuid::new_v4(), Uuid::new_v4()));
        let raw = serde_json::to_string(&event).unwrap();
        assert!(raw.contains(r#""kind":"chat.message""#));
        assert_eq!(decode(&raw).unwrap(), event);
    }

    #[test]
    fn double_encoded_payload_matches_plain() {
        let event = ChannelEvent::ReadReceipt(ReadReceiptEvent {
            notify_id: Uuid::new_v4(),
            reader_id: Uuid::new_v4(),
            message_ids: vec![1, 2],
        });
        let plain = serde_json::to_string(&event).unwrap();
        let wrapped = serde_json::to_string(&plain).unwrap();

        assert!(wrapped.starts_with('"'));
        assert_eq!(decode(&wrapped).unwrap(), decode(&plain).unwrap());
    }

    #[test]
    fn only_one_string_layer_is_removed() {
        let plain = r#"{"kind":"typing"}"#;
        let twice = serde_json::to_string(&serde_json::to_string(plain).unwrap()).unwrap();
        assert!(decode(&twice).is_err());
    }

    #[test]
    fn legacy_receipt_is_detected_by_id_list() {
        let notify = Uuid::new_v4();
        let reader = Uuid::new_v4();
        let raw = json!({
            "senderId": notify,
            "receiverId": reader,
            "messageIds": ["java.util.ArrayList", [115, 116]]
        })
        .to_string();

        assert_eq!(
            decode(&raw).unwrap(),
            ChannelEvent::ReadReceipt(ReadReceiptEvent {
                notify_id: notify,
                reader_id: reader,
                message_ids: vec![115, 116],
            })
        );
    }

    #[test]
    fn legacy_chat_message_without_id_list() {
        let sender = Uuid::new_v4();
        let receiver = Uuid::new_v4();
        let raw = json!({
            "id": 9,
            "senderId": sender,
            "senderNickname": "anon-1",
            "receiverId": receiver,
            "content": "old format",
            "createdAt": "2024-05-01T10:00:00Z"
        })
        .to_string();

        match decode(&raw).unwrap() {
            ChannelEvent::ChatMessage(message) => {
                assert_eq!(message.id, 9);
                assert_eq!(message.sender_display_name, "anon-1");
                assert_eq!(message.body, "old format");
                assert_eq!(message.sender_avatar, "/profiles/default_profile.png");
            }
            other => panic!("expected chat message, got {other:?}"),
        }
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(decode("not json").is_err());
        assert!(decode("[1,2,3]").is_err());
        assert!(decode(r#"{"kind":"unknown"}"#).is_err());
        assert!(decode(r#"{"senderId":"x"}"#).is_err());
    }

    #[test]
    fn chat_goes_to_both_parties_receipt_only_to_sender() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let chat = ChannelEvent::ChatMessage(view(a, b));
        assert_eq!(chat.recipients(), vec![Topic::identity(b), Topic::identity(a)]);

        let receipt = ChannelEvent::ReadReceipt(ReadReceiptEvent {
            notify_id: a,
            reader_id: b,
            message_ids: vec![11],
        });
        assert_eq!(receipt.recipients(), vec![Topic::identity(a)]);
    }

    #[test]
    fn message_to_self_is_delivered_once() {
        let a = Uuid::new_v4();
        assert_eq!(
            ChannelEvent::ChatMessage(view(a, a)).recipients(),
            vec![Topic::identity(a)]
        );
    }
}
