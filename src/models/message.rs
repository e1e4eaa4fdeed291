use super::identity::Identity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A persisted direct message. Only `read_at` ever changes after insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

/// Canonical client-facing message, enriched with the sender's profile.
/// Built once per send and reused for the response and the fan-out payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageView {
    pub id: i64,
    pub sender_id: Uuid,
    pub sender_display_name: String,
    pub sender_avatar: String,
    pub receiver_id: Uuid,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

impl MessageView {
    pub fn from_message(message: Message, sender: &Identity) -> Self {
        Self {
            id: message.id,
            sender_id: message.sender_id,
            sender_display_name: sender.display_name.clone(),
            sender_avatar: sender.avatar_url(),
            receiver_id: message.receiver_id,
            body: message.body,
            created_at: message.created_at,
            read_at: message.read_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationView {
    pub messages: Vec<MessageView>,
    /// The counterpart has hidden this thread on their side
    pub counterpart_has_hidden_thread: bool,
}

/// One visible thread in an owner's overview, as stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverviewEntry {
    pub counterpart_id: Uuid,
    pub last_body: String,
    pub last_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub counterpart_id: Uuid,
    pub display_name: String,
    pub avatar: String,
    pub last_message_body: String,
    pub last_message_time: DateTime<Utc>,
}
