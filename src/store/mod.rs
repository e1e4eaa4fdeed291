//! Conversation Store: the durable message log plus per-direction
//! visibility of each 1:1 thread.

pub mod memory;
pub mod postgres;

use crate::error::AppResult;
use crate::models::{Message, OverviewEntry};
use async_trait::async_trait;
use uuid::Uuid;

pub use memory::MemoryConversationStore;
pub use postgres::PgConversationStore;

/// Result of acknowledging a single message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkRead {
    /// The read timestamp was set by this call
    Marked { message_id: i64, sender_id: Uuid },
    /// Someone (possibly a concurrent call) already set it
    AlreadyRead,
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Persist a message and make the thread visible again for both
    /// participants, atomically. Fails with `IdentityNotFound` if either
    /// participant is unknown.
    async fn append_message(&self, sender_id: Uuid, receiver_id: Uuid, body: &str)
        -> AppResult<Message>;

    /// Every message between the pair in creation order, regardless of hide state
    async fn list_conversation(&self, a: Uuid, b: Uuid) -> AppResult<Vec<Message>>;

    /// Set `read_at` on every unread message from `counterpart_id` to
    /// `recipient_id`; returns the affected ids in ascending order.
    async fn mark_all_unread_as_read(
        &self,
        recipient_id: Uuid,
        counterpart_id: Uuid,
    ) -> AppResult<Vec<i64>>;

    /// Fails with `MessageNotFound` or `NotMessageReceiver` without mutating
    async fn mark_one_as_read(&self, message_id: i64, recipient_id: Uuid) -> AppResult<MarkRead>;

    /// Idempotent; never deletes history
    async fn hide(&self, owner_id: Uuid, counterpart_id: Uuid) -> AppResult<()>;

    async fn is_hidden(&self, owner_id: Uuid, counterpart_id: Uuid) -> AppResult<bool>;

    /// Visible threads of `owner_id`, most recent message first
    async fn list_overview(&self, owner_id: Uuid) -> AppResult<Vec<OverviewEntry>>;
}
