use crate::error::AppResult;
use crate::fanout::{ChannelEvent, FanoutBridge, ReadReceiptEvent};
use crate::store::{ConversationStore, MarkRead};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Turns read transitions into receipts for the original sender.
///
/// Persistence always happens first; a failed publish is logged by the
/// bridge and never undoes the read. A reader is never sent its own
/// receipt, which only happens in a self-addressed thread.
#[derive(Clone)]
pub struct ReadReceiptCoordinator {
    store: Arc<dyn ConversationStore>,
    bridge: FanoutBridge,
}

impl ReadReceiptCoordinator {
    pub fn new(store: Arc<dyn ConversationStore>, bridge: FanoutBridge) -> Self {
        Self { store, bridge }
    }

    /// Bulk path: everything `counterpart_id` sent to `reader_id` becomes
    /// read, and the counterpart gets one receipt listing those ids.
    pub async fn on_conversation_opened(
        &self,
        reader_id: Uuid,
        counterpart_id: Uuid,
    ) -> AppResult<Vec<i64>> {
        let message_ids = self
            .store
            .mark_all_unread_as_read(reader_id, counterpart_id)
            .await?;

        if message_ids.is_empty() || counterpart_id == reader_id {
            return Ok(message_ids);
        }

        debug!(%reader_id, %counterpart_id, count = message_ids.len(), "conversation read");
        self.bridge
            .publish_best_effort(&ChannelEvent::ReadReceipt(ReadReceiptEvent {
                notify_id: counterpart_id,
                reader_id,
                message_ids: message_ids.clone(),
            }))
            .await;

        Ok(message_ids)
    }

    /// Single path. Only a real transition produces a receipt.
    pub async fn acknowledge(&self, reader_id: Uuid, message_id: i64) -> AppResult<MarkRead> {
        let outcome = self.store.mark_one_as_read(message_id, reader_id).await?;

        if let MarkRead::Marked {
            message_id,
            sender_id,
        } = outcome
        {
            if sender_id == reader_id {
                return Ok(outcome);
            }
            self.bridge
                .publish_best_effort(&ChannelEvent::ReadReceipt(ReadReceiptEvent {
                    notify_id: sender_id,
                    reader_id,
                    message_ids: vec![message_id],
                }))
                .await;
        }

        Ok(outcome)
    }
}
