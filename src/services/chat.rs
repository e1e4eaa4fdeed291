use super::read_receipts::ReadReceiptCoordinator;
use crate::directory::IdentityDirectory;
use crate::error::{AppError, AppResult};
use crate::fanout::{ChannelEvent, FanoutBridge};
use crate::models::{ConversationSummary, ConversationView, MessageView};
use crate::store::{ConversationStore, MarkRead};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Orchestrates every conversation operation exposed over REST and the
/// WebSocket gateway.
#[derive(Clone)]
pub struct ChatService {
    store: Arc<dyn ConversationStore>,
    directory: Arc<dyn IdentityDirectory>,
    receipts: ReadReceiptCoordinator,
    bridge: FanoutBridge,
    max_message_length: usize,
}

impl ChatService {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        directory: Arc<dyn IdentityDirectory>,
        bridge: FanoutBridge,
        max_message_length: usize,
    ) -> Self {
        let receipts = ReadReceiptCoordinator::new(store.clone(), bridge.clone());
        Self {
            store,
            directory,
            receipts,
            bridge,
            max_message_length,
        }
    }

    fn validate_body<'a>(&self, body: &'a str) -> AppResult<&'a str> {
        let body = body.trim();
        if body.is_empty() {
            return Err(AppError::BadRequest("message body is empty".into()));
        }
        if body.chars().count() > self.max_message_length {
            return Err(AppError::BadRequest(format!(
                "message body exceeds {} characters",
                self.max_message_length
            )));
        }
        Ok(body)
    }

    /// Persist, enrich and publish. The returned view is the same payload
    /// every recipient receives.
    pub async fn send(&self, sender_id: Uuid, receiver_id: Uuid, body: &str) -> AppResult<MessageView> {
        let body = self.validate_body(body)?;
        let sender = self
            .directory
            .find(sender_id)
            .await?
            .ok_or(AppError::IdentityNotFound(sender_id))?;

        let message = self.store.append_message(sender_id, receiver_id, body).await?;
        let view = MessageView::from_message(message, &sender);

        info!(message_id = view.id, %sender_id, %receiver_id, "message stored");
        self.bridge
            .publish_best_effort(&ChannelEvent::ChatMessage(view.clone()))
            .await;

        Ok(view)
    }

    /// Opening a thread reads it: unread messages from the counterpart are
    /// marked before listing, so the response already carries `read_at`.
    pub async fn fetch_conversation(
        &self,
        caller_id: Uuid,
        counterpart_id: Uuid,
    ) -> AppResult<ConversationView> {
        let participants = self
            .directory
            .find_many(&[caller_id, counterpart_id])
            .await?;
        if !participants.contains_key(&counterpart_id) {
            return Err(AppError::IdentityNotFound(counterpart_id));
        }

        self.receipts
            .on_conversation_opened(caller_id, counterpart_id)
            .await?;

        let messages = self
            .store
            .list_conversation(caller_id, counterpart_id)
            .await?
            .into_iter()
            .filter_map(|message| {
                let sender = participants.get(&message.sender_id)?;
                Some(MessageView::from_message(message, sender))
            })
            .collect();

        let counterpart_has_hidden_thread =
            self.store.is_hidden(counterpart_id, caller_id).await?;

        Ok(ConversationView {
            messages,
            counterpart_has_hidden_thread,
        })
    }

    pub async fn mark_read(&self, caller_id: Uuid, message_id: i64) -> AppResult<MarkRead> {
        self.receipts.acknowledge(caller_id, message_id).await
    }

    /// Hide the thread on the caller's side only
    pub async fn leave(&self, caller_id: Uuid, counterpart_id: Uuid) -> AppResult<()> {
        self.store.hide(caller_id, counterpart_id).await?;
        debug!(%caller_id, %counterpart_id, "conversation hidden");
        Ok(())
    }

    pub async fn overview(&self, caller_id: Uuid) -> AppResult<Vec<ConversationSummary>> {
        let entries = self.store.list_overview(caller_id).await?;
        let ids: Vec<Uuid> = entries.iter().map(|e| e.counterpart_id).collect();
        let identities = self.directory.find_many(&ids).await?;

        Ok(entries
            .into_iter()
            .filter_map(|entry| {
                let counterpart = identities.get(&entry.counterpart_id)?;
                Some(ConversationSummary {
                    counterpart_id: entry.counterpart_id,
                    display_name: counterpart.display_name.clone(),
                    avatar: counterpart.avatar_url(),
                    last_message_body: entry.last_body,
                    last_message_time: entry.last_time,
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::MemoryDirectory;
    use crate::fanout::LocalBroker;
    use crate::models::Identity;
    use crate::store::MemoryConversationStore;
    use crate::websocket::ConnectionRegistry;

    async fn service() -> (ChatService, MemoryDirectory, Uuid, Uuid) {
        let directory = MemoryDirectory::new();
        let mut alice = Identity::new(Uuid::new_v4(), "alice");
        alice.avatar = Some("alice.png".into());
        let bob = Identity::new(Uuid::new_v4(), "bob");
        let (a, b) = (alice.id, bob.id);
        directory.insert(alice).await;
        directory.insert(bob).await;

        let directory_arc: Arc<dyn IdentityDirectory> = Arc::new(directory.clone());
        let store = Arc::new(MemoryConversationStore::new(directory_arc.clone()));
        let bridge = FanoutBridge::new(
            Arc::new(LocalBroker::default()),
            ConnectionRegistry::new(),
            "chat".into(),
        );
        (ChatService::new(store, directory_arc, bridge, 10), directory, a, b)
    }

    #[tokio::test]
    async fn send_trims_and_enriches() {
        let (chat, _, a, b) = service().await;

        let view = chat.send(a, b, "  hi  ").await.unwrap();

        assert_eq!(view.body, "hi");
        assert_eq!(view.sender_display_name, "alice");
        assert_eq!(view.sender_avatar, "/profiles/alice.png");
        assert!(view.read_at.is_none());
    }

    #[tokio::test]
    async fn send_rejects_empty_and_oversized_bodies() {
        let (chat, _, a, b) = service().await;

        assert!(matches!(chat.send(a, b, "   ").await, Err(AppError::BadRequest(_))));
        assert!(matches!(
            chat.send(a, b, "this is longer than ten").await,
            Err(AppError::BadRequest(_))
        ));
        assert!(chat.overview(a).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn fetch_marks_counterpart_messages_read() {
        let (chat, _, a, b) = service().await;
        chat.send(a, b, "one").await.unwrap();
        chat.send(b, a, "two").await.unwrap();

        let view = chat.fetch_conversation(b, a).await.unwrap();

        assert_eq!(view.messages.len(), 2);
        assert!(view.messages[0].read_at.is_some());
        assert!(view.messages[1].read_at.is_none());
        assert!(!view.counterpart_has_hidden_thread);
    }

    #[tokio::test]
    async fn fetch_unknown_counterpart_is_not_found() {
        let (chat, _, a, _) = service().await;
        let ghost = Uuid::new_v4();
        assert!(matches!(
            chat.fetch_conversation(a, ghost).await,
            Err(AppError::IdentityNotFound(id)) if id == ghost
        ));
    }

    #[tokio::test]
    async fn leave_is_visible_to_counterpart_as_hidden_thread() {
        let (chat, _, a, b) = service().await;
        chat.send(a, b, "hello").await.unwrap();

        chat.leave(a, b).await.unwrap();

        assert!(chat.overview(a).await.unwrap().is_empty());
        assert!(chat.fetch_conversation(b, a).await.unwrap().counterpart_has_hidden_thread);
    }

    #[tokio::test]
    async fn overview_enriches_counterparts() {
        let (chat, directory, a, b) = service().await;
        let carol = Identity::new(Uuid::new_v4(), "carol");
        let c = carol.id;
        directory.insert(carol).await;

        chat.send(a, b, "to bob").await.unwrap();
        chat.send(c, a, "from c").await.unwrap();

        let overview = chat.overview(a).await.unwrap();
        assert_eq!(overview.len(), 2);
        assert_eq!(overview[0].display_name, "carol");
        assert_eq!(overview[0].avatar, "/profiles/default_profile.png");
        assert_eq!(overview[1].counterpart_id, b);
        assert_eq!(overview[1].last_message_body, "to bob");
    }

    struct UnreachableDirectory;

    #[async_trait::async_trait]
    impl IdentityDirectory for UnreachableDirectory {
        async fn find(&self, _id: Uuid) -> AppResult<Option<Identity>> {
            Err(AppError::Database("connection reset".into()))
        }
    }

    #[tokio::test]
    async fn send_stores_nothing_when_sender_lookup_fails() {
        let (_, directory, a, b) = service().await;
        let store = Arc::new(MemoryConversationStore::new(Arc::new(directory)));
        let chat = ChatService::new(
            store.clone(),
            Arc::new(UnreachableDirectory),
            FanoutBridge::new(
                Arc::new(LocalBroker::default()),
                ConnectionRegistry::new(),
                "chat".into(),
            ),
            10,
        );

        assert!(matches!(chat.send(a, b, "hi").await, Err(AppError::Database(_))));
        assert!(store.list_conversation(a, b).await.unwrap().is_empty());
    }
}
