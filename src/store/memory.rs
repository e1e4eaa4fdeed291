use super::{ConversationStore, MarkRead};
use crate::directory::IdentityDirectory;
use crate::error::{AppError, AppResult};
use crate::models::{Message, OverviewEntry};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    next_id: i64,
    messages: Vec<Message>,
    /// (owner, counterpart) -> hidden
    visibility: HashMap<(Uuid, Uuid), bool>,
}

impl Inner {
    fn between(&self, a: Uuid, b: Uuid) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(move |m| {
            (m.sender_id == a && m.receiver_id == b) || (m.sender_id == b && m.receiver_id == a)
        })
    }
}

/// Process-local store with the same semantics as the Postgres one.
/// Every mutation happens under one write lock, so insert and un-hide are atomic.
pub struct MemoryConversationStore {
    directory: Arc<dyn IdentityDirectory>,
    inner: RwLock<Inner>,
}

impl MemoryConversationStore {
    pub fn new(directory: Arc<dyn IdentityDirectory>) -> Self {
        Self {
            directory,
            inner: RwLock::new(Inner::default()),
        }
    }

    async fn ensure_identity(&self, id: Uuid) -> AppResult<()> {
        match self.directory.find(id).await? {
            Some(_) => Ok(()),
            None => Err(AppError::IdentityNotFound(id)),
        }
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn append_message(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        body: &str,
    ) -> AppResult<Message> {
        self.ensure_identity(sender_id).await?;
        self.ensure_identity(receiver_id).await?;

        let mut inner = self.inner.write().await;
        inner.next_id += 1;
        let message = Message {
            id: inner.next_id,
            sender_id,
            receiver_id,
            body: body.to_string(),
            created_at: Utc::now(),
            read_at: None,
        };
        inner.messages.push(message.clone());

        for key in [(sender_id, receiver_id), (receiver_id, sender_id)] {
            if let Some(hidden) = inner.visibility.get_mut(&key) {
                *hidden = false;
            }
        }

        Ok(message)
    }

    async fn list_conversation(&self, a: Uuid, b: Uuid) -> AppResult<Vec<Message>> {
        let inner = self.inner.read().await;
        Ok(inner.between(a, b).cloned().collect())
    }

    async fn mark_all_unread_as_read(
        &self,
        recipient_id: Uuid,
        counterpart_id: Uuid,
    ) -> AppResult<Vec<i64>> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        let mut ids = Vec::new();
        for message in inner.messages.iter_mut().filter(|m| {
            m.receiver_id == recipient_id && m.sender_id == counterpart_id && m.read_at.is_none()
        }) {
            message.read_at = Some(now);
            ids.push(message.id);
        }
        Ok(ids)
    }

    async fn mark_one_as_read(&self, message_id: i64, recipient_id: Uuid) -> AppResult<MarkRead> {
        let mut inner = self.inner.write().await;
        let message = inner
            .messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or(AppError::MessageNotFound(message_id))?;

        if message.receiver_id != recipient_id {
            return Err(AppError::NotMessageReceiver(message_id));
        }
        if message.read_at.is_some() {
            return Ok(MarkRead::AlreadyRead);
        }

        message.read_at = Some(Utc::now());
        Ok(MarkRead::Marked {
            message_id,
            sender_id: message.sender_id,
        })
    }

    async fn hide(&self, owner_id: Uuid, counterpart_id: Uuid) -> AppResult<()> {
        self.ensure_identity(counterpart_id).await?;
        let mut inner = self.inner.write().await;
        inner.visibility.insert((owner_id, counterpart_id), true);
        Ok(())
    }

    async fn is_hidden(&self, owner_id: Uuid, counterpart_id: Uuid) -> AppResult<bool> {
        let inner = self.inner.read().await;
        Ok(inner
            .visibility
            .get(&(owner_id, counterpart_id))
            .copied()
            .unwrap_or(false))
    }

    async fn list_overview(&self, owner_id: Uuid) -> AppResult<Vec<OverviewEntry>> {
        let inner = self.inner.read().await;
        let mut latest: HashMap<Uuid, &Message> = HashMap::new();
        for message in &inner.messages {
            let counterpart = if message.sender_id == owner_id {
                message.receiver_id
            } else if message.receiver_id == owner_id {
                message.sender_id
            } else {
                continue;
            };
            // ids grow with insertion order, so a later message always wins
            latest.insert(counterpart, message);
        }

        let hidden: HashSet<Uuid> = inner
            .visibility
            .iter()
            .filter(|((owner, _), hidden)| *owner == owner_id && **hidden)
            .map(|((_, counterpart), _)| *counterpart)
            .collect();

        let mut entries: Vec<(i64, OverviewEntry)> = latest
            .into_iter()
            .filter(|(counterpart, _)| !hidden.contains(counterpart))
            .map(|(counterpart_id, message)| {
                (
                    message.id,
                    OverviewEntry {
                        counterpart_id,
                        last_body: message.body.clone(),
                        last_time: message.created_at,
                    },
                )
            })
            .collect();
        entries.sort_by(|(a_id, a), (b_id, b)| {
            b.last_time.cmp(&a.last_time).then(b_id.cmp(a_id))
        });

        Ok(entries.into_iter().map(|(_, entry)| entry).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::MemoryDirectory;
    use crate::models::Identity;

    async fn store_with(names: &[&str]) -> (MemoryConversationStore, Vec<Uuid>) {
        let directory = MemoryDirectory::new();
        let mut ids = Vec::new();
        for name in names {
            let identity = Identity::new(Uuid::new_v4(), *name);
            ids.push(identity.id);
            directory.insert(identity).await;
        }
        (MemoryConversationStore::new(Arc::new(directory)), ids)
    }

    #[tokio::test]
    async fn append_then_list_contains_unread_message() {
        let (store, ids) = store_with(&["a", "b"]).await;
        let (a, b) = (ids[0], ids[1]);

        let message = store.append_message(a, b, "M").await.unwrap();
        let conversation = store.list_conversation(a, b).await.unwrap();

        assert_eq!(conversation, vec![message.clone()]);
        assert_eq!(message.sender_id, a);
        assert_eq!(message.receiver_id, b);
        assert!(message.read_at.is_none());
    }

    #[tokio::test]
    async fn unknown_identity_is_rejected() {
        let (store, ids) = store_with(&["a"]).await;
        let ghost = Uuid::new_v4();

        let err = store.append_message(ids[0], ghost, "hello").await.unwrap_err();
        assert!(matches!(err, AppError::IdentityNotFound(id) if id == ghost));
        assert!(store.list_conversation(ids[0], ghost).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_keeps_creation_order_in_both_directions() {
        let (store, ids) = store_with(&["a", "b"]).await;
        let (a, b) = (ids[0], ids[1]);

        store.append_message(a, b, "one").await.unwrap();
        store.append_message(b, a, "two").await.unwrap();
        store.append_message(a, b, "three").await.unwrap();

        let bodies: Vec<String> = store
            .list_conversation(b, a)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.body)
            .collect();
        assert_eq!(bodies, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn mark_all_only_touches_messages_to_recipient() {
        let (store, ids) = store_with(&["a", "b"]).await;
        let (a, b) = (ids[0], ids[1]);

        let m1 = store.append_message(a, b, "1").await.unwrap();
        store.append_message(b, a, "2").await.unwrap();
        let m3 = store.append_message(a, b, "3").await.unwrap();

        assert_eq!(
            store.mark_all_unread_as_read(b, a).await.unwrap(),
            vec![m1.id, m3.id]
        );
        assert!(store.mark_all_unread_as_read(b, a).await.unwrap().is_empty());

        let conversation = store.list_conversation(a, b).await.unwrap();
        assert!(conversation
            .iter()
            .all(|m| m.read_at.is_some() == (m.receiver_id == b)));
    }

    #[tokio::test]
    async fn mark_one_rejects_non_receiver_and_reports_already_read() {
        let (store, ids) = store_with(&["a", "b"]).await;
        let (a, b) = (ids[0], ids[1]);
        let message = store.append_message(a, b, "ping").await.unwrap();

        assert!(matches!(
            store.mark_one_as_read(message.id, a).await,
            Err(AppError::NotMessageReceiver(_))
        ));
        assert!(matches!(
            store.mark_one_as_read(999, b).await,
            Err(AppError::MessageNotFound(999))
        ));
        assert_eq!(
            store.mark_one_as_read(message.id, b).await.unwrap(),
            MarkRead::Marked {
                message_id: message.id,
                sender_id: a
            }
        );
        assert_eq!(
            store.mark_one_as_read(message.id, b).await.unwrap(),
            MarkRead::AlreadyRead
        );
    }

    #[tokio::test]
    async fn hide_is_directional_and_reversed_by_new_message() {
        let (store, ids) = store_with(&["a", "b"]).await;
        let (a, b) = (ids[0], ids[1]);
        store.append_message(a, b, "hello").await.unwrap();

        store.hide(a, b).await.unwrap();
        store.hide(a, b).await.unwrap();

        assert!(store.list_overview(a).await.unwrap().is_empty());
        let b_overview = store.list_overview(b).await.unwrap();
        assert_eq!(b_overview.len(), 1);
        assert_eq!(b_overview[0].counterpart_id, a);

        // history stays retrievable while hidden
        assert_eq!(store.list_conversation(a, b).await.unwrap().len(), 1);

        store.append_message(b, a, "hi").await.unwrap();
        let a_overview = store.list_overview(a).await.unwrap();
        assert_eq!(a_overview.len(), 1);
        assert_eq!(a_overview[0].counterpart_id, b);
        assert_eq!(a_overview[0].last_body, "hi");
    }

    #[tokio::test]
    async fn overview_orders_by_latest_message() {
        let (store, ids) = store_with(&["owner", "x", "y", "z"]).await;
        let (owner, x, y, z) = (ids[0], ids[1], ids[2], ids[3]);

        store.append_message(owner, x, "to x").await.unwrap();
        store.append_message(y, owner, "from y").await.unwrap();
        store.append_message(owner, z, "to z").await.unwrap();
        store.append_message(x, owner, "x again").await.unwrap();

        let order: Vec<Uuid> = store
            .list_overview(owner)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.counterpart_id)
            .collect();
        assert_eq!(order, vec![x, z, y]);
    }

    #[tokio::test]
    async fn hidden_thread_without_messages_is_not_listed() {
        let (store, ids) = store_with(&["a", "b"]).await;
        store.hide(ids[0], ids[1]).await.unwrap();

        assert!(store.is_hidden(ids[0], ids[1]).await.unwrap());
        assert!(!store.is_hidden(ids[1], ids[0]).await.unwrap());
        assert!(store.list_overview(ids[0]).await.unwrap().is_empty());
    }
}
