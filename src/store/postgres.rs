use super::{ConversationStore, MarkRead};
use crate::error::{AppError, AppResult};
use crate::models::{Message, OverviewEntry};
use async_trait::async_trait;
use deadpool_postgres::Pool;
use uuid::Uuid;

pub struct PgConversationStore {
    db: Pool,
}

impl PgConversationStore {
    pub fn new(db: Pool) -> Self {
        Self { db }
    }
}

fn message_from_row(row: &tokio_postgres::Row) -> Message {
    Message {
        id: row.get("id"),
        sender_id: row.get("sender_id"),
        receiver_id: row.get("receiver_id"),
        body: row.get("body"),
        created_at: row.get("created_at"),
        read_at: row.get("read_at"),
    }
}

#[async_trait]
impl ConversationStore for PgConversationStore {
    async fn append_message(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        body: &str,
    ) -> AppResult<Message> {
        let mut client = self.db.get().await?;
        let tx = client.transaction().await?;

        let participants = vec![sender_id, receiver_id];
        let rows = tx
            .query("SELECT id FROM members WHERE id = ANY($1)", &[&participants])
            .await?;
        for id in [sender_id, receiver_id] {
            if !rows.iter().any(|row| row.get::<_, Uuid>(0) == id) {
                return Err(AppError::IdentityNotFound(id));
            }
        }

        let row = tx
            .query_one(
                r#"
                INSERT INTO messages (sender_id, receiver_id, body)
                VALUES ($1, $2, $3)
                RETURNING id, sender_id, receiver_id, body, created_at, read_at
                "#,
                &[&sender_id, &receiver_id, &body],
            )
            .await?;

        // Un-hide both directions in the same transaction as the insert
        tx.execute(
            r#"
            UPDATE conversation_visibility
            SET hidden = FALSE, updated_at = NOW()
            WHERE hidden
              AND ((owner_id = $1 AND counterpart_id = $2)
                OR (owner_id = $2 AND counterpart_id = $1))
            "#,
            &[&sender_id, &receiver_id],
        )
        .await?;

        tx.commit().await?;
        Ok(message_from_row(&row))
    }

    async fn list_conversation(&self, a: Uuid, b: Uuid) -> AppResult<Vec<Message>> {
        let client = self.db.get().await?;
        let rows = client
            .query(
                r#"
                SELECT id, sender_id, receiver_id, body, created_at, read_at
                FROM messages
                WHERE (sender_id = $1 AND receiver_id = $2)
                   OR (sender_id = $2 AND receiver_id = $1)
                ORDER BY created_at ASC, id ASC
                "#,
                &[&a, &b],
            )
            .await?;
        Ok(rows.iter().map(message_from_row).collect())
    }

    async fn mark_all_unread_as_read(
        &self,
        recipient_id: Uuid,
        counterpart_id: Uuid,
    ) -> AppResult<Vec<i64>> {
        let client = self.db.get().await?;
        let rows = client
            .query(
                r#"
                UPDATE messages
                SET read_at = NOW()
                WHERE receiver_id = $1
                  AND sender_id = $2
                  AND read_at IS NULL
                RETURNING id
                "#,
                &[&recipient_id, &counterpart_id],
            )
            .await?;
        let mut ids: Vec<i64> = rows.iter().map(|row| row.get(0)).collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn mark_one_as_read(&self, message_id: i64, recipient_id: Uuid) -> AppResult<MarkRead> {
        let client = self.db.get().await?;
        let row = client
            .query_opt(
                "SELECT receiver_id FROM messages WHERE id = $1",
                &[&message_id],
            )
            .await?
            .ok_or(AppError::MessageNotFound(message_id))?;

        let receiver_id: Uuid = row.get(0);
        if receiver_id != recipient_id {
            return Err(AppError::NotMessageReceiver(message_id));
        }

        // The `read_at IS NULL` guard makes concurrent acknowledgements race-free
        let updated = client
            .query_opt(
                r#"
                UPDATE messages
                SET read_at = NOW()
                WHERE id = $1 AND read_at IS NULL
                RETURNING sender_id
                "#,
                &[&message_id],
            )
            .await?;

        Ok(match updated {
            Some(row) => MarkRead::Marked {
                message_id,
                sender_id: row.get(0),
            },
            None => MarkRead::AlreadyRead,
        })
    }

    async fn hide(&self, owner_id: Uuid, counterpart_id: Uuid) -> AppResult<()> {
        let client = self.db.get().await?;
        let exists = client
            .query_opt("SELECT 1 FROM members WHERE id = $1", &[&counterpart_id])
            .await?
            .is_some();
        if !exists {
            return Err(AppError::IdentityNotFound(counterpart_id));
        }

        client
            .execute(
                r#"
                INSERT INTO conversation_visibility (owner_id, counterpart_id, hidden)
                VALUES ($1, $2, TRUE)
                ON CONFLICT (owner_id, counterpart_id)
                DO UPDATE SET hidden = TRUE, updated_at = NOW()
                "#,
                &[&owner_id, &counterpart_id],
            )
            .await?;
        Ok(())
    }

    async fn is_hidden(&self, owner_id: Uuid, counterpart_id: Uuid) -> AppResult<bool> {
        let client = self.db.get().await?;
        let row = client
            .query_opt(
                r#"
                SELECT hidden
                FROM conversation_visibility
                WHERE owner_id = $1 AND counterpart_id = $2
                "#,
                &[&owner_id, &counterpart_id],
            )
            .await?;
        Ok(row.map(|r| r.get::<_, bool>(0)).unwrap_or(false))
    }

    async fn list_overview(&self, owner_id: Uuid) -> AppResult<Vec<OverviewEntry>> {
        let client = self.db.get().await?;
        let rows = client
            .query(
                r#"
                SELECT counterpart_id, body, created_at
                FROM (
                    SELECT DISTINCT ON (counterpart_id)
                        counterpart_id, body, created_at, id
                    FROM (
                        SELECT
                            CASE WHEN sender_id = $1 THEN receiver_id ELSE sender_id END
                                AS counterpart_id,
                            body,
                            created_at,
                            id
                        FROM messages
                        WHERE sender_id = $1 OR receiver_id = $1
                    ) pair_messages
                    ORDER BY counterpart_id, created_at DESC, id DESC
                ) latest
                WHERE NOT EXISTS (
                    SELECT 1
                    FROM conversation_visibility v
                    WHERE v.owner_id = $1
                      AND v.counterpart_id = latest.counterpart_id
                      AND v.hidden
                )
                ORDER BY created_at DESC, id DESC
                "#,
                &[&owner_id],
            )
            .await?;

        Ok(rows
            .iter()
            .map(|row| OverviewEntry {
                counterpart_id: row.get("counterpart_id"),
                last_body: row.get("body"),
                last_time: row.get("created_at"),
            })
            .collect())
    }
}
