//! Read-only view of board members owned by user management.

use crate::error::AppResult;
use crate::models::{Identity, Role, Suspension};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    async fn find(&self, id: Uuid) -> AppResult<Option<Identity>>;

    async fn find_many(&self, ids: &[Uuid]) -> AppResult<HashMap<Uuid, Identity>> {
        let mut found = HashMap::with_capacity(ids.len());
        for id in ids {
            if let Some(identity) = self.find(*id).await? {
                found.insert(*id, identity);
            }
        }
        Ok(found)
    }
}

pub struct PgIdentityDirectory {
    db: Pool,
}

impl PgIdentityDirectory {
    pub fn new(db: Pool) -> Self {
        Self { db }
    }
}

fn identity_from_row(row: &tokio_postgres::Row) -> Identity {
    let role: String = row.get("role");
    let is_suspended: bool = row.get("is_suspended");
    let suspended_until: Option<DateTime<Utc>> = row.get("suspended_until");
    Identity {
        id: row.get("id"),
        display_name: row.get("display_name"),
        avatar: row.get("profile_image"),
        role: Role::from_db(&role),
        suspension: Suspension::from_columns(is_suspended, suspended_until),
    }
}

#[async_trait]
impl IdentityDirectory for PgIdentityDirectory {
    async fn find(&self, id: Uuid) -> AppResult<Option<Identity>> {
        let client = self.db.get().await?;
        let row = client
            .query_opt(
                r#"
                SELECT id, display_name, profile_image, role, is_suspended, suspended_until
                FROM members
                WHERE id = $1
                "#,
                &[&id],
            )
            .await?;
        Ok(row.as_ref().map(identity_from_row))
    }

    async fn find_many(&self, ids: &[Uuid]) -> AppResult<HashMap<Uuid, Identity>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let ids = ids.to_vec();
        let client = self.db.get().await?;
        let rows = client
            .query(
                r#"
                SELECT id, display_name, profile_image, role, is_suspended, suspended_until
                FROM members
                WHERE id = ANY($1)
                "#,
                &[&ids],
            )
            .await?;
        Ok(rows
            .iter()
            .map(identity_from_row)
            .map(|identity| (identity.id, identity))
            .collect())
    }
}

/// In-process directory for tests and local runs
#[derive(Default, Clone)]
pub struct MemoryDirectory {
    inner: Arc<RwLock<HashMap<Uuid, Identity>>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, identity: Identity) {
        self.inner.write().await.insert(identity.id, identity);
    }
}

#[async_trait]
impl IdentityDirectory for MemoryDirectory {
    async fn find(&self, id: Uuid) -> AppResult<Option<Identity>> {
        Ok(self.inner.read().await.get(&id).cloned())
    }
}
