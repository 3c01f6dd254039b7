//! Narrow view of the principal store.
//!
//! The rotation engine only needs to know whether the owning principal is
//! still active before minting credentials; user CRUD lives elsewhere.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::Instrument;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Principal {
    pub id: Uuid,
    pub is_active: bool,
}

#[async_trait]
pub trait PrincipalDirectory: Send + Sync {
    async fn find(&self, user_id: Uuid) -> Result<Option<Principal>>;
}

#[derive(Clone)]
pub struct PgPrincipalDirectory {
    pool: PgPool,
}

impl PgPrincipalDirectory {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PrincipalDirectory for PgPrincipalDirectory {
    async fn find(&self, user_id: Uuid) -> Result<Option<Principal>> {
        let query = "SELECT id, is_active FROM users WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup principal")?;

        Ok(row.map(|row| Principal {
            id: row.get("id"),
            is_active: row.get("is_active"),
        }))
    }
}

/// In-memory directory for tests.
#[derive(Default)]
pub struct InMemoryPrincipalDirectory {
    principals: Mutex<HashMap<Uuid, Principal>>,
}

impl InMemoryPrincipalDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, principal: Principal) {
        let mut principals = self.principals.lock().await;
        principals.insert(principal.id, principal);
    }

    pub async fn deactivate(&self, user_id: Uuid) {
        let mut principals = self.principals.lock().await;
        if let Some(principal) = principals.get_mut(&user_id) {
            principal.is_active = false;
        }
    }
}

#[async_trait]
impl PrincipalDirectory for InMemoryPrincipalDirectory {
    async fn find(&self, user_id: Uuid) -> Result<Option<Principal>> {
        let principals = self.principals.lock().await;
        Ok(principals.get(&user_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn find_and_deactivate() {
        let directory = InMemoryPrincipalDirectory::new();
        let user_id = Uuid::new_v4();
        directory
            .insert(Principal {
                id: user_id,
                is_active: true,
            })
            .await;

        let found = directory.find(user_id).await.unwrap().unwrap();
        assert!(found.is_active);

        directory.deactivate(user_id).await;
        let found = directory.find(user_id).await.unwrap().unwrap();
        assert!(!found.is_active);

        assert!(directory.find(Uuid::new_v4()).await.unwrap().is_none());
    }
}
