//! In-memory token ledger.
//!
//! Arena of records keyed by id plus a hash index, guarded by one async
//! mutex. Used by the test suite and by embedders that do not need
//! durability; semantics match the Postgres implementation.

use chrono::{Duration, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{LedgerError, LedgerResult, NewRefreshToken, RefreshTokenRecord, TokenLedger};

#[derive(Default)]
struct Inner {
    records: HashMap<Uuid, RefreshTokenRecord>,
    by_hash: HashMap<String, Uuid>,
}

#[derive(Default)]
pub struct InMemoryTokenLedger {
    inner: Mutex<Inner>,
}

impl InMemoryTokenLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl TokenLedger for InMemoryTokenLedger {
    async fn create(&self, new: NewRefreshToken) -> LedgerResult<RefreshTokenRecord> {
        let mut inner = self.inner.lock().await;
        if inner.by_hash.contains_key(&new.token_hash) {
            return Err(LedgerError::DuplicateHash);
        }

        let now = Utc::now();
        let record = RefreshTokenRecord {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            token_hash: new.token_hash.clone(),
            device_id: new.device.device_id,
            device_name: new.device.device_name,
            user_agent: new.device.user_agent,
            ip_address: new.device.ip_address,
            expires_at: now + Duration::seconds(new.ttl_seconds),
            is_revoked: false,
            revoked_at: None,
            replaced_by_id: None,
            parent_token_id: new.parent_token_id,
            created_at: now,
            updated_at: now,
        };
        inner.by_hash.insert(new.token_hash, record.id);
        inner.records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get(&self, id: Uuid) -> LedgerResult<Option<RefreshTokenRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner.records.get(&id).cloned())
    }

    async fn get_by_hash(&self, token_hash: &str) -> LedgerResult<Option<RefreshTokenRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .by_hash
            .get(token_hash)
            .and_then(|id| inner.records.get(id))
            .cloned())
    }

    async fn is_valid(&self, token_hash: &str) -> LedgerResult<bool> {
        let now = Utc::now();
        let inner = self.inner.lock().await;
        Ok(inner
            .by_hash
            .get(token_hash)
            .and_then(|id| inner.records.get(id))
            .is_some_and(|record| !record.is_revoked && !record.is_expired(now)))
    }

    async fn revoke(&self, id: Uuid, replaced_by: Option<Uuid>) -> LedgerResult<bool> {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;
        let Some(record) = inner.records.get_mut(&id) else {
            return Ok(false);
        };
        record.is_revoked = true;
        // First revocation wins; repeat calls may only fill the forward link.
        record.revoked_at = record.revoked_at.or(Some(now));
        record.replaced_by_id = replaced_by.or(record.replaced_by_id);
        record.updated_at = now;
        Ok(true)
    }

    async fn revoke_if_active(&self, id: Uuid, replaced_by: Option<Uuid>) -> LedgerResult<bool> {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;
        let Some(record) = inner.records.get_mut(&id) else {
            return Ok(false);
        };
        if record.is_revoked {
            return Ok(false);
        }
        record.is_revoked = true;
        record.revoked_at = Some(now);
        record.replaced_by_id = replaced_by;
        record.updated_at = now;
        Ok(true)
    }

    async fn revoke_chain(&self, id: Uuid) -> LedgerResult<u64> {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;

        let mut ancestors = Vec::new();
        let mut current = inner.records.get(&id).cloned();
        while let Some(record) = current {
            let Some(parent_id) = record.parent_token_id else {
                break;
            };
            let parent = inner.records.get(&parent_id).cloned();
            if let Some(ref parent) = parent {
                ancestors.push(parent.id);
            }
            current = parent;
        }

        let mut touched = 0;
        for ancestor_id in ancestors {
            if let Some(record) = inner.records.get_mut(&ancestor_id) {
                if !record.is_revoked {
                    record.is_revoked = true;
                    record.revoked_at = Some(now);
                    record.updated_at = now;
                    touched += 1;
                }
            }
        }
        Ok(touched)
    }

    async fn revoke_all_for_user(&self, user_id: Uuid, except: Option<Uuid>) -> LedgerResult<u64> {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;
        let mut touched = 0;
        for record in inner.records.values_mut() {
            if record.user_id == user_id && !record.is_revoked && Some(record.id) != except {
                record.is_revoked = true;
                record.revoked_at = Some(now);
                record.updated_at = now;
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn revoke_for_device(&self, user_id: Uuid, device_id: &str) -> LedgerResult<u64> {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;
        let mut touched = 0;
        for record in inner.records.values_mut() {
            if record.user_id == user_id
                && record.device_id.as_deref() == Some(device_id)
                && !record.is_revoked
            {
                record.is_revoked = true;
                record.revoked_at = Some(now);
                record.updated_at = now;
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn sweep_expired(&self) -> LedgerResult<u64> {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;
        // Strict comparison, same deletion boundary as the Postgres sweep.
        let expired: Vec<Uuid> = inner
            .records
            .values()
            .filter(|record| record.expires_at < now)
            .map(|record| record.id)
            .collect();
        for id in &expired {
            if let Some(record) = inner.records.remove(id) {
                inner.by_hash.remove(&record.token_hash);
            }
        }
        Ok(expired.len() as u64)
    }
}
