//! Durable record of every refresh token ever issued.
//!
//! The ledger is the single source of truth for validity. Records are keyed
//! by id and linked by explicit id references (`parent_token_id` backward,
//! `replaced_by_id` forward), forming a forest of singly-linked chains. One
//! chain is one device's session lineage across rotations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

pub mod memory;
pub mod postgres;

pub use memory::InMemoryTokenLedger;
pub use postgres::PgTokenLedger;

#[derive(Debug, Error)]
pub enum LedgerError {
    /// A record with the same token hash already exists. Hash collisions
    /// are creation failures, never silent overwrites.
    #[error("token hash already exists")]
    DuplicateHash,

    /// Storage fault. Callers must treat this as a hard failure, never as
    /// "not found".
    #[error("token ledger unavailable")]
    Unavailable(#[from] anyhow::Error),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Optional provenance metadata supplied by the transport layer.
/// Informational only; never part of any validity decision.
#[derive(Debug, Clone, Default)]
pub struct DeviceInfo {
    pub device_id: Option<String>,
    pub device_name: Option<String>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

/// Parameters for inserting a new, non-revoked record.
#[derive(Debug, Clone)]
pub struct NewRefreshToken {
    pub user_id: Uuid,
    pub token_hash: String,
    pub device: DeviceInfo,
    pub ttl_seconds: i64,
    pub parent_token_id: Option<Uuid>,
}

/// One row per issued refresh token.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RefreshTokenRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub device_id: Option<String>,
    pub device_name: Option<String>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub is_revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub replaced_by_id: Option<Uuid>,
    pub parent_token_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RefreshTokenRecord {
    /// A record whose expiry equals `now` is already expired.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Durable token ledger. All operations are atomic single-record or
/// bounded-batch writes.
#[async_trait]
pub trait TokenLedger: Send + Sync {
    /// Insert a new, non-revoked record. Fails with
    /// [`LedgerError::DuplicateHash`] when the hash already exists.
    async fn create(&self, new: NewRefreshToken) -> LedgerResult<RefreshTokenRecord>;

    async fn get(&self, id: Uuid) -> LedgerResult<Option<RefreshTokenRecord>>;

    async fn get_by_hash(&self, token_hash: &str) -> LedgerResult<Option<RefreshTokenRecord>>;

    /// True iff a record exists, is not revoked, and expires strictly in
    /// the future.
    async fn is_valid(&self, token_hash: &str) -> LedgerResult<bool>;

    /// Revoke a record, optionally setting the forward link. Idempotent:
    /// revoking an already-revoked record keeps the first `revoked_at`
    /// and still returns true; only `replaced_by_id` may still be adjusted.
    async fn revoke(&self, id: Uuid, replaced_by: Option<Uuid>) -> LedgerResult<bool>;

    /// Conditional revoke: succeeds only when the record is still active.
    /// Returns false when the record was already revoked, which the caller
    /// must treat as a concurrent rotation of the same secret.
    async fn revoke_if_active(&self, id: Uuid, replaced_by: Option<Uuid>) -> LedgerResult<bool>;

    /// Follow `parent_token_id` backward from the given record, marking
    /// every ancestor revoked. Stops at the first record with no parent or
    /// whose parent lookup finds nothing. Returns the number of records
    /// touched. Descendants and the starting record itself are the
    /// caller's responsibility.
    async fn revoke_chain(&self, id: Uuid) -> LedgerResult<u64>;

    /// Bulk-revoke every active record for a user, optionally sparing one.
    async fn revoke_all_for_user(&self, user_id: Uuid, except: Option<Uuid>) -> LedgerResult<u64>;

    async fn revoke_for_device(&self, user_id: Uuid, device_id: &str) -> LedgerResult<u64>;

    /// Delete records whose expiry has passed. Run out of band; no request
    /// path depends on its cadence.
    async fn sweep_expired(&self) -> LedgerResult<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_boundary_is_exclusive() {
        let now = Utc::now();
        let record = RefreshTokenRecord {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            token_hash: "hash".to_string(),
            device_id: None,
            device_name: None,
            user_agent: None,
            ip_address: None,
            expires_at: now,
            is_revoked: false,
            revoked_at: None,
            replaced_by_id: None,
            parent_token_id: None,
            created_at: now,
            updated_at: now,
        };
        // expires_at == now counts as expired, not valid.
        assert!(record.is_expired(now));
        assert!(record.is_expired(now + chrono::Duration::seconds(1)));
        assert!(!record.is_expired(now - chrono::Duration::seconds(1)));
    }

    #[test]
    fn duplicate_hash_error_is_distinct_from_unavailable() {
        let duplicate = LedgerError::DuplicateHash;
        let unavailable = LedgerError::Unavailable(anyhow::anyhow!("down"));
        assert_eq!(duplicate.to_string(), "token hash already exists");
        assert_eq!(unavailable.to_string(), "token ledger unavailable");
    }
}
