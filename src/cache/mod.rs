//! Fast-path validation cache.
//!
//! A TTL-bounded, write-through index from hashed secret to minimal
//! validation metadata. Purely an optimization: a miss must fall through to
//! the ledger, and a hit is only a hint that a record exists. The store may
//! be wiped at any time with no correctness impact.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod memory;

pub use memory::InMemoryTokenCache;

/// Wire contract key: `refresh_token:{hash}`.
#[must_use]
pub fn cache_key(token_hash: &str) -> String {
    format!("refresh_token:{token_hash}")
}

/// Subset of a ledger record mirrored into the cache. Serialized as JSON in
/// the backing store so external cache backends share one wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedTokenEntry {
    pub user_id: Uuid,
    pub device_id: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl CachedTokenEntry {
    /// Remaining lifetime, or `None` once expired. Writes with no remaining
    /// lifetime are skipped.
    #[must_use]
    pub fn remaining_ttl(&self, now: DateTime<Utc>) -> Option<std::time::Duration> {
        (self.expires_at - now).to_std().ok().filter(|ttl| !ttl.is_zero())
    }
}

/// Best-effort cache. Implementations log their own faults and degrade to
/// misses; no method is allowed to affect validity decisions.
#[async_trait]
pub trait TokenCache: Send + Sync {
    /// Write-through insert with a TTL equal to the entry's remaining
    /// lifetime. A no-op when the entry is already expired.
    async fn put(&self, token_hash: &str, entry: CachedTokenEntry);

    /// Pure lookup; never consults the ledger.
    async fn get(&self, token_hash: &str) -> Option<CachedTokenEntry>;

    /// Explicit delete, called on every revocation.
    async fn invalidate(&self, token_hash: &str);
}

/// Cache that stores nothing, for callers that run straight off the ledger.
#[derive(Clone, Debug, Default)]
pub struct NoopTokenCache;

#[async_trait]
impl TokenCache for NoopTokenCache {
    async fn put(&self, _token_hash: &str, _entry: CachedTokenEntry) {}

    async fn get(&self, _token_hash: &str) -> Option<CachedTokenEntry> {
        None
    }

    async fn invalidate(&self, _token_hash: &str) {}
}
