//! In-process TTL cache.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::error;

use super::{cache_key, CachedTokenEntry, TokenCache};

struct StoredEntry {
    // Entries are held in the shared JSON wire format so this store and an
    // external cache backend are interchangeable.
    payload: String,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct InMemoryTokenCache {
    entries: Mutex<HashMap<String, StoredEntry>>,
}

impl InMemoryTokenCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries, for tests and diagnostics.
    pub async fn len(&self) -> usize {
        let now = Utc::now();
        let entries = self.entries.lock().await;
        entries.values().filter(|entry| entry.expires_at > now).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait::async_trait]
impl TokenCache for InMemoryTokenCache {
    async fn put(&self, token_hash: &str, entry: CachedTokenEntry) {
        let now = Utc::now();
        if entry.remaining_ttl(now).is_none() {
            return;
        }
        let payload = match serde_json::to_string(&entry) {
            Ok(payload) => payload,
            Err(err) => {
                error!("Failed to encode cache entry: {err}");
                return;
            }
        };
        let mut entries = self.entries.lock().await;
        // Evict lazily on writes so abandoned entries do not pile up.
        entries.retain(|_, stored| stored.expires_at > now);
        entries.insert(
            cache_key(token_hash),
            StoredEntry {
                payload,
                expires_at: entry.expires_at,
            },
        );
    }

    async fn get(&self, token_hash: &str) -> Option<CachedTokenEntry> {
        let now = Utc::now();
        let entries = self.entries.lock().await;
        let stored = entries.get(&cache_key(token_hash))?;
        if stored.expires_at <= now {
            return None;
        }
        match serde_json::from_str(&stored.payload) {
            Ok(entry) => Some(entry),
            Err(err) => {
                error!("Failed to decode cache entry: {err}");
                None
            }
        }
    }

    async fn invalidate(&self, token_hash: &str) {
        let mut entries = self.entries.lock().await;
        entries.remove(&cache_key(token_hash));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    fn entry(ttl_seconds: i64) -> CachedTokenEntry {
        CachedTokenEntry {
            user_id: Uuid::new_v4(),
            device_id: Some("device-1".to_string()),
            expires_at: Utc::now() + Duration::seconds(ttl_seconds),
        }
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let cache = InMemoryTokenCache::new();
        let entry = entry(60);
        cache.put("hash", entry.clone()).await;
        assert_eq!(cache.get("hash").await, Some(entry));
    }

    #[tokio::test]
    async fn expired_entries_are_never_written() {
        let cache = InMemoryTokenCache::new();
        cache.put("hash", entry(0)).await;
        assert!(cache.get("hash").await.is_none());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn invalidate_removes_entry() {
        let cache = InMemoryTokenCache::new();
        cache.put("hash", entry(60)).await;
        cache.invalidate("hash").await;
        assert!(cache.get("hash").await.is_none());
    }

    #[tokio::test]
    async fn writes_evict_stale_entries() {
        let cache = InMemoryTokenCache::new();
        cache.put("short", entry(1)).await;
        tokio::time::sleep(std::time::Duration::from_millis(1_100)).await;
        cache.put("fresh", entry(60)).await;
        assert_eq!(cache.len().await, 1);
        assert!(cache.get("short").await.is_none());
    }
}
