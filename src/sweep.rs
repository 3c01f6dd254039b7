//! Periodic deletion of expired ledger records.
//!
//! Runs out of band; no request path depends on its cadence. Expired records
//! are already invalid, the sweep only reclaims storage.

use anyhow::Result;
use std::sync::Arc;
use tokio::{task::JoinHandle, time::sleep};
use tracing::{error, info};

use crate::ledger::TokenLedger;

/// Delete every record whose expiry has passed. Returns the number removed.
///
/// # Errors
/// Propagates ledger faults; the caller decides whether to retry.
pub async fn sweep_once(ledger: &dyn TokenLedger) -> Result<u64> {
    let deleted = ledger.sweep_expired().await?;
    info!(deleted, "swept expired refresh tokens");
    Ok(deleted)
}

/// Spawn a background task that sweeps at a fixed interval. Faults are
/// logged and the loop keeps going; the next pass retries naturally.
pub fn spawn_sweeper(
    ledger: Arc<dyn TokenLedger>,
    interval: std::time::Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            sleep(interval).await;
            if let Err(err) = sweep_once(ledger.as_ref()).await {
                error!("Failed to sweep expired refresh tokens: {err:#}");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{DeviceInfo, InMemoryTokenLedger, NewRefreshToken};
    use uuid::Uuid;

    #[tokio::test]
    async fn sweep_once_reports_deleted_count() {
        let ledger = InMemoryTokenLedger::new();
        for (hash, ttl) in [("stale-a", 0), ("stale-b", 0), ("live", 60)] {
            ledger
                .create(NewRefreshToken {
                    user_id: Uuid::new_v4(),
                    token_hash: hash.to_string(),
                    device: DeviceInfo::default(),
                    ttl_seconds: ttl,
                    parent_token_id: None,
                })
                .await
                .unwrap();
        }

        assert_eq!(sweep_once(&ledger).await.unwrap(), 2);
        assert_eq!(sweep_once(&ledger).await.unwrap(), 0);
        assert!(ledger.get_by_hash("live").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn sweeper_task_runs_on_interval() {
        let ledger = Arc::new(InMemoryTokenLedger::new());
        ledger
            .create(NewRefreshToken {
                user_id: Uuid::new_v4(),
                token_hash: "stale".to_string(),
                device: DeviceInfo::default(),
                ttl_seconds: 0,
                parent_token_id: None,
            })
            .await
            .unwrap();

        let handle = spawn_sweeper(ledger.clone(), std::time::Duration::from_millis(10));
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        handle.abort();

        assert!(ledger.get_by_hash("stale").await.unwrap().is_none());
    }
}
