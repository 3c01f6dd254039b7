//! Rotation engine: token issuance, the rotation protocol, reuse detection
//! with chain revocation, and logout.
//!
//! Every dependency is constructor-injected so embedders and tests can
//! substitute the ledger, cache, and principal directory.

use anyhow::anyhow;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::access::AccessTokenSigner;
use crate::cache::{CachedTokenEntry, TokenCache};
use crate::config::TokenConfig;
use crate::credentials::{generate_refresh_secret, hash_refresh_secret};
use crate::error::RotationError;
use crate::ledger::{DeviceInfo, LedgerError, NewRefreshToken, RefreshTokenRecord, TokenLedger};
use crate::principal::PrincipalDirectory;

const MINT_ATTEMPTS: usize = 3;

/// What a successful login or rotation hands back to the transport layer.
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
}

impl TokenPair {
    fn new(access_token: String, refresh_token: String) -> Self {
        Self {
            access_token,
            refresh_token,
            token_type: "bearer",
        }
    }
}

pub struct RotationEngine {
    ledger: Arc<dyn TokenLedger>,
    cache: Arc<dyn TokenCache>,
    principals: Arc<dyn PrincipalDirectory>,
    signer: AccessTokenSigner,
    config: TokenConfig,
}

impl RotationEngine {
    #[must_use]
    pub fn new(
        ledger: Arc<dyn TokenLedger>,
        cache: Arc<dyn TokenCache>,
        principals: Arc<dyn PrincipalDirectory>,
        config: TokenConfig,
    ) -> Self {
        let signer = AccessTokenSigner::new(config.signing_secret());
        Self {
            ledger,
            cache,
            principals,
            signer,
            config,
        }
    }

    /// Verifier for access tokens minted by this engine.
    #[must_use]
    pub fn signer(&self) -> &AccessTokenSigner {
        &self.signer
    }

    /// Start a new session chain for an authenticated principal.
    ///
    /// # Errors
    /// `PrincipalInactive` for unknown or deactivated users,
    /// `StorageUnavailable` on ledger faults.
    pub async fn issue_pair(
        &self,
        user_id: Uuid,
        device: &DeviceInfo,
    ) -> Result<TokenPair, RotationError> {
        self.require_active(user_id).await?;

        let access_token = self
            .signer
            .issue(user_id, self.config.access_ttl_seconds(), None)
            .map_err(RotationError::StorageUnavailable)?;
        let (refresh_secret, record) = self.mint_refresh(user_id, device.clone(), None).await?;

        self.cache_record(&record).await;
        info!(
            user_id = %user_id,
            device_id = ?record.device_id,
            "issued refresh token pair"
        );
        Ok(TokenPair::new(access_token, refresh_secret))
    }

    /// Exchange a refresh secret for a new token pair, revoking the old
    /// record. Presenting an already-exchanged secret poisons the entire
    /// lineage and fails with [`RotationError::CredentialReused`].
    ///
    /// # Errors
    /// See [`RotationError`] for the full taxonomy.
    pub async fn rotate(
        &self,
        secret: &str,
        device: &DeviceInfo,
    ) -> Result<TokenPair, RotationError> {
        let token_hash = hash_refresh_secret(secret);

        // The cache hit is only a hint that the record exists; acceptance
        // always goes through the ledger, because revocation may land after
        // the cache entry was written.
        let _hint = self.cache.get(&token_hash).await;

        if !self.ledger.is_valid(&token_hash).await.map_err(map_ledger)? {
            let record = self.ledger.get_by_hash(&token_hash).await.map_err(map_ledger)?;
            return match record {
                Some(record) if record.is_revoked => {
                    Err(self.handle_reuse(&record, &token_hash).await)
                }
                _ => Err(RotationError::InvalidOrExpiredCredential),
            };
        }

        let record = self
            .ledger
            .get_by_hash(&token_hash)
            .await
            .map_err(map_ledger)?
            .ok_or(RotationError::InvalidOrExpiredCredential)?;

        self.require_active(record.user_id).await?;

        // The successor keeps the device identity when the caller does not
        // resend it; agent and address are always taken from this request.
        let device = DeviceInfo {
            device_id: device.device_id.clone().or_else(|| record.device_id.clone()),
            device_name: device
                .device_name
                .clone()
                .or_else(|| record.device_name.clone()),
            user_agent: device.user_agent.clone(),
            ip_address: device.ip_address.clone(),
        };

        let access_token = self
            .signer
            .issue(record.user_id, self.config.access_ttl_seconds(), None)
            .map_err(RotationError::StorageUnavailable)?;

        // Create before revoke: a crash between the two steps leaves a
        // recoverable successor, never a chain with no valid token.
        let (refresh_secret, new_record) = self
            .mint_refresh(record.user_id, device, Some(record.id))
            .await?;

        let won = self
            .ledger
            .revoke_if_active(record.id, Some(new_record.id))
            .await
            .map_err(map_ledger)?;
        if !won {
            // A concurrent rotation exchanged this secret first. Withdraw
            // the record minted here and treat the request as reuse.
            self.ledger
                .revoke(new_record.id, None)
                .await
                .map_err(map_ledger)?;
            let record = self
                .ledger
                .get(record.id)
                .await
                .map_err(map_ledger)?
                .unwrap_or(record);
            return Err(self.handle_reuse(&record, &token_hash).await);
        }

        self.cache.invalidate(&token_hash).await;
        self.cache_record(&new_record).await;
        info!(
            user_id = %new_record.user_id,
            device_id = ?new_record.device_id,
            "rotated refresh token"
        );
        Ok(TokenPair::new(access_token, refresh_secret))
    }

    /// Revoke exactly the matching record after an ownership check.
    ///
    /// # Errors
    /// `InvalidOrExpiredCredential` for unknown secrets,
    /// `CredentialNotOwned` when the record belongs to someone else.
    pub async fn logout(&self, user_id: Uuid, secret: &str) -> Result<(), RotationError> {
        let token_hash = hash_refresh_secret(secret);
        let record = self
            .ledger
            .get_by_hash(&token_hash)
            .await
            .map_err(map_ledger)?
            .ok_or(RotationError::InvalidOrExpiredCredential)?;

        if record.user_id != user_id {
            return Err(RotationError::CredentialNotOwned);
        }

        self.ledger
            .revoke(record.id, None)
            .await
            .map_err(map_ledger)?;
        self.cache.invalidate(&token_hash).await;
        info!(
            user_id = %user_id,
            device_id = ?record.device_id,
            "logged out device session"
        );
        Ok(())
    }

    /// Revoke every active session for a user, optionally sparing the one
    /// matching `except_secret` ("log out everywhere but here"). Returns the
    /// number of sessions revoked.
    ///
    /// # Errors
    /// `StorageUnavailable` on ledger faults.
    pub async fn logout_all(
        &self,
        user_id: Uuid,
        except_secret: Option<&str>,
    ) -> Result<u64, RotationError> {
        let except = match except_secret {
            Some(secret) => {
                let token_hash = hash_refresh_secret(secret);
                self.ledger
                    .get_by_hash(&token_hash)
                    .await
                    .map_err(map_ledger)?
                    // Spare the record only when it belongs to this user.
                    .filter(|record| record.user_id == user_id)
                    .map(|record| record.id)
            }
            None => None,
        };

        let revoked = self
            .ledger
            .revoke_all_for_user(user_id, except)
            .await
            .map_err(map_ledger)?;
        // Cache entries for the revoked sessions expire on their own; the
        // ledger check on rotation stays authoritative meanwhile.
        info!(user_id = %user_id, revoked, "logged out all device sessions");
        Ok(revoked)
    }

    /// Revoke every active session for one device of a user.
    ///
    /// # Errors
    /// `StorageUnavailable` on ledger faults.
    pub async fn logout_device(
        &self,
        user_id: Uuid,
        device_id: &str,
    ) -> Result<u64, RotationError> {
        let revoked = self
            .ledger
            .revoke_for_device(user_id, device_id)
            .await
            .map_err(map_ledger)?;
        info!(user_id = %user_id, device_id, revoked, "logged out device sessions");
        Ok(revoked)
    }

    /// Mint a short-lived token usable only by the password-reset flow.
    ///
    /// # Errors
    /// `PrincipalInactive` for unknown or deactivated users.
    pub async fn issue_password_reset_token(
        &self,
        user_id: Uuid,
    ) -> Result<String, RotationError> {
        self.require_active(user_id).await?;
        self.signer
            .issue_password_reset(user_id, self.config.reset_ttl_seconds())
            .map_err(RotationError::StorageUnavailable)
    }

    async fn require_active(&self, user_id: Uuid) -> Result<(), RotationError> {
        let principal = self
            .principals
            .find(user_id)
            .await
            .map_err(RotationError::StorageUnavailable)?;
        match principal {
            Some(principal) if principal.is_active => Ok(()),
            _ => Err(RotationError::PrincipalInactive),
        }
    }

    async fn mint_refresh(
        &self,
        user_id: Uuid,
        device: DeviceInfo,
        parent_token_id: Option<Uuid>,
    ) -> Result<(String, RefreshTokenRecord), RotationError> {
        for _ in 0..MINT_ATTEMPTS {
            let secret = generate_refresh_secret().map_err(RotationError::StorageUnavailable)?;
            let token_hash = hash_refresh_secret(&secret);
            let result = self
                .ledger
                .create(NewRefreshToken {
                    user_id,
                    token_hash,
                    device: device.clone(),
                    ttl_seconds: self.config.refresh_ttl_seconds(),
                    parent_token_id,
                })
                .await;
            match result {
                Ok(record) => return Ok((secret, record)),
                Err(LedgerError::DuplicateHash) => {}
                Err(err) => return Err(map_ledger(err)),
            }
        }
        Err(RotationError::StorageUnavailable(anyhow!(
            "failed to generate a unique refresh token"
        )))
    }

    /// Poison the whole lineage around a reused record: ancestors through
    /// the ledger's chain walk, descendants (anything rotated after the
    /// theft) by following the forward links. Detections are never silently
    /// swallowed; partial revocation fails the request closed.
    async fn handle_reuse(
        &self,
        record: &RefreshTokenRecord,
        presented_hash: &str,
    ) -> RotationError {
        warn!(
            user_id = %record.user_id,
            device_id = ?record.device_id,
            "refresh token reuse detected, revoking session chain"
        );
        let outcome = self.revoke_lineage(record).await;
        self.cache.invalidate(presented_hash).await;
        match outcome {
            Ok(revoked) => {
                info!(
                    user_id = %record.user_id,
                    revoked,
                    "session chain revoked after reuse detection"
                );
                RotationError::CredentialReused
            }
            Err(err) => {
                error!(
                    user_id = %record.user_id,
                    "failed to fully revoke session chain: {err:#}"
                );
                RotationError::StorageUnavailable(err)
            }
        }
    }

    async fn revoke_lineage(&self, record: &RefreshTokenRecord) -> anyhow::Result<u64> {
        let mut revoked = self.ledger.revoke_chain(record.id).await?;

        // Forward links always point at strictly newer records, so the walk
        // terminates.
        let mut next = record.replaced_by_id;
        while let Some(id) = next {
            let Some(descendant) = self.ledger.get(id).await? else {
                break;
            };
            if !descendant.is_revoked {
                self.ledger.revoke(descendant.id, None).await?;
                revoked += 1;
            }
            self.cache.invalidate(&descendant.token_hash).await;
            next = descendant.replaced_by_id;
        }
        Ok(revoked)
    }

    async fn cache_record(&self, record: &RefreshTokenRecord) {
        self.cache
            .put(
                &record.token_hash,
                CachedTokenEntry {
                    user_id: record.user_id,
                    device_id: record.device_id.clone(),
                    expires_at: record.expires_at,
                },
            )
            .await;
    }
}

fn map_ledger(err: LedgerError) -> RotationError {
    match err {
        // A collision that survives the mint retries is an infrastructure
        // fault, not a client error.
        LedgerError::DuplicateHash => {
            RotationError::StorageUnavailable(anyhow!("refresh token hash collision"))
        }
        LedgerError::Unavailable(err) => RotationError::StorageUnavailable(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_pair_is_bearer() {
        let pair = TokenPair::new("access".to_string(), "refresh".to_string());
        assert_eq!(pair.token_type, "bearer");
        let json = serde_json::to_value(&pair).unwrap();
        assert_eq!(json["token_type"], "bearer");
        assert_eq!(json["access_token"], "access");
        assert_eq!(json["refresh_token"], "refresh");
    }

    #[test]
    fn ledger_errors_map_to_storage_unavailable() {
        assert!(matches!(
            map_ledger(LedgerError::DuplicateHash),
            RotationError::StorageUnavailable(_)
        ));
        assert!(matches!(
            map_ledger(LedgerError::Unavailable(anyhow!("down"))),
            RotationError::StorageUnavailable(_)
        ));
    }
}
