//! Short-lived, stateless access tokens.
//!
//! Tokens are HS256-signed JWTs carrying the subject id, expiry, and an
//! optional narrow-purpose scope. Verification is a pure function of the
//! token and the server secret, with no storage lookup.

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RotationError;

/// Scope claim carried by password-reset tokens. Endpoints requiring the
/// general-purpose scope must reject tokens that carry it.
pub const PASSWORD_RESET_SCOPE: &str = "password_reset";

#[derive(Debug, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl AccessClaims {
    /// Parse the subject claim back into a principal id.
    ///
    /// # Errors
    /// Fails when the claim is not a UUID, which means the token was not
    /// minted by this signer.
    pub fn subject_id(&self) -> Result<Uuid, RotationError> {
        Uuid::parse_str(&self.sub).map_err(|_| RotationError::InvalidOrExpiredCredential)
    }
}

pub struct AccessTokenSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl AccessTokenSigner {
    #[must_use]
    pub fn new(signing_secret: &SecretString) -> Self {
        let secret = signing_secret.expose_secret().as_bytes();
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        }
    }

    /// Mint a signed token for `subject` expiring after `ttl_seconds`.
    ///
    /// # Errors
    /// Returns an error only when signing itself fails.
    pub fn issue(&self, subject: Uuid, ttl_seconds: i64, scope: Option<&str>) -> Result<String> {
        let now = Utc::now();
        let claims = AccessClaims {
            sub: subject.to_string(),
            exp: (now + Duration::seconds(ttl_seconds)).timestamp(),
            iat: now.timestamp(),
            scope: scope.map(str::to_string),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .context("failed to sign access token")
    }

    /// Mint a short-lived token usable only by the password-reset flow.
    ///
    /// # Errors
    /// Returns an error only when signing itself fails.
    pub fn issue_password_reset(&self, subject: Uuid, ttl_seconds: i64) -> Result<String> {
        self.issue(subject, ttl_seconds, Some(PASSWORD_RESET_SCOPE))
    }

    /// Verify signature and expiry, then enforce the scope contract: a token
    /// is accepted only when its scope claim matches the scope the caller
    /// requires. Signature failure and expiry are both surfaced as an
    /// invalid credential.
    ///
    /// # Errors
    /// `RotationError::InvalidOrExpiredCredential` on any verification failure.
    pub fn verify(
        &self,
        token: &str,
        required_scope: Option<&str>,
    ) -> Result<AccessClaims, RotationError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        let data = decode::<AccessClaims>(token, &self.decoding, &validation)
            .map_err(|_| RotationError::InvalidOrExpiredCredential)?;
        if data.claims.scope.as_deref() != required_scope {
            return Err(RotationError::InvalidOrExpiredCredential);
        }
        Ok(data.claims)
    }
}
