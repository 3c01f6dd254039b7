//! Typed failures surfaced at the rotation engine boundary.
//!
//! Callers pattern-match on the variant instead of inspecting message
//! strings; the transport layer maps these to status codes.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RotationError {
    /// No matching record, an expired record, or a bad/expired signature.
    /// Recoverable by re-authenticating.
    #[error("invalid or expired credential")]
    InvalidOrExpiredCredential,

    /// An already-exchanged refresh secret was presented again. The session
    /// chain has been revoked; the user must fully re-authenticate.
    #[error("credential reused, session chain revoked")]
    CredentialReused,

    /// The owning principal is unknown or deactivated.
    #[error("principal inactive or unknown")]
    PrincipalInactive,

    /// The credential exists but belongs to a different principal.
    #[error("credential does not belong to this principal")]
    CredentialNotOwned,

    /// Infrastructure fault. Surfaced upstream as a retryable 5xx-class
    /// condition, never treated as "not found".
    #[error("token storage unavailable")]
    StorageUnavailable(#[from] anyhow::Error),
}

impl RotationError {
    /// True for failures that end the session lineage and require a full
    /// re-authentication rather than a retry.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::CredentialReused | Self::PrincipalInactive | Self::CredentialNotOwned
        )
    }
}

#[cfg(test)]
mod tests {
    use super::RotationError;
    use anyhow::anyhow;

    #[test]
    fn fatal_variants() {
        assert!(RotationError::CredentialReused.is_fatal());
        assert!(RotationError::PrincipalInactive.is_fatal());
        assert!(RotationError::CredentialNotOwned.is_fatal());
        assert!(!RotationError::InvalidOrExpiredCredential.is_fatal());
        assert!(!RotationError::StorageUnavailable(anyhow!("down")).is_fatal());
    }

    #[test]
    fn storage_unavailable_wraps_cause() {
        let err = RotationError::from(anyhow!("connection refused"));
        assert!(matches!(err, RotationError::StorageUnavailable(_)));
        assert_eq!(err.to_string(), "token storage unavailable");
    }
}
