//! Refresh secret generation and hashing.

use anyhow::{Context, Result};
use base64::Engine;
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

/// Create a new refresh secret handed to the client.
///
/// The raw value is only ever returned to the caller; the ledger stores a
/// hash. 32 bytes from the OS RNG, URL-safe base64 without padding.
pub fn generate_refresh_secret() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate refresh secret")?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

/// Hash a refresh secret so raw values never touch the ledger or cache.
/// Deterministic, so the same hash is used to store and to look up.
#[must_use]
pub fn hash_refresh_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;

    #[test]
    fn generated_secret_has_full_entropy() {
        let decoded_len = generate_refresh_secret()
            .ok()
            .and_then(|secret| URL_SAFE_NO_PAD.decode(secret.as_bytes()).ok())
            .map(|bytes| bytes.len());
        assert_eq!(decoded_len, Some(32));
    }

    #[test]
    fn generated_secrets_differ() {
        let first = generate_refresh_secret().unwrap();
        let second = generate_refresh_secret().unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn hash_is_deterministic_and_hex() {
        let first = hash_refresh_secret("secret");
        let second = hash_refresh_secret("secret");
        let different = hash_refresh_secret("other");
        assert_eq!(first, second);
        assert_ne!(first, different);
        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn known_digest() {
        // SHA-256 of the empty string, as a spot check against the digest impl.
        assert_eq!(
            hash_refresh_secret(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
