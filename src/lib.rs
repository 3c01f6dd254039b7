//! # Renovo (Refresh-Token Session Lifecycle)
//!
//! `renovo` issues, rotates, validates, and revokes the long-lived
//! credentials ("refresh tokens") that let a client exchange one opaque
//! secret for short-lived access tokens, across multiple devices per user,
//! while detecting and containing credential theft.
//!
//! ## Two-tier storage
//!
//! - **Ledger** ([`ledger::TokenLedger`]): the durable, authoritative record
//!   of every refresh token ever issued, including revocation state and
//!   chain linkage. Backed by Postgres in production, by an in-memory arena
//!   in tests.
//! - **Cache** ([`cache::TokenCache`]): a TTL-bounded, write-through index
//!   from hashed secret to minimal validation metadata. Disposable; a miss
//!   falls through to the ledger and a wipe costs only latency.
//!
//! ## Rotation & reuse detection
//!
//! Each rotation revokes the presented record and mints a successor linked
//! to it (`parent_token_id` backward, `replaced_by_id` forward), so one
//! device's session forms a singly-linked chain. Presenting a secret that
//! was already exchanged is treated as theft: the whole chain, ancestors
//! and descendants alike, is revoked and the caller gets a fatal
//! [`RotationError::CredentialReused`]. The revocation of the old record is
//! a conditional update, so two concurrent rotations of the same secret
//! resolve to one winner and one reuse detection instead of two live chains.
//!
//! - **Secrets never stored:** the ledger and cache only ever see the
//!   SHA-256 hash of a refresh secret.
//! - **Create before revoke:** a crash mid-rotation leaves a recoverable
//!   successor, never a chain without a valid token.
//! - **Fail closed:** storage faults reject the request; they are never
//!   reported as "not found".

pub mod access;
pub mod cache;
pub mod config;
pub mod credentials;
pub mod error;
pub mod ledger;
pub mod principal;
pub mod rotation;
pub mod sweep;

pub use access::{AccessClaims, AccessTokenSigner, PASSWORD_RESET_SCOPE};
pub use cache::{CachedTokenEntry, InMemoryTokenCache, NoopTokenCache, TokenCache};
pub use config::TokenConfig;
pub use error::RotationError;
pub use ledger::{
    DeviceInfo, InMemoryTokenLedger, LedgerError, NewRefreshToken, PgTokenLedger,
    RefreshTokenRecord, TokenLedger,
};
pub use principal::{
    InMemoryPrincipalDirectory, PgPrincipalDirectory, Principal, PrincipalDirectory,
};
pub use rotation::{RotationEngine, TokenPair};
