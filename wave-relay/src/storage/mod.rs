//! Storage layer for wave-relay.
//!
//! Persists token metadata (keyed by secret hash) and the minimal account
//! registry. Only opaque bytes and hashes are stored; the relay never holds
//! plaintext or raw secrets.

mod sqlite;

pub use sqlite::SqliteStorage;

use crate::error::StorageError;
use async_trait::async_trait;
use std::time::{SystemTime, UNIX_EPOCH};
use wave_types::{SecretHash, SubjectId, TokenId};

/// A stored session token.
///
/// Timestamps are unix milliseconds. A token is live while
/// `now < expires_at`; revocation deletes the row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Internal bookkeeping identifier.
    pub id: TokenId,
    /// Subject the token resolves to.
    pub subject_id: SubjectId,
    /// Hash of the secret handed to the client.
    pub secret_hash: SecretHash,
    /// When the token was issued.
    pub created_at: i64,
    /// When the token stops validating.
    pub expires_at: i64,
    /// Last successful validation.
    pub last_used_at: i64,
}

impl Token {
    /// Whether the token has expired at `now` (unix millis).
    pub fn is_expired_at(&self, now: i64) -> bool {
        now >= self.expires_at
    }
}

/// Request to register a new account.
///
/// Key material is opaque to the relay and stored as given.
#[derive(Debug, Clone)]
pub struct NewAccount {
    /// Login name.
    pub username: String,
    /// Derived from `username`.
    pub subject_id: SubjectId,
    /// Client public key.
    pub public_key: Vec<u8>,
    /// Client private key, encrypted client-side.
    pub encrypted_private_key: Vec<u8>,
    /// Salt for the client-side key derivation.
    pub salt: Vec<u8>,
}

/// A registered account.
#[derive(Debug, Clone)]
pub struct Account {
    /// Login name.
    pub username: String,
    /// Stable subject identity.
    pub subject_id: SubjectId,
    /// Client public key.
    pub public_key: Vec<u8>,
    /// Client private key, encrypted client-side.
    pub encrypted_private_key: Vec<u8>,
    /// Salt for the client-side key derivation.
    pub salt: Vec<u8>,
    /// Registration time (unix millis).
    pub created_at: i64,
    /// Last authenticated request (unix millis).
    pub last_active_at: i64,
}

/// Persistence collaborator for the token service.
///
/// Keyed by opaque values only; makes no assumption about the engine.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Persist a newly issued token.
    async fn create_token(&self, token: &Token) -> Result<(), StorageError>;

    /// Look up a token by the hash of its secret.
    async fn find_token_by_hash(&self, hash: &SecretHash) -> Result<Option<Token>, StorageError>;

    /// Delete a token by hash.
    ///
    /// Returns whether a row was removed.
    async fn delete_token_by_hash(&self, hash: &SecretHash) -> Result<bool, StorageError>;

    /// Delete every token belonging to a subject.
    ///
    /// Returns the number of tokens deleted.
    async fn delete_tokens_for_subject(&self, subject: &SubjectId) -> Result<u64, StorageError>;

    /// Delete tokens with `expires_at < now`.
    ///
    /// Returns the number of tokens deleted.
    async fn delete_expired_tokens(&self, now: i64) -> Result<u64, StorageError>;

    /// Record a successful use of a token.
    async fn update_token_last_used(&self, id: &TokenId, at: i64) -> Result<(), StorageError>;
}

/// Account registry backing login and last-active tracking.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Register an account; fails with `Conflict` if the username is taken.
    async fn create_account(&self, account: &NewAccount) -> Result<(), StorageError>;

    /// Look up an account by login name.
    async fn find_account_by_username(
        &self,
        username: &str,
    ) -> Result<Option<Account>, StorageError>;

    /// Look up an account by subject.
    async fn find_account(&self, subject: &SubjectId) -> Result<Option<Account>, StorageError>;

    /// Set the last-active timestamp.
    async fn touch_account(&self, subject: &SubjectId, at: i64) -> Result<(), StorageError>;

    /// Remove an account. Returns whether it existed.
    async fn delete_account(&self, subject: &SubjectId) -> Result<bool, StorageError>;
}

/// Current time as unix milliseconds.
pub fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
