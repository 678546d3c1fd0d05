//! Token lifecycle: issue, validate, refresh, revoke, sweep.
//!
//! [`TokenService`] is the only component that writes to the [`TokenStore`].
//! Secrets leave this module once, inside an [`IssuedToken`]; only their
//! hashes are stored or logged.

use crate::error::{AuthError, AuthResult};
use crate::storage::{unix_millis, Token, TokenStore};
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use wave_types::{SecretHash, SubjectId, TokenId, TokenSecret};

/// A freshly issued credential.
#[derive(Debug)]
pub struct IssuedToken {
    /// Raw secret for the client. Not retained anywhere else.
    pub secret: TokenSecret,
    /// Subject the secret resolves to.
    pub subject_id: SubjectId,
    /// Expiry (unix millis).
    pub expires_at: i64,
}

/// Issues and resolves bearer tokens against a [`TokenStore`].
pub struct TokenService {
    store: Arc<dyn TokenStore>,
    token_ttl: Duration,
    /// Hashes retired by `refresh` whose row could not be deleted,
    /// mapped to their original expiry.
    retired: DashMap<SecretHash, i64>,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("token_ttl", &self.token_ttl)
            .field("retired", &self.retired.len())
            .finish_non_exhaustive()
    }
}

impl TokenService {
    /// Create a service over `store`; `token_ttl` is the lifetime used for
    /// login and refresh.
    pub fn new(store: Arc<dyn TokenStore>, token_ttl: Duration) -> Self {
        Self {
            store,
            token_ttl,
            retired: DashMap::new(),
        }
    }

    /// Lifetime applied to session tokens.
    pub fn token_ttl(&self) -> Duration {
        self.token_ttl
    }

    /// Number of refreshed hashes still waiting on deletion.
    pub fn retired_len(&self) -> usize {
        self.retired.len()
    }

    /// Issue a new token for `subject` valid for `ttl`.
    ///
    /// Storage failures propagate: the caller gets no secret.
    pub async fn issue(&self, subject: &SubjectId, ttl: Duration) -> AuthResult<IssuedToken> {
        let ttl_ms = i64::try_from(ttl.as_millis()).map_err(|_| AuthError::InvalidTtl)?;
        if ttl_ms <= 0 {
            return Err(AuthError::InvalidTtl);
        }

        let secret = TokenSecret::generate()?;
        let now = unix_millis();
        let token = Token {
            id: TokenId::new(),
            subject_id: *subject,
            secret_hash: secret.hash(),
            created_at: now,
            expires_at: now.saturating_add(ttl_ms),
            last_used_at: now,
        };

        self.store.create_token(&token).await?;

        tracing::debug!(
            subject = ?subject,
            hash = %token.secret_hash.short(),
            expires_at = token.expires_at,
            "Issued token"
        );

        Ok(IssuedToken {
            secret,
            subject_id: *subject,
            expires_at: token.expires_at,
        })
    }

    /// Issue a token with the configured session lifetime.
    pub async fn issue_session(&self, subject: &SubjectId) -> AuthResult<IssuedToken> {
        self.issue(subject, self.token_ttl).await
    }

    /// Resolve a presented secret to its subject.
    ///
    /// Unknown, expired, revoked and retired secrets are all
    /// `Unauthenticated`. An expired row is deleted on the way out.
    pub async fn validate(&self, secret: &TokenSecret) -> AuthResult<SubjectId> {
        self.resolve(&secret.hash()).await.map(|t| t.subject_id)
    }

    async fn resolve(&self, hash: &SecretHash) -> AuthResult<Token> {
        if self.retired.contains_key(hash) {
            return Err(AuthError::unauthenticated("retired"));
        }

        let token = self
            .store
            .find_token_by_hash(hash)
            .await?
            .ok_or_else(|| AuthError::unauthenticated("unknown"))?;

        let now = unix_millis();
        if token.is_expired_at(now) {
            if let Err(e) = self.store.delete_token_by_hash(hash).await {
                tracing::warn!(hash = %hash.short(), "Failed to delete expired token: {}", e);
            }
            return Err(AuthError::unauthenticated("expired"));
        }

        if let Err(e) = self.store.update_token_last_used(&token.id, now).await {
            tracing::warn!(hash = %hash.short(), "Failed to update last-used: {}", e);
        }

        Ok(token)
    }

    /// Exchange a live secret for a new one.
    ///
    /// The old secret stops validating before this returns, even if its row
    /// could not be deleted.
    pub async fn refresh(&self, secret: &TokenSecret) -> AuthResult<IssuedToken> {
        let hash = secret.hash();
        let old = self.resolve(&hash).await?;

        match self.store.delete_token_by_hash(&hash).await {
            Ok(true) => {}
            // A concurrent refresh or revoke consumed it first.
            Ok(false) => return Err(AuthError::unauthenticated("consumed")),
            Err(e) => {
                tracing::warn!(
                    hash = %hash.short(),
                    "Failed to delete refreshed token, retiring in memory: {}",
                    e
                );
                self.retired.insert(hash, old.expires_at);
            }
        }

        let issued = self.issue(&old.subject_id, self.token_ttl).await?;
        tracing::debug!(subject = ?old.subject_id, old = %hash.short(), "Refreshed token");
        Ok(issued)
    }

    /// Revoke a single secret. Unknown secrets are not an error.
    ///
    /// Returns whether a stored token was removed.
    pub async fn revoke(&self, secret: &TokenSecret) -> AuthResult<bool> {
        let hash = secret.hash();
        let removed = self.store.delete_token_by_hash(&hash).await?;
        tracing::debug!(hash = %hash.short(), removed, "Revoked token");
        Ok(removed)
    }

    /// Revoke every token of `subject`, returning how many were removed.
    pub async fn revoke_all(&self, subject: &SubjectId) -> AuthResult<u64> {
        let revoked = self.store.delete_tokens_for_subject(subject).await?;
        tracing::info!(subject = ?subject, revoked, "Revoked all tokens");
        Ok(revoked)
    }

    /// Delete expired tokens and retry deletion of retired hashes.
    ///
    /// Safe to run concurrently with itself and with request traffic.
    pub async fn sweep_expired(&self) -> AuthResult<u64> {
        let now = unix_millis();
        let mut deleted = self.store.delete_expired_tokens(now).await?;

        let retired: Vec<(SecretHash, i64)> = self
            .retired
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();

        for (hash, expires_at) in retired {
            if expires_at < now {
                self.retired.remove(&hash);
                continue;
            }
            match self.store.delete_token_by_hash(&hash).await {
                Ok(removed) => {
                    self.retired.remove(&hash);
                    if removed {
                        deleted += 1;
                    }
                }
                Err(e) => {
                    tracing::debug!(hash = %hash.short(), "Retired token still undeletable: {}", e);
                }
            }
        }

        Ok(deleted)
    }
}

/// Run a store-bound future under `deadline`.
pub async fn with_deadline<T, F>(deadline: Duration, fut: F) -> AuthResult<T>
where
    F: Future<Output = AuthResult<T>>,
{
    tokio::time::timeout(deadline, fut)
        .await
        .map_err(|_| AuthError::Timeout(deadline))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::storage::SqliteStorage;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};

    const HOUR: Duration = Duration::from_secs(3600);

    /// SqliteStorage with switchable failures.
    #[derive(Default)]
    struct FlakyFlags {
        fail_create: AtomicBool,
        fail_delete: AtomicBool,
        fail_touch: AtomicBool,
    }

    struct FlakyStore {
        inner: SqliteStorage,
        flags: Arc<FlakyFlags>,
    }

    fn injected() -> StorageError {
        StorageError::Database(sqlx::Error::PoolTimedOut)
    }

    #[async_trait]
    impl TokenStore for FlakyStore {
        async fn create_token(&self, token: &Token) -> Result<(), StorageError> {
            if self.flags.fail_create.load(Ordering::SeqCst) {
                return Err(injected());
            }
            self.inner.create_token(token).await
        }

        async fn find_token_by_hash(
            &self,
            hash: &SecretHash,
        ) -> Result<Option<Token>, StorageError> {
            self.inner.find_token_by_hash(hash).await
        }

        async fn delete_token_by_hash(&self, hash: &SecretHash) -> Result<bool, StorageError> {
            if self.flags.fail_delete.load(Ordering::SeqCst) {
                return Err(injected());
            }
            self.inner.delete_token_by_hash(hash).await
        }

        async fn delete_tokens_for_subject(
            &self,
            subject: &SubjectId,
        ) -> Result<u64, StorageError> {
            self.inner.delete_tokens_for_subject(subject).await
        }

        async fn delete_expired_tokens(&self, now: i64) -> Result<u64, StorageError> {
            self.inner.delete_expired_tokens(now).await
        }

        async fn update_token_last_used(&self, id: &TokenId, at: i64) -> Result<(), StorageError> {
            if self.flags.fail_touch.load(Ordering::SeqCst) {
                return Err(injected());
            }
            self.inner.update_token_last_used(id, at).await
        }
    }

    async fn service() -> (TokenService, Arc<SqliteStorage>) {
        let storage = Arc::new(SqliteStorage::in_memory().await.unwrap());
        let tokens = TokenService::new(storage.clone(), HOUR);
        (tokens, storage)
    }

    async fn flaky_service() -> (TokenService, SqliteStorage, Arc<FlakyFlags>) {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let flags = Arc::new(FlakyFlags::default());
        let store = FlakyStore {
            inner: storage.clone(),
            flags: flags.clone(),
        };
        (TokenService::new(Arc::new(store), HOUR), storage, flags)
    }

    #[tokio::test]
    async fn issue_then_validate_returns_subject() {
        let (tokens, _) = service().await;
        let subject = SubjectId::from_username("u1");

        let issued = tokens.issue(&subject, HOUR).await.unwrap();
        assert_eq!(issued.subject_id, subject);
        assert_eq!(tokens.validate(&issued.secret).await.unwrap(), subject);
    }

    #[tokio::test]
    async fn zero_ttl_is_rejected() {
        let (tokens, storage) = service().await;
        let err = tokens
            .issue(&SubjectId::from_username("u1"), Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidTtl));
        assert_eq!(storage.count_tokens().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn revoked_secret_stops_validating() {
        let (tokens, _) = service().await;
        let subject = SubjectId::from_username("u1");
        let issued = tokens
            .issue(&subject, Duration::from_secs(24 * 3600))
            .await
            .unwrap();

        assert_eq!(tokens.validate(&issued.secret).await.unwrap(), subject);
        assert!(tokens.revoke(&issued.secret).await.unwrap());

        let err = tokens.validate(&issued.secret).await.unwrap_err();
        assert!(err.is_unauthenticated());
    }

    #[tokio::test]
    async fn revoke_is_idempotent() {
        let (tokens, _) = service().await;
        let unknown = TokenSecret::from_presented("never-issued".to_string());
        assert!(!tokens.revoke(&unknown).await.unwrap());
        assert!(!tokens.revoke(&unknown).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_secret_is_unauthenticated() {
        let (tokens, _) = service().await;
        let err = tokens
            .validate(&TokenSecret::from_presented("garbage".to_string()))
            .await
            .unwrap_err();
        assert!(err.is_unauthenticated());
    }

    #[tokio::test]
    async fn expired_token_is_rejected_and_removed() {
        let (tokens, storage) = service().await;
        let secret = TokenSecret::generate().unwrap();
        let now = unix_millis();
        storage
            .create_token(&Token {
                id: TokenId::new(),
                subject_id: SubjectId::from_username("u1"),
                secret_hash: secret.hash(),
                created_at: now - 60_000,
                expires_at: now - 1_000,
                last_used_at: now - 60_000,
            })
            .await
            .unwrap();

        let err = tokens.validate(&secret).await.unwrap_err();
        assert!(err.is_unauthenticated());
        assert!(storage
            .find_token_by_hash(&secret.hash())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn validate_updates_last_used() {
        let (tokens, storage) = service().await;
        let issued = tokens
            .issue(&SubjectId::from_username("u1"), HOUR)
            .await
            .unwrap();
        let before = storage
            .find_token_by_hash(&issued.secret.hash())
            .await
            .unwrap()
            .unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        tokens.validate(&issued.secret).await.unwrap();

        let after = storage
            .find_token_by_hash(&issued.secret.hash())
            .await
            .unwrap()
            .unwrap();
        assert!(after.last_used_at > before.last_used_at);
    }

    #[tokio::test]
    async fn revoke_all_leaves_other_subjects() {
        let (tokens, _) = service().await;
        let alice = SubjectId::from_username("alice");
        let bob = SubjectId::from_username("bob");

        let a1 = tokens.issue(&alice, HOUR).await.unwrap();
        let a2 = tokens.issue(&alice, HOUR).await.unwrap();
        let b1 = tokens.issue(&bob, HOUR).await.unwrap();

        assert_eq!(tokens.revoke_all(&alice).await.unwrap(), 2);
        assert!(tokens.validate(&a1.secret).await.is_err());
        assert!(tokens.validate(&a2.secret).await.is_err());
        assert_eq!(tokens.validate(&b1.secret).await.unwrap(), bob);
    }

    #[tokio::test]
    async fn refresh_rotates_secret() {
        let (tokens, _) = service().await;
        let subject = SubjectId::from_username("u1");
        let old = tokens.issue(&subject, HOUR).await.unwrap();

        let new = tokens.refresh(&old.secret).await.unwrap();
        assert_ne!(new.secret.expose(), old.secret.expose());
        assert_eq!(tokens.validate(&new.secret).await.unwrap(), subject);
        assert!(tokens.validate(&old.secret).await.unwrap_err().is_unauthenticated());
    }

    #[tokio::test]
    async fn refresh_twice_with_same_secret_fails() {
        let (tokens, _) = service().await;
        let old = tokens
            .issue(&SubjectId::from_username("u1"), HOUR)
            .await
            .unwrap();

        tokens.refresh(&old.secret).await.unwrap();
        let err = tokens.refresh(&old.secret).await.unwrap_err();
        assert!(err.is_unauthenticated());
    }

    #[tokio::test]
    async fn refresh_of_expired_secret_fails() {
        let (tokens, storage) = service().await;
        let secret = TokenSecret::generate().unwrap();
        let now = unix_millis();
        storage
            .create_token(&Token {
                id: TokenId::new(),
                subject_id: SubjectId::from_username("u1"),
                secret_hash: secret.hash(),
                created_at: now - 10_000,
                expires_at: now - 1,
                last_used_at: now - 10_000,
            })
            .await
            .unwrap();

        assert!(tokens.refresh(&secret).await.unwrap_err().is_unauthenticated());
        assert_eq!(storage.count_tokens().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn refresh_with_failed_delete_still_invalidates_old() {
        let (tokens, storage, flags) = flaky_service().await;
        let subject = SubjectId::from_username("u1");
        let old = tokens.issue(&subject, HOUR).await.unwrap();

        flags.fail_delete.store(true, Ordering::SeqCst);
        let new = tokens.refresh(&old.secret).await.unwrap();

        assert_eq!(tokens.validate(&new.secret).await.unwrap(), subject);
        assert!(tokens.validate(&old.secret).await.unwrap_err().is_unauthenticated());
        assert_eq!(tokens.retired_len(), 1);

        // Once the store recovers the sweep finishes the job.
        flags.fail_delete.store(false, Ordering::SeqCst);
        assert_eq!(tokens.sweep_expired().await.unwrap(), 1);
        assert_eq!(tokens.retired_len(), 0);
        assert!(storage
            .find_token_by_hash(&old.secret.hash())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn last_used_failure_is_swallowed() {
        let (tokens, _, flags) = flaky_service().await;
        let subject = SubjectId::from_username("u1");
        let issued = tokens.issue(&subject, HOUR).await.unwrap();

        flags.fail_touch.store(true, Ordering::SeqCst);
        assert_eq!(tokens.validate(&issued.secret).await.unwrap(), subject);
    }

    #[tokio::test]
    async fn issue_storage_failure_propagates() {
        let (tokens, _, flags) = flaky_service().await;
        flags.fail_create.store(true, Ordering::SeqCst);

        let err = tokens
            .issue(&SubjectId::from_username("u1"), HOUR)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Storage(_)));
    }

    #[tokio::test]
    async fn concurrent_issues_are_distinct() {
        let (tokens, storage) = service().await;
        let tokens = Arc::new(tokens);
        let subject = SubjectId::from_username("u2");

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let tokens = tokens.clone();
                tokio::spawn(async move { tokens.issue(&subject, HOUR).await.unwrap() })
            })
            .collect();

        let mut secrets = HashSet::new();
        let mut hashes = HashSet::new();
        for handle in handles {
            let issued = handle.await.unwrap();
            hashes.insert(issued.secret.hash());
            secrets.insert(issued.secret.expose().to_string());
        }

        assert_eq!(secrets.len(), 20);
        assert_eq!(hashes.len(), 20);
        assert_eq!(storage.count_tokens().await.unwrap(), 20);
    }

    #[tokio::test]
    async fn sweep_removes_only_expired() {
        let (tokens, storage) = service().await;
        let subject = SubjectId::from_username("u1");
        let live = tokens.issue(&subject, HOUR).await.unwrap();

        let now = unix_millis();
        for i in 0..3 {
            storage
                .create_token(&Token {
                    id: TokenId::new(),
                    subject_id: subject,
                    secret_hash: SecretHash::of(&format!("stale-{}", i)),
                    created_at: now - 20_000,
                    expires_at: now - 10_000,
                    last_used_at: now - 20_000,
                })
                .await
                .unwrap();
        }

        assert_eq!(tokens.sweep_expired().await.unwrap(), 3);
        assert_eq!(tokens.sweep_expired().await.unwrap(), 0);
        assert_eq!(tokens.validate(&live.secret).await.unwrap(), subject);
    }

    #[tokio::test]
    async fn deadline_maps_to_timeout() {
        let result: AuthResult<()> = with_deadline(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(AuthError::Timeout(_))));
    }
}
