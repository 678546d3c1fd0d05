//! SQLite storage backend for wave-relay.

use super::{unix_millis, Account, AccountStore, NewAccount, Token, TokenStore};
use crate::error::StorageError;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use wave_types::{SecretHash, SubjectId, TokenId};

/// SQLite-based token and account storage.
///
/// Uses WAL mode for concurrent reads/writes.
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl std::fmt::Debug for SqliteStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStorage")
            .field("connections", &self.pool.size())
            .finish()
    }
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path`.
    pub async fn new(path: &Path) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Create an in-memory SQLite storage (for testing).
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(":memory:")?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        // A single connection: each in-memory connection is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tokens (
                token_id BLOB PRIMARY KEY,
                subject_id BLOB NOT NULL,
                secret_hash BLOB NOT NULL UNIQUE,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                last_used_at INTEGER NOT NULL,
                CHECK (expires_at > created_at)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                subject_id BLOB PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                public_key BLOB NOT NULL,
                encrypted_private_key BLOB NOT NULL,
                salt BLOB NOT NULL,
                created_at INTEGER NOT NULL,
                last_active_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tokens_subject ON tokens(subject_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tokens_expires ON tokens(expires_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Count stored tokens (for metrics).
    pub async fn count_tokens(&self) -> Result<u64, StorageError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tokens")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    /// Count registered accounts (for metrics).
    pub async fn count_accounts(&self) -> Result<u64, StorageError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM accounts")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}

/// Map unique-constraint violations to `Conflict`.
fn conflict_or(entity: &'static str, err: sqlx::Error) -> StorageError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => StorageError::Conflict { entity },
        _ => StorageError::Database(err),
    }
}

#[async_trait]
impl TokenStore for SqliteStorage {
    async fn create_token(&self, token: &Token) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO tokens (token_id, subject_id, secret_hash, created_at, expires_at, last_used_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(token.id.as_bytes())
        .bind(token.subject_id.as_bytes().as_slice())
        .bind(token.secret_hash.as_bytes().as_slice())
        .bind(token.created_at)
        .bind(token.expires_at)
        .bind(token.last_used_at)
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_or("token", e))?;

        Ok(())
    }

    async fn find_token_by_hash(&self, hash: &SecretHash) -> Result<Option<Token>, StorageError> {
        let row = sqlx::query_as::<_, TokenRow>(
            r#"
            SELECT token_id, subject_id, secret_hash, created_at, expires_at, last_used_at
            FROM tokens
            WHERE secret_hash = ?1
            "#,
        )
        .bind(hash.as_bytes().as_slice())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Token::try_from).transpose()
    }

    async fn delete_token_by_hash(&self, hash: &SecretHash) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM tokens WHERE secret_hash = ?1")
            .bind(hash.as_bytes().as_slice())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_tokens_for_subject(&self, subject: &SubjectId) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM tokens WHERE subject_id = ?1")
            .bind(subject.as_bytes().as_slice())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn delete_expired_tokens(&self, now: i64) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM tokens WHERE expires_at < ?1")
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn update_token_last_used(&self, id: &TokenId, at: i64) -> Result<(), StorageError> {
        sqlx::query("UPDATE tokens SET last_used_at = ?1 WHERE token_id = ?2")
            .bind(at)
            .bind(id.as_bytes())
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl AccountStore for SqliteStorage {
    async fn create_account(&self, account: &NewAccount) -> Result<(), StorageError> {
        let now = unix_millis();

        sqlx::query(
            r#"
            INSERT INTO accounts (subject_id, username, public_key, encrypted_private_key, salt, created_at, last_active_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
            "#,
        )
        .bind(account.subject_id.as_bytes().as_slice())
        .bind(&account.username)
        .bind(&account.public_key)
        .bind(&account.encrypted_private_key)
        .bind(&account.salt)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_or("account", e))?;

        Ok(())
    }

    async fn find_account_by_username(
        &self,
        username: &str,
    ) -> Result<Option<Account>, StorageError> {
        let row = sqlx::query_as::<_, AccountRow>(
            r#"
            SELECT subject_id, username, public_key, encrypted_private_key, salt, created_at, last_active_at
            FROM accounts
            WHERE username = ?1
            "#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Account::try_from).transpose()
    }

    async fn find_account(&self, subject: &SubjectId) -> Result<Option<Account>, StorageError> {
        let row = sqlx::query_as::<_, AccountRow>(
            r#"
            SELECT subject_id, username, public_key, encrypted_private_key, salt, created_at, last_active_at
            FROM accounts
            WHERE subject_id = ?1
            "#,
        )
        .bind(subject.as_bytes().as_slice())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Account::try_from).transpose()
    }

    async fn touch_account(&self, subject: &SubjectId, at: i64) -> Result<(), StorageError> {
        sqlx::query("UPDATE accounts SET last_active_at = ?1 WHERE subject_id = ?2")
            .bind(at)
            .bind(subject.as_bytes().as_slice())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn delete_account(&self, subject: &SubjectId) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM accounts WHERE subject_id = ?1")
            .bind(subject.as_bytes().as_slice())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// Internal row type for token queries.
#[derive(sqlx::FromRow)]
struct TokenRow {
    token_id: Vec<u8>,
    subject_id: Vec<u8>,
    secret_hash: Vec<u8>,
    created_at: i64,
    expires_at: i64,
    last_used_at: i64,
}

impl TryFrom<TokenRow> for Token {
    type Error = StorageError;

    fn try_from(row: TokenRow) -> Result<Self, Self::Error> {
        let corrupt = |reason: &str| StorageError::CorruptRow {
            table: "tokens",
            reason: reason.to_string(),
        };

        Ok(Token {
            id: TokenId::from_bytes(&row.token_id).ok_or_else(|| corrupt("invalid token_id"))?,
            subject_id: SubjectId::from_bytes(&row.subject_id)
                .ok_or_else(|| corrupt("invalid subject_id"))?,
            secret_hash: SecretHash::from_bytes(&row.secret_hash)
                .ok_or_else(|| corrupt("invalid secret_hash"))?,
            created_at: row.created_at,
            expires_at: row.expires_at,
            last_used_at: row.last_used_at,
        })
    }
}

/// Internal row type for account queries.
#[derive(sqlx::FromRow)]
struct AccountRow {
    subject_id: Vec<u8>,
    username: String,
    public_key: Vec<u8>,
    encrypted_private_key: Vec<u8>,
    salt: Vec<u8>,
    created_at: i64,
    last_active_at: i64,
}

impl TryFrom<AccountRow> for Account {
    type Error = StorageError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        Ok(Account {
            subject_id: SubjectId::from_bytes(&row.subject_id).ok_or_else(|| {
                StorageError::CorruptRow {
                    table: "accounts",
                    reason: "invalid subject_id".to_string(),
                }
            })?,
            username: row.username,
            public_key: row.public_key,
            encrypted_private_key: row.encrypted_private_key,
            salt: row.salt,
            created_at: row.created_at,
            last_active_at: row.last_active_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_token(subject: &SubjectId, secret: &str, expires_in_ms: i64) -> Token {
        let now = unix_millis();
        Token {
            id: TokenId::new(),
            subject_id: *subject,
            secret_hash: SecretHash::of(secret),
            created_at: now,
            expires_at: now + expires_in_ms,
            last_used_at: now,
        }
    }

    fn make_account(username: &str) -> NewAccount {
        NewAccount {
            username: username.to_string(),
            subject_id: SubjectId::from_username(username),
            public_key: vec![1u8; 32],
            encrypted_private_key: vec![2u8; 64],
            salt: vec![3u8; 16],
        }
    }

    #[tokio::test]
    async fn create_and_find_token() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let subject = SubjectId::from_username("alice");
        let token = make_token(&subject, "secret-a", 60_000);

        storage.create_token(&token).await.unwrap();

        let found = storage
            .find_token_by_hash(&SecretHash::of("secret-a"))
            .await
            .unwrap();
        assert_eq!(found, Some(token));
    }

    #[tokio::test]
    async fn find_unknown_hash_is_none() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let found = storage
            .find_token_by_hash(&SecretHash::of("nope"))
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn duplicate_hash_is_conflict() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let subject = SubjectId::from_username("alice");

        storage
            .create_token(&make_token(&subject, "same", 60_000))
            .await
            .unwrap();
        let err = storage
            .create_token(&make_token(&subject, "same", 60_000))
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::Conflict { entity: "token" }));
    }

    #[tokio::test]
    async fn expiry_before_creation_is_rejected() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let mut token = make_token(&SubjectId::from_username("alice"), "bad", 0);
        token.expires_at = token.created_at - 1;

        assert!(storage.create_token(&token).await.is_err());
    }

    #[tokio::test]
    async fn delete_by_hash_reports_removal() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let subject = SubjectId::from_username("alice");
        storage
            .create_token(&make_token(&subject, "gone", 60_000))
            .await
            .unwrap();

        let hash = SecretHash::of("gone");
        assert!(storage.delete_token_by_hash(&hash).await.unwrap());
        assert!(!storage.delete_token_by_hash(&hash).await.unwrap());
        assert!(storage.find_token_by_hash(&hash).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_for_subject_leaves_others() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let alice = SubjectId::from_username("alice");
        let bob = SubjectId::from_username("bob");

        for i in 0..3 {
            storage
                .create_token(&make_token(&alice, &format!("alice-{}", i), 60_000))
                .await
                .unwrap();
        }
        storage
            .create_token(&make_token(&bob, "bob-0", 60_000))
            .await
            .unwrap();

        let deleted = storage.delete_tokens_for_subject(&alice).await.unwrap();
        assert_eq!(deleted, 3);
        assert_eq!(storage.count_tokens().await.unwrap(), 1);
        assert!(storage
            .find_token_by_hash(&SecretHash::of("bob-0"))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn delete_expired_removes_only_expired() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let subject = SubjectId::from_username("alice");

        let mut stale = make_token(&subject, "stale", 1_000);
        stale.created_at -= 10_000;
        stale.expires_at = stale.created_at + 1_000;
        storage.create_token(&stale).await.unwrap();
        storage
            .create_token(&make_token(&subject, "fresh", 60_000))
            .await
            .unwrap();

        let deleted = storage.delete_expired_tokens(unix_millis()).await.unwrap();
        assert_eq!(deleted, 1);
        assert!(storage
            .find_token_by_hash(&SecretHash::of("stale"))
            .await
            .unwrap()
            .is_none());
        assert!(storage
            .find_token_by_hash(&SecretHash::of("fresh"))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn update_last_used() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let token = make_token(&SubjectId::from_username("alice"), "used", 60_000);
        storage.create_token(&token).await.unwrap();

        let later = token.last_used_at + 5_000;
        storage.update_token_last_used(&token.id, later).await.unwrap();

        let found = storage
            .find_token_by_hash(&token.secret_hash)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.last_used_at, later);
    }

    #[tokio::test]
    async fn account_lifecycle() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let new = make_account("carol");
        storage.create_account(&new).await.unwrap();

        let by_name = storage
            .find_account_by_username("carol")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_name.subject_id, new.subject_id);
        assert_eq!(by_name.encrypted_private_key, new.encrypted_private_key);
        assert_eq!(by_name.created_at, by_name.last_active_at);

        storage
            .touch_account(&new.subject_id, by_name.last_active_at + 1_000)
            .await
            .unwrap();
        let by_id = storage.find_account(&new.subject_id).await.unwrap().unwrap();
        assert_eq!(by_id.last_active_at, by_name.last_active_at + 1_000);

        assert!(storage.delete_account(&new.subject_id).await.unwrap());
        assert!(!storage.delete_account(&new.subject_id).await.unwrap());
        assert!(storage.find_account(&new.subject_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_username_is_conflict() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        storage.create_account(&make_account("dave")).await.unwrap();

        let err = storage.create_account(&make_account("dave")).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict { entity: "account" }));
        assert_eq!(storage.count_accounts().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn on_disk_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wave.db");
        let subject = SubjectId::from_username("erin");

        {
            let storage = SqliteStorage::new(&path).await.unwrap();
            storage
                .create_token(&make_token(&subject, "persisted", 60_000))
                .await
                .unwrap();
        }

        let reopened = SqliteStorage::new(&path).await.unwrap();
        let found = reopened
            .find_token_by_hash(&SecretHash::of("persisted"))
            .await
            .unwrap();
        assert_eq!(found.map(|t| t.subject_id), Some(subject));
    }
}
