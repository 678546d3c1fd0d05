//! Main WaveRelay server state.
//!
//! WaveRelay owns storage, the token service, the rate limiters and the
//! metrics counters. One instance is shared by every request handler.

use crate::config::Config;
use crate::error::Result;
use crate::limits::RateLimits;
use crate::storage::{SqliteStorage, TokenStore};
use crate::tokens::TokenService;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

/// Operational metrics for monitoring relay activity.
///
/// All counters are monotonically increasing (reset only on restart).
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Total HTTP requests admitted by the general limiter.
    pub requests_total: AtomicU64,
    /// Accounts registered since startup.
    pub accounts_registered: AtomicU64,
    /// Tokens issued by register or login.
    pub tokens_issued: AtomicU64,
    /// Tokens exchanged by refresh.
    pub tokens_refreshed: AtomicU64,
    /// Tokens removed by logout, logout-all or account deletion.
    pub tokens_revoked: AtomicU64,
    /// Requests rejected as unauthenticated.
    pub auth_failures: AtomicU64,
    /// Total rate limit rejections (general + auth).
    pub rate_limit_hits: AtomicU64,
    /// Requests that ended in an internal error.
    pub errors_total: AtomicU64,
}

/// Main relay server.
pub struct WaveRelay {
    config: Config,
    storage: Arc<SqliteStorage>,
    tokens: Arc<TokenService>,
    /// Sliding-window limiters for general and auth traffic.
    rate_limits: RateLimits,
    metrics: RelayMetrics,
}

impl std::fmt::Debug for WaveRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaveRelay")
            .field("config", &self.config)
            .field("tokens", &self.tokens)
            .field("rate_limits", &self.rate_limits)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

impl WaveRelay {
    /// Create a new WaveRelay with the given config and storage.
    pub fn new(config: Config, storage: SqliteStorage) -> Self {
        let storage = Arc::new(storage);
        Self::with_token_store(config, storage.clone(), storage)
    }

    /// Create a WaveRelay whose token service runs over `token_store`
    /// instead of `storage`.
    pub fn with_token_store(
        config: Config,
        storage: Arc<SqliteStorage>,
        token_store: Arc<dyn TokenStore>,
    ) -> Self {
        let tokens = Arc::new(TokenService::new(token_store, config.auth.token_ttl()));
        let rate_limits = RateLimits::new(&config.limits);
        Self {
            config,
            storage,
            tokens,
            rate_limits,
            metrics: RelayMetrics::default(),
        }
    }

    /// Validate `config` and open the database it names.
    pub async fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let storage = SqliteStorage::new(&config.storage.database).await?;
        Ok(Self::new(config, storage))
    }

    /// Get the relay configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get access to the storage layer.
    pub fn storage(&self) -> &SqliteStorage {
        &self.storage
    }

    /// Get a clone of the storage Arc for background tasks.
    pub fn storage_arc(&self) -> Arc<SqliteStorage> {
        self.storage.clone()
    }

    /// Get access to the token service.
    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    /// Get a clone of the token service Arc for background tasks.
    pub fn tokens_arc(&self) -> Arc<TokenService> {
        self.tokens.clone()
    }

    /// Get access to the rate limiters.
    pub fn rate_limits(&self) -> &RateLimits {
        &self.rate_limits
    }

    /// Get access to the operational metrics.
    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }
}
