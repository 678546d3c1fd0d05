//! Rate limiting for wave-relay.
//!
//! Sliding-window limiters keyed by client address. Each key keeps the
//! instants of its admitted requests inside the trailing window; a request
//! is admitted while fewer than `limit` remain.
//!
//! ## Design Notes
//!
//! Limiter state is per-process and in-memory. Two instances run side by
//! side: `general` for every route and `auth` for credential endpoints.
//! Keys whose windows drain are removed by [`spawn_limiter_sweeper`].

use crate::config::LimitsConfig;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Which limiter rejected a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimiterKind {
    /// Applies to every route.
    General,
    /// Applies to credential endpoints.
    Auth,
}

/// Sliding-window limiter over string keys.
///
/// Admission for a single key is serialized by the map's entry lock.
pub struct SlidingWindowLimiter {
    kind: LimiterKind,
    limit: usize,
    window: Duration,
    windows: DashMap<String, VecDeque<Instant>>,
}

impl std::fmt::Debug for SlidingWindowLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlidingWindowLimiter")
            .field("kind", &self.kind)
            .field("limit", &self.limit)
            .field("window", &self.window)
            .field("keys", &self.windows.len())
            .finish()
    }
}

impl SlidingWindowLimiter {
    /// Create a limiter admitting `limit` requests per `window` per key.
    pub fn new(kind: LimiterKind, limit: u32, window: Duration) -> Self {
        Self {
            kind,
            limit: limit as usize,
            window,
            windows: DashMap::new(),
        }
    }

    /// Requests admitted per window.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Window length.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Check and record a request for `key` now.
    ///
    /// The clock is read while the key's entry is held, so the instants
    /// recorded for one key are always in order.
    pub fn check(&self, key: &str) -> Result<(), RateLimitError> {
        let mut stamps = self.windows.entry(key.to_string()).or_default();
        self.admit(&mut stamps, Instant::now())
    }

    /// Check and record a request for `key` at `now`.
    ///
    /// Rejected requests are not recorded.
    pub fn check_at(&self, key: &str, now: Instant) -> Result<(), RateLimitError> {
        let mut stamps = self.windows.entry(key.to_string()).or_default();
        self.admit(&mut stamps, now)
    }

    fn admit(&self, stamps: &mut VecDeque<Instant>, now: Instant) -> Result<(), RateLimitError> {
        prune(stamps, now, self.window);

        if stamps.len() >= self.limit {
            return Err(self.rejection());
        }

        stamps.push_back(now);
        Ok(())
    }

    /// Drop expired instants and forget keys with nothing left.
    ///
    /// Returns the number of keys removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    fn sweep_at(&self, now: Instant) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, stamps| {
            prune(stamps, now, self.window);
            !stamps.is_empty()
        });
        before.saturating_sub(self.windows.len())
    }

    /// Number of tracked keys (for metrics).
    pub fn key_count(&self) -> usize {
        self.windows.len()
    }

    fn rejection(&self) -> RateLimitError {
        match self.kind {
            LimiterKind::General => RateLimitError::GeneralLimitExceeded,
            LimiterKind::Auth => RateLimitError::AuthLimitExceeded,
        }
    }
}

/// Remove instants strictly older than `now - window`.
fn prune(stamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    let Some(cutoff) = now.checked_sub(window) else {
        return;
    };
    while stamps.front().is_some_and(|t| *t < cutoff) {
        stamps.pop_front();
    }
}

/// Rate limiters for the relay server.
#[derive(Debug, Clone)]
pub struct RateLimits {
    /// Applied to every route.
    pub general: Arc<SlidingWindowLimiter>,
    /// Applied additionally to register, login, refresh and logout.
    pub auth: Arc<SlidingWindowLimiter>,
}

impl RateLimits {
    /// Create rate limiters from configuration.
    ///
    /// Zero limits are rejected earlier by `Config::validate`.
    pub fn new(config: &LimitsConfig) -> Self {
        Self {
            general: Arc::new(SlidingWindowLimiter::new(
                LimiterKind::General,
                config.general_requests,
                Duration::from_secs(config.general_window_secs),
            )),
            auth: Arc::new(SlidingWindowLimiter::new(
                LimiterKind::Auth,
                config.auth_requests,
                Duration::from_secs(config.auth_window_secs),
            )),
        }
    }

    /// Sweep both limiters, returning the number of keys removed.
    pub fn sweep(&self) -> usize {
        self.general.sweep() + self.auth.sweep()
    }
}

/// Rate limit error types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitError {
    /// Too many requests from this client.
    GeneralLimitExceeded,
    /// Too many authentication attempts from this client.
    AuthLimitExceeded,
}

impl std::fmt::Display for RateLimitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GeneralLimitExceeded => {
                write!(f, "Too many requests, please try again later")
            }
            Self::AuthLimitExceeded => {
                write!(f, "Too many authentication attempts, please try again later")
            }
        }
    }
}

impl std::error::Error for RateLimitError {}

/// Spawn the background task that forgets idle limiter keys.
///
/// Runs until `cancel` fires. A zero interval is refused and the task
/// exits at once.
pub fn spawn_limiter_sweeper(
    limits: RateLimits,
    interval: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if interval.is_zero() {
            tracing::error!("Limiter sweeper not started: interval must be non-zero");
            return;
        }

        tracing::info!("Limiter sweeper started (interval: {}s)", interval.as_secs());

        let mut timer = tokio::time::interval(interval);
        // The first tick completes immediately.
        timer.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Limiter sweeper stopped");
                    break;
                }
                _ = timer.tick() => {
                    let removed = limits.sweep();
                    tracing::debug!(
                        removed,
                        general_keys = limits.general.key_count(),
                        auth_keys = limits.auth.key_count(),
                        "Limiter sweep"
                    );
                }
            }
        }
    })
}
