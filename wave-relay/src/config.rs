//! Configuration loading for wave-relay.
//!
//! Configuration is loaded from a TOML file (default: `relay.toml`).

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for wave-relay.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Token lifetime configuration.
    #[serde(default)]
    pub auth: AuthConfig,
    /// Rate limiting configuration.
    #[serde(default)]
    pub limits: LimitsConfig,
    /// HTTP endpoints configuration.
    #[serde(default)]
    pub http: HttpConfig,
    /// Expired-token reaper configuration.
    #[serde(default)]
    pub cleanup: CleanupConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the HTTP listener (default: 0.0.0.0:8080).
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_database_path")]
    pub database: PathBuf,
}

/// Token lifetime configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Session token lifetime in seconds (default: 24 hours).
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,
    /// Refresh lifetime in seconds (default: 30 days).
    /// Upper bound for `token_ttl_secs`.
    #[serde(default = "default_refresh_ttl")]
    pub refresh_ttl_secs: u64,
    /// Deadline for a token validation on the request path (default: 5).
    #[serde(default = "default_validate_timeout")]
    pub validate_timeout_secs: u64,
    /// Deadline for the detached last-active update (default: 5).
    #[serde(default = "default_activity_timeout")]
    pub activity_timeout_secs: u64,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Requests admitted per client per window on all routes (default: 100).
    #[serde(default = "default_general_requests")]
    pub general_requests: u32,
    /// Window for the general limiter in seconds (default: 60).
    #[serde(default = "default_general_window")]
    pub general_window_secs: u64,
    /// Requests admitted per client per window on auth routes (default: 20).
    #[serde(default = "default_auth_requests")]
    pub auth_requests: u32,
    /// Window for the auth limiter in seconds (default: 300).
    #[serde(default = "default_auth_window")]
    pub auth_window_secs: u64,
    /// How often idle limiter keys are swept, in seconds (default: 300).
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

/// HTTP endpoints configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Enable metrics endpoint (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

/// Expired-token reaper configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CleanupConfig {
    /// Sweep interval in seconds (default: 3600 = 1 hour).
    #[serde(default = "default_cleanup_interval")]
    pub interval_secs: u64,
    /// Enable the reaper (default: true).
    #[serde(default = "default_cleanup_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_database_path() -> PathBuf {
    PathBuf::from("wave.db")
}

fn default_token_ttl() -> u64 {
    24 * 60 * 60 // 24 hours
}

fn default_refresh_ttl() -> u64 {
    30 * 24 * 60 * 60 // 30 days
}

fn default_validate_timeout() -> u64 {
    5
}

fn default_activity_timeout() -> u64 {
    5
}

fn default_general_requests() -> u32 {
    100
}

fn default_general_window() -> u64 {
    60
}

fn default_auth_requests() -> u32 {
    20
}

fn default_auth_window() -> u64 {
    5 * 60
}

fn default_sweep_interval() -> u64 {
    5 * 60
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_cleanup_interval() -> u64 {
    3600 // 1 hour
}

fn default_cleanup_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database_path(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_ttl_secs: default_token_ttl(),
            refresh_ttl_secs: default_refresh_ttl(),
            validate_timeout_secs: default_validate_timeout(),
            activity_timeout_secs: default_activity_timeout(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            general_requests: default_general_requests(),
            general_window_secs: default_general_window(),
            auth_requests: default_auth_requests(),
            auth_window_secs: default_auth_window(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_cleanup_interval(),
            enabled: default_cleanup_enabled(),
        }
    }
}

impl AuthConfig {
    /// Session token lifetime.
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }

    /// Deadline for token validation on the request path.
    pub fn validate_timeout(&self) -> Duration {
        Duration::from_secs(self.validate_timeout_secs)
    }

    /// Deadline for the detached last-active update.
    pub fn activity_timeout(&self) -> Duration {
        Duration::from_secs(self.activity_timeout_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks: [(&'static str, bool, &'static str); 9] = [
            ("auth.token_ttl_secs", self.auth.token_ttl_secs > 0, "must be > 0"),
            (
                "auth.refresh_ttl_secs",
                self.auth.refresh_ttl_secs >= self.auth.token_ttl_secs,
                "must be >= auth.token_ttl_secs",
            ),
            (
                "auth.validate_timeout_secs",
                self.auth.validate_timeout_secs > 0,
                "must be > 0",
            ),
            ("limits.general_requests", self.limits.general_requests > 0, "must be > 0"),
            ("limits.general_window_secs", self.limits.general_window_secs > 0, "must be > 0"),
            ("limits.auth_requests", self.limits.auth_requests > 0, "must be > 0"),
            ("limits.auth_window_secs", self.limits.auth_window_secs > 0, "must be > 0"),
            (
                "limits.sweep_interval_secs",
                self.limits.sweep_interval_secs > 0,
                "must be > 0",
            ),
            ("cleanup.interval_secs", self.cleanup.interval_secs > 0, "must be > 0"),
        ];

        match checks.iter().find(|(_, ok, _)| !*ok) {
            Some(&(field, _, reason)) => Err(ConfigError::Invalid { field, reason }),
            None => Ok(()),
        }
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// A value is out of range.
    #[error("invalid config value {field}: {reason}")]
    Invalid {
        /// Dotted path of the offending field.
        field: &'static str,
        /// What the constraint is.
        reason: &'static str,
    },
}
