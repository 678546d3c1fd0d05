//! Error types for wave-relay.

use std::time::Duration;

/// Error raised while bringing the relay up.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Storage layer errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A unique constraint was violated.
    #[error("{entity} already exists")]
    Conflict {
        /// What kind of record collided.
        entity: &'static str,
    },

    /// A stored row could not be decoded.
    #[error("corrupt row in {table}: {reason}")]
    CorruptRow {
        /// Table the row came from.
        table: &'static str,
        /// What was wrong with it.
        reason: String,
    },
}

/// Token lifecycle errors.
///
/// Every variant is reported to callers as unauthenticated or internal;
/// the distinctions exist for logging.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Credential is missing, unknown, expired, or revoked.
    #[error("unauthenticated: {reason}")]
    Unauthenticated {
        /// Internal reason, never sent to the caller.
        reason: &'static str,
    },

    /// A token was requested with a zero lifetime.
    #[error("token lifetime must be positive")]
    InvalidTtl,

    /// The backing store did not answer within the deadline.
    #[error("token store timed out after {0:?}")]
    Timeout(Duration),

    /// Secret generation failed.
    #[error("secret generation failed: {0}")]
    Secret(#[from] wave_types::TypesError),

    /// Persistence failure underneath a token operation.
    #[error("token store failure: {0}")]
    Storage(#[from] StorageError),
}

impl AuthError {
    /// Shorthand for an unauthenticated outcome.
    pub fn unauthenticated(reason: &'static str) -> Self {
        Self::Unauthenticated { reason }
    }

    /// True when the error reflects the credential rather than the infrastructure.
    pub fn is_unauthenticated(&self) -> bool {
        matches!(self, Self::Unauthenticated { .. })
    }
}

/// Result type alias for relay startup.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Result type alias for token operations.
pub type AuthResult<T> = std::result::Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_error_display() {
        assert_eq!(
            AuthError::unauthenticated("expired").to_string(),
            "unauthenticated: expired"
        );
        assert_eq!(
            AuthError::Timeout(Duration::from_secs(5)).to_string(),
            "token store timed out after 5s"
        );
    }

    #[test]
    fn storage_errors_are_not_unauthenticated() {
        let err = AuthError::from(StorageError::Conflict { entity: "token" });
        assert!(!err.is_unauthenticated());
        assert!(AuthError::unauthenticated("unknown").is_unauthenticated());
    }

    #[test]
    fn conflict_display() {
        let err = StorageError::Conflict { entity: "account" };
        assert_eq!(err.to_string(), "account already exists");
    }
}
