//! Opaque bearer secrets and their one-way hashes.
//!
//! A [`TokenSecret`] is handed to the client exactly once at issuance; only
//! its [`SecretHash`] is ever persisted. SHA-256 is sufficient here: the
//! secret carries 256 bits of entropy, so it can be stolen but not guessed.

use crate::TypesError;
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::Zeroizing;

/// Number of random bytes in a freshly issued secret.
pub const SECRET_BYTES: usize = 32;

/// A raw bearer secret, hex-encoded.
///
/// The backing buffer is zeroed on drop and `Debug` never prints it.
#[derive(Clone)]
pub struct TokenSecret(Zeroizing<String>);

impl TokenSecret {
    /// Generate a new secret from the OS random source.
    ///
    /// Produces [`SECRET_BYTES`] random bytes rendered as 64 hex characters.
    pub fn generate() -> Result<Self, TypesError> {
        let mut bytes = Zeroizing::new([0u8; SECRET_BYTES]);
        getrandom::getrandom(&mut *bytes).map_err(|e| TypesError::Random(e.to_string()))?;
        Ok(Self(Zeroizing::new(hex::encode(&*bytes))))
    }

    /// Wrap a secret presented by a client.
    ///
    /// No format check is made; an unknown value simply fails lookup.
    pub fn from_presented(secret: String) -> Self {
        Self(Zeroizing::new(secret))
    }

    /// The raw secret, for the single hand-off to the client.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Compute the storage hash of this secret.
    pub fn hash(&self) -> SecretHash {
        SecretHash::of(self.expose())
    }
}

impl fmt::Debug for TokenSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TokenSecret(<redacted>)")
    }
}

/// SHA-256 of a [`TokenSecret`]; the only form that reaches storage.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SecretHash([u8; 32]);

impl SecretHash {
    /// Hash a raw secret string.
    pub fn of(secret: &str) -> Self {
        let digest = Sha256::digest(secret.as_bytes());
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    /// Create a SecretHash from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() == 32 {
            let mut arr = [0u8; 32];
            arr.copy_from_slice(bytes);
            Some(Self(arr))
        } else {
            None
        }
    }

    /// Get the raw bytes of this hash.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// First eight hex characters, for log correlation.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for SecretHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for SecretHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretHash({})", self.short())
    }
}
