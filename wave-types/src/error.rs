//! Error types for wave-types.

use thiserror::Error;

/// Errors produced when parsing identity or credential values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypesError {
    /// Value was not valid hex
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    /// Value had the wrong byte length
    #[error("invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength {
        /// Required length in bytes.
        expected: usize,
        /// Length that was supplied.
        actual: usize,
    },

    /// The OS random source failed
    #[error("random source unavailable: {0}")]
    Random(String),
}
