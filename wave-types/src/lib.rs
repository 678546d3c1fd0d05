//! # wave-types
//!
//! Identity and credential types for the Wave zero-knowledge relay.
//!
//! - [`SubjectId`], [`TokenId`] - Identity types
//! - [`TokenSecret`], [`SecretHash`] - Bearer credentials and their stored form
//! - [`TypesError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod ids;
mod secret;

pub use error::TypesError;
pub use ids::{SubjectId, TokenId};
pub use secret::{SecretHash, TokenSecret, SECRET_BYTES};
