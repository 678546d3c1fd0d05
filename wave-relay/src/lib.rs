//! # wave-relay
//!
//! Zero-knowledge relay backend for Wave.
//!
//! This crate owns the session lifecycle of the relay:
//! - Issues opaque bearer tokens and stores only their SHA-256 hashes
//! - Resolves tokens to subjects on protected routes
//! - Rotates, revokes and reaps tokens
//! - Bounds per-client request rates with sliding windows
//!
//! The relay never sees plaintext or usable key material. Clients register
//! with key material they encrypted themselves.
//!
//! ## Architecture
//!
//! ```text
//!  client ──HTTP──► general limiter ──► auth limiter ──► credential handlers
//!                         │                                   │
//!                         └──► auth gate ──► account handlers │
//!                                   │                         │
//!                             ┌─────┴─────────────────────────┴──┐
//!                             │          TokenService            │
//!                             │  ┌────────────────────────────┐  │
//!                             │  │ SQLite (tokens, accounts)  │  │
//!                             │  └────────────────────────────┘  │
//!                             └──────────────▲───────────────────┘
//!                                            │
//!                                          reaper
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auth;
pub mod config;
pub mod error;
pub mod http;
pub mod limits;
pub mod reaper;
pub mod server;
pub mod storage;
pub mod tokens;
