//! Account endpoints behind the auth gate.

use super::response::{ApiError, ApiResponse};
use crate::auth::AuthenticatedSubject;
use crate::server::WaveRelay;
use crate::storage::{Account, AccountStore};
use crate::tokens::with_deadline;
use axum::{extract::Query, Extension, Json};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use wave_types::SubjectId;

/// Caller identity.
#[derive(Debug, Serialize)]
pub struct MeResponse {
    /// Hex subject id.
    pub subject_id: SubjectId,
    /// Login name.
    pub username: String,
    /// Registration time (unix millis).
    pub created_at: i64,
    /// Last authenticated request (unix millis).
    pub last_active_at: i64,
}

/// Encrypted key material for the caller.
#[derive(Debug, Serialize)]
pub struct PrivateKeyResponse {
    /// Base64 encrypted private key.
    pub encrypted_private_key: String,
    /// Base64 salt.
    pub salt: String,
}

/// Public key lookup result.
#[derive(Debug, Serialize)]
pub struct PublicKeyResponse {
    /// Owner of the key.
    pub username: String,
    /// Base64 public key.
    pub public_key: String,
}

/// Account deletion result.
#[derive(Debug, Serialize)]
pub struct DeleteAccountResponse {
    /// Always `true`.
    pub deleted: bool,
    /// Tokens removed along with the account.
    pub revoked: u64,
}

/// Optional `?username=` on the public key lookup.
#[derive(Debug, Deserialize)]
pub struct PublicKeyQuery {
    /// Whose key to return; defaults to the caller.
    pub username: Option<String>,
}

async fn load_account(relay: &WaveRelay, subject: &SubjectId) -> Result<Account, ApiError> {
    relay
        .storage()
        .find_account(subject)
        .await?
        .ok_or_else(|| ApiError::NotFound("Account not found".to_string()))
}

/// `GET /api/v1/me`
pub async fn me(
    Extension(relay): Extension<Arc<WaveRelay>>,
    Extension(AuthenticatedSubject(subject)): Extension<AuthenticatedSubject>,
) -> Result<Json<ApiResponse<MeResponse>>, ApiError> {
    let account = load_account(&relay, &subject).await?;
    Ok(ApiResponse::ok(MeResponse {
        subject_id: account.subject_id,
        username: account.username,
        created_at: account.created_at,
        last_active_at: account.last_active_at,
    }))
}

/// `GET /api/v1/keys/private`
pub async fn private_key(
    Extension(relay): Extension<Arc<WaveRelay>>,
    Extension(AuthenticatedSubject(subject)): Extension<AuthenticatedSubject>,
) -> Result<Json<ApiResponse<PrivateKeyResponse>>, ApiError> {
    let account = load_account(&relay, &subject).await?;
    Ok(ApiResponse::ok(PrivateKeyResponse {
        encrypted_private_key: STANDARD.encode(&account.encrypted_private_key),
        salt: STANDARD.encode(&account.salt),
    }))
}

/// `GET /api/v1/keys/public`
pub async fn public_key(
    Extension(relay): Extension<Arc<WaveRelay>>,
    Extension(AuthenticatedSubject(subject)): Extension<AuthenticatedSubject>,
    Query(query): Query<PublicKeyQuery>,
) -> Result<Json<ApiResponse<PublicKeyResponse>>, ApiError> {
    let account = match query.username.filter(|u| !u.is_empty()) {
        Some(username) => relay
            .storage()
            .find_account_by_username(&username)
            .await?
            .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?,
        None => load_account(&relay, &subject).await?,
    };

    Ok(ApiResponse::ok(PublicKeyResponse {
        public_key: STANDARD.encode(&account.public_key),
        username: account.username,
    }))
}

/// `DELETE /api/v1/account`
///
/// Revokes every token first so no credential outlives the account.
pub async fn delete_account(
    Extension(relay): Extension<Arc<WaveRelay>>,
    Extension(AuthenticatedSubject(subject)): Extension<AuthenticatedSubject>,
) -> Result<Json<ApiResponse<DeleteAccountResponse>>, ApiError> {
    let deadline = relay.config().auth.validate_timeout();
    let revoked = with_deadline(deadline, relay.tokens().revoke_all(&subject)).await?;
    relay
        .metrics()
        .tokens_revoked
        .fetch_add(revoked, Ordering::Relaxed);

    if !relay.storage().delete_account(&subject).await? {
        return Err(ApiError::NotFound("Account not found".to_string()));
    }
    tracing::info!(subject = ?subject, revoked, "Deleted account");

    Ok(ApiResponse::ok(DeleteAccountResponse {
        deleted: true,
        revoked,
    }))
}
