//! Credential endpoints: register, login, refresh, logout, logout-all.

use super::response::{ApiError, ApiResponse};
use crate::auth::{extract_bearer, AuthenticatedSubject};
use crate::server::WaveRelay;
use crate::storage::{AccountStore, NewAccount};
use crate::tokens::{with_deadline, IssuedToken};
use axum::{
    extract::rejection::JsonRejection,
    http::{HeaderMap, StatusCode},
    Extension, Json,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use wave_types::{SubjectId, TokenSecret};

const USERNAME_MIN: usize = 3;
const USERNAME_MAX: usize = 50;

/// Registration body. Key material is base64 and never interpreted.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    /// Login name, 3 to 50 characters.
    pub username: String,
    /// Client public key.
    pub public_key: String,
    /// Client private key, encrypted client-side.
    pub encrypted_private_key: String,
    /// Key-derivation salt.
    pub salt: String,
}

/// Login body.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// Login name.
    pub username: String,
}

/// Token issued to the client.
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    /// Raw bearer secret.
    pub access_token: String,
    /// Always `Bearer`.
    pub token_type: &'static str,
    /// Lifetime in seconds.
    pub expires_in: u64,
}

/// Logout result.
#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    /// Always `true`.
    pub logged_out: bool,
}

/// Logout-all result.
#[derive(Debug, Serialize)]
pub struct LogoutAllResponse {
    /// Always `true`.
    pub logged_out_all: bool,
    /// Tokens removed.
    pub revoked: u64,
}

fn token_response(relay: &WaveRelay, issued: IssuedToken) -> TokenResponse {
    TokenResponse {
        access_token: issued.secret.expose().to_string(),
        token_type: "Bearer",
        expires_in: relay.tokens().token_ttl().as_secs(),
    }
}

fn decode_field(name: &str, value: &str) -> Result<Vec<u8>, ApiError> {
    if value.is_empty() {
        return Err(ApiError::BadRequest(format!("{} is required", name)));
    }
    STANDARD
        .decode(value)
        .map_err(|_| ApiError::BadRequest(format!("{} must be base64", name)))
}

fn bearer(headers: &HeaderMap) -> Result<TokenSecret, ApiError> {
    extract_bearer(headers).ok_or_else(|| ApiError::unauthenticated("Missing authorization header"))
}

/// `POST /api/v1/auth/register`
pub async fn register(
    Extension(relay): Extension<Arc<WaveRelay>>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiResponse<TokenResponse>>), ApiError> {
    let Json(req) = payload?;

    let length = req.username.chars().count();
    if !(USERNAME_MIN..=USERNAME_MAX).contains(&length) {
        return Err(ApiError::BadRequest(format!(
            "username must be {} to {} characters",
            USERNAME_MIN, USERNAME_MAX
        )));
    }

    let account = NewAccount {
        subject_id: SubjectId::from_username(&req.username),
        public_key: decode_field("public_key", &req.public_key)?,
        encrypted_private_key: decode_field("encrypted_private_key", &req.encrypted_private_key)?,
        salt: decode_field("salt", &req.salt)?,
        username: req.username,
    };

    relay.storage().create_account(&account).await?;
    relay
        .metrics()
        .accounts_registered
        .fetch_add(1, Ordering::Relaxed);
    tracing::info!(subject = ?account.subject_id, "Registered account");

    let deadline = relay.config().auth.validate_timeout();
    let issued = with_deadline(deadline, relay.tokens().issue_session(&account.subject_id)).await?;
    relay.metrics().tokens_issued.fetch_add(1, Ordering::Relaxed);

    Ok((
        StatusCode::CREATED,
        ApiResponse::ok(token_response(&relay, issued)),
    ))
}

/// `POST /api/v1/auth/login`
///
/// Any registered username receives a token; there is no password or
/// proof of key possession.
pub async fn login(
    Extension(relay): Extension<Arc<WaveRelay>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<TokenResponse>>, ApiError> {
    let Json(req) = payload?;
    if req.username.is_empty() {
        return Err(ApiError::BadRequest("username is required".to_string()));
    }

    let account = relay
        .storage()
        .find_account_by_username(&req.username)
        .await?
        .ok_or_else(|| {
            tracing::debug!("Login for unknown username");
            ApiError::unauthenticated("Invalid credentials")
        })?;

    let deadline = relay.config().auth.validate_timeout();
    let issued = with_deadline(deadline, relay.tokens().issue_session(&account.subject_id)).await?;
    relay.metrics().tokens_issued.fetch_add(1, Ordering::Relaxed);
    tracing::info!(subject = ?account.subject_id, "Login");

    Ok(ApiResponse::ok(token_response(&relay, issued)))
}

/// `POST /api/v1/auth/refresh`
pub async fn refresh(
    Extension(relay): Extension<Arc<WaveRelay>>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<TokenResponse>>, ApiError> {
    let secret = bearer(&headers)?;

    let deadline = relay.config().auth.validate_timeout();
    let issued = with_deadline(deadline, relay.tokens().refresh(&secret)).await?;
    relay
        .metrics()
        .tokens_refreshed
        .fetch_add(1, Ordering::Relaxed);

    Ok(ApiResponse::ok(token_response(&relay, issued)))
}

/// `POST /api/v1/auth/logout`
///
/// Idempotent: an unknown or already revoked secret still succeeds.
pub async fn logout(
    Extension(relay): Extension<Arc<WaveRelay>>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<LogoutResponse>>, ApiError> {
    let secret = bearer(&headers)?;

    let deadline = relay.config().auth.validate_timeout();
    if with_deadline(deadline, relay.tokens().revoke(&secret)).await? {
        relay.metrics().tokens_revoked.fetch_add(1, Ordering::Relaxed);
    }

    Ok(ApiResponse::ok(LogoutResponse { logged_out: true }))
}

/// `POST /api/v1/auth/logout-all`
pub async fn logout_all(
    Extension(relay): Extension<Arc<WaveRelay>>,
    Extension(AuthenticatedSubject(subject)): Extension<AuthenticatedSubject>,
) -> Result<Json<ApiResponse<LogoutAllResponse>>, ApiError> {
    let deadline = relay.config().auth.validate_timeout();
    let revoked = with_deadline(deadline, relay.tokens().revoke_all(&subject)).await?;
    relay
        .metrics()
        .tokens_revoked
        .fetch_add(revoked, Ordering::Relaxed);

    Ok(ApiResponse::ok(LogoutAllResponse {
        logged_out_all: true,
        revoked,
    }))
}
