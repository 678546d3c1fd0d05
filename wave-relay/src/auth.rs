//! Authentication gate for protected routes.
//!
//! Extracts the bearer credential, resolves it through the token service
//! under a deadline, and injects the subject into request extensions.

use crate::error::AuthError;
use crate::http::response::{ApiError, INVALID_CREDENTIALS};
use crate::server::WaveRelay;
use crate::storage::{unix_millis, AccountStore};
use crate::tokens::with_deadline;
use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use std::time::Duration;
use wave_types::{SubjectId, TokenSecret};

/// Subject resolved by [`require_auth`], available to handlers as an
/// `Extension`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedSubject(pub SubjectId);

/// Read the credential from the `Authorization` header.
///
/// Accepts `Bearer <secret>` with any casing of the scheme, or a bare
/// secret. Returns `None` when the header is missing, not text, or empty.
pub fn extract_bearer(headers: &HeaderMap) -> Option<TokenSecret> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();

    let secret = match value.get(..6) {
        Some(scheme)
            if scheme.eq_ignore_ascii_case("bearer")
                && value[6..].chars().next().map_or(true, char::is_whitespace) =>
        {
            value[6..].trim()
        }
        _ => value,
    };

    if secret.is_empty() {
        None
    } else {
        Some(TokenSecret::from_presented(secret.to_string()))
    }
}

/// Middleware that admits only requests carrying a live token.
///
/// Every failure reaches the caller as the same 401. Timeouts and store
/// failures are logged separately from ordinary rejections.
pub async fn require_auth(
    State(relay): State<Arc<WaveRelay>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let secret = extract_bearer(req.headers()).ok_or_else(|| {
        tracing::debug!("Missing authorization header");
        ApiError::unauthenticated("Missing authorization header")
    })?;

    let auth = &relay.config().auth;
    let subject = match with_deadline(auth.validate_timeout(), relay.tokens().validate(&secret)).await
    {
        Ok(subject) => subject,
        Err(e) => {
            log_rejection(&e);
            return Err(ApiError::unauthenticated(INVALID_CREDENTIALS));
        }
    };

    req.extensions_mut().insert(AuthenticatedSubject(subject));
    schedule_activity_update(relay.storage_arc(), subject, auth.activity_timeout());

    Ok(next.run(req).await)
}

fn log_rejection(err: &AuthError) {
    match err {
        AuthError::Unauthenticated { reason } => {
            tracing::debug!(reason, "Rejected credential");
        }
        AuthError::Timeout(deadline) => {
            tracing::warn!("Token validation timed out after {:?}", deadline);
        }
        other => {
            tracing::error!("Token validation failed: {}", other);
        }
    }
}

/// Record account activity without holding up the request.
///
/// Runs detached under its own `timeout`; the update may not complete.
pub fn schedule_activity_update(
    accounts: Arc<dyn AccountStore>,
    subject: SubjectId,
    timeout: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        match tokio::time::timeout(timeout, accounts.touch_account(&subject, unix_millis())).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(subject = ?subject, "Failed to update last-active: {}", e),
            Err(_) => tracing::warn!(subject = ?subject, "Last-active update timed out"),
        }
    })
}
