//! Prometheus metrics endpoint.

use crate::server::WaveRelay;
use axum::{http::header::CONTENT_TYPE, response::IntoResponse, Extension};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Prometheus metrics handler.
///
/// Gauges describe current state; counters are monotonic since startup.
pub async fn metrics_handler(Extension(relay): Extension<Arc<WaveRelay>>) -> impl IntoResponse {
    let m = relay.metrics();

    // Gauges
    let general_keys = relay.rate_limits().general.key_count();
    let auth_keys = relay.rate_limits().auth.key_count();
    let retired = relay.tokens().retired_len();

    // Counters
    let requests = m.requests_total.load(Ordering::Relaxed);
    let registered = m.accounts_registered.load(Ordering::Relaxed);
    let issued = m.tokens_issued.load(Ordering::Relaxed);
    let refreshed = m.tokens_refreshed.load(Ordering::Relaxed);
    let revoked = m.tokens_revoked.load(Ordering::Relaxed);
    let auth_failures = m.auth_failures.load(Ordering::Relaxed);
    let rate_limits = m.rate_limit_hits.load(Ordering::Relaxed);
    let errors = m.errors_total.load(Ordering::Relaxed);

    // Storage stats (best effort)
    let tokens_stored = relay.storage().count_tokens().await.unwrap_or(0);
    let accounts_stored = relay.storage().count_accounts().await.unwrap_or(0);

    let body = format!(
        r#"# HELP wave_relay_info Server information
# TYPE wave_relay_info gauge
wave_relay_info{{version="{version}"}} 1

# HELP wave_relay_tokens_stored Tokens currently in the database
# TYPE wave_relay_tokens_stored gauge
wave_relay_tokens_stored {tokens_stored}

# HELP wave_relay_accounts_stored Accounts currently in the database
# TYPE wave_relay_accounts_stored gauge
wave_relay_accounts_stored {accounts_stored}

# HELP wave_relay_retired_tokens Refreshed tokens awaiting deletion
# TYPE wave_relay_retired_tokens gauge
wave_relay_retired_tokens {retired}

# HELP wave_relay_limiter_keys Client keys tracked per limiter
# TYPE wave_relay_limiter_keys gauge
wave_relay_limiter_keys{{limiter="general"}} {general_keys}
wave_relay_limiter_keys{{limiter="auth"}} {auth_keys}

# HELP wave_relay_requests_total HTTP requests admitted
# TYPE wave_relay_requests_total counter
wave_relay_requests_total {requests}

# HELP wave_relay_accounts_registered_total Accounts registered
# TYPE wave_relay_accounts_registered_total counter
wave_relay_accounts_registered_total {registered}

# HELP wave_relay_tokens_issued_total Tokens issued by register and login
# TYPE wave_relay_tokens_issued_total counter
wave_relay_tokens_issued_total {issued}

# HELP wave_relay_tokens_refreshed_total Tokens exchanged by refresh
# TYPE wave_relay_tokens_refreshed_total counter
wave_relay_tokens_refreshed_total {refreshed}

# HELP wave_relay_tokens_revoked_total Tokens revoked
# TYPE wave_relay_tokens_revoked_total counter
wave_relay_tokens_revoked_total {revoked}

# HELP wave_relay_auth_failures_total Requests rejected as unauthenticated
# TYPE wave_relay_auth_failures_total counter
wave_relay_auth_failures_total {auth_failures}

# HELP wave_relay_rate_limit_hits_total Total rate limit rejections
# TYPE wave_relay_rate_limit_hits_total counter
wave_relay_rate_limit_hits_total {rate_limits}

# HELP wave_relay_errors_total Requests that failed with an internal error
# TYPE wave_relay_errors_total counter
wave_relay_errors_total {errors}
"#,
        version = env!("CARGO_PKG_VERSION"),
    );

    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}
