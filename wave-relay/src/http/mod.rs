//! HTTP surface for wave-relay.
//!
//! Credential and account endpoints under `/api/v1`, plus health and
//! metrics. Every route passes the general limiter; credential endpoints
//! also pass the auth limiter; account endpoints require a live token.

mod account;
mod auth;
pub mod health;
mod limit;
mod metrics;
pub mod response;

use crate::auth::require_auth;
use crate::server::WaveRelay;
use axum::{
    middleware::from_fn_with_state,
    routing::{delete, get, post},
    Extension, Router,
};
use std::sync::Arc;

pub use health::HealthStatus;
pub use limit::client_key;
pub use response::{ApiError, ApiResponse};

/// Build the HTTP router with all endpoints.
pub fn build_router(relay: Arc<WaveRelay>) -> Router {
    let credentials = Router::new()
        .route("/api/v1/auth/register", post(auth::register))
        .route("/api/v1/auth/login", post(auth::login))
        .route("/api/v1/auth/refresh", post(auth::refresh))
        .route("/api/v1/auth/logout", post(auth::logout))
        .route_layer(from_fn_with_state(relay.clone(), limit::auth_limit));

    let protected = Router::new()
        .route("/api/v1/auth/logout-all", post(auth::logout_all))
        .route("/api/v1/me", get(account::me))
        .route("/api/v1/keys/private", get(account::private_key))
        .route("/api/v1/keys/public", get(account::public_key))
        .route("/api/v1/account", delete(account::delete_account))
        .route_layer(from_fn_with_state(relay.clone(), require_auth));

    let mut ops = Router::new().route("/health", get(health::health_handler));
    if relay.config().http.metrics_enabled {
        ops = ops.route("/metrics", get(metrics::metrics_handler));
    }

    Router::new()
        .merge(credentials)
        .merge(protected)
        .merge(ops)
        .layer(from_fn_with_state(relay.clone(), limit::general_limit))
        .layer(Extension(relay))
}
