//! Admission middleware backed by the sliding-window limiters.

use super::response::ApiError;
use crate::limits::SlidingWindowLimiter;
use crate::server::WaveRelay;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Partition key for a request: the client address.
///
/// Prefers the first `X-Forwarded-For` hop, then `X-Real-IP`, then the
/// socket peer.
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = real_ip {
        return ip.to_string();
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn request_key(req: &Request) -> String {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    client_key(req.headers(), peer)
}

fn admit(relay: &WaveRelay, limiter: &SlidingWindowLimiter, key: &str) -> Result<(), ApiError> {
    limiter.check(key).map_err(|e| {
        relay.metrics().rate_limit_hits.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            key,
            limit = limiter.limit(),
            window_secs = limiter.window().as_secs(),
            "Rate limit exceeded: {}",
            e
        );
        ApiError::from(e)
    })
}

/// General limiter, applied to every route.
///
/// Also tallies the request, auth-failure and error counters from the
/// final response status.
pub async fn general_limit(
    State(relay): State<Arc<WaveRelay>>,
    req: Request,
    next: Next,
) -> Response {
    let key = request_key(&req);
    if let Err(e) = admit(&relay, &relay.rate_limits().general, &key) {
        return e.into_response();
    }

    let metrics = relay.metrics();
    metrics.requests_total.fetch_add(1, Ordering::Relaxed);

    let response = next.run(req).await;

    let status = response.status();
    if status == axum::http::StatusCode::UNAUTHORIZED {
        metrics.auth_failures.fetch_add(1, Ordering::Relaxed);
    } else if status.is_server_error() {
        metrics.errors_total.fetch_add(1, Ordering::Relaxed);
    }

    response
}

/// Stricter limiter for credential endpoints.
pub async fn auth_limit(
    State(relay): State<Arc<WaveRelay>>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let key = request_key(&req);
    admit(&relay, &relay.rate_limits().auth, &key)?;
    Ok(next.run(req).await)
}
