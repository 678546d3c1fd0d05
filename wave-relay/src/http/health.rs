//! Health check endpoint.

use crate::server::WaveRelay;
use axum::{Extension, Json};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// Global start time for uptime calculation.
static START_TIME: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize the start time (call once at startup).
pub fn init_start_time() {
    START_TIME.get_or_init(Instant::now);
}

/// Health status response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// Overall status: `ok`, or `degraded` when storage is unreachable.
    pub status: String,
    /// Server version.
    pub version: String,
    /// Tokens currently stored (live or awaiting the reaper).
    pub tokens: u64,
    /// Registered accounts.
    pub accounts: u64,
    /// Uptime in seconds.
    pub uptime_seconds: u64,
}

/// Health check handler.
pub async fn health_handler(Extension(relay): Extension<Arc<WaveRelay>>) -> Json<HealthStatus> {
    let uptime = START_TIME
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0);

    let tokens = relay.storage().count_tokens().await;
    let accounts = relay.storage().count_accounts().await;
    let status = if tokens.is_ok() && accounts.is_ok() {
        "ok"
    } else {
        tracing::warn!("Health check could not reach storage");
        "degraded"
    };

    Json(HealthStatus {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        tokens: tokens.unwrap_or(0),
        accounts: accounts.unwrap_or(0),
        uptime_seconds: uptime,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_status_serializes() {
        let status = HealthStatus {
            status: "ok".to_string(),
            version: "0.1.0".to_string(),
            tokens: 42,
            accounts: 15,
            uptime_seconds: 3600,
        };

        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"status\":\"ok\""));
        assert!(json.contains("\"tokens\":42"));
    }
}
