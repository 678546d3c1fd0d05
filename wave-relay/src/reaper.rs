//! Background reaper for expired tokens.
//!
//! Runs periodically to delete tokens past their expiry, independent of
//! request traffic.

use crate::config::CleanupConfig;
use crate::tokens::TokenService;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

/// Spawn the reaper task.
///
/// The task runs until `cancel` fires. A failed sweep is logged and retried
/// on the next tick.
pub fn spawn_reaper(
    tokens: Arc<TokenService>,
    config: CleanupConfig,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if !config.enabled {
            tracing::info!("Token reaper disabled");
            return;
        }

        let interval_secs = config.interval_secs;
        if interval_secs == 0 {
            tracing::error!("Token reaper not started: interval must be non-zero");
            return;
        }
        tracing::info!("Token reaper started (interval: {}s)", interval_secs);

        run_reaper(&tokens, Duration::from_secs(interval_secs), &cancel).await;

        tracing::info!("Token reaper stopped");
    })
}

async fn run_reaper(tokens: &TokenService, period: Duration, cancel: &CancellationToken) {
    let mut timer = interval(period);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = timer.tick() => {
                match tokens.sweep_expired().await {
                    Ok(deleted) => {
                        if deleted > 0 {
                            tracing::info!("Reaper: deleted {} expired tokens", deleted);
                        } else {
                            tracing::debug!("Reaper: no expired tokens");
                        }
                    }
                    Err(e) => {
                        tracing::error!("Reaper sweep failed, retrying next tick: {}", e);
                    }
                }
            }
        }
    }
}
