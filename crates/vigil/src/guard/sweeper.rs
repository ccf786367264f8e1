//! Background sweeper that keeps the guard's map and the session store from
//! growing without bound.

use std::sync::Arc;
use std::time::Duration;

use super::Guard;
use crate::auth::SessionStore;

/// Periodically evicts idle guard entries and expired sessions until shutdown
/// is signalled
pub async fn sweeper_worker(
    guard: Arc<Guard>,
    sessions: Arc<dyn SessionStore>,
    interval: Duration,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    tracing::info!(interval_secs = interval.as_secs(), "🧹 Guard sweeper started");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = guard.now();
                let removed = guard.sweep(now);
                if removed > 0 {
                    tracing::debug!(removed, remaining = guard.len(), "Swept idle guard entries");
                }
                match sessions.sweep(now).await {
                    Ok(0) => {}
                    Ok(expired) => tracing::debug!(expired, "Swept expired sessions"),
                    Err(e) => tracing::warn!(error = %e, "Session sweep failed"),
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("🧹 Guard sweeper shutting down...");
                break;
            }
        }
    }
}
