//! Idle session reaper.
//!
//! Carrier status callbacks are best-effort; a call that dies without a
//! terminal callback would otherwise pin its session in memory forever. The
//! reaper sweeps the store on a fixed interval and evicts sessions idle past
//! the configured timeout.

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use haven_core::config::CallFlowConfig;
use tokio::sync::broadcast;

use crate::subsystems::sessions::CallSessionStore;

pub async fn run_reaper_loop(
    store: Arc<CallSessionStore>,
    config: CallFlowConfig,
    mut shutdown: broadcast::Receiver<()>,
) {
    let interval = Duration::from_secs(config.reaper_interval_seconds);
    let idle_for = ChronoDuration::minutes(config.session_idle_timeout_minutes as i64);

    tracing::info!(
        interval_seconds = config.reaper_interval_seconds,
        idle_timeout_minutes = config.session_idle_timeout_minutes,
        "Session reaper started"
    );

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                let evicted = store.evict_idle(idle_for).await;
                if evicted > 0 {
                    tracing::info!(evicted, "Reaper evicted idle sessions");
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Session reaper shutting down");
                break;
            }
        }
    }
}
