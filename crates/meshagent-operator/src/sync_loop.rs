//! Periodic desired-state sync
//!
//! Runs one pass per tick until cancelled. A failed pass is logged and the
//! next tick tries again from scratch; passes never overlap.

use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use meshagent_desired_state::DesiredStateSync;

/// Run `sync` every `interval` until `cancel` fires; returns the number of
/// passes attempted
pub async fn run_sync_loop(
    sync: DesiredStateSync,
    interval: Duration,
    cancel: CancellationToken,
) -> usize {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut passes = 0;

    info!(interval_secs = interval.as_secs(), "desired-state sync started");
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                passes += 1;
                match sync.run_once().await {
                    Ok(report) if report.is_noop() => debug!("desired state unchanged"),
                    Ok(report) => info!(
                        applied = report.applied.len(),
                        deleted = report.deleted.len(),
                        "desired state converged"
                    ),
                    Err(e) => warn!(
                        error = %e,
                        retryable = e.is_retryable(),
                        "desired-state pass failed, retrying next tick"
                    ),
                }
            }
        }
    }

    info!(passes, "desired-state sync stopped");
    passes
}
