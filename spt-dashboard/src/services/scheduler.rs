//! Periodic background refresh

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::refresh_coordinator::{RefreshCoordinator, RefreshMode};

/// Spawn a task that refreshes every `period` until `cancel` fires.
///
/// The first refresh runs one period after start. A refresh that overruns
/// its slot delays the next tick instead of bunching up.
pub fn spawn_refresh_scheduler(
    coordinator: Arc<RefreshCoordinator>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(period_secs = period.as_secs(), "Refresh scheduler started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = timer.tick() => {
                    match coordinator.trigger_data_refresh(RefreshMode::Propagate).await {
                        Ok(snapshot) => info!(
                            last_updated = snapshot.last_updated.as_deref().unwrap_or(""),
                            "Scheduled refresh completed"
                        ),
                        Err(e) => error!(error = %e, "Scheduled refresh failed"),
                    }
                }
            }
        }

        info!("Refresh scheduler stopped");
    })
}
