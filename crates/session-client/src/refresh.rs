//! Proactive background token refresh
//!
//! Spawns a periodic task that refreshes the session credential before it
//! expires, so most requests never see the expired signal. The task goes
//! through the same coordinator as request-driven refreshes and never
//! races them: a tick that finds a refresh in flight does nothing.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::coordinator::RefreshCoordinator;

/// Spawn a background task that proactively refreshes an expiring credential.
///
/// Runs every `interval` and refreshes when the credential expires within
/// `threshold`. A transient refresh failure leaves the session in place for
/// the next tick; a rejected refresh token ends the session.
///
/// Returns a `JoinHandle` for the spawned task.
pub fn spawn_refresh_task(
    coordinator: Arc<RefreshCoordinator>,
    interval: Duration,
    threshold: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Skip the immediate first tick; the credential was just loaded
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if coordinator.refresh_if_expiring(threshold).await {
                debug!(cycle = coordinator.cycles(), "proactive refresh cycle finished");
            }
        }
    })
}
