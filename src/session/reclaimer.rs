//! Idle-session reclamation task.
//!
//! Runs for the lifetime of the process, scanning the registry on a fixed
//! period and terminating sessions whose owner has gone idle. The periodic
//! sleep is cancellation-aware so the process can exit promptly.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::session::registry::SessionRegistry;

/// Spawn the reclamation background task.
///
/// Each tick calls [`SessionRegistry::reclaim_idle`]; the scan itself never
/// holds the registry lock across its sleeps, so concurrent session traffic
/// proceeds undisturbed.
#[must_use]
pub fn spawn_reclamation_task(
    registry: Arc<SessionRegistry>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("reclamation task shutting down");
                    break;
                }
                _ = interval.tick() => {
                    registry.reclaim_idle().await;
                }
            }
        }
    })
}
