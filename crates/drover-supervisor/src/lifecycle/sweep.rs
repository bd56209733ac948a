//! Periodic liveness sweep for agents whose process died unobserved.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::supervisor::Supervisor;
use crate::storage::AgentStore;

/// Spawn a task that calls [`Supervisor::sweep`] every `interval` until
/// `shutdown` changes.
pub fn spawn_liveness_sweep<S: AgentStore>(
    supervisor: Supervisor<S>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.tick().await; // Skip first immediate tick

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    match supervisor.sweep().await {
                        Ok(reaped) if reaped.is_empty() => debug!("Liveness sweep found nothing"),
                        Ok(reaped) => info!(count = reaped.len(), "Liveness sweep failed dead agents"),
                        Err(e) => warn!(error = %e, "Liveness sweep failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("Liveness sweep shutting down");
                    return;
                }
            }
        }
    })
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::lifecycle::SupervisorOptions;
    use crate::storage::Database;
    use drover_core::config::Config;

    #[tokio::test]
    async fn stops_on_shutdown() {
        let db = Database::open_in_memory().await.unwrap();
        let supervisor = Supervisor::new(db, SupervisorOptions::from_config(&Config::default()));
        let (tx, rx) = watch::channel(false);

        let handle = spawn_liveness_sweep(supervisor, Duration::from_millis(10), rx);
        tokio::time::sleep(Duration::from_millis(35)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
