use super::service::BandwidthService;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Background task running one collection cycle per interval.
pub struct CollectionScheduler {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl CollectionScheduler {
    /// Spawns the collection loop. The first cycle runs one `interval` after
    /// start; a cycle that overruns delays the next tick instead of
    /// overlapping with it.
    pub fn start(service: Arc<BandwidthService>, interval: Duration) -> Self {
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(tracking_loop(service, interval, shutdown.child_token()));
        info!(?interval, "Bandwidth tracking started");
        Self { shutdown, task }
    }

    /// Stops the loop and waits for it to exit. A cycle already running is
    /// allowed to finish, including its save.
    pub async fn stop(self) {
        self.shutdown.cancel();
        if let Err(e) = self.task.await {
            error!("Bandwidth tracking task failed: {}", e);
        }
    }
}

async fn tracking_loop(service: Arc<BandwidthService>, interval: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                info!("Bandwidth tracking stopped");
                return;
            }
            _ = ticker.tick() => {
                if let Err(e) = service.collect_once().await {
                    error!("Failed to collect and accumulate bandwidth: {}", e);
                }
            }
        }
    }
}
