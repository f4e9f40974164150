//! Periodic eviction of in-flight requests that never finished.
//!
//! A transaction can vanish without either a completion or an error event
//! (for example when the host drops it internally). The sweeper bounds the
//! in-flight table by asking the relay to evict anything older than
//! [`SweeperConfig::max_age_ms`] every [`SweeperConfig::interval_ms`].

use crate::config::SweeperConfig;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, info};

/// Handle to a running sweeper task.
pub struct SweeperHandle {
    stop_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for its task to exit.
    pub async fn stop(mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.task.await;
    }
}

/// Spawn the sweeper. `on_tick` runs once per period, never immediately.
///
/// Returns `None` when sweeping is disabled.
pub fn spawn<F>(config: &SweeperConfig, mut on_tick: F) -> Option<SweeperHandle>
where
    F: FnMut() + Send + 'static,
{
    if !config.enabled {
        info!("stale request sweeper is disabled, skipping");
        return None;
    }

    let period = config.interval();
    info!(
        interval_ms = config.interval_ms,
        max_age_ms = config.max_age_ms,
        "starting stale request sweeper"
    );

    let (stop_tx, mut stop_rx) = oneshot::channel();
    let task = tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = ticker.tick() => on_tick(),
                _ = &mut stop_rx => break,
            }
        }
        debug!("stale request sweeper stopped");
    });

    Some(SweeperHandle {
        stop_tx: Some(stop_tx),
        task,
    })
}
