//! Periodic "ready tasks" poller.
//!
//! Batches go out on a capacity-1 channel so backpressure is immediate: the
//! pool either picks a batch up, or it is dropped and the next tick
//! supersedes it. Cancellation aborts cleanly without error logging.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::types::ErrorLog;
use aether_core::worksource::WorkSource;
use aether_protocol::TaskInfo;

pub async fn run(
    work: Arc<dyn WorkSource>,
    interval: Duration,
    tx: mpsc::Sender<Vec<TaskInfo>>,
    errors: Arc<ErrorLog>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(event = "daemon.poller.cancelled");
                return;
            }
            _ = ticker.tick() => {}
        }

        let batch = match work.ready().await {
            Ok(batch) => batch,
            Err(e) => {
                warn!(event = "daemon.poller.ready_failed", error = %e);
                errors.push("poll", &e);
                continue;
            }
        };
        if batch.is_empty() {
            continue;
        }

        match tx.try_send(batch) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                // Pool busy; this batch is superseded by the next tick
                debug!(event = "daemon.poller.batch_superseded");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(event = "daemon.poller.channel_closed");
                return;
            }
        }
    }
}
