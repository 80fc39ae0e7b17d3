// Periodic re-dispatch of queued tasks
//
// Ticks never overlap: a pass decides every claim before the interval is
// polled again, and ticks missed in the meantime are skipped. Runs started
// by a pass continue in the background.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::coordinator::Coordinator;

/// Handle to a running polling loop
pub struct Poller {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Poller {
    /// Stop after the pass in flight, if any, has finished
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            tracing::error!(error = %e, "Polling loop ended abnormally");
        }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Coordinator {
    /// Start polling the queue every `period`, first tick after one period
    pub fn start_polling(self: &Arc<Self>, period: Duration) -> Poller {
        let cancel = CancellationToken::new();
        let coordinator = Arc::clone(self);
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tracing::info!(interval_ms = period.as_millis() as u64, "Task polling started");

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        match coordinator.poll_once().await {
                            Ok(0) => {}
                            Ok(count) => tracing::debug!(count, "Polled queued tasks"),
                            Err(e) => tracing::warn!(error = %e, "Polling pass failed"),
                        }
                    }
                }
            }

            tracing::info!("Task polling stopped");
        });

        Poller { cancel, handle }
    }

    /// Stop a polling loop started with [`Coordinator::start_polling`]
    pub async fn stop_polling(&self, poller: Poller) {
        poller.stop().await;
    }
}
