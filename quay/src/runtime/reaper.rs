use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::error::QueueResult;
use crate::message::Message;
use crate::queue::Queue;
use crate::runtime::supervisor::ShutdownToken;
use crate::store::{JobStore, ReapOutcome};

/// Periodically reclaims jobs left in `Running` by workers that died.
///
/// A job counts as stale once its `updated_at` is older than `stale_after`.
/// Pick a threshold comfortably above the slowest handler: a job still being
/// worked on when it crosses the line is handed to another worker.
pub struct Reaper<M: Message, S: JobStore> {
    queue: Arc<Queue<M, S>>,
    stale_after: chrono::Duration,
    interval: Duration,
}

impl<M, S> Reaper<M, S>
where
    M: Message,
    S: JobStore + 'static,
{
    /// Create a reaper reclaiming jobs `Running` for longer than `stale_after`.
    pub fn new(queue: Arc<Queue<M, S>>, stale_after: chrono::Duration, interval: Duration) -> Self {
        Self {
            queue,
            stale_after,
            interval,
        }
    }

    pub fn stale_after(&self) -> chrono::Duration {
        self.stale_after
    }

    /// Run a single sweep.
    pub async fn sweep(&self) -> QueueResult<ReapOutcome> {
        self.queue.requeue_stale(self.stale_after).await
    }

    /// Sweep every `interval` until `shutdown` is cancelled.
    pub fn spawn(self, shutdown: ShutdownToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("Reaper shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(self.interval) => {
                        if let Err(err) = self.sweep().await {
                            tracing::warn!("reaper requeue_stale error: {err}");
                        }
                    }
                }
            }
        })
    }
}
