use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

use crate::message::Message;
use crate::queue::Queue;
use crate::runtime::reaper::Reaper;
use crate::runtime::worker::{JobHandler, Worker, WorkerConfig, WorkerReport};
use crate::store::JobStore;

/// Token for signaling graceful shutdown to workers.
#[derive(Clone, Debug)]
pub struct ShutdownToken {
    inner: Arc<ShutdownTokenInner>,
}

#[derive(Debug)]
struct ShutdownTokenInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl ShutdownToken {
    /// Create a new shutdown token.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ShutdownTokenInner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Signal cancellation.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Check if cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Wait until cancelled.
    pub async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent cancel is not missed.
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

impl Default for ShutdownToken {
    fn default() -> Self {
        Self::new()
    }
}

/// A set of workers and an optional reaper sharing one queue and one
/// shutdown token.
pub struct WorkerPool<M: Message, S: JobStore> {
    queue: Arc<Queue<M, S>>,
    shutdown: ShutdownToken,
    shutdown_timeout: Duration,
    worker_handles: Mutex<Vec<JoinHandle<WorkerReport>>>,
    background_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl<M, S> WorkerPool<M, S>
where
    M: Message,
    S: JobStore + 'static,
{
    /// Create an empty pool over `queue`.
    pub fn new(queue: Arc<Queue<M, S>>) -> Self {
        Self {
            queue,
            shutdown: ShutdownToken::new(),
            shutdown_timeout: Duration::from_secs(30),
            worker_handles: Mutex::new(Vec::new()),
            background_handles: Mutex::new(Vec::new()),
        }
    }

    /// How long [`shutdown`](Self::shutdown) waits for each task.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Get a handle to the shared queue.
    pub fn queue(&self) -> Arc<Queue<M, S>> {
        Arc::clone(&self.queue)
    }

    /// Get a clone of the token every pool task watches.
    pub fn shutdown_token(&self) -> ShutdownToken {
        self.shutdown.clone()
    }

    /// Spawn `parallelism` workers running `handler`. Worker ids are
    /// `config.worker_id` suffixed with `-w{i}`.
    pub async fn spawn_workers<H>(&self, handler: Arc<H>, config: WorkerConfig, parallelism: usize)
    where
        H: JobHandler<M> + 'static,
    {
        let mut handles = self.worker_handles.lock().await;
        for i in 0..parallelism {
            let worker_config = WorkerConfig {
                worker_id: format!("{}-w{}", config.worker_id, i),
                ..config.clone()
            };
            let worker = Worker::new(self.queue(), Arc::clone(&handler), worker_config);
            let shutdown = self.shutdown.clone();
            handles.push(tokio::spawn(async move { worker.run(shutdown).await }));
        }
    }

    /// Spawn a reaper that requeues jobs stuck in `Running` for longer than
    /// `stale_after`, sweeping every `interval`.
    pub async fn spawn_reaper(&self, stale_after: chrono::Duration, interval: Duration) {
        let reaper = Reaper::new(self.queue(), stale_after, interval);
        let handle = reaper.spawn(self.shutdown.clone());
        self.background_handles.lock().await.push(handle);
    }

    /// Cancel every task and wait for them, returning the combined report of
    /// the workers that stopped in time.
    pub async fn shutdown(&self) -> WorkerReport {
        tracing::info!("Initiating graceful shutdown of worker pool");
        self.shutdown.cancel();

        let workers = std::mem::take(&mut *self.worker_handles.lock().await);
        let background = std::mem::take(&mut *self.background_handles.lock().await);

        let mut total = WorkerReport::default();
        for handle in workers {
            match tokio::time::timeout(self.shutdown_timeout, handle).await {
                Ok(Ok(report)) => total.merge(report),
                Ok(Err(e)) => tracing::warn!("Worker task failed: {:?}", e),
                Err(_) => tracing::warn!("Worker task timed out during shutdown"),
            }
        }
        for handle in background {
            match tokio::time::timeout(self.shutdown_timeout, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!("Reaper task failed: {:?}", e),
                Err(_) => tracing::warn!("Reaper task timed out during shutdown"),
            }
        }

        tracing::info!("Worker pool shutdown complete");
        total
    }
}
