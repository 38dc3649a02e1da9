use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use serde::{Deserialize, Serialize};

use crate::error::QueueResult;
use crate::job::{Job, JobStatus};
use crate::message::Message;
use crate::queue::Queue;
use crate::runtime::supervisor::ShutdownToken;
use crate::store::JobStore;
use crate::telemetry;

/// Executes jobs pulled from the queue.
///
/// Returning `Ok` completes (deletes) the job; returning `Err` records a
/// failed attempt, and so does a panic. Handlers must tolerate re-execution: a job whose worker
/// dies mid-run can be handed out again by the reaper.
#[async_trait]
pub trait JobHandler<M: Message>: Send + Sync {
    async fn handle(&self, job: &Job<M>) -> anyhow::Result<()>;
}

#[async_trait]
impl<M: Message, H: JobHandler<M> + ?Sized> JobHandler<M> for Arc<H> {
    async fn handle(&self, job: &Job<M>) -> anyhow::Result<()> {
        (**self).handle(job).await
    }
}

/// Exponential delay applied between a failed attempt and the next claim.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryBackoff {
    /// Delay after the first failure, in milliseconds.
    pub base_ms: u64,
    /// Upper bound for the delay, in milliseconds.
    pub max_ms: u64,
}

impl RetryBackoff {
    /// Create a backoff starting at `base_ms` and capped at `max_ms`.
    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        Self { base_ms, max_ms }
    }

    /// Delay before the retry that follows failed attempt number `attempt`
    /// (1-based): `base * 2^(attempt - 1)`, capped at `max`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32);
        let delay = self.base_ms.saturating_mul(1u64 << exp);
        Duration::from_millis(delay.min(self.max_ms))
    }
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self {
            base_ms: 1_000,
            max_ms: 300_000,
        }
    }
}

/// Configuration for individual workers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Identifier used in logs and spans.
    pub worker_id: String,
    /// Maximum jobs claimed per pull.
    pub batch_size: usize,
    /// Sleep between polls when the queue is empty, in milliseconds.
    pub poll_interval_ms: u64,
    /// Sleep after a store error before polling again, in milliseconds.
    pub error_backoff_ms: u64,
    /// Defer retries instead of making failed jobs immediately claimable.
    /// Off unless set.
    pub retry_backoff: Option<RetryBackoff>,
}

impl WorkerConfig {
    /// Create a new worker configuration with the given worker ID.
    pub fn new(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            ..Self::default()
        }
    }

    /// Set the maximum number of jobs claimed per pull. Zero is raised to one.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Set the polling interval.
    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Set the sleep after a store error, in milliseconds.
    pub fn with_error_backoff(mut self, ms: u64) -> Self {
        self.error_backoff_ms = ms;
        self
    }

    /// Defer retries of failed jobs with `backoff`.
    pub fn with_retry_backoff(mut self, backoff: RetryBackoff) -> Self {
        self.retry_backoff = Some(backoff);
        self
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: "default-worker".to_string(),
            batch_size: 1,
            poll_interval_ms: 50,
            error_backoff_ms: 100,
            retry_backoff: None,
        }
    }
}

/// Tally of what a worker did with the jobs it claimed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub completed: u64,
    /// Failed and put back in the queue.
    pub retried: u64,
    /// Failed with no attempts left.
    pub exhausted: u64,
    /// Ran, but the completion or failure could not be written back. These
    /// jobs stay `Running` until a stale sweep reclaims them.
    pub unacknowledged: u64,
}

impl WorkerReport {
    /// Jobs whose outcome was written back to the store.
    pub fn processed(&self) -> u64 {
        self.completed + self.retried + self.exhausted
    }

    pub fn failed(&self) -> u64 {
        self.retried + self.exhausted
    }

    /// Every job that was handed to the handler.
    pub fn attempted(&self) -> u64 {
        self.processed() + self.unacknowledged
    }

    pub(crate) fn merge(&mut self, other: WorkerReport) {
        self.completed += other.completed;
        self.retried += other.retried;
        self.exhausted += other.exhausted;
        self.unacknowledged += other.unacknowledged;
    }
}

/// A pull-execute-acknowledge loop over a shared [`Queue`].
///
/// Workers hold no state beyond their configuration; run as many as needed
/// against the same queue, in one process or several.
pub struct Worker<M: Message, S: JobStore, H: JobHandler<M>> {
    queue: Arc<Queue<M, S>>,
    handler: H,
    config: WorkerConfig,
}

impl<M, S, H> Worker<M, S, H>
where
    M: Message,
    S: JobStore,
    H: JobHandler<M>,
{
    /// Create a worker running `handler` over jobs pulled from `queue`.
    pub fn new(queue: Arc<Queue<M, S>>, handler: H, config: WorkerConfig) -> Self {
        Self {
            queue,
            handler,
            config,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn queue(&self) -> &Arc<Queue<M, S>> {
        &self.queue
    }

    /// Pull one batch and run every job in it.
    ///
    /// Only a failed pull is returned as an error. Once a batch is claimed
    /// every job in it is run; a job whose outcome cannot be written back is
    /// logged and counted in [`WorkerReport::unacknowledged`].
    pub async fn run_once(&self) -> QueueResult<WorkerReport> {
        let jobs = self.queue.pull(self.config.batch_size).await?;
        let mut report = WorkerReport::default();
        for job in &jobs {
            if let Err(err) = self.process(job, &mut report).await {
                report.unacknowledged += 1;
                telemetry::record_stranded_job(job.id.to_string(), "acknowledge", &err);
            }
        }
        Ok(report)
    }

    /// Keep pulling until a pull comes back empty.
    ///
    /// Jobs retried without backoff are immediately claimable again, so this
    /// also runs them through to completion or exhaustion.
    pub async fn drain(&self) -> QueueResult<WorkerReport> {
        let mut total = WorkerReport::default();
        loop {
            let report = self.run_once().await?;
            if report.attempted() == 0 {
                return Ok(total);
            }
            total.merge(report);
        }
    }

    /// Poll until `shutdown` is cancelled.
    ///
    /// The batch in hand is always finished before the loop checks the
    /// token again. Store errors, including unacknowledged jobs, are logged
    /// and the next poll waits `error_backoff_ms`.
    pub async fn run(&self, shutdown: ShutdownToken) -> WorkerReport {
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let error_backoff = Duration::from_millis(self.config.error_backoff_ms);
        let mut total = WorkerReport::default();

        tracing::info!(worker_id = %self.config.worker_id, "worker started");
        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let idle = match self.run_once().await {
                Ok(report) => {
                    total.merge(report);
                    if report.unacknowledged > 0 {
                        Some(error_backoff)
                    } else {
                        (report.attempted() == 0).then_some(poll_interval)
                    }
                }
                Err(err) => {
                    tracing::warn!(worker_id = %self.config.worker_id, "worker poll error: {err}");
                    Some(error_backoff)
                }
            };

            if let Some(wait) = idle {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }
            }
        }

        tracing::info!(
            worker_id = %self.config.worker_id,
            completed = total.completed,
            retried = total.retried,
            exhausted = total.exhausted,
            unacknowledged = total.unacknowledged,
            "worker shutting down"
        );
        total
    }

    async fn process(&self, job: &Job<M>, report: &mut WorkerReport) -> QueueResult<()> {
        let message_type = job.message.message_type();
        let job_id = job.id.to_string();
        let timing = telemetry::record_job_start(&job_id);

        let handled = AssertUnwindSafe(telemetry::instrument_handle(
            &self.config.worker_id,
            &job_id,
            message_type,
            job.attempt(),
            self.handler.handle(job),
        ))
        .catch_unwind()
        .await;
        let result = handled.unwrap_or_else(|panic| {
            let panic_msg = panic_message(&*panic);
            telemetry::record_handler_panic(&job_id, message_type, panic_msg);
            Err(anyhow::anyhow!("job handler panicked: {panic_msg}"))
        });

        let outcome = match result {
            Ok(()) => {
                self.queue.complete(job.id).await?;
                report.completed += 1;
                "completed"
            }
            Err(err) => {
                tracing::warn!(
                    worker_id = %self.config.worker_id,
                    job_id = %job_id,
                    message_type = message_type,
                    attempt = job.attempt(),
                    "job handler failed: {err:#}"
                );
                let status = match self.config.retry_backoff {
                    Some(backoff) => {
                        let delay = chrono::Duration::from_std(backoff.delay_for(job.attempt()))
                            .unwrap_or_else(|_| chrono::Duration::zero());
                        self.queue.retry_at(job.id, Utc::now() + delay).await?
                    }
                    None => self.queue.fail(job.id).await?,
                };
                if status == Some(JobStatus::Failed) {
                    report.exhausted += 1;
                    "exhausted"
                } else {
                    report.retried += 1;
                    "retry"
                }
            }
        };

        telemetry::record_job_end(timing, message_type, outcome);
        telemetry::record_job_finished(message_type, outcome);
        Ok(())
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic payload")
}
