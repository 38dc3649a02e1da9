use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::Instrument;

use crate::config::QueueConfig;
use crate::error::QueueResult;
use crate::job::{Job, JobId, JobRow, JobStatus};
use crate::message::{Message, MessageRegistry};
use crate::store::{JobStore, ReapOutcome, StatusCounts};
use crate::telemetry;

/// The queue engine.
///
/// Holds only the message registry and configuration; every piece of job
/// state lives in the store, so one `Queue` can be shared behind an `Arc` by
/// any number of workers and several processes can point at the same store.
pub struct Queue<M: Message, S: JobStore> {
    registry: MessageRegistry<M>,
    store: S,
    config: QueueConfig,
}

impl<M: Message, S: JobStore> std::fmt::Debug for Queue<M, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .field("store_type", &std::any::type_name::<S>())
            .finish()
    }
}

impl<M: Message, S: JobStore> Queue<M, S> {
    /// Create a queue over `store` accepting the types in `registry`.
    pub fn new(registry: MessageRegistry<M>, store: S, config: QueueConfig) -> QueueResult<Self> {
        config.validate()?;
        Ok(Self {
            registry,
            store,
            config,
        })
    }

    /// Create a queue with the default configuration.
    pub fn with_defaults(registry: MessageRegistry<M>, store: S) -> Self {
        Self {
            registry,
            store,
            config: QueueConfig::default(),
        }
    }

    /// Get the message registry.
    pub fn registry(&self) -> &MessageRegistry<M> {
        &self.registry
    }

    /// Get the underlying job store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Get the queue configuration.
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Failures after which a job stays `Failed`.
    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Enqueue a message for immediate execution.
    pub async fn push(&self, message: &M) -> QueueResult<JobId> {
        self.push_at(message, Utc::now()).await
    }

    /// Enqueue a message that becomes claimable at `scheduled_for`.
    ///
    /// Unregistered message types are rejected before anything is written.
    pub async fn push_at(&self, message: &M, scheduled_for: DateTime<Utc>) -> QueueResult<JobId> {
        let span = telemetry::push_span(message.message_type());
        async move {
            let (message_type, document) = self.registry.encode(message)?;
            let row = JobRow::queued(message_type, document, scheduled_for, Utc::now());
            self.store.insert(&row).await?;

            tracing::Span::current().record("job_id", tracing::field::display(row.id));
            telemetry::record_job_pushed(message_type);
            Ok(row.id)
        }
        .instrument(span)
        .await
    }

    /// Claim up to `n` due jobs and decode them.
    ///
    /// Rows whose payload no longer decodes are failed on the spot instead of
    /// being returned, so every job left `Running` by this call is in the
    /// returned batch. Once the claim has succeeded the batch is always
    /// returned: if failing an undecodable row errors, that row alone stays
    /// `Running` for [`requeue_stale`](Self::requeue_stale).
    pub async fn pull(&self, n: usize) -> QueueResult<Vec<Job<M>>> {
        if n == 0 {
            return Ok(Vec::new());
        }

        let span = telemetry::pull_span(n);
        async move {
            let now = Utc::now();
            let rows = self.store.claim(n, self.config.max_attempts, now).await?;
            tracing::Span::current().record("claimed", rows.len());
            telemetry::record_jobs_claimed(rows.len());

            let mut jobs = Vec::with_capacity(rows.len());
            for row in rows {
                match self.registry.decode(&row.message_type, row.message) {
                    Ok(message) => jobs.push(Job {
                        id: row.id,
                        message,
                        status: row.status,
                        failed_attempts: row.failed_attempts,
                        scheduled_for: row.scheduled_for,
                        created_at: row.created_at,
                    }),
                    Err(err) => {
                        telemetry::record_poisoned_job(
                            row.id.to_string(),
                            &row.message_type,
                            &err.to_string(),
                        );
                        if let Err(store_err) = self.store.mark_failed(row.id, Utc::now()).await {
                            telemetry::record_stranded_job(
                                row.id.to_string(),
                                "mark_failed",
                                &store_err,
                            );
                        }
                    }
                }
            }

            jobs.sort_by(|a, b| a.scheduled_for.cmp(&b.scheduled_for).then(a.id.cmp(&b.id)));
            Ok(jobs)
        }
        .instrument(span)
        .await
    }

    /// Retire a job after successful execution. Deleting a missing job is
    /// not an error.
    pub async fn complete(&self, id: JobId) -> QueueResult<()> {
        let span = telemetry::complete_span(id.to_string());
        async move {
            if !self.store.delete(id).await? {
                tracing::debug!("job already gone");
            }
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Record a failed execution.
    ///
    /// The job goes back to `Queued` while its failure count stays below
    /// `max_attempts`, otherwise it becomes `Failed` for good. Returns the
    /// resulting status, or `None` if the job no longer exists.
    pub async fn fail(&self, id: JobId) -> QueueResult<Option<JobStatus>> {
        self.record_failure(id, None).await
    }

    /// Like [`Queue::fail`], but a re-queued job only becomes claimable again
    /// at `retry_at`. This is the hook for caller-side backoff.
    pub async fn retry_at(
        &self,
        id: JobId,
        retry_at: DateTime<Utc>,
    ) -> QueueResult<Option<JobStatus>> {
        self.record_failure(id, Some(retry_at)).await
    }

    async fn record_failure(
        &self,
        id: JobId,
        retry_at: Option<DateTime<Utc>>,
    ) -> QueueResult<Option<JobStatus>> {
        let span = telemetry::fail_span(id.to_string());
        async move {
            let status = self
                .store
                .fail(id, self.config.max_attempts, retry_at, Utc::now())
                .await?;
            match status {
                Some(status) => {
                    tracing::Span::current().record("status", status.as_str());
                    if status.is_terminal() {
                        tracing::warn!("job exhausted its attempts");
                    }
                }
                None => tracing::debug!("job already gone"),
            }
            Ok(status)
        }
        .instrument(span)
        .await
    }

    /// Delete every job in the store.
    pub async fn clear(&self) -> QueueResult<u64> {
        let removed = self.store.clear().await?;
        tracing::info!(removed = removed, "queue cleared");
        Ok(removed)
    }

    /// Current status of a job, or `None` if it no longer exists.
    pub async fn status(&self, id: JobId) -> QueueResult<Option<JobStatus>> {
        Ok(self.store.get(id).await?.map(|row| row.status))
    }

    /// Fetch the raw stored row.
    pub async fn get(&self, id: JobId) -> QueueResult<Option<JobRow>> {
        Ok(self.store.get(id).await?)
    }

    /// Count jobs per status.
    pub async fn snapshot(&self) -> QueueResult<QueueSnapshot> {
        let counts = self.store.counts().await?;
        Ok(QueueSnapshot::new(Utc::now(), counts))
    }

    /// Reclaim jobs stuck in `Running` for longer than `stale_after`.
    ///
    /// Each one counts as a failed attempt and follows the same threshold as
    /// [`Queue::fail`]. Nothing calls this implicitly; see
    /// [`Reaper`](crate::runtime::Reaper) for a background sweeper.
    pub async fn requeue_stale(&self, stale_after: chrono::Duration) -> QueueResult<ReapOutcome> {
        let span = telemetry::reap_span(stale_after.num_seconds());
        async move {
            let now = Utc::now();
            let outcome = self
                .store
                .requeue_stale(now - stale_after, self.config.max_attempts, now)
                .await?;
            telemetry::record_jobs_reaped(outcome.requeued, outcome.failed);
            Ok(outcome)
        }
        .instrument(span)
        .await
    }
}

/// Snapshot of queue state at a point in time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    /// Timestamp when the snapshot was taken.
    pub sampled_at: DateTime<Utc>,
    /// Jobs waiting to be claimed, due or not.
    pub queued: u64,
    /// Jobs claimed and not yet completed or failed.
    pub running: u64,
    /// Jobs that exhausted their attempts.
    pub failed: u64,
}

impl QueueSnapshot {
    /// Build a snapshot from per-status counts.
    pub fn new(sampled_at: DateTime<Utc>, counts: StatusCounts) -> Self {
        Self {
            sampled_at,
            queued: counts.queued,
            running: counts.running,
            failed: counts.failed,
        }
    }

    /// Total number of jobs across all statuses.
    pub fn total(&self) -> u64 {
        self.queued + self.running + self.failed
    }
}
