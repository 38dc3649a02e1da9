use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::job::{JobId, JobRow, JobStatus};

/// Persistence contract behind a [`Queue`](crate::queue::Queue).
///
/// Every method must be a single atomic unit of work against the backend.
/// In particular `claim` must never hand the same row to two callers and must
/// not wait on rows another claim has locked; it skips them instead.
/// Missing rows are never an error.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new row.
    async fn insert(&self, row: &JobRow) -> Result<(), StoreError>;

    /// Claim up to `limit` rows that are `Queued`, due at `now` and below
    /// `max_attempts` failures, oldest `scheduled_for` first. Claimed rows
    /// become `Running` with `updated_at = now` and are returned.
    async fn claim(
        &self,
        limit: usize,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<JobRow>, StoreError>;

    /// Delete a row. Returns whether it existed.
    async fn delete(&self, id: JobId) -> Result<bool, StoreError>;

    /// Record one failed attempt.
    ///
    /// Increments `failed_attempts` and sets the status from the new count:
    /// `Queued` below `max_attempts`, `Failed` otherwise. When the job is
    /// re-queued and `retry_at` is given, `scheduled_for` moves to it.
    /// Returns the new status, or `None` if the row does not exist.
    async fn fail(
        &self,
        id: JobId,
        max_attempts: u32,
        retry_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Option<JobStatus>, StoreError>;

    /// Force a row into the terminal `Failed` state without counting an attempt.
    async fn mark_failed(&self, id: JobId, now: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Delete every row. Returns the number removed.
    async fn clear(&self) -> Result<u64, StoreError>;

    async fn get(&self, id: JobId) -> Result<Option<JobRow>, StoreError>;

    /// Row counts per status.
    async fn counts(&self) -> Result<StatusCounts, StoreError>;

    /// Treat `Running` rows last touched before `stale_before` as failed
    /// attempts, applying the same threshold rule as [`JobStore::fail`].
    async fn requeue_stale(
        &self,
        stale_before: DateTime<Utc>,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<ReapOutcome, StoreError>;
}

/// Number of rows in each status.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub queued: u64,
    pub running: u64,
    pub failed: u64,
}

impl StatusCounts {
    pub fn total(&self) -> u64 {
        self.queued + self.running + self.failed
    }

    pub fn add(&mut self, status: JobStatus, count: u64) {
        match status {
            JobStatus::Queued => self.queued += count,
            JobStatus::Running => self.running += count,
            JobStatus::Failed => self.failed += count,
        }
    }
}

/// Result of a stale-job sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReapOutcome {
    /// Stale jobs put back in the queue.
    pub requeued: u64,
    /// Stale jobs that ran out of attempts.
    pub failed: u64,
}

impl ReapOutcome {
    pub fn total(&self) -> u64 {
        self.requeued + self.failed
    }
}

#[async_trait]
impl<S: JobStore + ?Sized> JobStore for std::sync::Arc<S> {
    async fn insert(&self, row: &JobRow) -> Result<(), StoreError> {
        (**self).insert(row).await
    }

    async fn claim(
        &self,
        limit: usize,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<JobRow>, StoreError> {
        (**self).claim(limit, max_attempts, now).await
    }

    async fn delete(&self, id: JobId) -> Result<bool, StoreError> {
        (**self).delete(id).await
    }

    async fn fail(
        &self,
        id: JobId,
        max_attempts: u32,
        retry_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Option<JobStatus>, StoreError> {
        (**self).fail(id, max_attempts, retry_at, now).await
    }

    async fn mark_failed(&self, id: JobId, now: DateTime<Utc>) -> Result<bool, StoreError> {
        (**self).mark_failed(id, now).await
    }

    async fn clear(&self) -> Result<u64, StoreError> {
        (**self).clear().await
    }

    async fn get(&self, id: JobId) -> Result<Option<JobRow>, StoreError> {
        (**self).get(id).await
    }

    async fn counts(&self) -> Result<StatusCounts, StoreError> {
        (**self).counts().await
    }

    async fn requeue_stale(
        &self,
        stale_before: DateTime<Utc>,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<ReapOutcome, StoreError> {
        (**self).requeue_stale(stale_before, max_attempts, now).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_accumulate_per_status() {
        let mut counts = StatusCounts::default();
        counts.add(JobStatus::Queued, 3);
        counts.add(JobStatus::Running, 2);
        counts.add(JobStatus::Failed, 1);
        counts.add(JobStatus::Queued, 1);
        assert_eq!(counts.queued, 4);
        assert_eq!(counts.running, 2);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.total(), 7);
    }
}
