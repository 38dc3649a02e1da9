use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use quay::*;
use std::collections::HashMap;
use std::sync::Arc;

/// In-memory [`JobStore`].
///
/// Each operation runs under a single mutex, which gives the same
/// guarantees as the Postgres claim: no row is ever handed to two callers.
#[derive(Clone, Default)]
pub struct InMemoryJobStore {
    jobs: Arc<Mutex<HashMap<JobId, JobRow>>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }

    /// All rows, oldest id first.
    pub fn rows(&self) -> Vec<JobRow> {
        let mut rows: Vec<_> = self.jobs.lock().values().cloned().collect();
        rows.sort_by_key(|row| row.id);
        rows
    }

    /// Insert a row as-is, bypassing the queue's codec.
    pub fn insert_row(&self, row: JobRow) {
        self.jobs.lock().insert(row.id, row);
    }

    /// Move a row's `updated_at` into the past.
    pub fn backdate(&self, id: JobId, by: chrono::Duration) -> bool {
        match self.jobs.lock().get_mut(&id) {
            Some(row) => {
                row.updated_at -= by;
                true
            }
            None => false,
        }
    }

    fn record_failure(
        row: &mut JobRow,
        max_attempts: u32,
        retry_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> JobStatus {
        row.failed_attempts += 1;
        row.status = JobStatus::after_failure(row.failed_attempts, max_attempts);
        if row.status == JobStatus::Queued {
            if let Some(at) = retry_at {
                row.scheduled_for = at;
            }
        }
        row.updated_at = now;
        row.status
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, row: &JobRow) -> Result<(), StoreError> {
        let mut jobs = self.jobs.lock();
        if jobs.contains_key(&row.id) {
            return Err(StoreError::Backend(format!("duplicate job id {}", row.id)));
        }
        jobs.insert(row.id, row.clone());
        Ok(())
    }

    async fn claim(
        &self,
        limit: usize,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<JobRow>, StoreError> {
        let mut jobs = self.jobs.lock();

        let mut due: Vec<(DateTime<Utc>, JobId)> = jobs
            .values()
            .filter(|row| row.is_claimable(now, max_attempts))
            .map(|row| (row.scheduled_for, row.id))
            .collect();
        due.sort();
        due.truncate(limit);

        let mut claimed = Vec::with_capacity(due.len());
        for (_, id) in due {
            if let Some(row) = jobs.get_mut(&id) {
                row.status = JobStatus::Running;
                row.updated_at = now;
                claimed.push(row.clone());
            }
        }
        Ok(claimed)
    }

    async fn delete(&self, id: JobId) -> Result<bool, StoreError> {
        Ok(self.jobs.lock().remove(&id).is_some())
    }

    async fn fail(
        &self,
        id: JobId,
        max_attempts: u32,
        retry_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Option<JobStatus>, StoreError> {
        let mut jobs = self.jobs.lock();
        Ok(jobs
            .get_mut(&id)
            .map(|row| Self::record_failure(row, max_attempts, retry_at, now)))
    }

    async fn mark_failed(&self, id: JobId, now: DateTime<Utc>) -> Result<bool, StoreError> {
        match self.jobs.lock().get_mut(&id) {
            Some(row) => {
                row.status = JobStatus::Failed;
                row.updated_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn clear(&self) -> Result<u64, StoreError> {
        let mut jobs = self.jobs.lock();
        let removed = jobs.len() as u64;
        jobs.clear();
        Ok(removed)
    }

    async fn get(&self, id: JobId) -> Result<Option<JobRow>, StoreError> {
        Ok(self.jobs.lock().get(&id).cloned())
    }

    async fn counts(&self) -> Result<StatusCounts, StoreError> {
        let mut counts = StatusCounts::default();
        for row in self.jobs.lock().values() {
            counts.add(row.status, 1);
        }
        Ok(counts)
    }

    async fn requeue_stale(
        &self,
        stale_before: DateTime<Utc>,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<ReapOutcome, StoreError> {
        let mut outcome = ReapOutcome::default();
        for row in self.jobs.lock().values_mut() {
            if row.status != JobStatus::Running || row.updated_at >= stale_before {
                continue;
            }
            match Self::record_failure(row, max_attempts, None, now) {
                JobStatus::Failed => outcome.failed += 1,
                _ => outcome.requeued += 1,
            }
        }
        if outcome.total() > 0 {
            tracing::debug!(
                requeued = outcome.requeued,
                failed = outcome.failed,
                "in-memory store reaped stale jobs"
            );
        }
        Ok(outcome)
    }
}
