use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use quay::*;
use std::collections::HashMap;
use std::sync::Arc;

use crate::InMemoryJobStore;

/// A [`JobStore`] operation that [`FaultyJobStore`] can be told to fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Insert,
    Claim,
    Delete,
    Fail,
    MarkFailed,
    Clear,
    Get,
    Counts,
    RequeueStale,
}

/// Wraps an [`InMemoryJobStore`] and returns [`StoreError::Backend`] from
/// chosen operations.
///
/// A failed call never reaches the inner store, so the rows it would have
/// touched are left exactly as they were.
#[derive(Clone, Default)]
pub struct FaultyJobStore {
    inner: InMemoryJobStore,
    faults: Arc<Mutex<HashMap<StoreOp, u32>>>,
}

impl FaultyJobStore {
    pub fn new(inner: InMemoryJobStore) -> Self {
        Self {
            inner,
            faults: Arc::default(),
        }
    }

    /// The wrapped store, for seeding and inspection.
    pub fn inner(&self) -> &InMemoryJobStore {
        &self.inner
    }

    /// Fail the next `times` calls to `op`.
    pub fn fail_next(&self, op: StoreOp, times: u32) {
        *self.faults.lock().entry(op).or_insert(0) += times;
    }

    /// Fail every call to `op` until [`heal`](Self::heal) is called.
    pub fn fail_always(&self, op: StoreOp) {
        self.faults.lock().insert(op, u32::MAX);
    }

    /// Drop every pending fault.
    pub fn heal(&self) {
        self.faults.lock().clear();
    }

    fn check(&self, op: StoreOp) -> Result<(), StoreError> {
        let mut faults = self.faults.lock();
        match faults.get_mut(&op) {
            Some(remaining) if *remaining > 0 => {
                if *remaining != u32::MAX {
                    *remaining -= 1;
                }
                Err(StoreError::Backend(format!("injected {op:?} failure")))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl JobStore for FaultyJobStore {
    async fn insert(&self, row: &JobRow) -> Result<(), StoreError> {
        self.check(StoreOp::Insert)?;
        self.inner.insert(row).await
    }

    async fn claim(
        &self,
        limit: usize,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<JobRow>, StoreError> {
        self.check(StoreOp::Claim)?;
        self.inner.claim(limit, max_attempts, now).await
    }

    async fn delete(&self, id: JobId) -> Result<bool, StoreError> {
        self.check(StoreOp::Delete)?;
        self.inner.delete(id).await
    }

    async fn fail(
        &self,
        id: JobId,
        max_attempts: u32,
        retry_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Option<JobStatus>, StoreError> {
        self.check(StoreOp::Fail)?;
        self.inner.fail(id, max_attempts, retry_at, now).await
    }

    async fn mark_failed(&self, id: JobId, now: DateTime<Utc>) -> Result<bool, StoreError> {
        self.check(StoreOp::MarkFailed)?;
        self.inner.mark_failed(id, now).await
    }

    async fn clear(&self) -> Result<u64, StoreError> {
        self.check(StoreOp::Clear)?;
        self.inner.clear().await
    }

    async fn get(&self, id: JobId) -> Result<Option<JobRow>, StoreError> {
        self.check(StoreOp::Get)?;
        self.inner.get(id).await
    }

    async fn counts(&self) -> Result<StatusCounts, StoreError> {
        self.check(StoreOp::Counts)?;
        self.inner.counts().await
    }

    async fn requeue_stale(
        &self,
        stale_before: DateTime<Utc>,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<ReapOutcome, StoreError> {
        self.check(StoreOp::RequeueStale)?;
        self.inner
            .requeue_stale(stale_before, max_attempts, now)
            .await
    }
}
